//! CORS wrapping for the HTTP and JSON-RPC gateways (§6 `corsOptions`),
//! generalizing the original's `github.com/rs/cors` wrap of
//! `startHTTP1APIGateway`/`startJSONRPC2` into a plain header-setting pass
//! over hyper's `Response` — no CORS crate appears anywhere in this
//! codebase's dependency stack, so this mirrors what that crate does for
//! the subset of options `CorsOptions` exposes.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Method, Response, StatusCode};

use irpc_server::CorsOptions;

/// `true` for an OPTIONS request carrying `Access-Control-Request-Method`
/// — the preflight the browser sends ahead of the real request.
pub(crate) fn is_preflight(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::OPTIONS && headers.contains_key("access-control-request-method")
}

pub(crate) fn preflight_response(cors: &CorsOptions, headers: &HeaderMap) -> Response<Full<Bytes>> {
    let mut resp = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Full::new(Bytes::new()))
        .unwrap();
    apply(cors, headers, &mut resp);
    if let Ok(v) = HeaderValue::from_str(&cors.allowed_methods.join(", ")) {
        resp.headers_mut().insert("access-control-allow-methods", v);
    }
    if let Ok(v) = HeaderValue::from_str(&cors.allowed_headers.join(", ")) {
        resp.headers_mut().insert("access-control-allow-headers", v);
    }
    if cors.max_age_secs > 0 {
        if let Ok(v) = HeaderValue::from_str(&cors.max_age_secs.to_string()) {
            resp.headers_mut().insert("access-control-max-age", v);
        }
    }
    resp
}

/// Applies the simple-request subset of CORS headers to an already-built
/// response: `Allow-Origin`, `Allow-Credentials`, `Expose-Headers`.
pub(crate) fn apply(cors: &CorsOptions, req_headers: &HeaderMap, resp: &mut Response<Full<Bytes>>) {
    let Some(origin) = req_headers.get("origin").and_then(|v| v.to_str().ok()) else {
        return;
    };
    if !cors.origin_allowed(origin) {
        return;
    }
    let allow_origin = if cors.allowed_origins.iter().any(|o| o == "*") && !cors.allow_credentials {
        "*".to_string()
    } else {
        origin.to_string()
    };
    if let Ok(v) = HeaderValue::from_str(&allow_origin) {
        resp.headers_mut().insert("access-control-allow-origin", v);
    }
    if cors.allow_credentials {
        resp.headers_mut()
            .insert("access-control-allow-credentials", HeaderValue::from_static("true"));
    }
    if !cors.exposed_headers.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&cors.exposed_headers.join(", ")) {
            resp.headers_mut().insert("access-control-expose-headers", v);
        }
    }
}
