//! The raw HTTP gateway (§6, seed scenario 5): `X-IRPC-*` headers carry
//! what the native header/framing would, the body carries the raw
//! serialized payload.

use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Request, Response, StatusCode};
use thiserror::Error;

use irpc_proto::{Codec, SerializeType};
use irpc_server::Server;

pub(crate) mod header_name {
    pub(crate) const VERSION: &str = "x-irpc-version";
    pub(crate) const MESSAGE_ID: &str = "x-irpc-messageid";
    pub(crate) const HEARTBEAT: &str = "x-irpc-heartbeat";
    pub(crate) const ONEWAY: &str = "x-irpc-oneway";
    pub(crate) const STATUS_TYPE: &str = "x-irpc-messagestatustype";
    pub(crate) const SERIALIZE_TYPE: &str = "x-irpc-serializetype";
    pub(crate) const SERVICE_PATH: &str = "x-irpc-servicepath";
    pub(crate) const SERVICE_METHOD: &str = "x-irpc-servicemethod";
    pub(crate) const META: &str = "x-irpc-meta";
    pub(crate) const ERROR_MESSAGE: &str = "x-irpc-errormessage";
}

/// Errors distinct enough from a plain `ServiceError` to deserve their own
/// type: they're gateway translation failures, not handler failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("unauthorized")]
    Unauthorized,
}

pub(crate) async fn dispatch(server: &Server, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let headers = req.headers().clone();
    let resp = dispatch_inner(server, req, &headers).await;
    echo_message_id(resp, &headers)
}

async fn dispatch_inner(
    server: &Server,
    req: Request<Incoming>,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    if header_flag(headers, header_name::HEARTBEAT) {
        let body = req.into_body().collect().await.map(|c| c.to_bytes()).unwrap_or_default();
        let mut resp = plain_response(StatusCode::OK, body);
        set_header(&mut resp, header_name::HEARTBEAT, "true");
        return resp;
    }

    let request_meta = parse_meta(headers);
    let token = bearer_token(headers)
        .or_else(|| meta_lookup(&request_meta, irpc_proto::meta_key::AUTH_KEY).map(str::to_string));
    if !server.check_auth(token.as_deref().unwrap_or("")) {
        return error_response(StatusCode::UNAUTHORIZED, GatewayError::Unauthorized.to_string());
    }

    // §6: "/*servicePath" — when the header is absent, the service path is
    // the request's URL path (original: `params.ByName("servicePath")`).
    let service_path = match header_str(headers, header_name::SERVICE_PATH) {
        Some(v) => v.to_string(),
        None => req.uri().path().trim_start_matches('/').to_string(),
    };
    if service_path.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            GatewayError::MissingHeader("X-IRPC-ServicePath").to_string(),
        );
    }
    let Some(service_method) = header_str(headers, header_name::SERVICE_METHOD) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            GatewayError::MissingHeader("X-IRPC-ServiceMethod").to_string(),
        );
    };
    let service_method = service_method.to_string();

    let serialize_type = header_str(headers, header_name::SERIALIZE_TYPE)
        .and_then(|v| v.parse::<u8>().ok())
        .and_then(|bits| SerializeType::from_bits(bits).ok())
        .unwrap_or_default();
    let codec = match Codec::from_serialize_type(serialize_type) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let oneway = header_flag(headers, header_name::ONEWAY);

    let payload = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("failed to read body: {e}")),
    };

    if oneway {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server
                .invoke_with_meta(&service_path, &service_method, codec, &payload, &request_meta)
                .await;
        });
        return plain_response(StatusCode::ACCEPTED, Bytes::new());
    }

    match server
        .invoke_with_meta(&service_path, &service_method, codec, &payload, &request_meta)
        .await
    {
        Ok((reply, response_meta)) => {
            let mut resp = plain_response(StatusCode::OK, Bytes::from(reply));
            set_header(&mut resp, header_name::SERIALIZE_TYPE, &(codec.serialize_type() as u8).to_string());
            set_header(&mut resp, header_name::STATUS_TYPE, "0");
            if !response_meta.is_empty() {
                set_header(&mut resp, header_name::META, &encode_meta(&response_meta));
            }
            resp
        }
        Err(e) => error_response(StatusCode::OK, e.message),
    }
}

fn error_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut resp = plain_response(status, Bytes::new());
    set_header(&mut resp, header_name::STATUS_TYPE, "1");
    set_header(&mut resp, header_name::ERROR_MESSAGE, &message);
    resp
}

fn echo_message_id(mut resp: Response<Full<Bytes>>, headers: &HeaderMap) -> Response<Full<Bytes>> {
    if let Some(id) = headers.get(header_name::MESSAGE_ID) {
        resp.headers_mut().insert(header_name::MESSAGE_ID, id.clone());
    }
    if let Some(v) = headers.get(header_name::VERSION) {
        resp.headers_mut().insert(header_name::VERSION, v.clone());
    }
    resp
}

fn plain_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    Response::builder().status(status).body(Full::new(body)).unwrap()
}

fn set_header(resp: &mut Response<Full<Bytes>>, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        resp.headers_mut().insert(name, v);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Parses the same `k=v&k=v` shape `irpc-selector`'s metadata query
/// strings use, for the `X-IRPC-Meta` header — no URL-encoding crate
/// appears anywhere in this codebase's dependency stack, so this stays a
/// plain split like the selector's own `parse_query_value`.
fn parse_meta(headers: &HeaderMap) -> Vec<(String, String)> {
    let Some(meta) = header_str(headers, header_name::META) else {
        return Vec::new();
    };
    meta.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn meta_lookup<'a>(meta: &'a [(String, String)], key: &str) -> Option<&'a str> {
    meta.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Reverse of [`parse_meta`]: the HTTP gateway's response-side `-Meta`
/// round trip (§6), same `k=v&k=v` shape the original builds with
/// `url.Values{}.Encode()`.
fn encode_meta(meta: &[(String, String)]) -> String {
    meta.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_meta_extracts_key_out_of_query_string() {
        let mut headers = HeaderMap::new();
        headers.insert(header_name::META, HeaderValue::from_static("weight=10&__irpc_auth__=secret"));
        let meta = parse_meta(&headers);
        assert_eq!(meta_lookup(&meta, "__irpc_auth__"), Some("secret"));
        assert_eq!(meta_lookup(&meta, "missing"), None);
    }

    #[test]
    fn encode_meta_round_trips_through_parse_meta() {
        let pairs = vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())];
        let mut headers = HeaderMap::new();
        headers.insert(header_name::META, HeaderValue::from_str(&encode_meta(&pairs)).unwrap());
        assert_eq!(parse_meta(&headers), pairs);
    }

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123".to_string()));
    }
}
