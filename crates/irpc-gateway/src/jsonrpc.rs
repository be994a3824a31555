//! JSON-RPC 2.0 gateway (§6, seed scenario 4): `{method: "sp.sm", params,
//! id}` translates onto the internal dispatch with `SerializeType::Json`;
//! `id == null` is a notification (oneway).

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde_json::{json, Value};

use irpc_proto::error_code;
use irpc_server::Server;

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;

pub(crate) async fn dispatch(server: &Server, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(Value::Null, PARSE_ERROR, format!("failed to read body: {e}")),
    };

    let request: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => return error_response(Value::Null, PARSE_ERROR, format!("parse error: {e}")),
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let oneway = id.is_null();

    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return error_response(id, INVALID_REQUEST, "missing method".to_string());
    };
    let Some((service_path, service_method)) = method.split_once('.') else {
        return error_response(
            id,
            error_code::METHOD_NOT_FOUND,
            format!("method {method} is not of the form Service.Method"),
        );
    };

    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let payload = match serde_json::to_vec(&params) {
        Ok(p) => p,
        Err(e) => return error_response(id, error_code::INVALID_PARAMS, e.to_string()),
    };

    if oneway {
        let server = server.clone();
        let service_path = service_path.to_string();
        let service_method = service_method.to_string();
        tokio::spawn(async move {
            let _ = server
                .invoke(&service_path, &service_method, irpc_proto::Codec::Json, &payload)
                .await;
        });
        return json_response(StatusCode::NO_CONTENT, &Value::Null);
    }

    match server.invoke(service_path, service_method, irpc_proto::Codec::Json, &payload).await {
        Ok(reply_bytes) => {
            let result: Value = serde_json::from_slice(&reply_bytes).unwrap_or(Value::Null);
            json_response(StatusCode::OK, &json!({"jsonrpc": "2.0", "result": result, "id": id}))
        }
        Err(e) => error_response(id, e.code, e.message),
    }
}

fn error_response(id: Value, code: i32, message: String) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &json!({"jsonrpc": "2.0", "error": {"code": code, "message": message}, "id": id}),
    )
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let bytes = if *body == Value::Null {
        Vec::new()
    } else {
        serde_json::to_vec(body).unwrap_or_default()
    };
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap()
}
