//! §8 seed scenarios 4 (JSON-RPC gateway) and 5 (HTTP gateway), plus a
//! check that the native wire protocol still works on the shared port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use irpc_gateway::Gateway;
use irpc_proto::{CompressorRegistry, Message, Plugin, PluginError, Plugins, ServiceError};
use irpc_server::{Server, ServerOptions};

#[derive(Debug, Serialize, Deserialize, Clone)]
struct MulArgs {
    #[serde(rename = "A")]
    a: i64,
    #[serde(rename = "B")]
    b: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MulReply {
    #[serde(rename = "C")]
    c: i64,
}

async fn mul(args: MulArgs) -> Result<MulReply, ServiceError> {
    Ok(MulReply { c: args.a * args.b })
}

async fn start_gateway(addr: &str) -> Server {
    let server = Server::new(ServerOptions::default(), CompressorRegistry::new(), Plugins::new());
    server.register_method("Arith", "Mul", mul).await;
    let gateway = Gateway::new(server.clone());
    let addr = addr.to_string();
    tokio::spawn(async move {
        let _ = gateway.serve(&addr).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    server
}

#[tokio::test]
async fn json_rpc_gateway_translates_method_and_params() {
    let server = start_gateway("127.0.0.1:19671").await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:19671/")
        .header("X-JSONRPC-2.0", "true")
        .json(&json!({"jsonrpc": "2.0", "method": "Arith.Mul", "params": {"A": 3, "B": 4}, "id": 1}))
        .send()
        .await
        .expect("request succeeds");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.expect("valid json body");
    assert_eq!(body["result"]["C"], 12);
    assert_eq!(body["id"], 1);

    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn json_rpc_notification_with_null_id_gets_no_content() {
    let server = start_gateway("127.0.0.1:19672").await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:19672/")
        .header("X-JSONRPC-2.0", "true")
        .json(&json!({"jsonrpc": "2.0", "method": "Arith.Mul", "params": {"A": 1, "B": 1}, "id": null}))
        .send()
        .await
        .expect("request succeeds");

    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn http_gateway_translates_headers_and_msgpack_body() {
    let server = start_gateway("127.0.0.1:19673").await;

    let body = rmp_serde::to_vec_named(&MulArgs { a: 3, b: 4 }).unwrap();
    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:19673/Arith/Mul")
        .header("X-IRPC-ServicePath", "Arith")
        .header("X-IRPC-ServiceMethod", "Mul")
        .header("X-IRPC-SerializeType", "0")
        .body(body)
        .send()
        .await
        .expect("request succeeds");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let status_header = resp.headers().get("x-irpc-messagestatustype").cloned();
    let bytes = resp.bytes().await.unwrap();
    let reply: MulReply = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(reply.c, 12);
    assert_eq!(status_header.unwrap(), "0");

    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn http_gateway_without_service_path_header_derives_it_from_the_url_path() {
    // §6: "/*servicePath" — with no X-IRPC-ServicePath header, the service
    // path comes from the URL path itself (original:
    // `params.ByName("servicePath")`).
    let server = start_gateway("127.0.0.1:19674").await;

    let body = rmp_serde::to_vec_named(&MulArgs { a: 6, b: 7 }).unwrap();
    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:19674/Arith")
        .header("X-IRPC-ServiceMethod", "Mul")
        .header("X-IRPC-SerializeType", "0")
        .body(body)
        .send()
        .await
        .expect("request succeeds");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let bytes = resp.bytes().await.unwrap();
    let reply: MulReply = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(reply.c, 42);

    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn http_gateway_without_any_service_path_source_is_a_bad_request() {
    // No header and an empty URL path: neither source names a service.
    let server = start_gateway("127.0.0.1:19676").await;

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:19676/")
        .header("X-IRPC-ServiceMethod", "Mul")
        .body(vec![])
        .send()
        .await
        .expect("request succeeds");

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn native_wire_protocol_still_works_on_the_shared_port() {
    let server = start_gateway("127.0.0.1:19675").await;

    let client = irpc_client::Client::connect(
        "tcp",
        "127.0.0.1:19675",
        irpc_client::ClientOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    )
    .await
    .expect("dial succeeds");

    let reply: MulReply = client
        .call("Arith", "Mul", &MulArgs { a: 5, b: 6 })
        .await
        .expect("native call succeeds");
    assert_eq!(reply.c, 30);

    client.close().await;
    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

struct MetaStamper;

#[async_trait]
impl Plugin for MetaStamper {
    async fn pre_write_response(
        &self,
        _request: &Message,
        response: &mut Message,
    ) -> Result<(), PluginError> {
        response.metadata.push(("stamped".to_string(), "yes".to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn http_gateway_round_trips_response_metadata_through_plugins() {
    // §6: "-Meta" is a two-way header; a plugin's `pre_write_response`
    // runs for gateway traffic too (§4.3's plugin container lives on
    // `Server` itself, not just the native accept loop).
    let server = Server::new(ServerOptions::default(), CompressorRegistry::new(), {
        let mut plugins = Plugins::new();
        plugins.add(Arc::new(MetaStamper));
        plugins
    });
    server.register_method("Arith", "Mul", mul).await;
    let gateway = Gateway::new(server.clone());
    tokio::spawn(async move {
        let _ = gateway.serve("127.0.0.1:19677").await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let body = rmp_serde::to_vec_named(&MulArgs { a: 2, b: 3 }).unwrap();
    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:19677/Arith")
        .header("X-IRPC-ServiceMethod", "Mul")
        .header("X-IRPC-SerializeType", "0")
        .body(body)
        .send()
        .await
        .expect("request succeeds");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let meta = resp.headers().get("x-irpc-meta").expect("meta header present");
    assert_eq!(meta.to_str().unwrap(), "stamped=yes");

    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn http_gateway_cors_preflight_reflects_allowed_origin() {
    let mut options = ServerOptions::default();
    options.cors_options = Some(irpc_server::CorsOptions::allow_all());
    let server = Server::new(options, CompressorRegistry::new(), Plugins::new());
    server.register_method("Arith", "Mul", mul).await;
    let gateway = Gateway::new(server.clone());
    tokio::spawn(async move {
        let _ = gateway.serve("127.0.0.1:19678").await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let resp = client
        .request(reqwest::Method::OPTIONS, "http://127.0.0.1:19678/Arith")
        .header("Origin", "https://example.com")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .expect("preflight request succeeds");

    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );

    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}
