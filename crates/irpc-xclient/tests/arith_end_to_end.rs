//! §8 seed scenarios against a real xClient: scenario 1 (`Arith.Mul` with
//! `Retries=0`, `Failtry`, random select) and scenario 3 (`Failbackup`).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use irpc_discovery::StaticDiscovery;
use irpc_proto::{CompressorRegistry, Plugins, ServiceError};
use irpc_selector::Random;
use irpc_server::{Server, ServerOptions};
use irpc_xclient::{FailMode, XClient, XClientOptions};

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

async fn start_arith_server(addr: &str) -> Server {
    let server = Server::new(ServerOptions::default(), CompressorRegistry::new(), Plugins::new());
    server.register_method("Arith", "Mul", mul).await;
    let task = server.clone();
    let addr = addr.to_string();
    tokio::spawn(async move {
        let _ = task.serve("tcp", &addr).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    server
}

#[tokio::test]
async fn arith_mul_via_xclient_with_random_select_and_no_retries() {
    let server = start_arith_server("127.0.0.1:19572").await;

    let discovery = StaticDiscovery::new(vec![("tcp@127.0.0.1:19572".to_string(), String::new())]);
    let selector = Arc::new(Random::new());
    let options = XClientOptions {
        fail_mode: FailMode::Failtry,
        retries: 0,
        ..Default::default()
    };
    let xclient = XClient::new("Arith", discovery, selector, options).await;

    let reply: MulReply = xclient
        .call_with_timeout("Mul", &MulArgs { a: 10, b: 20 }, Some(Duration::from_secs(1)))
        .await
        .expect("call succeeds within one second");
    assert_eq!(reply.c, 200);

    xclient.close().await;
    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn failbackup_returns_the_faster_endpoints_reply() {
    let fast = start_arith_server("127.0.0.1:19573").await;

    let slow = Server::new(ServerOptions::default(), CompressorRegistry::new(), Plugins::new());
    slow.register_method("Arith", "Mul", |args: MulArgs| async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok::<_, ServiceError>(MulReply { c: args.a * args.b })
    })
    .await;
    let slow_task = slow.clone();
    tokio::spawn(async move {
        let _ = slow_task.serve("tcp", "127.0.0.1:19574").await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A deterministic two-entry round-robin: the first `select` returns
    // the slow endpoint (primary), the second the fast one (backup) — the
    // fast reply should win regardless of selection order in practice,
    // since Failbackup fires the backup 10ms after the primary starts and
    // the slow primary takes 30ms to reply.
    let discovery = StaticDiscovery::new(vec![
        ("tcp@127.0.0.1:19574".to_string(), String::new()),
        ("tcp@127.0.0.1:19573".to_string(), String::new()),
    ]);
    let selector = Arc::new(irpc_selector::RoundRobin::new());
    let options = XClientOptions {
        fail_mode: FailMode::Failbackup,
        backup_latency: Duration::from_millis(10),
        ..Default::default()
    };
    let xclient = XClient::new("Arith", discovery, selector, options).await;

    let reply: MulReply = xclient
        .call_with_timeout("Mul", &MulArgs { a: 3, b: 4 }, Some(Duration::from_secs(1)))
        .await
        .expect("failbackup returns a reply");
    assert_eq!(reply.c, 12);

    xclient.close().await;
    fast.shutdown(Some(Duration::from_secs(1))).await.unwrap();
    slow.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn service_error_is_not_retried_or_evicted() {
    let server = Server::new(ServerOptions::default(), CompressorRegistry::new(), Plugins::new());
    server
        .register_method("Arith", "Mul", |_: MulArgs| async {
            Err::<MulReply, _>(ServiceError::internal("division by hamster"))
        })
        .await;
    let task = server.clone();
    tokio::spawn(async move {
        let _ = task.serve("tcp", "127.0.0.1:19575").await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let discovery = StaticDiscovery::new(vec![("tcp@127.0.0.1:19575".to_string(), String::new())]);
    let selector = Arc::new(irpc_selector::RoundRobin::new());
    let options = XClientOptions {
        fail_mode: FailMode::Failtry,
        retries: 3,
        ..Default::default()
    };
    let xclient = XClient::new("Arith", discovery, selector, options).await;

    let err = xclient
        .call::<_, MulReply>("Mul", &MulArgs { a: 1, b: 2 })
        .await
        .unwrap_err();
    assert!(matches!(err, irpc_proto::RpcError::Service(_)));

    xclient.close().await;
    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}
