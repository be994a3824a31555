//! End-to-end test against a real [`irpc_client::Client`], mirroring the
//! `Arith.Mul` seed scenario (spec §8 scenario 1).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use irpc_client::{Client, ClientOptions};
use irpc_proto::{CompressorRegistry, Plugins, ServiceError};
use irpc_server::{Server, ServerOptions};

#[derive(Debug, Serialize, Deserialize)]
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

#[tokio::test]
async fn arith_mul_round_trips_over_a_real_connection() {
    let server = Server::new(
        ServerOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    );
    server.register_method("Arith", "Mul", mul).await;

    let server_task = server.clone();
    tokio::spawn(async move {
        let _ = server_task.serve("tcp", "127.0.0.1:19372").await;
    });
    // Give the accept loop a moment to bind before dialing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = Client::connect(
        "tcp",
        "127.0.0.1:19372",
        ClientOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    )
    .await
    .expect("client connects");

    let reply: MulReply = client
        .call("Arith", "Mul", &MulArgs { a: 10, b: 20 })
        .await
        .expect("call succeeds");
    assert_eq!(reply.c, 200);

    client.close().await;
    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn unknown_method_reports_method_not_found() {
    let server = Server::new(
        ServerOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    );
    server.register_method("Arith", "Mul", mul).await;

    let server_task = server.clone();
    tokio::spawn(async move {
        let _ = server_task.serve("tcp", "127.0.0.1:19373").await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = Client::connect(
        "tcp",
        "127.0.0.1:19373",
        ClientOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    )
    .await
    .expect("client connects");

    let err = client
        .call::<_, MulReply>("Arith", "DoesNotExist", &MulArgs { a: 1, b: 2 })
        .await
        .unwrap_err();
    assert!(matches!(err, irpc_proto::RpcError::Service(_)));

    client.close().await;
    server.shutdown(Some(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn graceful_shutdown_drains_in_flight_call() {
    let server = Server::new(
        ServerOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    );
    server
        .register_method("Slow", "Wait", |_: ()| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ServiceError>(())
        })
        .await;

    let server_task = server.clone();
    tokio::spawn(async move {
        let _ = server_task.serve("tcp", "127.0.0.1:19374").await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = Client::connect(
        "tcp",
        "127.0.0.1:19374",
        ClientOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    )
    .await
    .expect("client connects");

    let call = tokio::spawn(async move {
        client
            .call::<_, ()>("Slow", "Wait", &())
            .await
            .expect("slow call still completes during drain")
    });

    // Give the handler time to start before asking for shutdown.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server
        .shutdown(Some(Duration::from_secs(2)))
        .await
        .expect("shutdown drains the in-flight call within the deadline");

    call.await.unwrap();
}
