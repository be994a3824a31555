//! End-to-end tests driving [`irpc_client::Client`] against a hand-rolled
//! "server" speaking the wire protocol directly over an in-memory duplex
//! pipe (§8 seed scenario 1's framing, without the full server crate).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::split;

use irpc_client::{Client, ClientOptions};
use irpc_proto::{CompressorRegistry, Message, Plugins};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct MulArgs {
    #[serde(rename = "A")]
    a: i64,
    #[serde(rename = "B")]
    b: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct MulReply {
    #[serde(rename = "C")]
    c: i64,
}

#[tokio::test]
async fn arith_mul_round_trips() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = split(client_io);
    let (mut server_read, mut server_write) = split(server_io);

    tokio::spawn(async move {
        let registry = CompressorRegistry::new();
        let request = Message::read_from(&mut server_read, &registry, None)
            .await
            .unwrap();
        assert_eq!(request.service_path, "Arith");
        assert_eq!(request.service_method, "Mul");

        let codec = irpc_proto::Codec::from_serialize_type(request.header.serialize_type().unwrap()).unwrap();
        let args: MulArgs = codec.decode(&request.payload).unwrap();

        let mut response = request.new_response();
        response.payload = codec
            .encode(&MulReply { c: args.a * args.b })
            .unwrap()
            .into();
        response.write_to(&mut server_write, &registry).await.unwrap();
    });

    let client = Client::from_io(
        Box::new(client_read),
        Box::new(client_write),
        "mem".into(),
        ClientOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    )
    .await;

    let reply: MulReply = client
        .call_with_timeout("Arith", "Mul", &MulArgs { a: 10, b: 20 }, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(reply.c, 200);
}

#[tokio::test]
async fn concurrent_calls_get_their_own_replies() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = split(client_io);
    let (mut server_read, mut server_write) = split(server_io);

    tokio::spawn(async move {
        let registry = CompressorRegistry::new();
        for _ in 0..2 {
            let request = Message::read_from(&mut server_read, &registry, None)
                .await
                .unwrap();
            let codec =
                irpc_proto::Codec::from_serialize_type(request.header.serialize_type().unwrap())
                    .unwrap();
            let args: MulArgs = codec.decode(&request.payload).unwrap();
            let mut response = request.new_response();
            response.payload = codec
                .encode(&MulReply { c: args.a * args.b })
                .unwrap()
                .into();
            response.write_to(&mut server_write, &registry).await.unwrap();
        }
    });

    let client = Client::from_io(
        Box::new(client_read),
        Box::new(client_write),
        "mem".into(),
        ClientOptions::default(),
        CompressorRegistry::new(),
        Plugins::new(),
    )
    .await;

    let c1 = client.clone();
    let c2 = client.clone();
    let (r1, r2) = tokio::join!(
        c1.call::<MulArgs, MulReply>("Arith", "Mul", &MulArgs { a: 2, b: 3 }),
        c2.call::<MulArgs, MulReply>("Arith", "Mul", &MulArgs { a: 4, b: 5 })
    );
    let results: Vec<i64> = [r1.unwrap().c, r2.unwrap().c].into_iter().collect();
    assert!(results.contains(&6));
    assert!(results.contains(&20));
}

#[tokio::test]
async fn heartbeat_timeout_closes_connection_and_fails_pending_call() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = split(client_io);
    let (server_read, _server_write) = split(server_io);

    // The "server" never reads or writes again past connection
    // establishment, simulating §8 seed scenario 2's stalled peer.
    std::mem::forget(server_read);

    let mut options = ClientOptions::default();
    options.heartbeat = true;
    options.heartbeat_interval = Duration::from_millis(50);
    options.max_wait_for_heartbeat = Duration::from_millis(150);

    let client = Client::from_io(
        Box::new(client_read),
        Box::new(client_write),
        "mem".into(),
        options,
        CompressorRegistry::new(),
        Plugins::new(),
    )
    .await;

    let pending = client.call::<MulArgs, MulReply>("Arith", "Mul", &MulArgs { a: 1, b: 1 });
    let result = tokio::time::timeout(Duration::from_secs(2), pending).await;

    match result {
        Ok(call_result) => assert!(call_result.is_err(), "stalled peer must not produce a reply"),
        Err(_) => assert!(client.is_closing(), "heartbeat failure must close the client"),
    }
}
