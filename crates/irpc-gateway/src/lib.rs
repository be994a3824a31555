//! HTTP and JSON-RPC gateway for `irpc` (§6): a cmux-style front door that
//! peeks the first byte of each accepted connection and routes native
//! irpc-wire traffic straight into the server's own connection loop while
//! serving HTTP and JSON-RPC 2.0 traffic on the same port.

mod cors;
mod http_gateway;
mod jsonrpc;

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use irpc_proto::{RpcResult, MAGIC};
use irpc_server::Server;

pub use http_gateway::GatewayError;

/// Wraps a [`Server`] with a shared-port front door, generalizing
/// sova-relay's separate raw-TCP and hyper accept loops into one cmux-style
/// listener that demultiplexes on the first byte of each connection (§9
/// Design Notes: "match first byte against the magic number, or common
/// HTTP verbs").
#[derive(Clone)]
pub struct Gateway {
    server: Server,
}

impl Gateway {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    /// Runs the accept loop until the process is torn down. Each
    /// connection is peeked and routed independently, so native and HTTP
    /// clients can share one listening port.
    pub async fn serve(&self, address: &str) -> RpcResult<()> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!(%address, "irpc gateway listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.server.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(server, stream, peer.to_string()).await {
                    tracing::debug!(%peer, error = %e, "gateway connection ended");
                }
            });
        }
    }
}

async fn handle_connection(server: Server, stream: TcpStream, peer: String) -> std::io::Result<()> {
    let _ = stream.set_nodelay(true);

    let mut peek_buf = [0u8; 1];
    let n = stream.peek(&mut peek_buf).await?;
    if n == 0 {
        return Ok(());
    }
    let first_byte = peek_buf[0];

    if first_byte == MAGIC {
        let (read_half, write_half) = stream.into_split();
        server.serve_connection(Box::new(read_half), Box::new(write_half), peer);
        return Ok(());
    }

    if first_byte.is_ascii_uppercase() {
        let io = TokioIo::new(stream);
        let result = http1::Builder::new()
            .serve_connection(io, service_fn(move |req| route_http(server.clone(), req)))
            .await;
        if let Err(e) = result {
            tracing::debug!(%peer, error = %e, "http connection error");
        }
        return Ok(());
    }

    tracing::debug!(%peer, first_byte = first_byte as u32, "unrecognized protocol, closing connection");
    Ok(())
}

/// cmux's HTTP1 header matcher, generalized to an in-process header check
/// now that both gateways share one hyper connection: JSON-RPC traffic
/// sets the literal `X-JSONRPC-2.0: true` header (§9 Design Notes, §6;
/// original: `cmux.HTTP1HeaderField("X-JSONRPC-2.0", "true")`), anything
/// else falls to the raw HTTP gateway. Honors
/// `disable_http_gateway`/`disable_json_rpc`.
async fn route_http(server: Server, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let options = server.options();
    let req_headers = req.headers().clone();
    let is_json_rpc = req_headers
        .get("x-jsonrpc-2.0")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if let Some(cors) = &options.cors_options {
        if cors::is_preflight(req.method(), &req_headers) {
            return Ok(cors::preflight_response(cors, &req_headers));
        }
    }

    let mut resp = if is_json_rpc {
        if options.disable_json_rpc {
            not_found()
        } else {
            jsonrpc::dispatch(&server, req).await
        }
    } else {
        if options.disable_http_gateway {
            not_found()
        } else {
            http_gateway::dispatch(&server, req).await
        }
    };

    if let Some(cors) = &options.cors_options {
        cors::apply(cors, &req_headers, &mut resp);
    }
    Ok(resp)
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::new()))
        .unwrap()
}
