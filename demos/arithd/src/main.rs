//! Demo server hosting `Arith.Mul` (§8 seed scenarios 1, 4, 5): plain
//! irpc wire protocol by default, with the HTTP/JSON-RPC gateway layered
//! on the same port unless disabled.

use clap::Parser;
use tracing::{info, warn};

use irpc_gateway::Gateway;
use irpc_proto::{CompressorRegistry, Plugins, ServiceError};
use irpc_server::{Server, ServerOptions};
use serde::{Deserialize, Serialize};

/// Demo Arith.Mul server for irpc.
#[derive(Parser)]
#[command(name = "arithd")]
#[command(about = "Demo Arith.Mul server for irpc")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 19090)]
    port: u16,

    /// Transport for the plain wire protocol listener ("tcp" or "unix").
    /// Ignored when the HTTP/JSON-RPC gateway is enabled, which only
    /// binds TCP.
    #[arg(long, default_value = "tcp")]
    network: String,

    /// Disables the HTTP/JSON-RPC gateway, serving only the native wire
    /// protocol.
    #[arg(long, default_value_t = false)]
    disable_gateway: bool,

    /// Log level passed to `tracing_subscriber`'s env filter.
    #[arg(long, default_value = "info")]
    log_level: String,
}

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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let options = ServerOptions {
        disable_http_gateway: args.disable_gateway,
        disable_json_rpc: args.disable_gateway,
        ..Default::default()
    };
    let server = Server::new(options, CompressorRegistry::new(), Plugins::new());
    server.register_method("Arith", "Mul", mul).await;

    let address = format!("{}:{}", args.host, args.port);
    info!(%address, gateway = !args.disable_gateway, "starting arithd");

    let server_task = server.clone();
    tokio::select! {
        result = async move {
            if args.disable_gateway {
                server_task.serve(&args.network, &address).await
            } else {
                Gateway::new(server_task).serve(&address).await
            }
        } => {
            if let Err(e) = result {
                warn!(error = %e, "server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down gracefully");
        }
    }

    server.shutdown(Some(std::time::Duration::from_secs(5))).await?;
    info!("arithd stopped");
    Ok(())
}
