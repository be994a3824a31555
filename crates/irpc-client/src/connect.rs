//! `Connect(network, address)` factory (§4.4), generalized from the
//! teacher's [`connect_tcp_with_timeout`] (`socket.rs`) to the spec's
//! network-name dispatch table.
//!
//! `tcp` and `unix` dial directly. `http` performs the CONNECT-upgrade
//! handshake and hands back the still-open socket as a raw frame pipe.
//! `tcp+tls` and `websocket` are named in §6 but require a TLS/WebSocket
//! dependency outside the teacher's stack; TLS certificate management is
//! an explicit spec non-goal, so both return [`RpcError::UnsupportedTransport`]
//! rather than a half-built implementation — see DESIGN.md.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use irpc_proto::{RpcError, RpcResult};

use crate::options::ClientOptions;

pub type DynReader = Box<dyn AsyncRead + Unpin + Send>;
pub type DynWriter = Box<dyn AsyncWrite + Unpin + Send>;

const HTTP_CONNECT_MARKER: &str = "200 Connected to irpc";

pub(crate) async fn dial(
    network: &str,
    address: &str,
    options: &ClientOptions,
) -> RpcResult<(DynReader, DynWriter, String)> {
    match network {
        "tcp" => dial_tcp(address, options).await,
        "unix" => dial_unix(address).await,
        "http" => dial_http_connect(address, options).await,
        other => Err(RpcError::UnsupportedTransport(other.to_string())),
    }
}

async fn dial_tcp(
    address: &str,
    options: &ClientOptions,
) -> RpcResult<(DynReader, DynWriter, String)> {
    let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {address} timed out"),
            ))
        })??;
    let _ = stream.set_nodelay(true);
    // TODO: plumb TCPKeepAlivePeriod through socket2 once that dependency
    // is pulled in; tokio's TcpStream exposes no keepalive-interval setter.
    let remote = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| address.to_string());
    let (read_half, write_half) = stream.into_split();
    Ok((Box::new(read_half), Box::new(write_half), remote))
}

#[cfg(unix)]
async fn dial_unix(address: &str) -> RpcResult<(DynReader, DynWriter, String)> {
    let stream = UnixStream::connect(address).await?;
    let remote = format!("unix@{address}");
    let (read_half, write_half) = stream.into_split();
    Ok((Box::new(read_half), Box::new(write_half), remote))
}

#[cfg(not(unix))]
async fn dial_unix(_address: &str) -> RpcResult<(DynReader, DynWriter, String)> {
    Err(RpcError::UnsupportedTransport(
        "unix domain sockets are not available on this platform".into(),
    ))
}

/// Dials a plain TCP socket, sends an HTTP `CONNECT` request, and checks
/// the response status line for the success marker before handing the
/// still-open socket back as a raw frame pipe (§6's "HTTP CONNECT upgrade
/// with success marker string").
async fn dial_http_connect(
    address: &str,
    options: &ClientOptions,
) -> RpcResult<(DynReader, DynWriter, String)> {
    let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {address} timed out"),
            ))
        })??;
    let _ = stream.set_nodelay(true);
    let remote = address.to_string();
    let (read_half, mut write_half) = stream.into_split();

    let rpc_path = &options.rpc_path;
    let request = format!("CONNECT {rpc_path} HTTP/1.1\r\nHost: {address}\r\n\r\n");
    write_half.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(read_half);
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    if !status_line.contains(HTTP_CONNECT_MARKER) {
        return Err(RpcError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("HTTP CONNECT upgrade rejected: {}", status_line.trim()),
        )));
    }
    // Drain the remaining response headers up to the blank line.
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    Ok((Box::new(reader), Box::new(write_half), remote))
}
