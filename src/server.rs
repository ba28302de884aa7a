use crate::store::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::session::Session;

/// Runs the accept loop: one connection is driven to completion — every
/// line read, gated, processed, and replied to — before the next
/// connection is even accepted. There is no inter-command interleaving
/// and no concurrent sessions; a second client dialing in while another
/// is connected simply waits in the listen backlog until the first
/// disconnects, the same single-session assumption the line-based
/// protocol was designed around.
pub async fn run_server(bind: &str, port: u16, registry: Arc<Registry>, snapshot_interval: Duration) -> std::io::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = result?;
                debug!("new connection from {peer_addr}");

                if let Err(e) = handle_connection(stream, registry.clone(), snapshot_interval).await {
                    debug!("connection error from {peer_addr}: {e}");
                }
                debug!("connection closed: {peer_addr}");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    snapshot_interval: Duration,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut session = Session::new(registry, snapshot_interval);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // peer closed the connection
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let reply = session.handle_line(trimmed).await;
        write_half.write_all(reply.as_bytes()).await?;
        write_half.write_all(b"\n").await?;

        if session.should_close {
            break;
        }
    }

    Ok(())
}
