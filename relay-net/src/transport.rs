//! Stream driver: glue between a duplex byte stream and one relay engine.
//!
//! Socket accept/connect loops belong to the embedder; this module takes an
//! already-established stream, spawns the read loop that feeds the
//! [`RelayConnection`], and hands back the per-peer [`RelaySender`]. For the
//! initiator role it also fires the opening `VERSION` frame.

use {
    crate::{
        config::RelayConfig,
        engine::{RelayConnection, RelayHandler, Role},
        error::Result,
        send::{RelayPools, RelaySender, SendShared},
        version::PROTOCOL_VERSION,
    },
    log::{debug, warn},
    std::sync::Arc,
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite},
        net::TcpStream,
        sync::Mutex,
    },
};

/// Attach a relay engine to a duplex stream.
///
/// Spawns the per-connection read task and returns the send handle. The
/// read task owns the engine; it drives [`RelayConnection::receive_bytes`]
/// until EOF, a read error, or a protocol failure, then closes the
/// connection.
pub async fn attach<R, W, H>(
    reader: R,
    writer: W,
    role: Role,
    handler: H,
    pools: &RelayPools,
    config: &RelayConfig,
) -> Result<RelaySender>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    H: RelayHandler + 'static,
{
    let shared = Arc::new(Mutex::new(SendShared::new(Box::new(writer))));
    if role == Role::Initiator {
        shared.lock().await.write_version(PROTOCOL_VERSION).await?;
    }

    let connection = RelayConnection::new(role, handler, Arc::clone(&shared));
    let sender = RelaySender::new(shared, pools.clone());
    tokio::spawn(read_loop(reader, connection, config.read_buffer_bytes));
    Ok(sender)
}

/// Attach a relay engine to a TCP stream.
pub async fn attach_tcp<H>(
    stream: TcpStream,
    role: Role,
    handler: H,
    pools: &RelayPools,
    config: &RelayConfig,
) -> Result<RelaySender>
where
    H: RelayHandler + 'static,
{
    let (reader, writer) = stream.into_split();
    attach(reader, writer, role, handler, pools, config).await
}

/// Read chunks until the stream or the engine gives up, carrying partial
/// frames across chunk boundaries.
async fn read_loop<R, H>(mut reader: R, mut connection: RelayConnection<H>, buf_size: usize)
where
    R: AsyncRead + Unpin,
    H: RelayHandler,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; buf_size];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("relay peer closed the stream");
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                match connection.receive_bytes(&pending).await {
                    Ok(consumed) => {
                        pending.drain(..consumed);
                    }
                    // The engine has logged the reason and closed itself.
                    Err(_) => break,
                }
            }
            Err(err) => {
                warn!("read error from relay peer: {err}");
                break;
            }
        }
    }
    connection.close().await;
}

// ── Tests ───────────────────────────────────────────────────────────────────
