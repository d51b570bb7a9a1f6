use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::content::ContentStore;
use crate::error::WireError;
use crate::prelude::*;
use crate::wire::frame::{upgrade_stream, Frame};
use crate::wire::{error_reply, WireRequest};

/// TCP server answering `GET_CHUNK`/`FILE_INFO` requests from other peers.
/// each accepted connection handles exactly one request then closes, and at
/// most [`Config::WIRE_SERVER_POOL`] connections are serviced concurrently.
pub struct PeerWireServer {
    local_addr: SocketAddr,
}

impl PeerWireServer {
    #[instrument(name = "peer wire server", level = "info", skip_all, fields(port))]
    pub async fn bind(
        port: u16,
        store: Arc<ContentStore>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "wire server listening");

        let permits = Arc::new(Semaphore::new(Config::WIRE_SERVER_POOL));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("wire server shutting down");
                        return;
                    }
                    accepted = listener.accept() => {
                        let (stream, peer_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(%err, "failed to accept wire connection");
                                continue;
                            }
                        };

                        let permits = permits.clone();
                        let store = store.clone();
                        tokio::spawn(async move {
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return;
                            };
                            if let Err(err) = handle_connection(stream, &store).await {
                                debug!(%peer_addr, %err, "wire connection ended with an error");
                            }
                        });
                    }
                }
            }
        });

        Ok(Self { local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[instrument(name = "wire connection", level = "debug", skip_all)]
async fn handle_connection(stream: TcpStream, store: &ContentStore) -> anyhow::Result<()> {
    let mut framed = upgrade_stream(stream);

    let frame = match tokio::time::timeout(Config::WIRE_SERVER_IDLE_TIMEOUT, framed.next()).await {
        Ok(Some(frame)) => frame?,
        Ok(None) => return Ok(()),
        Err(_) => {
            debug!("connection idle timeout elapsed before a request arrived");
            return Ok(());
        }
    };

    let request: Result<WireRequest, _> = frame.header_as();
    let reply = match request {
        Ok(WireRequest::GetChunk { file_name, chunk_index }) => {
            match store.load_chunk(&file_name, chunk_index) {
                Ok(Some(bytes)) => Frame::with_body(
                    serde_json::json!({"status": "success", "chunk_size": bytes.len()}),
                    bytes,
                )?,
                // whether the chunk was never recorded or its file vanished
                // from disk, the peer on the other end only needs to know
                // it isn't available here and should try another holder.
                Ok(None) | Err(_) => Frame::header_only(error_reply(&WireError::ChunkNotFound {
                    file: file_name,
                    index: chunk_index,
                }))?,
            }
        }
        Ok(WireRequest::FileInfo { file_name }) => match store.get_file_metadata(&file_name) {
            Some(metadata) => {
                Frame::header_only(serde_json::json!({"status": "success", "metadata": metadata}))?
            }
            None => Frame::header_only(error_reply(&WireError::FileNotFound(file_name)))?,
        },
        Err(_) => Frame::header_only(error_reply(&WireError::UnknownCommand(
            frame.header.get("command").and_then(|c| c.as_str()).unwrap_or("").to_string(),
        )))?,
    };

    framed.send(reply).await?;
    Ok(())
}
