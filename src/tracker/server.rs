use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::prelude::*;
use crate::tracker::table::TrackerState;
use crate::tracker::wire::{decode_datagram, encode_datagram, TrackerReply, TrackerRequest};

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// the tracker's UDP control-plane server: an accept loop that hands each
/// datagram to a bounded worker pool, plus a background reaper evicting
/// stale peers.
pub struct TrackerServer {
    local_addr: SocketAddr,
}

impl TrackerServer {
    #[instrument(name = "tracker server", level = "info", skip_all, fields(port))]
    pub async fn bind(port: u16, workers: usize, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", port)).await?);
        let local_addr = socket.local_addr()?;
        info!(%local_addr, workers, "tracker listening");

        let state = Arc::new(TrackerState::new());
        let permits = Arc::new(tokio::sync::Semaphore::new(workers));

        spawn_reaper(state.clone(), shutdown.clone());
        spawn_accept_loop(socket, state, permits, shutdown);

        Ok(Self { local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn spawn_reaper(state: Arc<TrackerState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Config::CLEANUP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    let evicted = state.reaper_sweep(Config::PEER_TIMEOUT);
                    if evicted > 0 {
                        info!(evicted, remaining = state.len(), "reaped timed-out peers");
                    }
                }
            }
        }
    });
}

fn spawn_accept_loop(
    socket: Arc<UdpSocket>,
    state: Arc<TrackerState>,
    permits: Arc<tokio::sync::Semaphore>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("tracker server shutting down");
                    return;
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(%err, "failed to receive datagram");
                            continue;
                        }
                    }
                }
            };

            let datagram = buf[..len].to_vec();
            let socket = socket.clone();
            let state = state.clone();
            let permits = permits.clone();

            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                handle_datagram(&socket, &state, from, datagram).await;
            });
        }
    });
}

#[instrument(level = "debug", skip_all, fields(%from))]
async fn handle_datagram(socket: &UdpSocket, state: &TrackerState, from: SocketAddr, datagram: Vec<u8>) {
    let reply = match decode_and_dispatch(state, from, &datagram) {
        Ok(Some(reply)) => reply,
        Ok(None) => return, // missing command/peer_id: logged already, drop silently.
        Err(err) => {
            warn!(%err, "malformed request, dropping");
            TrackerReply::error("PROCESSING_ERROR", err.to_string())
        }
    };

    let payload = match serde_json::to_vec(&reply) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%err, "failed to serialize reply");
            return;
        }
    };

    let payload = match encode_datagram(&payload, Config::COMPRESSION_THRESHOLD) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%err, "failed to compress reply");
            return;
        }
    };

    if let Err(err) = socket.send_to(&payload, from).await {
        warn!(%err, "failed to send reply");
    }
}

/// known top-level `command` values; anything else is `UNKNOWN_COMMAND`.
const KNOWN_COMMANDS: &[&str] = &["REGISTER", "UPDATE", "HEARTBEAT", "UNREGISTER"];

/// decodes and dispatches one datagram. `Ok(None)` means the request was
/// missing `command` or `peer_id` -- per spec.md 4.1 that case is logged
/// and dropped silently, with no reply sent at all. every other malformed
/// or unrecognized request still gets a reply (`PROCESSING_ERROR` /
/// `UNKNOWN_COMMAND`).
fn decode_and_dispatch(state: &TrackerState, from: SocketAddr, datagram: &[u8]) -> anyhow::Result<Option<TrackerReply>> {
    let raw = decode_datagram(datagram)?;
    let value: serde_json::Value = serde_json::from_slice(&raw)?;

    let command = value.get("command").and_then(serde_json::Value::as_str);
    let peer_id = value.get("peer_id").and_then(serde_json::Value::as_str);
    let (Some(command), Some(_)) = (command, peer_id) else {
        debug!(%from, "request missing command or peer_id, dropping silently");
        return Ok(None);
    };

    if !KNOWN_COMMANDS.contains(&command) {
        return Ok(Some(TrackerReply::error("UNKNOWN_COMMAND", format!("unrecognized command {command:?}"))));
    }

    let request: TrackerRequest = serde_json::from_value(value)?;

    let reply = match request {
        TrackerRequest::Register { peer_id, port, .. } => {
            let peer_addr = SocketAddr::new(from.ip(), port);
            let peers = state.register(&peer_id, peer_addr, Default::default());
            TrackerReply::Success { peers }
        }
        TrackerRequest::Update { peer_id, files, port, .. } => {
            let peer_addr = port.map_or(from, |port| SocketAddr::new(from.ip(), port));
            let peers = state.update(&peer_id, peer_addr, files);
            TrackerReply::Success { peers }
        }
        TrackerRequest::Heartbeat { peer_id, port } => match state.heartbeat(&peer_id, from, port) {
            Some(peers) => TrackerReply::Success { peers },
            // "reply ACK without registering" -- an empty-peers success, not an error.
            None => TrackerReply::Success { peers: Default::default() },
        },
        TrackerRequest::Unregister { peer_id } => {
            state.unregister(&peer_id);
            TrackerReply::Success { peers: Default::default() }
        }
    };

    Ok(Some(reply))
}
