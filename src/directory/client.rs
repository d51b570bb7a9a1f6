use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::content::ContentStore;
use crate::directory::known_peers::KnownPeers;
use crate::prelude::*;
use crate::tracker::wire::{decode_datagram, encode_datagram, TrackerReply, TrackerRequest};

const MAX_REPLY_SIZE: usize = 64 * 1024;

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// this peer's connection to the tracker: registration, the periodic
/// UPDATE/HEARTBEAT tasks, and the peer-list gossip they carry back.
pub struct DirectoryClient {
    socket: UdpSocket,
    tracker_addr: SocketAddr,
    peer_id: String,
    wire_port: u16,
    store: Arc<ContentStore>,
    known_peers: Arc<KnownPeers>,
    last_tracker_response: Mutex<Instant>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    content_changed: Arc<Notify>,
}

impl DirectoryClient {
    /// binds the directory socket and attempts the initial REGISTER.
    /// per spec.md 4.4 step 2, a failed REGISTER is logged and does not
    /// abort the peer: it's only the periodic UPDATE/HEARTBEAT tasks (and
    /// the out-of-band UPDATE on local content changes) that don't start,
    /// leaving the peer disconnected until a future command retries it.
    #[instrument(name = "directory client", level = "info", skip_all, fields(peer_id = %peer_id, %tracker_addr))]
    pub async fn connect(
        tracker_addr: SocketAddr,
        peer_id: String,
        wire_port: u16,
        store: Arc<ContentStore>,
        content_changed: Arc<Notify>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(tracker_addr).await?;

        let client = Arc::new(Self {
            socket,
            tracker_addr,
            peer_id,
            wire_port,
            store,
            known_peers: Arc::new(KnownPeers::new()),
            last_tracker_response: Mutex::new(Instant::now() - Config::CONNECTED_GRACE_PERIOD),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            content_changed,
        });

        match client.register().await {
            Ok(()) => Self::spawn_periodic_tasks(&client),
            Err(err) => error!(%err, "initial REGISTER failed, continuing without periodic tracker tasks"),
        }
        Ok(client)
    }

    pub fn known_peers(&self) -> &Arc<KnownPeers> {
        &self.known_peers
    }

    pub fn is_connected_to_tracker(&self) -> bool {
        let last = *self.last_tracker_response.lock().unwrap();
        Instant::now().saturating_duration_since(last) < Config::CONNECTED_GRACE_PERIOD
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn tracker_addr(&self) -> SocketAddr {
        self.tracker_addr
    }

    /// sends an UPDATE immediately instead of waiting for the periodic
    /// task's next tick. used by the `refresh` CLI command.
    pub async fn force_update(&self) -> anyhow::Result<()> {
        let request = TrackerRequest::Update {
            peer_id: self.peer_id.clone(),
            files: self.store.inventory_for_tracker(),
            timestamp: epoch_secs(),
            port: Some(self.wire_port),
        };
        let reply = self.send_with_retry(&request).await?;
        self.apply_reply(reply);
        Ok(())
    }

    async fn register(&self) -> anyhow::Result<()> {
        let request = TrackerRequest::Register {
            peer_id: self.peer_id.clone(),
            port: self.wire_port,
            timestamp: epoch_secs(),
        };
        let reply = self.send_with_retry(&request).await?;
        self.apply_reply(reply);
        info!("registered with tracker");
        Ok(())
    }

    fn spawn_periodic_tasks(client: &Arc<Self>) {
        let update_client = client.clone();
        let update_task = tokio::spawn(async move { update_client.run_update_loop().await });

        let heartbeat_client = client.clone();
        let heartbeat_task = tokio::spawn(async move { heartbeat_client.run_heartbeat_loop().await });

        let content_changed_client = client.clone();
        let content_changed_task = tokio::spawn(async move { content_changed_client.run_content_changed_loop().await });

        client
            .tasks
            .lock()
            .unwrap()
            .extend([update_task, heartbeat_task, content_changed_task]);
    }

    /// fires an out-of-band UPDATE whenever [`ContentStore`] notifies that
    /// it ingested a new file or persisted a chunk, per spec.md 4.2 ("…
    /// notifies the Directory client to trigger an UPDATE") instead of
    /// waiting for the next periodic tick. `Notify::notified` coalesces
    /// bursts of changes into a single pending permit, so a flurry of
    /// chunk writes still only triggers one UPDATE.
    async fn run_content_changed_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.content_changed.notified() => {
                    match self.force_update().await {
                        Ok(()) => debug!("sent out-of-band UPDATE after local content changed"),
                        Err(err) => warn!(%err, "out-of-band UPDATE after content change failed"),
                    }
                }
            }
        }
    }

    async fn run_update_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Config::UPDATE_INTERVAL);
        interval.tick().await; // first tick fires immediately, we just registered
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {
                    let request = TrackerRequest::Update {
                        peer_id: self.peer_id.clone(),
                        files: self.store.inventory_for_tracker(),
                        timestamp: epoch_secs(),
                        port: Some(self.wire_port),
                    };
                    match self.send_with_retry(&request).await {
                        Ok(reply) => self.apply_reply(reply),
                        Err(err) => warn!(%err, "periodic UPDATE failed"),
                    }
                }
            }
        }
    }

    async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Config::HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {
                    if !self.is_connected_to_tracker() {
                        continue;
                    }
                    let request = TrackerRequest::Heartbeat {
                        peer_id: self.peer_id.clone(),
                        port: Some(self.wire_port),
                    };
                    match self.send_with_retry(&request).await {
                        Ok(reply) => self.apply_reply(reply),
                        Err(err) => warn!(%err, "heartbeat failed"),
                    }
                }
            }
        }
    }

    fn apply_reply(&self, reply: TrackerReply) {
        *self.last_tracker_response.lock().unwrap() = Instant::now();
        if let TrackerReply::Success { peers } = reply {
            self.known_peers.reconcile(peers);
        }
    }

    /// clears `lastTrackerResponseTime` so [`Self::is_connected_to_tracker`]
    /// immediately reports disconnected, per spec.md 4.4's retry policy.
    fn mark_disconnected(&self) {
        *self.last_tracker_response.lock().unwrap() = Instant::now() - Config::CONNECTED_GRACE_PERIOD;
    }

    /// sends `request` and retries with linear backoff on timeout or I/O
    /// error, up to [`Config::MAX_RETRY_ATTEMPTS`]. clears the connectivity
    /// clock once every attempt has been exhausted.
    async fn send_with_retry(&self, request: &TrackerRequest) -> anyhow::Result<TrackerReply> {
        let mut last_err = None;
        for attempt in 0..Config::MAX_RETRY_ATTEMPTS {
            match self.send_once(request).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    warn!(attempt, %err, "tracker request failed, retrying");
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }
        self.mark_disconnected();
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("tracker request failed with no attempts made")))
    }

    async fn send_once(&self, request: &TrackerRequest) -> anyhow::Result<TrackerReply> {
        let payload = serde_json::to_vec(request)?;
        let payload = encode_datagram(&payload, Config::COMPRESSION_THRESHOLD)?;
        self.socket.send(&payload).await?;

        let mut buf = vec![0u8; MAX_REPLY_SIZE];
        let len = tokio::time::timeout(Config::RESPONSE_TIMEOUT, self.socket.recv(&mut buf))
            .await
            .map_err(|_| anyhow::anyhow!("tracker at {} did not respond in time", self.tracker_addr))??;

        let raw = decode_datagram(&buf[..len])?;
        let reply: TrackerReply = serde_json::from_slice(&raw)?;
        if let TrackerReply::Error { error_code, message } = &reply {
            anyhow::bail!("tracker rejected request: {error_code} ({message})");
        }
        Ok(reply)
    }

    /// best-effort UNREGISTER followed by draining the periodic tasks.
    /// never fails: a tracker that's already gone is not this peer's
    /// problem at shutdown time.
    #[instrument(name = "directory shutdown", level = "info", skip_all)]
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let request = TrackerRequest::Unregister {
            peer_id: self.peer_id.clone(),
        };
        if let Err(err) = self.send_once(&request).await {
            debug!(%err, "best-effort UNREGISTER failed, tracker may already consider us gone");
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        let join_all = futures::future::join_all(tasks);
        if tokio::time::timeout(Config::SHUTDOWN_JOIN_TIMEOUT, join_all).await.is_err() {
            warn!("periodic tasks did not shut down within the grace period");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_grace_period_is_stricter_than_the_heartbeat_cadence() {
        assert!(Config::CONNECTED_GRACE_PERIOD > Config::HEARTBEAT_INTERVAL);
    }
}
