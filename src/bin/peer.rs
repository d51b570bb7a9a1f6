use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use swarmhub::config::{Config, PeerArgs};
use swarmhub::content::{ContentStore, FolderWatcher};
use swarmhub::directory::DirectoryClient;
use swarmhub::prelude::*;
use swarmhub::swarm::Downloader;
use swarmhub::torrent::PeerId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = PeerArgs::parse();
    swarmhub::init_tracing(args.log_compact);

    let peer_id = PeerId::new(args.name.clone());
    let wire_port = args.resolve_port();

    let content_changed = Arc::new(Notify::new());
    let store = Arc::new(ContentStore::new(&args.shared_folder, Config::CHUNK_SIZE, content_changed.clone())?);
    scan_shared_folder(&store, &args.shared_folder);

    let shutdown = CancellationToken::new();
    let wire_server =
        swarmhub::wire::server::PeerWireServer::bind(wire_port, store.clone(), shutdown.clone()).await?;
    let local_port = wire_server.local_addr().port();

    let directory = DirectoryClient::connect(
        args.tracker,
        peer_id.as_str().to_string(),
        local_port,
        store.clone(),
        content_changed,
        shutdown.clone(),
    )
    .await?;

    let downloader = Downloader::new(store.clone(), directory.known_peers().clone());
    let _watcher = FolderWatcher::start(&args.shared_folder, store.clone())?;

    println!("swarmhub peer {peer_id} listening on port {local_port}, tracker at {}", args.tracker);
    println!("type 'help' for a list of commands");

    run_command_loop(&store, &directory, &downloader, &peer_id, local_port).await;

    info!("shutting down");
    directory.shutdown().await;
    shutdown.cancel();

    Ok(())
}

fn scan_shared_folder(store: &ContentStore, folder: &std::path::Path) {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match store.process_new_file(&path) {
            Ok(meta) => info!(file = %meta.file_name, "found existing file in shared folder"),
            Err(err) => debug!(?path, %err, "skipped during startup scan"),
        }
    }
}

async fn run_command_loop(
    store: &ContentStore,
    directory: &DirectoryClient,
    downloader: &Arc<Downloader>,
    peer_id: &PeerId,
    local_port: u16,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::Write::flush(&mut std::io::stdout());

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                return;
            }
        };

        let Ok(Some(line)) = line else {
            return;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match command {
            "list" | "ls" | "files" => {
                let files = store.get_available_files();
                if files.is_empty() {
                    println!("no files available yet");
                }
                for file in files {
                    let have = store.available_chunks(&file).len();
                    let total = store.total_chunks_count(&file).unwrap_or(0);
                    println!("  {file}  ({have}/{total} chunks)");
                }
            }
            "peers" | "p" => {
                let peers = directory.known_peers().all();
                if peers.is_empty() {
                    println!("no known peers");
                }
                for (id, peer) in peers {
                    println!("  {id}  {}  {} files", peer.addr, peer.files.len());
                }
            }
            "download" | "dl" | "get" => {
                if rest.is_empty() {
                    println!("usage: download <file>");
                } else if Downloader::start_download(downloader, rest.to_string()) {
                    println!("started downloading {rest}");
                } else {
                    println!("{rest} is already complete or already downloading");
                }
            }
            "downloads" | "dls" => {
                let active = downloader.active_downloads();
                if active.is_empty() {
                    println!("no downloads in progress");
                }
                for file in active {
                    println!("  {file}");
                }
            }
            "status" | "info" => {
                println!("connected to tracker: {}", directory.is_connected_to_tracker());
                println!("files shared: {}", store.get_available_files().len());
                println!("storage used: {} bytes", store.total_storage_used());
            }
            "whoami" | "me" => {
                println!("peer id: {peer_id}");
                println!("wire port: {local_port}");
            }
            "refresh" | "update" => match directory.force_update().await {
                Ok(()) => println!("refreshed"),
                Err(err) => println!("refresh failed: {err}"),
            },
            "tracker" | "t" => {
                println!("tracker: {}", directory.tracker_addr());
                println!("connected: {}", directory.is_connected_to_tracker());
            }
            "help" | "h" | "?" => print_help(),
            "quit" | "exit" | "q" | "bye" => return,
            other => println!("unknown command {other:?}, type 'help' for a list of commands"),
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  list, ls, files        list files available in this peer's folder");
    println!("  peers, p               list known peers");
    println!("  download, dl, get <f>  start downloading file <f>");
    println!("  downloads, dls         list in-progress downloads");
    println!("  status, info           show connection and storage status");
    println!("  whoami, me             show this peer's id and wire port");
    println!("  refresh, update        send an UPDATE to the tracker now");
    println!("  tracker, t             show the tracker address and connection status");
    println!("  help, h, ?             show this message");
    println!("  quit, exit, q, bye     shut down cleanly");
}
