use std::io::Write;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use swarmhub::content::ContentStore;
use swarmhub::wire::client;
use swarmhub::wire::server::PeerWireServer;

#[tokio::test]
async fn get_chunk_and_file_info_round_trip_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ContentStore::new(dir.path(), 8, Arc::new(Notify::new())).unwrap());

    let path = dir.path().join("note.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"hello swarm!").unwrap(); // 12 bytes -> 2 chunks of 8/4
    drop(file);
    let meta = store.process_new_file(&path).unwrap();
    assert_eq!(meta.total_chunks, 2);

    let shutdown = CancellationToken::new();
    let server = PeerWireServer::bind(0, store.clone(), shutdown.clone()).await.unwrap();
    let addr = server.local_addr();

    let fetched_meta = client::file_info(addr, "note.txt").await.unwrap();
    assert_eq!(fetched_meta, meta);

    let chunk0 = client::get_chunk(addr, "note.txt", 0).await.unwrap();
    let chunk1 = client::get_chunk(addr, "note.txt", 1).await.unwrap();
    assert_eq!(chunk0, b"hello sw");
    assert_eq!(chunk1, b"arm!");

    let err = client::file_info(addr, "missing.bin").await.unwrap_err();
    assert!(err.to_string().contains("FILE_NOT_FOUND"));

    let err = client::get_chunk(addr, "note.txt", 99).await.unwrap_err();
    assert!(err.to_string().contains("CHUNK_NOT_FOUND"));

    shutdown.cancel();
}
