use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::content::FileMetadata;
use crate::wire::frame::{upgrade_stream, Frame};
use crate::wire::{ChunkReply, FileInfoReply, WireRequest};

async fn connect_and_send(addr: SocketAddr, request: WireRequest, timeout: Duration) -> anyhow::Result<Frame> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("connect to {addr} timed out"))??;

    let mut framed = upgrade_stream(stream);
    framed.send(Frame::header_only(request)?).await?;

    let frame = tokio::time::timeout(timeout, framed.next())
        .await
        .map_err(|_| anyhow!("read from {addr} timed out"))?
        .ok_or_else(|| anyhow!("peer at {addr} closed the connection without replying"))??;

    Ok(frame)
}

/// fetches one chunk from a peer. 15s connect+read timeout per spec.
pub async fn get_chunk(addr: SocketAddr, file_name: &str, chunk_index: u32) -> anyhow::Result<Vec<u8>> {
    let request = WireRequest::GetChunk {
        file_name: file_name.to_string(),
        chunk_index,
    };
    let frame = connect_and_send(addr, request, Config::CHUNK_FETCH_TIMEOUT).await?;
    let reply: ChunkReply = frame.header_as()?;

    match reply {
        ChunkReply::Success { chunk_size } => {
            if frame.body.len() != chunk_size {
                bail!(
                    "peer at {addr} advertised chunk_size {chunk_size} but sent {} bytes",
                    frame.body.len()
                );
            }
            Ok(frame.body)
        }
        ChunkReply::Error { error_code, message } => {
            bail!(
                "peer at {addr} refused chunk {chunk_index} of {file_name:?}: {error_code} ({})",
                message.unwrap_or_default()
            )
        }
    }
}

/// fetches metadata for a file from a peer. 10s connect+read timeout per spec.
pub async fn file_info(addr: SocketAddr, file_name: &str) -> anyhow::Result<FileMetadata> {
    let request = WireRequest::FileInfo {
        file_name: file_name.to_string(),
    };
    let frame = connect_and_send(addr, request, Config::FILE_INFO_TIMEOUT).await?;
    let reply: FileInfoReply = frame.header_as()?;

    match reply {
        FileInfoReply::Success { metadata } => Ok(metadata),
        FileInfoReply::Error { error_code, message } => bail!(
            "peer at {addr} has no info for {file_name:?}: {error_code} ({})",
            message.unwrap_or_default()
        ),
    }
}
