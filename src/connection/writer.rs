//! Synchronized outbound sink.
//!
//! A connection has two writers: the request loop and one delivery task per
//! subscription. All of them go through a cloned [`ReplyWriter`], which
//! writes and flushes each frame while holding a mutex, so frames never
//! interleave on the socket.

use crate::connection::ConnectionStats;
use crate::protocol::RespValue;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Cloneable handle to the write half of a connection.
#[derive(Debug)]
pub struct ReplyWriter<W = OwnedWriteHalf> {
    inner: Arc<Mutex<BufWriter<W>>>,
    stats: Arc<ConnectionStats>,
}

impl<W> Clone for ReplyWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> ReplyWriter<W> {
    pub fn new(writer: W, stats: Arc<ConnectionStats>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufWriter::new(writer))),
            stats,
        }
    }

    /// Writes one frame and flushes it.
    pub async fn send(&self, value: &RespValue) -> io::Result<()> {
        let bytes = value.serialize();

        let mut writer = self.inner.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        drop(writer);

        self.stats.bytes_written(bytes.len());
        Ok(())
    }

    /// Flushes and shuts down the write side.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.inner.lock().await.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_send_writes_frames_in_order() {
        let mock = Builder::new()
            .write(b"+OK\r\n")
            .write(b"$5\r\nhello\r\n")
            .build();
        let stats = Arc::new(ConnectionStats::new());
        let writer = ReplyWriter::new(mock, Arc::clone(&stats));

        writer.send(&RespValue::ok()).await.unwrap();
        writer.clone().send(&RespValue::bulk_string("hello")).await.unwrap();

        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 16);
    }

    #[tokio::test]
    async fn test_send_reports_write_failure() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let stats = Arc::new(ConnectionStats::new());
        let writer = ReplyWriter::new(mock, Arc::clone(&stats));

        let err = writer.send(&RespValue::pong()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_concurrent_senders_do_not_interleave() {
        let (client, server) = tokio::io::duplex(64);
        let (_, server_write) = tokio::io::split(server);
        let writer = ReplyWriter::new(server_write, Arc::new(ConnectionStats::new()));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let frame = RespValue::bulk_string(format!("message-{:02}", i));
                writer.send(&frame).await.unwrap();
            }));
        }

        let reader = tokio::spawn(async move {
            let mut client = client;
            let mut buf = vec![0u8; 20 * 17];
            tokio::io::AsyncReadExt::read_exact(&mut client, &mut buf)
                .await
                .unwrap();
            buf
        });

        for task in tasks {
            task.await.unwrap();
        }
        let buf = reader.await.unwrap();

        // Every frame is intact: $10\r\nmessage-NN\r\n
        for frame in buf.chunks(17) {
            assert!(frame.starts_with(b"$10\r\nmessage-"));
            assert!(frame.ends_with(b"\r\n"));
        }
    }
}
