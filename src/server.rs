//! TCP accept loop.
//!
//! The binary and the session tests both run the server through [`serve`].

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::pubsub::Broker;
use crate::storage::StorageEngine;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error};

/// State shared by every connection.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub storage: Arc<StorageEngine>,
    pub broker: Arc<Broker>,
    pub stats: Arc<ConnectionStats>,
}

impl ServerState {
    pub fn new(storage: Arc<StorageEngine>, broker: Arc<Broker>) -> Self {
        Self {
            storage,
            broker,
            stats: Arc::new(ConnectionStats::new()),
        }
    }
}

/// Accepts connections until the surrounding future is dropped.
///
/// Accept failures are logged and do not stop the loop.
pub async fn serve(listener: TcpListener, state: ServerState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(client = %addr, "Accepted connection");
                let _ = stream.set_nodelay(true);

                let handler = CommandHandler::new(Arc::clone(&state.storage));
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler,
                    Arc::clone(&state.broker),
                    Arc::clone(&state.stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start() -> (std::net::SocketAddr, ServerState) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = ServerState::new(Arc::new(StorageEngine::new()), Arc::new(Broker::default()));
        tokio::spawn(serve(listener, state.clone()));
        (addr, state)
    }

    async fn request(client: &mut TcpStream, bytes: &[u8], reply_len: usize) -> Vec<u8> {
        client.write_all(bytes).await.unwrap();
        let mut buf = vec![0u8; reply_len];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_clients_share_store() {
        let (addr, state) = start().await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 5];
        first.read_exact(&mut greeting).await.unwrap();
        second.read_exact(&mut greeting).await.unwrap();

        let reply = request(&mut first, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n", 5).await;
        assert_eq!(reply, b"+OK\r\n");

        let reply = request(&mut second, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", 7).await;
        assert_eq!(reply, b"$1\r\nv\r\n");

        assert_eq!(state.stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert!(state.storage.is_dirty());
    }
}
