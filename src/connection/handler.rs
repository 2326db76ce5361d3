//! Connection Session
//!
//! Each client gets its own task running this state machine:
//!
//! ```text
//!  accept
//!    │
//!    ▼
//!  Greeting ──(+OK)──> Awaiting-Frame <──────────────────────────┐
//!                          │                                     │
//!                          │ decode                              │
//!           framing error  ▼                                     │
//!        ┌────────────  Dispatching ── SUBSCRIBE ──> spawn ──────┤
//!        │                 │           UNSUBSCRIBE / PUBLISH ────┤
//!        ▼                 └── store command ──> reply ──────────┘
//!      Closed  <── any write failure or peer close
//! ```
//!
//! Every subscription gets a delivery task that forwards its mailbox to the
//! client. The request loop and the delivery tasks share the socket through
//! a [`ReplyWriter`], so frames from both are never interleaved.
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut`. TCP may split one command
//! across reads or pack several into one, so the loop decodes as many whole
//! commands as the buffer holds before reading again.

use crate::commands::{normalize, CommandHandler};
use crate::connection::writer::ReplyWriter;
use crate::protocol::{ParseError, RespParser, RespValue, Tokens};
use crate::pubsub::{Broker, SubscriberId, Subscription};
use bytes::BytesMut;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Room for headers on top of the largest bulk string
const BUFFER_HEADROOM: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// How long UNSUBSCRIBE waits for an in-flight delivery
const DELIVERY_GRACE: Duration = Duration::from_secs(1);

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// A subscription owned by this connection.
struct ActiveSubscription {
    id: SubscriberId,
    /// Dropped or fired to stop the delivery task between messages
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    reader: OwnedReadHalf,

    writer: ReplyWriter,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    command_handler: CommandHandler,

    broker: Arc<Broker>,

    parser: RespParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// At most one subscription per channel
    subscriptions: HashMap<String, ActiveSubscription>,

    /// The first COMMAND from a client gets no reply
    command_seen: bool,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        broker: Arc<Broker>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let (reader, writer) = stream.into_split();

        Self {
            reader,
            writer: ReplyWriter::new(writer, Arc::clone(&stats)),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            broker,
            parser: RespParser::new(),
            stats,
            subscriptions: HashMap::new(),
            command_seen: false,
        }
    }

    /// Runs the session until the client disconnects or an error occurs.
    ///
    /// Subscriptions are always released before this returns.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;
        self.release_subscriptions();
        let _ = self.writer.shutdown().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        self.writer.send(&RespValue::ok()).await?;

        loop {
            match self.try_parse_command() {
                Ok(Some(tokens)) => {
                    self.stats.command_processed();
                    self.handle_tokens(tokens).await?;
                }
                Ok(None) => match self.read_more_data().await {
                    Err(ConnectionError::UnexpectedEof) => {
                        self.reject("unexpected end of stream").await;
                        return Err(ConnectionError::UnexpectedEof);
                    }
                    other => other?,
                },
                Err(e) => {
                    self.reject(&e).await;
                    return Err(e.into());
                }
            }
        }
    }

    /// Best-effort error reply before a framing failure closes the connection.
    async fn reject(&self, reason: impl std::fmt::Display) {
        let reply = RespValue::error(format!("ERR protocol error: {}", reason));
        let _ = self.writer.send(&reply).await;
    }

    fn try_parse_command(&mut self) -> Result<Option<Tokens>, ParseError> {
        match self.parser.parse(&self.buffer) {
            Ok(Some((tokens, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(tokens))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Framing error");
                Err(e)
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        let limit = self.parser.max_bulk_size() + BUFFER_HEADROOM;
        if self.buffer.len() >= limit {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.reader.read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial command in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Normalizes one command and routes it to pub/sub or the dispatcher.
    async fn handle_tokens(&mut self, tokens: Tokens) -> Result<(), ConnectionError> {
        if tokens.is_empty() {
            return self.reply(RespValue::error("ERR empty command")).await;
        }

        let request = match normalize(tokens) {
            Ok(request) => request,
            Err(e) => return self.reply(RespValue::error(e.to_string())).await,
        };

        match (request.name.as_str(), request.args.as_slice()) {
            ("SUBSCRIBE", [channel, ..]) => {
                let channel = channel.clone();
                self.subscribe(channel).await
            }
            ("UNSUBSCRIBE", [channel, ..]) => {
                let channel = channel.clone();
                self.unsubscribe(channel).await
            }
            ("PUBLISH", [channel, message, ..]) => {
                let delivered = self.broker.publish(channel, message);
                trace!(client = %self.addr, channel = %channel, delivered = delivered, "Published");
                self.reply(RespValue::integer(delivered as i64)).await
            }
            ("COMMAND", _) if !self.command_seen => {
                self.command_seen = true;
                trace!(client = %self.addr, "Ignoring first COMMAND");
                Ok(())
            }
            _ => {
                let response = self.command_handler.dispatch(request);
                self.reply(response).await
            }
        }
    }

    async fn reply(&self, response: RespValue) -> Result<(), ConnectionError> {
        self.writer.send(&response).await?;
        Ok(())
    }

    async fn subscribe(&mut self, channel: String) -> Result<(), ConnectionError> {
        if self.subscriptions.contains_key(&channel) {
            let count = self.subscriptions.len();
            return self.reply(push_frame("subscribe", &channel, count)).await;
        }

        let subscription = self.broker.subscribe(&channel);
        let id = subscription.id;

        // Confirm before the delivery task can write anything
        let confirmation = push_frame("subscribe", &channel, self.subscriptions.len() + 1);
        if let Err(e) = self.writer.send(&confirmation).await {
            self.broker.unsubscribe(&channel, id);
            return Err(e.into());
        }

        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(deliver(
            subscription,
            cancelled,
            self.writer.clone(),
            Arc::clone(&self.broker),
            self.addr,
        ));

        debug!(client = %self.addr, channel = %channel, "Subscribed");
        self.subscriptions
            .insert(channel, ActiveSubscription { id, cancel, task });
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: String) -> Result<(), ConnectionError> {
        if let Some(active) = self.subscriptions.remove(&channel) {
            self.broker.unsubscribe(&channel, active.id);
            if !stop_delivery(active.task, active.cancel, DELIVERY_GRACE).await {
                debug!(client = %self.addr, channel = %channel, "Delivery stalled, aborted");
            }
            debug!(client = %self.addr, channel = %channel, "Unsubscribed");
        }

        let count = self.subscriptions.len();
        self.reply(push_frame("unsubscribe", &channel, count)).await
    }

    /// Stops every delivery task and removes its broker registration.
    fn release_subscriptions(&mut self) {
        for (channel, active) in self.subscriptions.drain() {
            active.task.abort();
            self.broker.unsubscribe(&channel, active.id);
        }
    }
}

/// `*3 <kind> <channel> :<count>`
fn push_frame(kind: &str, channel: &str, count: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(kind.to_string()),
        RespValue::bulk_string(channel.to_string()),
        RespValue::integer(count as i64),
    ])
}

/// `*3 message <channel> <payload>`
fn message_frame(channel: &str, payload: String) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string("message"),
        RespValue::bulk_string(channel.to_string()),
        RespValue::bulk_string(payload),
    ])
}

/// Cancels a delivery task, letting an in-flight message finish so it
/// precedes the unsubscribe confirmation. A task still blocked on a client
/// that stopped reading after `grace` is aborted.
///
/// Returns `false` if the task had to be aborted.
async fn stop_delivery(
    mut task: JoinHandle<()>,
    cancel: oneshot::Sender<()>,
    grace: Duration,
) -> bool {
    let _ = cancel.send(());
    match tokio::time::timeout(grace, &mut task).await {
        Ok(_) => true,
        Err(_) => {
            task.abort();
            false
        }
    }
}

/// Forwards a mailbox to the client until cancelled or a write fails.
///
/// A failed write unsubscribes the mailbox from the broker.
async fn deliver<W: AsyncWrite + Unpin + Send>(
    mut subscription: Subscription,
    mut cancelled: oneshot::Receiver<()>,
    writer: ReplyWriter<W>,
    broker: Arc<Broker>,
    client: SocketAddr,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = &mut cancelled => return,
            payload = subscription.receiver.recv() => match payload {
                Some(payload) => payload,
                None => return,
            },
        };

        let frame = message_frame(&subscription.topic, payload);
        if let Err(e) = writer.send(&frame).await {
            warn!(
                client = %client,
                channel = %subscription.topic,
                error = %e,
                "Delivery failed, unsubscribing"
            );
            broker.unsubscribe(&subscription.topic, subscription.id);
            return;
        }
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed request bytes
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Runs a session for an accepted connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    broker: Arc<Broker>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, broker, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct TestServer {
        addr: SocketAddr,
        storage: Arc<StorageEngine>,
        broker: Arc<Broker>,
        stats: Arc<ConnectionStats>,
    }

    async fn create_test_server() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let broker = Arc::new(Broker::default());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let broker_clone = Arc::clone(&broker);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    handler,
                    Arc::clone(&broker_clone),
                    Arc::clone(&stats_clone),
                ));
            }
        });

        TestServer {
            addr,
            storage,
            broker,
            stats,
        }
    }

    /// Connects and consumes the greeting.
    async fn connect(addr: SocketAddr) -> TcpStream {
        let mut client = TcpStream::connect(addr).await.unwrap();
        expect(&mut client, b"+OK\r\n").await;
        client
    }

    async fn expect(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    async fn expect_closed(client: &mut TcpStream) {
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("connection was not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_greeting_and_ping() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect(&mut client, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        expect(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        expect(&mut client, b"$4\r\nAriz\r\n").await;

        assert_eq!(server.storage.get("name"), Some("Ariz".to_string()));
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client
            .write_all(b"*3\r\n$5\r\nRPUSH\r\n$1\r\nl\r\n$1\r\na\r\n*3\r\n$5\r\nRPUSH\r\n$1\r\nl\r\n$1\r\nb\r\n*4\r\n$6\r\nLRANGE\r\n$1\r\nl\r\n$1\r\n0\r\n$2\r\n-1\r\n")
            .await
            .unwrap();

        expect(&mut client, b"+1\r\n+2\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n").await;
    }

    #[tokio::test]
    async fn test_command_split_across_writes() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client.write_all(b"*2\r\n$3\r\nGE").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"T\r\n$1\r\nk\r\n").await.unwrap();

        expect(&mut client, b"*0\r\n").await;
    }

    #[tokio::test]
    async fn test_recoverable_errors_keep_connection() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client.write_all(b"*0\r\n").await.unwrap();
        expect(&mut client, b"-ERR empty command\r\n").await;

        client.write_all(b"*1\r\n$3\r\nFOO\r\n").await.unwrap();
        expect(&mut client, b"-ERR unknown command 'FOO'\r\n").await;

        client.write_all(b"*1\r\n$3\r\nGET\r\n").await.unwrap();
        expect(&mut client, b"-ERR wrong number of arguments for 'get' command\r\n").await;

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect(&mut client, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client.write_all(b"PING\r\n").await.unwrap();
        expect(&mut client, b"-ERR protocol error: expected '*', got 'P'\r\n").await;
        expect_closed(&mut client).await;

        // The server keeps serving other clients
        let mut other = connect(server.addr).await;
        other.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect(&mut other, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_truncated_request_closes_connection() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client.write_all(b"*1\r\n$100\r\nshort").await.unwrap();
        client.shutdown().await.unwrap();
        expect(&mut client, b"-ERR protocol error: unexpected end of stream\r\n").await;
        expect_closed(&mut client).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_first_command_is_swallowed() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client
            .write_all(b"*2\r\n$7\r\nCOMMAND\r\n$4\r\nDOCS\r\n*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();
        expect(&mut client, b"+PONG\r\n").await;

        client.write_all(b"*1\r\n$7\r\nCOMMAND\r\n").await.unwrap();
        expect(&mut client, b"*17\r\n$4\r\nPING\r\n").await;
    }

    #[tokio::test]
    async fn test_subscribe_publish() {
        let server = create_test_server().await;
        let mut subscriber = connect(server.addr).await;
        let mut publisher = connect(server.addr).await;

        subscriber
            .write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n")
            .await
            .unwrap();
        expect(&mut subscriber, b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n").await;

        publisher
            .write_all(b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nnews\r\n$2\r\nhi\r\n")
            .await
            .unwrap();
        expect(&mut publisher, b":1\r\n").await;

        expect(&mut subscriber, b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$2\r\nhi\r\n").await;

        // The subscribed connection still serves ordinary commands
        subscriber.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect(&mut subscriber, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client
            .write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$1\r\na\r\n*2\r\n$9\r\nSUBSCRIBE\r\n$1\r\nb\r\n")
            .await
            .unwrap();
        expect(&mut client, b"*3\r\n$9\r\nsubscribe\r\n$1\r\na\r\n:1\r\n").await;
        expect(&mut client, b"*3\r\n$9\r\nsubscribe\r\n$1\r\nb\r\n:2\r\n").await;

        client
            .write_all(b"*2\r\n$11\r\nUNSUBSCRIBE\r\n$1\r\na\r\n")
            .await
            .unwrap();
        expect(&mut client, b"*3\r\n$11\r\nunsubscribe\r\n$1\r\na\r\n:1\r\n").await;

        assert_eq!(server.broker.subscriber_count("a"), 0);
        assert_eq!(server.broker.subscriber_count("b"), 1);
        assert_eq!(server.broker.publish("a", "lost"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscriptions() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client
            .write_all(b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n")
            .await
            .unwrap();
        expect(&mut client, b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n").await;
        assert_eq!(server.broker.subscriber_count("news"), 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.broker.subscriber_count("news"), 0);
    }

    #[tokio::test]
    async fn test_binary_value_keeps_connection() {
        let server = create_test_server().await;
        let mut client = connect(server.addr).await;

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\n\xff\xfe\r\n*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();
        expect(&mut client, b"+OK\r\n+PONG\r\n").await;

        assert_eq!(server.storage.get("k"), Some("\u{FFFD}\u{FFFD}".to_string()));
    }

    #[tokio::test]
    async fn test_failed_delivery_unsubscribes() {
        use tokio_test::io::Builder;

        let broker = Arc::new(Broker::default());
        let subscription = broker.subscribe("news");
        let (_cancel, cancelled) = oneshot::channel();

        let mock = Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let writer = ReplyWriter::new(mock, Arc::new(ConnectionStats::new()));
        let client: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let task = tokio::spawn(deliver(
            subscription,
            cancelled,
            writer,
            Arc::clone(&broker),
            client,
        ));

        assert_eq!(broker.publish("news", "hi"), 1);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("delivery task did not stop")
            .unwrap();

        assert_eq!(broker.subscriber_count("news"), 0);
        assert_eq!(broker.publish("news", "again"), 0);
    }

    #[tokio::test]
    async fn test_stalled_delivery_is_aborted() {
        let broker = Arc::new(Broker::default());
        let subscription = broker.subscribe("news");
        let (cancel, cancelled) = oneshot::channel();

        // Nobody reads the client side, so the flush blocks once it is full
        let (_client, server) = tokio::io::duplex(8);
        let (_, server_write) = tokio::io::split(server);
        let writer = ReplyWriter::new(server_write, Arc::new(ConnectionStats::new()));
        let client: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let task = tokio::spawn(deliver(
            subscription,
            cancelled,
            writer,
            Arc::clone(&broker),
            client,
        ));

        assert_eq!(broker.publish("news", &"x".repeat(100)), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let finished = tokio::time::timeout(
            Duration::from_secs(2),
            stop_delivery(task, cancel, Duration::from_millis(50)),
        )
        .await
        .expect("stop_delivery did not return");
        assert!(!finished);
    }

    #[tokio::test]
    async fn test_idle_delivery_stops_promptly() {
        let broker = Arc::new(Broker::default());
        let subscription = broker.subscribe("news");
        let (cancel, cancelled) = oneshot::channel();

        let (_client, server) = tokio::io::duplex(1024);
        let (_, server_write) = tokio::io::split(server);
        let writer = ReplyWriter::new(server_write, Arc::new(ConnectionStats::new()));
        let client: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let task = tokio::spawn(deliver(subscription, cancelled, writer, broker, client));

        assert!(stop_delivery(task, cancel, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let server = create_test_server().await;
        let stats = &server.stats;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = connect(server.addr).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect(&mut client, b"+PONG\r\n").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
