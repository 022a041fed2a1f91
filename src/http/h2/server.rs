//! HTTP/2 server driver
//!
//! [`H2Server`] runs a [`ServerConnection`] over a blocking [`SessionOps`]
//! endpoint: it reads with a poll timeout derived from the connection's next
//! timer, flushes queued frames in order, and hands complete requests to a
//! handler. A [`ServerHandle`] lets other threads start a graceful shutdown,
//! cancel all calls, or destroy the endpoint.

use super::connection::{ConnectionEvent, ServerConnection};
use super::error::{Error, Result};
use super::hpack::DecodedHeader;
use super::settings::Settings;
use super::stream::StreamId;
use crate::http::session::{HttpSession, SessionOps, SharedSession};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default time to wait for the shutdown PING ACK
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time to wait for a keepalive PING ACK
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound on the whole shutdown sequence
pub const DEFAULT_SHUTDOWN_WATCHDOG: Duration = Duration::from_secs(60);

/// Longest the driver blocks in a read before checking for commands
const COMMAND_TICK: Duration = Duration::from_millis(50);

/// Poll timeout for writes
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const READ_BUFFER_SIZE: usize = 16384;

/// Server connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// SETTINGS advertised to the peer
    pub settings: Settings,
    /// Time to wait for the shutdown PING ACK before sending the final GOAWAY
    pub ping_timeout: Duration,
    /// Send BDP probe PINGs while receiving data
    pub http2_bdp_probe: bool,
    /// Keepalive PING interval; `None` disables keepalive
    pub keepalive_time: Option<Duration>,
    /// Time to wait for a keepalive PING ACK before closing
    pub keepalive_timeout: Duration,
    /// Start a graceful shutdown once the connection is this old
    pub max_connection_age: Option<Duration>,
    /// Force the connection closed this long after shutdown began
    pub shutdown_watchdog: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            settings: Settings::server_default(),
            ping_timeout: DEFAULT_PING_TIMEOUT,
            http2_bdp_probe: true,
            keepalive_time: None,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            max_connection_age: None,
            shutdown_watchdog: DEFAULT_SHUTDOWN_WATCHDOG,
        }
    }
}

impl ServerConfig {
    /// Check the configuration for values the connection cannot run with
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        if self.ping_timeout.is_zero() {
            return Err(Error::InvalidSettings("ping timeout must be non-zero".to_string()));
        }
        if self.keepalive_time.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidSettings("keepalive time must be non-zero".to_string()));
        }
        if self.keepalive_timeout.is_zero() {
            return Err(Error::InvalidSettings("keepalive timeout must be non-zero".to_string()));
        }
        if self.shutdown_watchdog < self.ping_timeout {
            return Err(Error::InvalidSettings(format!(
                "shutdown watchdog {:?} shorter than ping timeout {:?}",
                self.shutdown_watchdog, self.ping_timeout
            )));
        }
        Ok(())
    }
}

/// HTTP/2 server builder
#[derive(Debug, Clone, Default)]
pub struct H2ServerBuilder {
    config: ServerConfig,
}

impl H2ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        H2ServerBuilder {
            config: ServerConfig::default(),
        }
    }

    /// Set the SETTINGS advertised to the peer
    pub fn settings(mut self, settings: Settings) -> Self {
        self.config.settings = settings;
        self
    }

    /// Set the shutdown PING timeout
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Enable or disable BDP probe PINGs
    pub fn http2_bdp_probe(mut self, enabled: bool) -> Self {
        self.config.http2_bdp_probe = enabled;
        self
    }

    /// Send keepalive PINGs at this interval
    pub fn keepalive_time(mut self, interval: Duration) -> Self {
        self.config.keepalive_time = Some(interval);
        self
    }

    /// Set the keepalive PING ACK timeout
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.config.keepalive_timeout = timeout;
        self
    }

    /// Drain the connection once it reaches this age
    pub fn max_connection_age(mut self, age: Duration) -> Self {
        self.config.max_connection_age = Some(age);
        self
    }

    /// Set the shutdown watchdog
    pub fn shutdown_watchdog(mut self, watchdog: Duration) -> Self {
        self.config.shutdown_watchdog = watchdog;
        self
    }

    /// Validate and return the configuration
    pub fn build_config(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build a server over `session`
    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Server<S>> {
        let config = self.build_config()?;
        Ok(H2Server::with_config(session, config))
    }
}

/// Request delivered to the handler once its stream has ended
#[derive(Debug, Clone)]
pub struct Request {
    /// Stream carrying the request
    pub stream_id: StreamId,
    /// Request headers followed by any trailers
    pub headers: Vec<DecodedHeader>,
    /// Request body
    pub body: Bytes,
}

impl Request {
    /// First header named `name`
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.as_ref() == name.as_bytes())
            .map(|h| h.value.as_ref())
    }

    /// `:method` pseudo-header
    pub fn method(&self) -> Option<&[u8]> {
        self.header(":method")
    }

    /// `:path` pseudo-header
    pub fn path(&self) -> Option<&[u8]> {
        self.header(":path")
    }
}

#[derive(Debug)]
enum Command {
    InitiateShutdown(Bytes),
    CancelAllCalls,
}

trait Endpoint: Send + Sync {
    fn destroy(&self) -> crate::http::Result<()>;
}

impl<S: SessionOps + Send> Endpoint for SharedSession<S> {
    fn destroy(&self) -> crate::http::Result<()> {
        SharedSession::destroy(self)
    }
}

/// Cross-thread control of a running [`H2Server`]
#[derive(Clone)]
pub struct ServerHandle {
    commands: Sender<Command>,
    endpoint: Arc<dyn Endpoint>,
}

impl ServerHandle {
    /// Ask the server to drain gracefully; false if the server has stopped
    pub fn initiate_shutdown(&self, reason: impl AsRef<[u8]>) -> bool {
        self.commands
            .send(Command::InitiateShutdown(Bytes::copy_from_slice(reason.as_ref())))
            .is_ok()
    }

    /// Ask the server to abort every call; false if the server has stopped
    pub fn cancel_all_calls(&self) -> bool {
        self.commands.send(Command::CancelAllCalls).is_ok()
    }

    /// Close the endpoint now, from any thread
    ///
    /// Waits for an in-progress endpoint operation of the server to finish.
    pub fn destroy_endpoint(&self) -> crate::http::Result<()> {
        self.endpoint.destroy()
    }
}

/// Blocking HTTP/2 server for one connection
pub struct H2Server<S: SessionOps> {
    session: HttpSession<SharedSession<S>>,
    shared: SharedSession<S>,
    conn: ServerConnection,
    commands: Receiver<Command>,
    command_tx: Sender<Command>,
    requests: HashMap<StreamId, (Vec<DecodedHeader>, Vec<u8>)>,
}

impl<S: SessionOps> H2Server<S> {
    /// Create a server with the default configuration
    pub fn new(session: S) -> Result<Self> {
        H2ServerBuilder::new().build(session)
    }

    fn with_config(session: S, config: ServerConfig) -> Self {
        let shared = SharedSession::new(session);
        let (command_tx, commands) = mpsc::channel();
        H2Server {
            session: HttpSession::new(shared.clone()),
            shared,
            conn: ServerConnection::new(config, Instant::now()),
            commands,
            command_tx,
            requests: HashMap::new(),
        }
    }

    /// The connection state machine
    pub fn connection(&self) -> &ServerConnection {
        &self.conn
    }

    /// The connection state machine, mutably
    pub fn connection_mut(&mut self) -> &mut ServerConnection {
        &mut self.conn
    }

    /// Begin a graceful shutdown from the driving thread
    pub fn initiate_shutdown(&mut self, reason: &[u8]) -> bool {
        self.conn.initiate_shutdown(reason, Instant::now())
    }

    /// Serve the connection until it closes
    ///
    /// `handler` is called with each complete request and may respond on
    /// the connection it is given. A handler error resets that stream.
    pub fn run<F>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(&mut ServerConnection, Request) -> Result<()>,
    {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            self.apply_commands();
            self.flush();
            if self.dispatch_events(&mut handler) {
                break;
            }
            // Responses written by the handler go out before blocking
            self.flush();

            let timeout = self.read_timeout(Instant::now());
            self.session.set_timeout(Some(timeout));
            match self.session.read(&mut buf) {
                Ok(0) => {
                    debug!("peer closed connection");
                    self.conn.on_peer_disconnect();
                }
                Ok(n) => {
                    trace!(bytes = n, "read");
                    if let Err(err) = self.conn.recv(&buf[..n], Instant::now()) {
                        debug!(%err, "connection error");
                    }
                }
                Err(crate::http::Error::Timeout) => {}
                Err(err) => {
                    debug!(%err, "read failed");
                    self.conn.on_peer_disconnect();
                }
            }

            self.conn.poll_timeout(Instant::now());
        }

        self.flush();
        if let Err(err) = self.shared.destroy() {
            debug!(%err, "closing endpoint failed");
        }
        Ok(())
    }

    fn read_timeout(&self, now: Instant) -> Duration {
        match self.conn.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(COMMAND_TICK),
            None => COMMAND_TICK,
        }
    }

    fn apply_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(Command::InitiateShutdown(reason)) => {
                    self.conn.initiate_shutdown(&reason, Instant::now());
                }
                Ok(Command::CancelAllCalls) => self.conn.cancel_all_calls(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn flush(&mut self) {
        while let Some(bytes) = self.conn.take_pending_send() {
            if self.shared.is_destroyed() {
                return;
            }
            self.session.set_timeout(Some(WRITE_TIMEOUT));
            if let Err(err) = self.session.write_all(&bytes) {
                self.conn.on_write_error(&err.to_string());
                return;
            }
        }
    }

    /// Returns true once the connection has closed
    fn dispatch_events<F>(&mut self, handler: &mut F) -> bool
    where
        F: FnMut(&mut ServerConnection, Request) -> Result<()>,
    {
        while let Some(event) = self.conn.poll_event() {
            match event {
                ConnectionEvent::Request {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    if end_stream {
                        self.deliver(handler, stream_id, headers, Vec::new());
                    } else {
                        self.requests.insert(stream_id, (headers, Vec::new()));
                    }
                }
                ConnectionEvent::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    if let Some((_, body)) = self.requests.get_mut(&stream_id) {
                        body.extend_from_slice(&data);
                    }
                    if end_stream {
                        if let Some((headers, body)) = self.requests.remove(&stream_id) {
                            self.deliver(handler, stream_id, headers, body);
                        }
                    }
                }
                ConnectionEvent::Trailers { stream_id, headers } => {
                    if let Some((mut all, body)) = self.requests.remove(&stream_id) {
                        all.extend(headers);
                        self.deliver(handler, stream_id, all, body);
                    }
                }
                ConnectionEvent::StreamReset { stream_id, error_code } => {
                    trace!(stream_id, error_code, "stream reset");
                    self.requests.remove(&stream_id);
                }
                ConnectionEvent::PeerGoaway { last_stream_id, error_code, .. } => {
                    debug!(last_stream_id, error_code, "peer is going away");
                }
                ConnectionEvent::FinalGoawaySent { last_stream_id, error_code } => {
                    debug!(last_stream_id, error_code = %error_code, "shutdown: final GOAWAY queued");
                }
                ConnectionEvent::Closed => return true,
            }
        }
        false
    }

    fn deliver<F>(&mut self, handler: &mut F, stream_id: StreamId, headers: Vec<DecodedHeader>, body: Vec<u8>)
    where
        F: FnMut(&mut ServerConnection, Request) -> Result<()>,
    {
        let request = Request {
            stream_id,
            headers,
            body: Bytes::from(body),
        };
        if let Err(err) = handler(&mut self.conn, request) {
            warn!(stream_id, %err, "handler failed, resetting stream");
            self.conn.reset_stream(stream_id, err.error_code());
        }
    }
}

impl<S: SessionOps + Send + 'static> H2Server<S> {
    /// Handle for controlling the server from other threads
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.command_tx.clone(),
            endpoint: Arc::new(self.shared.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.ping_timeout, Duration::from_secs(2));
        assert!(config.http2_bdp_probe);
        assert_eq!(config.keepalive_time, None);
        assert_eq!(config.shutdown_watchdog, Duration::from_secs(60));
        assert_eq!(config.settings.get_header_table_size(), 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let zero_ping = H2ServerBuilder::new().ping_timeout(Duration::ZERO).build_config();
        assert!(matches!(zero_ping, Err(Error::InvalidSettings(_))));

        let short_watchdog = H2ServerBuilder::new()
            .ping_timeout(Duration::from_secs(5))
            .shutdown_watchdog(Duration::from_secs(1))
            .build_config();
        assert!(short_watchdog.is_err());

        let bad_frame_size = H2ServerBuilder::new()
            .settings(Settings {
                max_frame_size: Some(100),
                ..Settings::server_default()
            })
            .build_config();
        assert!(bad_frame_size.is_err());
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = H2ServerBuilder::new()
            .ping_timeout(Duration::from_millis(200))
            .http2_bdp_probe(false)
            .keepalive_time(Duration::from_secs(30))
            .keepalive_timeout(Duration::from_secs(3))
            .max_connection_age(Duration::from_secs(600))
            .shutdown_watchdog(Duration::from_secs(5))
            .build_config()
            .unwrap();

        assert_eq!(config.ping_timeout, Duration::from_millis(200));
        assert!(!config.http2_bdp_probe);
        assert_eq!(config.keepalive_time, Some(Duration::from_secs(30)));
        assert_eq!(config.keepalive_timeout, Duration::from_secs(3));
        assert_eq!(config.max_connection_age, Some(Duration::from_secs(600)));
        assert_eq!(config.shutdown_watchdog, Duration::from_secs(5));
    }

    #[test]
    fn test_request_accessors() {
        let request = Request {
            stream_id: 1,
            headers: vec![
                DecodedHeader {
                    name: Bytes::from_static(b":method"),
                    value: Bytes::from_static(b"GET"),
                    parse_status: None,
                    never_indexed: false,
                },
                DecodedHeader {
                    name: Bytes::from_static(b":path"),
                    value: Bytes::from_static(b"/health"),
                    parse_status: None,
                    never_indexed: false,
                },
            ],
            body: Bytes::new(),
        };
        assert_eq!(request.method(), Some(&b"GET"[..]));
        assert_eq!(request.path(), Some(&b"/health"[..]));
        assert_eq!(request.header("accept"), None);
    }
}
