//! HTTP transport for h2drain
//!
//! This module holds the endpoint layer the HTTP/2 server runs over.
//!
//! # Architecture
//!
//! The transport uses a session operations abstraction:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` adds a poll timeout in front of reads and writes
//! - `SharedSession` lets another thread destroy the endpoint safely
//! - `h2` holds the HTTP/2 server core that drives a session
//!
//! # Examples
//!
//! ```no_run
//! use h2drain::http::h2::{H2ServerBuilder};
//! use h2drain::http::session::FdSessionOps;
//! use std::net::TcpListener;
//! use std::time::Duration;
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//! let (stream, _) = listener.accept().unwrap();
//!
//! let mut server = H2ServerBuilder::new()
//!     .ping_timeout(Duration::from_secs(2))
//!     .build(FdSessionOps::new(stream))
//!     .unwrap();
//! let handle = server.handle();
//!
//! std::thread::spawn(move || {
//!     std::thread::sleep(Duration::from_secs(30));
//!     handle.initiate_shutdown("Server shutdown");
//! });
//!
//! server.run(|responder, request| {
//!     responder.send_response(request.stream_id, 200, &[], b"OK")
//! }).unwrap();
//! ```

pub mod h2;
pub mod session;

pub use session::{HttpSession, SessionOps, SharedSession};

/// Result type for endpoint operations
pub type Result<T> = std::result::Result<T, Error>;

/// Endpoint errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session destroyed")]
    SessionDestroyed,
}
