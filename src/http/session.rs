//! Session operations abstraction
//!
//! This module provides the session operations pattern that keeps the
//! HTTP/2 driver independent of the concrete endpoint. A [`SharedSession`]
//! additionally lets a second thread destroy the endpoint: destruction and
//! every endpoint operation are serialized by one mutex, so a read that is
//! completing never touches an endpoint that has already been torn down.

use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

// Longest a poll holds the destroy lock
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Session operations trait
///
/// This trait defines the operations that can be performed on an endpoint.
/// `read` returning `Ok(0)` means the peer closed its side.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Session wrapping a transport with a poll timeout
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
}

impl<S: SessionOps> HttpSession<S> {
    /// Create a new HTTP session
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read data with timeout
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Poll first
        if !self.session.poll(PollEvents::Read, self.timeout)? {
            return Err(Error::Timeout);
        }

        self.session.read(buf)
    }

    /// Write data with timeout
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // Poll first
        if !self.session.poll(PollEvents::Write, self.timeout)? {
            return Err(Error::Timeout);
        }

        self.session.write(buf)
    }

    /// Write all of `buf`, polling before each partial write
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.session
    }

    /// Get a mutable reference to the underlying session
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
                PollEvents::Both => POLLIN | POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis() as i32)
            .unwrap_or(-1); // -1 = infinite

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Ok(result > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        // Shutdown the connection
        use std::net::Shutdown;
        self.stream
            .shutdown(Shutdown::Both)
            .map_err(Error::from)
    }
}

/// Helper to create a session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}

/// Endpoint that can be destroyed from another thread
///
/// Clones share the endpoint. Every operation holds the destroy lock for its
/// duration; once [`SharedSession::destroy`] has run, operations fail with
/// [`Error::SessionDestroyed`] instead of reaching the endpoint. Polls wait in
/// slices of at most 50ms and release the lock in between, so a destroy is
/// never held up by a long poll timeout.
pub struct SharedSession<S: SessionOps> {
    inner: Arc<Mutex<Option<S>>>,
}

impl<S: SessionOps> Clone for SharedSession<S> {
    fn clone(&self) -> Self {
        SharedSession {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SessionOps> SharedSession<S> {
    /// Share an endpoint
    pub fn new(session: S) -> Self {
        SharedSession {
            inner: Arc::new(Mutex::new(Some(session))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<S>> {
        // A panic while holding the lock leaves the endpoint itself intact
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on the endpoint while holding the destroy lock
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> Result<R>) -> Result<R> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(session) => f(session),
            None => Err(Error::SessionDestroyed),
        }
    }

    /// Close and drop the endpoint; later calls are no-ops
    pub fn destroy(&self) -> Result<()> {
        let mut guard = self.lock();
        match guard.take() {
            Some(mut session) => {
                debug!("destroying endpoint");
                session.close()
            }
            None => Ok(()),
        }
    }

    /// Whether the endpoint has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.lock().is_none()
    }
}

impl<S: SessionOps> SessionOps for SharedSession<S> {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let slice = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(POLL_SLICE),
                None => POLL_SLICE,
            };
            let ready = {
                let guard = self.lock();
                match guard.as_ref() {
                    Some(session) => session.poll(events, Some(slice))?,
                    None => return Err(Error::SessionDestroyed),
                }
            };
            if ready {
                return Ok(true);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.with(|s| s.read(buf))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.with(|s| s.write(buf))
    }

    fn close(&mut self) -> Result<()> {
        self.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_fd_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = FdSessionOps::new(stream);

        // Poll for read
        assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(1))).unwrap());

        // Read data
        let mut buf = [0u8; 5];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_http_session_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Don't send anything - test timeout
        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            // Don't send anything
            thread::sleep(Duration::from_secs(2));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = from_tcp_stream(stream);
        session.set_timeout(Some(Duration::from_millis(100)));

        let mut buf = [0u8; 10];
        let result = session.read(&mut buf);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[test]
    fn test_shared_session_destroy() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"ping").unwrap();
            let mut buf = [0u8; 1];
            // returns once the server side is shut down
            let _ = stream.read(&mut buf);
        });

        let stream = TcpStream::connect(addr).unwrap();
        let shared = SharedSession::new(FdSessionOps::new(stream));
        let mut session = HttpSession::new(shared.clone());

        let mut buf = [0u8; 4];
        assert_eq!(session.read(&mut buf).unwrap(), 4);

        let other = shared.clone();
        thread::spawn(move || other.destroy().unwrap()).join().unwrap();
        assert!(shared.is_destroyed());

        let result = session.read(&mut buf);
        assert!(matches!(result, Err(Error::SessionDestroyed)));
        assert!(matches!(session.write(b"x"), Err(Error::SessionDestroyed)));

        // destroying twice is harmless
        shared.destroy().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_destroy_interrupts_long_poll() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Stay silent until the server side goes away
            let mut buf = [0u8; 1];
            let _ = stream.read(&mut buf);
        });

        let stream = TcpStream::connect(addr).unwrap();
        let shared = SharedSession::new(FdSessionOps::new(stream));

        let poller = shared.clone();
        let started = Instant::now();
        let waiting = thread::spawn(move || poller.poll(PollEvents::Read, Some(Duration::from_secs(10))));

        thread::sleep(Duration::from_millis(100));
        let destroy_started = Instant::now();
        shared.destroy().unwrap();
        assert!(destroy_started.elapsed() < Duration::from_secs(1));

        let result = waiting.join().unwrap();
        assert!(matches!(result, Err(Error::SessionDestroyed)));
        assert!(started.elapsed() < Duration::from_secs(5));
        peer.join().unwrap();
    }

    #[test]
    fn test_shared_poll_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        let _accepted = listener.accept().unwrap();

        let shared = SharedSession::new(FdSessionOps::new(stream));
        let started = Instant::now();
        assert!(!shared.poll(PollEvents::Read, Some(Duration::from_millis(120))).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert!(shared.poll(PollEvents::Write, Some(Duration::ZERO)).unwrap());
    }
}
