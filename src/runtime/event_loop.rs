//! mio event loop for the server side.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! connection state machine performs non-blocking reads/writes.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! One thread owns the poll instance and the registration table (a slab
//! keyed by token). Every connection callback runs inside its own failure
//! boundary: an error closes that connection and nothing else.

use crate::runtime::connection::{Connection, Interest, Limits, Progress, Ready};
use crate::runtime::Service;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Poll, Token, Waker};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, debug_span, error, info, warn, Span};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Registration slots allocated up front; the slab grows past this on demand.
const PREALLOCATED_CONNECTIONS: usize = 1024;
/// Largest `Events` buffer handed to a single poll.
const MAX_EVENTS_CAPACITY: usize = 64 * 1024;

/// Tunables for the dispatch loop.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Accepted sockets beyond this many open connections are dropped.
    pub max_connections: usize,
    /// Capacity of the mio `Events` buffer.
    pub events_capacity: usize,
    pub limits: Limits,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            events_capacity: 1024,
            limits: Limits::default(),
        }
    }
}

/// A registered connection.
struct Entry {
    stream: TcpStream,
    peer: SocketAddr,
    conn: Connection,
    /// Interest currently registered with the poll instance.
    registered: Interest,
    span: Span,
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake dispatcher");
        }
    }
}

/// Listening socket plus the registration table of its accepted connections.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    connections: Slab<Entry>,
    service: Arc<dyn Service>,
    settings: ServerSettings,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Server {
    /// Bind and listen on `addr`. Connections are answered by `service`.
    pub fn bind(
        addr: SocketAddr,
        settings: ServerSettings,
        service: Arc<dyn Service>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, mio::Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            listener,
            connections: Slab::with_capacity(
                settings.max_connections.min(PREALLOCATED_CONNECTIONS),
            ),
            service,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the dispatch loop until a shutdown is requested.
    ///
    /// Only poll failures end the loop with an error; connection failures
    /// are logged and contained.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events =
            Events::with_capacity(self.settings.events_capacity.clamp(1, MAX_EVENTS_CAPACITY));

        info!(
            addr = %self.local_addr()?,
            max_connections = self.settings.max_connections,
            "Listening"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {}
                    LISTENER_TOKEN => self.accept_connections(),
                    Token(conn_id) => self.dispatch(conn_id, Ready::from(event)),
                }
            }
        }

        let open: Vec<usize> = self.connections.iter().map(|(id, _)| id).collect();
        for conn_id in open {
            self.close_connection(conn_id);
        }
        info!("Dispatcher stopped");
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.connections.len() >= self.settings.max_connections {
                        warn!(peer = %peer, "Connection limit reached, dropping connection");
                        continue;
                    }

                    let slot = self.connections.vacant_entry();
                    let conn_id = slot.key();
                    let conn = Connection::server(Arc::clone(&self.service), self.settings.limits);
                    let registered = conn.interest();

                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, Token(conn_id), registered.to_mio())
                    {
                        warn!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    slot.insert(Entry {
                        stream,
                        peer,
                        conn,
                        registered,
                        span: debug_span!("conn", id = conn_id, peer = %peer),
                    });
                    info!(conn_id, peer = %peer, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    /// Invoke the connection's state machine for one readiness event.
    fn dispatch(&mut self, conn_id: usize, ready: Ready) {
        let Some(entry) = self.connections.get_mut(conn_id) else {
            return;
        };

        let result = entry
            .span
            .in_scope(|| entry.conn.process_events(&mut entry.stream, ready));

        match result {
            Ok(Progress::Continue(interest)) if interest != entry.registered => {
                let reregistered =
                    self.poll
                        .registry()
                        .reregister(&mut entry.stream, Token(conn_id), interest.to_mio());
                match reregistered {
                    Ok(()) => {
                        debug!(conn_id, ?interest, "Interest changed");
                        entry.registered = interest;
                    }
                    Err(e) => {
                        warn!(peer = %entry.peer, error = %e, "Failed to change interest");
                        self.close_connection(conn_id);
                    }
                }
            }
            Ok(Progress::Continue(_)) => {}
            Ok(Progress::Complete) => self.close_connection(conn_id),
            Err(e) => {
                warn!(peer = %entry.peer, error = %e, "Connection failed");
                self.close_connection(conn_id);
            }
        }
    }

    /// Deregister and drop the socket. Cleanup failures are logged only.
    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut entry) = self.connections.try_remove(conn_id) {
            if let Err(e) = self.poll.registry().deregister(&mut entry.stream) {
                debug!(conn_id, error = %e, "Deregister failed");
            }
            info!(conn_id, peer = %entry.peer, "Connection closed");
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, Message};
    use serde_json::json;
    use std::thread;

    struct Fixed;

    impl Service for Fixed {
        fn respond(&self, _request: &Frame) -> Message {
            Message::json(json!({"result": "ok"}))
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let server = Server::bind(
            "127.0.0.1:0".parse().unwrap(),
            ServerSettings::default(),
            Arc::new(Fixed),
        )
        .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_oversized_settings_do_not_preallocate() {
        let settings = ServerSettings {
            max_connections: usize::MAX,
            events_capacity: usize::MAX,
            limits: Limits {
                recv_chunk_size: usize::MAX,
                max_content_length: None,
            },
        };
        let mut server =
            Server::bind("127.0.0.1:0".parse().unwrap(), settings, Arc::new(Fixed)).unwrap();
        let handle = server.shutdown_handle();

        let runner = thread::spawn(move || server.run());
        handle.shutdown();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_stops_run() {
        let mut server = Server::bind(
            "127.0.0.1:0".parse().unwrap(),
            ServerSettings::default(),
            Arc::new(Fixed),
        )
        .unwrap();
        let handle = server.shutdown_handle();

        let runner = thread::spawn(move || server.run());
        handle.shutdown();
        runner.join().unwrap().unwrap();
    }
}
