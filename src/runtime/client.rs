//! Client side: one connection, one request, one response.

use crate::error::{ConnectionError, Result};
use crate::protocol::{Frame, Message};
use crate::runtime::connection::{Connection, Limits, Progress, Ready};
use mio::net::TcpStream;
use mio::{Events, Poll, Token};
use std::io;
use std::net::SocketAddr;
use tracing::debug;

const CLIENT_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 16;

/// Send `request` to `addr` and wait for the decoded response.
///
/// The connection is registered for read+write, narrows to read-only once
/// the request is flushed, and is closed after the response is decoded.
pub fn exchange(addr: SocketAddr, request: Message, limits: Limits) -> Result<Frame> {
    let mut poll = Poll::new()?;
    let mut stream = TcpStream::connect(addr)?;
    let mut conn = Connection::client(request, limits);
    poll.registry()
        .register(&mut stream, CLIENT_TOKEN, conn.interest().to_mio())?;
    debug!(peer = %addr, "Connecting");

    let outcome = drive(&mut poll, &mut stream, &mut conn);

    if let Err(e) = poll.registry().deregister(&mut stream) {
        debug!(error = %e, "Deregister failed");
    }
    debug!(peer = %addr, "Connection closed");

    outcome?;
    conn.into_received().ok_or(ConnectionError::PeerClosed)
}

fn drive(poll: &mut Poll, stream: &mut TcpStream, conn: &mut Connection) -> Result<()> {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    let mut registered = conn.interest();
    let mut connected = false;

    loop {
        match poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        for event in events.iter() {
            if event.token() != CLIENT_TOKEN {
                continue;
            }
            if !connected {
                if !is_connected(stream)? {
                    continue;
                }
                connected = true;
                debug!("Connected");
            }

            match conn.process_events(stream, Ready::from(event))? {
                Progress::Complete => return Ok(()),
                Progress::Continue(interest) if interest != registered => {
                    poll.registry()
                        .reregister(stream, CLIENT_TOKEN, interest.to_mio())?;
                    registered = interest;
                }
                Progress::Continue(_) => {}
            }
        }
    }
}

/// Whether a non-blocking connect has finished. Connect failures are returned as errors.
fn is_connected(stream: &TcpStream) -> io::Result<bool> {
    if let Some(e) = stream.take_error()? {
        return Err(e);
    }
    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}
