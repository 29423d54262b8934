//! End-to-end exchanges against a loopback server.

use bytes::BytesMut;
use jsonframe::protocol::{
    decode_header, decode_length_prefix, decode_payload, encode_message, LENGTH_PREFIX_LEN,
};
use jsonframe::runtime::{client, Limits};
use jsonframe::{
    ConnectionError, Frame, Message, Payload, Server, ServerSettings, ShutdownHandle,
    TranslationTable, Translator,
};
use serde_json::{json, Value};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<io::Result<()>>>,
}

impl Running {
    /// Request shutdown and wait for the dispatcher to return.
    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.shutdown.shutdown();
            thread.join().unwrap().unwrap();
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.stop();
    }
}

fn start() -> Running {
    start_with(ServerSettings::default())
}

fn start_with(settings: ServerSettings) -> Running {
    let service = Arc::new(Translator::new(Arc::new(TranslationTable::default())));
    let mut server = Server::bind("127.0.0.1:0".parse().unwrap(), settings, service).unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let thread = thread::spawn(move || server.run());

    Running {
        addr,
        shutdown,
        thread: Some(thread),
    }
}

fn translate(addr: SocketAddr, action: &str, value: &str) -> Value {
    let request = Message::json(json!({"action": action, "value": value}));
    let frame = client::exchange(addr, request, Limits::default()).unwrap();
    frame.json().cloned().unwrap()
}

fn framed(message: &Message) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_message(message, &mut buf).unwrap();
    buf.to_vec()
}

fn decode_one(bytes: &[u8]) -> Frame {
    let header_len = decode_length_prefix(bytes).unwrap() as usize;
    let header_end = LENGTH_PREFIX_LEN + header_len;
    let header = decode_header(&bytes[LENGTH_PREFIX_LEN..header_end]).unwrap();
    let end = header_end + header.content_length;
    assert_eq!(end, bytes.len(), "exactly one response frame expected");
    let payload = decode_payload(&header, &bytes[header_end..end]).unwrap();
    Frame { header, payload }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn test_translates_known_word() {
    let server = start();
    assert_eq!(
        translate(server.addr, "traduzir", "hello"),
        json!({"result": "olá"})
    );
}

#[test]
fn test_unknown_word_and_invalid_action() {
    let server = start();
    assert_eq!(
        translate(server.addr, "traduzir", "spaceship"),
        json!({"result": "Não há tradução para 'spaceship'."})
    );
    assert_eq!(
        translate(server.addr, "buscar", "hello"),
        json!({"result": "erro! Ação inválida 'buscar'."})
    );
}

#[test]
fn test_byte_at_a_time_request() {
    let server = start();
    let mut stream = connect(server.addr);
    stream.set_nodelay(true).unwrap();

    let request = framed(&Message::json(json!({"action": "traduzir", "value": "water"})));
    for byte in &request {
        stream.write_all(&[*byte]).unwrap();
        thread::sleep(Duration::from_millis(1));
    }

    // The server answers once and closes, so read_to_end sees EOF.
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    let frame = decode_one(&response);
    assert_eq!(frame.header.content_type, "text/json");
    assert_eq!(frame.payload, Payload::Json(json!({"result": "água"})));
}

#[test]
fn test_malformed_header_closes_without_response() {
    let server = start();
    let mut stream = connect(server.addr);

    let header = br#"{"byteorder":"little","content-type":"text/json","content-length":2}"#;
    let mut bytes = (header.len() as u16).to_be_bytes().to_vec();
    bytes.extend_from_slice(header);
    bytes.extend_from_slice(b"{}");
    stream.write_all(&bytes).unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    assert!(response.is_empty());

    // Other connections are unaffected.
    assert_eq!(
        translate(server.addr, "traduzir", "dog"),
        json!({"result": "cachorro"})
    );
}

#[test]
fn test_peer_closing_mid_message_is_contained() {
    let server = start();
    let request = framed(&Message::json(json!({"action": "traduzir", "value": "house"})));

    let mut stream = connect(server.addr);
    stream.write_all(&request[..request.len() / 2]).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    assert!(response.is_empty());

    assert_eq!(
        translate(server.addr, "traduzir", "house"),
        json!({"result": "casa"})
    );
}

#[test]
fn test_concurrent_clients() {
    let server = start();
    let addr = server.addr;

    let words = [("book", "livro"), ("car", "carro"), ("sister", "irmã"), ("next", "próximo")];
    let handles: Vec<_> = words
        .iter()
        .map(|(en, pt)| {
            let (en, pt) = (en.to_string(), pt.to_string());
            thread::spawn(move || {
                for _ in 0..5 {
                    assert_eq!(translate(addr, "traduzir", &en), json!({"result": pt}));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_client_reports_refused_connection() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let request = Message::json(json!({"action": "traduzir", "value": "hello"}));
    let err = client::exchange(addr, request, Limits::default()).unwrap_err();
    assert!(matches!(err, ConnectionError::Io(_)));
}

#[test]
fn test_connection_cap_drops_excess_and_recovers() {
    let server = start_with(ServerSettings {
        max_connections: 1,
        ..ServerSettings::default()
    });
    let request = framed(&Message::json(json!({"action": "traduzir", "value": "dog"})));
    let half = request.len() / 2;

    let mut held = connect(server.addr);
    held.write_all(&request[..half]).unwrap();

    // Accepted while the only slot is taken, then dropped without a reply.
    let mut excess = connect(server.addr);
    let mut response = Vec::new();
    let _ = excess.read_to_end(&mut response);
    assert!(response.is_empty());

    held.write_all(&request[half..]).unwrap();
    let mut response = Vec::new();
    held.read_to_end(&mut response).unwrap();
    let frame = decode_one(&response);
    assert_eq!(frame.payload, Payload::Json(json!({"result": "cachorro"})));

    // The slot is free again once the held connection has closed.
    assert_eq!(
        translate(server.addr, "traduzir", "house"),
        json!({"result": "casa"})
    );
}

#[test]
fn test_shutdown_closes_open_connections() {
    let mut server = start();
    let request = framed(&Message::json(json!({"action": "traduzir", "value": "book"})));

    let mut pending = connect(server.addr);
    pending.write_all(&request[..request.len() / 2]).unwrap();

    // Accepts are in order, so a completed exchange means `pending` is registered.
    assert_eq!(
        translate(server.addr, "traduzir", "car"),
        json!({"result": "carro"})
    );

    server.stop();

    let mut response = Vec::new();
    match pending.read_to_end(&mut response) {
        Ok(_) => {}
        Err(e) => assert!(
            !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
            "pending connection left open: {e}"
        ),
    }
    assert!(response.is_empty());
}
