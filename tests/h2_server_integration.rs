//! HTTP/2 server integration tests
//!
//! These tests run H2Server over loopback TCP against a hand-driven client.

use bytes::Bytes;
use h2drain::http::h2::codec::{decode_goaway, encode_ping};
use h2drain::http::h2::shutdown::CANCEL_ALL_DEBUG;
use h2drain::http::h2::*;
use h2drain::http::session::FdSessionOps;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// :method GET, :scheme http, :path /
const GET_ROOT: &[u8] = &[0x82, 0x86, 0x84];

struct Harness {
    client: TcpStream,
    handle: ServerHandle,
    server: JoinHandle<Result<()>>,
}

fn start_server(builder: H2ServerBuilder) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (handle_tx, handle_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut server = builder.build(FdSessionOps::new(stream))?;
        handle_tx.send(server.handle()).unwrap();
        server.run(|conn, request| {
            let body = format!("served {}", String::from_utf8_lossy(request.path().unwrap_or(b"")));
            conn.send_response(
                request.stream_id,
                200,
                &[("content-type", "text/plain")],
                body.as_bytes(),
            )
        })
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut preface = CONNECTION_PREFACE.to_vec();
    preface.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(Settings::new())));
    client.write_all(&preface).unwrap();

    let handle = handle_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    Harness { client, handle, server }
}

fn builder() -> H2ServerBuilder {
    H2ServerBuilder::new().http2_bdp_probe(false)
}

/// Next frame that is not part of the SETTINGS exchange; None on EOF
fn next_frame(client: &mut TcpStream) -> Option<Frame> {
    loop {
        match FrameCodec::read_frame(client) {
            Ok(frame) if frame.kind() == Some(FrameType::Settings) => continue,
            Ok(frame) => return Some(frame),
            // A close with unread input may surface as a reset
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
                ) =>
            {
                return None
            }
            Err(err) => panic!("read failed: {}", err),
        }
    }
}

fn expect_goaway(client: &mut TcpStream) -> (u32, u32, Bytes) {
    let frame = next_frame(client).expect("connection closed before GOAWAY");
    assert_eq!(frame.kind(), Some(FrameType::Goaway), "unexpected frame {:?}", frame);
    let mut raw = FrameCodec::encode_header(FrameType::Goaway, frame.flags, frame.stream_id, frame.payload_len()).to_vec();
    raw.extend_from_slice(&frame.payload);
    decode_goaway(&raw).unwrap()
}

fn expect_ping(client: &mut TcpStream) -> u64 {
    let frame = next_frame(client).expect("connection closed before PING");
    assert_eq!(frame.kind(), Some(FrameType::Ping));
    FrameCodec::decode_ping_payload(frame.flags, frame.stream_id, &frame.payload)
        .unwrap()
        .opaque
}

fn send_request(client: &mut TcpStream, stream_id: u32, end_stream: bool) {
    let frame = FrameCodec::encode_headers_frame(&HeadersFrame::new(
        stream_id,
        Bytes::from_static(GET_ROOT),
        end_stream,
        true,
    ));
    client.write_all(&frame).unwrap();
}

#[test]
fn test_request_response() {
    let mut h = start_server(builder());
    send_request(&mut h.client, 1, true);

    let headers = next_frame(&mut h.client).unwrap();
    assert_eq!(headers.kind(), Some(FrameType::Headers));
    assert_eq!(headers.stream_id, 1);
    assert!(headers.flags.is_end_headers());

    let fields = ::hpack::Decoder::new().decode(&headers.payload).unwrap();
    assert_eq!(fields[0], (b":status".to_vec(), b"200".to_vec()));
    assert!(fields.contains(&(b"content-type".to_vec(), b"text/plain".to_vec())));

    let data = next_frame(&mut h.client).unwrap();
    assert_eq!(data.kind(), Some(FrameType::Data));
    assert!(data.flags.is_end_stream());
    assert_eq!(data.payload.as_ref(), b"served /");

    drop(h.client);
    h.server.join().unwrap().unwrap();
}

#[test]
fn test_graceful_shutdown_with_ping_ack() {
    let mut h = start_server(builder());
    send_request(&mut h.client, 1, true);
    assert_eq!(next_frame(&mut h.client).unwrap().kind(), Some(FrameType::Headers));
    assert_eq!(next_frame(&mut h.client).unwrap().kind(), Some(FrameType::Data));

    assert!(h.handle.initiate_shutdown("Server shutdown"));

    let (last, code, debug) = expect_goaway(&mut h.client);
    assert_eq!(last, MAX_STREAM_ID);
    assert_eq!(code, 0);
    assert_eq!(debug.as_ref(), b"Server shutdown");

    let opaque = expect_ping(&mut h.client);
    h.client.write_all(&encode_ping(true, opaque)).unwrap();

    let (last, code, debug) = expect_goaway(&mut h.client);
    assert_eq!(last, 1);
    assert_eq!(code, 0);
    assert_eq!(debug.as_ref(), b"Server shutdown");

    // Nothing left to drain, so the server closes the endpoint
    assert!(next_frame(&mut h.client).is_none());
    h.server.join().unwrap().unwrap();
}

#[test]
fn test_unresponsive_peer_times_out() {
    let ping_timeout = Duration::from_millis(200);
    let mut h = start_server(builder().ping_timeout(ping_timeout));

    let started = Instant::now();
    assert!(h.handle.initiate_shutdown("Server shutdown"));

    let (last, _, _) = expect_goaway(&mut h.client);
    assert_eq!(last, MAX_STREAM_ID);
    expect_ping(&mut h.client);

    // Never acknowledge the PING
    let (last, code, _) = expect_goaway(&mut h.client);
    assert!(started.elapsed() >= ping_timeout);
    assert_eq!(last, 0);
    assert_eq!(code, 0);

    assert!(next_frame(&mut h.client).is_none());
    h.server.join().unwrap().unwrap();
}

#[test]
fn test_cancel_all_calls() {
    let mut h = start_server(builder());
    // Request body never arrives
    send_request(&mut h.client, 1, false);

    // Wait until the server has accepted stream 1
    let opaque = 0x1234;
    h.client.write_all(&encode_ping(false, opaque)).unwrap();
    let pong = next_frame(&mut h.client).unwrap();
    assert!(pong.flags.is_ack());

    assert!(h.handle.initiate_shutdown("Server shutdown"));
    expect_goaway(&mut h.client);
    expect_ping(&mut h.client);

    assert!(h.handle.cancel_all_calls());
    let (last, code, debug) = expect_goaway(&mut h.client);
    assert_eq!(last, 1);
    assert_eq!(code, 2);
    assert_eq!(debug.as_ref(), CANCEL_ALL_DEBUG);

    let rst = next_frame(&mut h.client).unwrap();
    assert_eq!(rst.kind(), Some(FrameType::RstStream));
    assert_eq!(rst.stream_id, 1);
    let rst = FrameCodec::decode_rst_stream_payload(rst.stream_id, &rst.payload).unwrap();
    assert_eq!(rst.error_code, ErrorCode::Cancel.as_u32());

    assert!(next_frame(&mut h.client).is_none());
    h.server.join().unwrap().unwrap();
}

#[test]
fn test_destroy_endpoint_from_another_thread() {
    let mut h = start_server(builder());

    let handle = h.handle.clone();
    thread::spawn(move || handle.destroy_endpoint().unwrap())
        .join()
        .unwrap();

    assert!(next_frame(&mut h.client).is_none());
    h.server.join().unwrap().unwrap();

    // The server is gone; commands are refused
    assert!(!h.handle.initiate_shutdown("late"));
}

#[test]
fn test_peer_disconnect_ends_server() {
    let h = start_server(builder());
    drop(h.client);
    h.server.join().unwrap().unwrap();
}
