use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use junction::config::EngineConfig;
use junction::dispatch::{HookMode, Protocol, Stage};
use junction::error::FrameError;
use junction::server::ListenOptions;
use junction::tcp::{LengthDelimited, TcpAdapter};
use junction::Engine;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

#[test]
fn test_frame_split_across_chunks_decodes_once() {
    let codec = LengthDelimited::new(1024);
    let wire = frame(b"abc");
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();

    for chunk in [&wire[..2], &wire[2..5], &wire[5..]] {
        buf.extend_from_slice(chunk);
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            decoded.push(msg);
        }
    }

    assert_eq!(decoded, vec![&b"abc"[..]]);
    assert!(buf.is_empty());
}

#[test]
fn test_two_frames_in_one_chunk_decode_in_order() {
    let codec = LengthDelimited::new(1024);
    let mut wire = frame(b"first");
    wire.extend_from_slice(&frame(b"second"));
    wire.extend_from_slice(&frame(b"th")[..3]);
    let mut buf = BytesMut::from(&wire[..]);

    assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), &b"first"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), &b"second"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    // The trailing partial frame is retained
    assert_eq!(buf.len(), 3);
}

#[test]
fn test_zero_length_frame() {
    let codec = LengthDelimited::new(1024);
    let mut buf = BytesMut::from(&frame(b"")[..]);

    assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 0);
}

#[test]
fn test_encode_respects_limit() {
    let codec = LengthDelimited::new(2);
    let mut out = BytesMut::new();

    assert_eq!(
        codec.encode(b"abc", &mut out).unwrap_err(),
        FrameError::TooLarge { len: 3, max: 2 }
    );
}

async fn start(engine: Arc<Engine>, options: ListenOptions) -> SocketAddr {
    engine.register_protocol("tcp", Arc::new(TcpAdapter::new()));
    engine.listen("tcp", 0, &options).await.unwrap()
}

/// Echo server that uppercases every message.
fn upper_engine() -> Arc<Engine> {
    let engine = Arc::new(Engine::default());
    engine.hook_fn(Stage::RequestReceived, |ctx| {
        let upper = ctx.body.to_ascii_uppercase();
        ctx.set_body(upper);
        Ok(())
    });
    engine
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    timeout(WAIT, stream.read_exact(&mut header)).await.unwrap().unwrap();
    let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
    timeout(WAIT, stream.read_exact(&mut payload)).await.unwrap().unwrap();
    payload
}

#[tokio::test]
async fn test_tcp_frames_dispatched_in_arrival_order() {
    let engine = upper_engine();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    engine.hook_fn(Stage::ResponseReady, move |ctx| {
        assert_eq!(ctx.protocol, Some(Protocol::Tcp));
        log.lock().push(ctx.body.clone());
        Ok(())
    });
    let addr = start(Arc::clone(&engine), ListenOptions::default()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut wire = frame(b"one");
    wire.extend_from_slice(&frame(b"two"));
    stream.write_all(&wire).await.unwrap();

    assert_eq!(read_frame(&mut stream).await, b"ONE");
    assert_eq!(read_frame(&mut stream).await, b"TWO");
    assert_eq!(*seen.lock(), vec![&b"one"[..], &b"two"[..]]);
}

#[tokio::test]
async fn test_tcp_frame_split_across_writes() {
    let addr = start(upper_engine(), ListenOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let wire = frame(b"abc");
    stream.write_all(&wire[..2]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(&wire[2..5]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(&wire[5..]).await.unwrap();

    assert_eq!(read_frame(&mut stream).await, b"ABC");
}

#[tokio::test]
async fn test_tcp_raw_responses() {
    let options = ListenOptions {
        frame_responses: false,
        ..ListenOptions::default()
    };
    let addr = start(upper_engine(), options).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(&frame(b"raw")).await.unwrap();

    let mut out = [0u8; 3];
    timeout(WAIT, stream.read_exact(&mut out)).await.unwrap().unwrap();
    assert_eq!(&out, b"RAW");
}

#[tokio::test]
async fn test_tcp_oversized_frame_closes_connection() {
    let options = ListenOptions {
        max_frame_len: 8,
        ..ListenOptions::default()
    };
    let addr = start(upper_engine(), options).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(&1000u32.to_be_bytes()).await.unwrap();

    let mut out = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut out)).await.unwrap().unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_tcp_pipeline_fault_abandons_only_that_frame() {
    let config = EngineConfig {
        hook_mode: HookMode::Inline,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::new(&config));
    engine.hook_fn(Stage::RequestReceived, |ctx| {
        if ctx.body.as_ref() == b"bad" {
            anyhow::bail!("rejected frame");
        }
        let body = ctx.body.clone();
        ctx.set_body(body);
        Ok(())
    });
    let addr = start(Arc::clone(&engine), ListenOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut wire = frame(b"bad");
    wire.extend_from_slice(&frame(b"ok"));
    stream.write_all(&wire).await.unwrap();

    assert_eq!(read_frame(&mut stream).await, b"ok");
    assert_eq!(engine.breaker().failures(), 1);
}
