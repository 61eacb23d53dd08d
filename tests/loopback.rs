//! End-to-end tests: the sender client against the receiver endpoint over a
//! real local WebSocket, with the audio hardware replaced on both sides.

#![cfg(all(feature = "sender", feature = "receiver"))]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use mic_bridge::{
    audio::{CaptureRequest, CaptureSource, PcmSink},
    client::MicClient,
    error::{AudioError, CaptureError, CodecError},
    protocol::{Device, SampleFormat, StreamConfig},
    receiver::{serve, OutputBackend},
    session::{SessionEvent, SessionOptions, SessionState},
    stream::FrameProducer,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Capture source driven by the test instead of hardware
#[derive(Clone, Default)]
struct ManualCapture {
    producer: Arc<Mutex<Option<FrameProducer>>>,
    running: Arc<AtomicBool>,
}

impl ManualCapture {
    fn deliver(&self, samples: &[f32]) -> bool {
        match self.producer.lock().as_mut() {
            Some(producer) => {
                producer.process(samples);
                true
            }
            None => false,
        }
    }
}

impl CaptureSource for ManualCapture {
    fn start(&mut self, _request: &CaptureRequest, producer: FrameProducer) -> Result<(), CaptureError> {
        *self.producer.lock() = Some(producer);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct RecordingSink {
    width: usize,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    rejected: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl PcmSink for RecordingSink {
    fn write(&mut self, frame: &[u8]) -> Result<(), CodecError> {
        if frame.len() % self.width != 0 {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(CodecError::MisalignedFrame {
                len: frame.len(),
                width: self.width,
            });
        }
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Output backend that records what it was asked to play
#[derive(Default)]
struct FakeOutput {
    opened: Mutex<Vec<(u32, StreamConfig)>>,
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    rejected: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    fail_open: AtomicBool,
}

impl FakeOutput {
    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl OutputBackend for FakeOutput {
    fn list_devices(&self) -> Vec<Device> {
        vec![
            Device { index: 0, name: "Speakers".to_string() },
            Device { index: 1, name: "Virtual Cable".to_string() },
        ]
    }

    fn open(&self, device_index: u32, config: &StreamConfig) -> Result<Box<dyn PcmSink>, AudioError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound(format!("output device {}", device_index)));
        }
        self.opened.lock().push((device_index, *config));
        Ok(Box::new(RecordingSink {
            width: config.sample_format.byte_width(),
            frames: self.frames.clone(),
            rejected: self.rejected.clone(),
            released: self.released.clone(),
        }))
    }
}

fn scenario_config() -> StreamConfig {
    StreamConfig {
        sample_rate_hz: 48000,
        channel_count: 1,
        sample_format: SampleFormat::Int16,
        server_buffer_frames: 512,
    }
}

async fn start_receiver(backend: Arc<FakeOutput>) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let _ = serve(listener, backend, async move {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    (addr, shutdown_tx)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

type RawSocket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Open a raw socket, send `config` and wait for the device announcement
async fn configured_socket(addr: SocketAddr, config: &str) -> RawSocket {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
    ws.send(Message::Text(config.to_string())).await.unwrap();
    match tokio::time::timeout(TIMEOUT, ws.next()).await.unwrap() {
        Some(Ok(Message::Text(text))) => assert!(text.contains(r#""type":"devices""#), "{}", text),
        other => panic!("expected devices, got {:?}", other),
    }
    ws
}

const INT16_MONO: &str =
    r#"{"type":"config","data":{"sampleRate":48000,"channels":1,"sampleWidthBytes":2,"framesPerBuffer":128}}"#;

/// Read messages until a close frame arrives and return its code and reason
async fn expect_close<S>(ws: &mut S) -> (u16, String)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    return (u16::from(frame.code), frame.reason.to_string());
                }
                Some(Ok(Message::Close(None))) | None | Some(Err(_)) => panic!("closed without a close frame"),
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("no close frame in time")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streams_pcm_to_selected_device() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend.clone()).await;

    let capture = ManualCapture::default();
    let mut client = MicClient::new(scenario_config(), capture.clone(), SessionOptions::default(), 64);

    client.connect("127.0.0.1", addr.port()).await.unwrap();
    assert_eq!(client.state(), SessionState::AwaitingDeviceList);

    let event = tokio::time::timeout(TIMEOUT, client.next_event()).await.unwrap();
    match event {
        Some(SessionEvent::DevicesReceived(devices)) => {
            assert_eq!(devices.len(), 2);
            assert_eq!(devices[1].name, "Virtual Cable");
        }
        other => panic!("expected device list, got {:?}", other),
    }
    assert_eq!(client.state(), SessionState::DeviceSelectionPending);

    client.select_device(1).unwrap();
    client.start_capture().unwrap();
    assert_eq!(client.state(), SessionState::Streaming);

    assert!(capture.deliver(&[0.5, -0.5]));
    wait_until(|| backend.frames.lock().len() == 1).await;

    assert_eq!(backend.frames.lock()[0], vec![0x00, 0x40, 0x00, 0xC0]);
    assert_eq!(*backend.opened.lock(), vec![(1, scenario_config())]);

    client.stop();
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!capture.is_running());

    // late callbacks after stop never reach the receiver
    capture.deliver(&[0.25; 64]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.frames.lock().len(), 1);

    wait_until(|| backend.released() == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_failure_surfaces_close_reason() {
    let backend = Arc::new(FakeOutput::default());
    backend.fail_open.store(true, Ordering::SeqCst);
    let (addr, _shutdown) = start_receiver(backend.clone()).await;

    let capture = ManualCapture::default();
    let mut client = MicClient::new(scenario_config(), capture.clone(), SessionOptions::default(), 64);
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    tokio::time::timeout(TIMEOUT, client.next_event()).await.unwrap();

    client.start_capture().unwrap();
    assert!(capture.deliver(&[0.1; 32]));

    let event = tokio::time::timeout(TIMEOUT, client.next_event()).await.unwrap();
    match event {
        Some(SessionEvent::Disconnected(reason)) => {
            assert!(reason.contains("Failed to open output device 0"), "{}", reason);
        }
        other => panic!("expected disconnect, got {:?}", other),
    }
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!capture.is_running());
    assert!(client.snapshot().devices.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = MicClient::new(
        scenario_config(),
        ManualCapture::default(),
        SessionOptions::default(),
        64,
    );
    assert!(client.connect("127.0.0.1", port).await.is_err());
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(client.next_event().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_first_message_must_be_config() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
    ws.send(Message::Text(r#"{"type":"select_device","data":0}"#.to_string()))
        .await
        .unwrap();

    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1011);
    assert!(reason.contains("config"), "{}", reason);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsupported_sample_width_rejected() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
    ws.send(Message::Text(
        r#"{"type":"config","data":{"sampleRate":48000,"channels":1,"sampleWidthBytes":3,"framesPerBuffer":128}}"#
            .to_string(),
    ))
    .await
    .unwrap();

    let (code, _) = expect_close(&mut ws).await;
    assert_eq!(code, 1011);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_audio_before_selection_rejected() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
    ws.send(Message::Text(
        r#"{"type":"config","data":{"sampleRate":48000,"channels":1,"sampleWidthBytes":2,"framesPerBuffer":128}}"#
            .to_string(),
    ))
    .await
    .unwrap();

    match tokio::time::timeout(TIMEOUT, ws.next()).await.unwrap() {
        Some(Ok(Message::Text(text))) => assert!(text.contains(r#""type":"devices""#)),
        other => panic!("expected devices, got {:?}", other),
    }

    ws.send(Message::Binary(vec![0, 0, 0, 0])).await.unwrap();
    let (code, reason) = expect_close(&mut ws).await;
    assert_eq!(code, 1011);
    assert!(reason.contains("selection"), "{}", reason);
    assert!(backend.opened.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_selection_wins() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
    ws.send(Message::Text(
        r#"{"type":"config","data":{"sampleRate":44100,"channels":2,"sampleWidthBytes":4,"framesPerBuffer":256}}"#
            .to_string(),
    ))
    .await
    .unwrap();
    tokio::time::timeout(TIMEOUT, ws.next()).await.unwrap();

    ws.send(Message::Text(r#"{"type":"select_device","data":0}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Text(r#"{"type":"select_device","data":1}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Binary(vec![0; 8])).await.unwrap();

    wait_until(|| backend.frames.lock().len() == 1).await;
    let opened = backend.opened.lock().clone();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, 1);
    assert_eq!(opened[0].1.sample_format, SampleFormat::Float32);
    assert_eq!(opened[0].1.channel_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_output_released_when_peer_vanishes() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend.clone()).await;

    let mut ws = configured_socket(addr, INT16_MONO).await;
    ws.send(Message::Text(r#"{"type":"select_device","data":1}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Binary(vec![0x00, 0x40])).await.unwrap();
    wait_until(|| backend.frames.lock().len() == 1).await;
    assert_eq!(backend.released(), 0);

    // Drop the TCP connection without a close handshake
    drop(ws);
    wait_until(|| backend.released() == 1).await;
    assert_eq!(backend.opened.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_selection_after_streaming_is_ignored() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend.clone()).await;

    let mut ws = configured_socket(addr, INT16_MONO).await;
    ws.send(Message::Text(r#"{"type":"select_device","data":0}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Binary(vec![0x00, 0x40])).await.unwrap();
    ws.send(Message::Text(r#"{"type":"select_device","data":1}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Binary(vec![0x00, 0xC0])).await.unwrap();

    wait_until(|| backend.frames.lock().len() == 2).await;
    let opened = backend.opened.lock().clone();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, 0);
    assert_eq!(backend.released(), 0);

    ws.close(None).await.unwrap();
    wait_until(|| backend.released() == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_misaligned_frame_dropped_and_stream_continues() {
    let backend = Arc::new(FakeOutput::default());
    let (addr, _shutdown) = start_receiver(backend.clone()).await;

    let mut ws = configured_socket(addr, INT16_MONO).await;
    ws.send(Message::Text(r#"{"type":"select_device","data":0}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Binary(vec![0x00, 0x40, 0x00])).await.unwrap();
    ws.send(Message::Binary(vec![0x00, 0xC0])).await.unwrap();

    wait_until(|| backend.frames.lock().len() == 1).await;
    assert_eq!(backend.rejected.load(Ordering::SeqCst), 1);
    assert_eq!(backend.frames.lock()[0], vec![0x00, 0xC0]);

    // The connection is still open and answers a ping
    ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
    let pong = tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Pong(payload))) => return payload,
                Some(Ok(Message::Close(frame))) => panic!("closed: {:?}", frame),
                Some(Ok(_)) => {}
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("no pong in time");
    assert_eq!(pong, vec![1, 2, 3]);
    assert_eq!(backend.released(), 0);
}
