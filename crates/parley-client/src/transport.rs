use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use parley_sync::{EngineHandle, Transport, TransportError};
use parley_types::MessageDto;

use crate::stomp::{Command, Frame};

/// Topic every stored message is broadcast on.
pub const MESSAGE_TOPIC: &str = "/topic/message";
/// Destination outgoing messages are published to.
pub const SEND_DESTINATION: &str = "/app/sendMessage";

const SUBSCRIPTION_ID: &str = "sub-0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub ws_url: String,
    pub token: String,
    pub reconnect_delay: Duration,
    pub heartbeat: Duration,
}

struct Outgoing {
    body: String,
    reply: oneshot::Sender<Result<(), TransportError>>,
}

/// STOMP-over-WebSocket push transport.
///
/// A background task owns the socket: it connects, subscribes to the
/// message topic, forwards every MESSAGE body to the engine and writes
/// queued publishes. When the connection drops it waits the reconnect
/// delay, connects again and re-subscribes.
pub struct StompTransport {
    connected: Arc<AtomicBool>,
    outbound: mpsc::Sender<Outgoing>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StompTransport {
    pub fn spawn(settings: TransportSettings, engine: EngineHandle) -> Arc<Self> {
        let connected = Arc::new(AtomicBool::new(false));
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(supervise(
            settings,
            engine,
            connected.clone(),
            outbound_rx,
            cancel.clone(),
        ));

        Arc::new(Self {
            connected,
            outbound,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

#[async_trait]
impl Transport for StompTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, message: MessageDto) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let body = serde_json::to_string(&message).map_err(|e| TransportError::Publish(e.to_string()))?;
        let (reply, rx) = oneshot::channel();
        self.outbound
            .send(Outgoing { body, reply })
            .await
            .map_err(|_| TransportError::Disconnected)?;
        rx.await.map_err(|_| TransportError::Disconnected)?
    }

    async fn close(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Push transport task ended abnormally: {}", e);
            }
        }
    }
}

// -- Connection loop --

async fn supervise(
    settings: TransportSettings,
    engine: EngineHandle,
    connected: Arc<AtomicBool>,
    mut outbound_rx: mpsc::Receiver<Outgoing>,
    cancel: CancellationToken,
) {
    loop {
        match run_connection(&settings, &engine, &connected, &mut outbound_rx, &cancel).await {
            Ok(()) => break,
            Err(e) => warn!("Push connection lost: {}", e),
        }

        connected.store(false, Ordering::Release);
        engine.connection_changed(false);

        // nothing queued while down can be delivered
        while let Ok(out) = outbound_rx.try_recv() {
            let _ = out.reply.send(Err(TransportError::Disconnected));
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(settings.reconnect_delay) => {
                info!("Reconnecting push transport to {}", settings.ws_url);
            }
        }
    }

    connected.store(false, Ordering::Release);
    debug!("Push transport stopped");
}

/// One connection, from handshake to close. `Ok` means the transport was
/// closed on purpose.
async fn run_connection(
    settings: &TransportSettings,
    engine: &EngineHandle,
    connected: &AtomicBool,
    outbound_rx: &mut mpsc::Receiver<Outgoing>,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let ws_stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = tokio_tungstenite::connect_async(settings.ws_url.as_str()) => {
            result.map_err(|e| TransportError::Connect(e.to_string()))?.0
        }
    };
    let (mut sink, mut stream) = ws_stream.split();

    let heartbeat_ms = settings.heartbeat.as_millis() as u64;
    let connect = Frame::connect(&host_of(&settings.ws_url), &settings.token, heartbeat_ms);
    sink.send(Message::Text(connect.encode().into()))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    let server_heartbeat = timeout(CONNECT_TIMEOUT, wait_for_connected(&mut stream))
        .await
        .map_err(|_| TransportError::Connect("timed out waiting for CONNECTED".into()))??;

    let subscribe = Frame::subscribe(SUBSCRIPTION_ID, MESSAGE_TOPIC);
    sink.send(Message::Text(subscribe.encode().into()))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    connected.store(true, Ordering::Release);
    engine.connection_changed(true);
    info!("Subscribed to {} on {}", MESSAGE_TOPIC, settings.ws_url);

    // the server only promises heart-beats if it advertised an interval
    let stale_after = server_heartbeat.map(|server| server.max(settings.heartbeat) * 3);
    let mut last_inbound = Instant::now();
    let mut heartbeat = tokio::time::interval(settings.heartbeat);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Text(Frame::disconnect().encode().into())).await;
                let _ = sink.close().await;
                return Ok(());
            }
            out = outbound_rx.recv() => {
                let Some(out) = out else {
                    return Ok(());
                };
                let frame = Frame::send_json(SEND_DESTINATION, out.body);
                let result = sink
                    .send(Message::Text(frame.encode().into()))
                    .await
                    .map_err(|e| TransportError::Publish(e.to_string()));
                let failed = result.is_err();
                let _ = out.reply.send(result);
                if failed {
                    return Err(TransportError::Disconnected);
                }
            }
            msg = stream.next() => {
                last_inbound = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(text.as_str(), engine)?,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(TransportError::Disconnected),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(TransportError::Protocol(e.to_string())),
                }
            }
            _ = heartbeat.tick() => {
                if let Some(limit) = stale_after {
                    if last_inbound.elapsed() > limit {
                        return Err(TransportError::Protocol("server heart-beat missed".into()));
                    }
                }
                if sink.send(Message::Text("\n".into())).await.is_err() {
                    return Err(TransportError::Disconnected);
                }
            }
        }
    }
}

/// Read until CONNECTED. Returns the server's send interval, if any.
async fn wait_for_connected<S>(stream: &mut S) -> Result<Option<Duration>, TransportError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        };
        let Some(frame) = Frame::decode(text.as_str()).map_err(|e| TransportError::Protocol(e.to_string()))? else {
            continue;
        };
        match frame.command {
            Command::Connected => {
                debug!("STOMP session established (version {:?})", frame.get("version"));
                return Ok(frame.get("heart-beat").and_then(server_send_interval));
            }
            Command::Error => return Err(TransportError::Connect(error_reason(&frame))),
            other => trace!("Ignoring {} before CONNECTED", other),
        }
    }
    Err(TransportError::Connect("connection closed during handshake".into()))
}

fn handle_text(text: &str, engine: &EngineHandle) -> Result<(), TransportError> {
    let frame = match Frame::decode(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!("Undecodable STOMP frame: {}", e);
            return Ok(());
        }
    };

    match frame.command {
        Command::Message => match serde_json::from_str::<MessageDto>(&frame.body) {
            Ok(dto) => engine.push(dto),
            Err(e) => warn!("Dropping push frame with bad body: {}", e),
        },
        Command::Error => return Err(TransportError::Protocol(error_reason(&frame))),
        other => trace!("Ignoring {} frame", other),
    }
    Ok(())
}

fn error_reason(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone())
}

/// First value of a CONNECTED `heart-beat:sx,sy` header.
fn server_send_interval(header: &str) -> Option<Duration> {
    let (sx, _) = header.split_once(',')?;
    match sx.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}

fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority.split(':').next().unwrap_or(authority).to_string()
}
