//! Websocket transport to the remote session
//!
//! A secure, message-oriented, full-duplex connection: binary frames
//! carry raw terminal bytes, text frames carry one JSON control message
//! each. The connect request authenticates with the short-lived bearer
//! token from session lookup and routes to the target machine with a
//! dedicated header.
//!
//! The connection splits into a cloneable [`TransportSender`] and an
//! event receiver so the relay loop can poll inbound events mutably
//! while its other arms keep sending.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use tether_core::error::ConnectionError;

use crate::session::SessionHandle;

/// Header naming the machine instance the connection should route to
pub const MACHINE_HEADER: &str = "x-tether-machine";

/// Capacity for outbound frames queued toward the socket writer task
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Events surfaced to the relay from the socket
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw terminal bytes from the remote process
    Binary(Vec<u8>),
    /// One encoded control message
    Text(String),
    /// Websocket-level ping/pong. Refreshes liveness tracking only.
    Activity,
    /// The peer closed the connection
    Closed { code: Option<u16>, reason: String },
    /// The socket failed (I/O or protocol error)
    Failed(String),
}

/// Outbound frames accepted by the writer task
#[derive(Debug)]
enum OutboundFrame {
    Binary(Vec<u8>),
    Text(String),
    Close,
}

/// Sending half of an established connection
#[derive(Debug, Clone)]
pub struct TransportSender {
    outbound: mpsc::Sender<OutboundFrame>,
    shutdown: CancellationToken,
}

impl TransportSender {
    /// Queue raw terminal bytes for transmission
    pub async fn send_binary(&self, data: Vec<u8>) {
        if self.outbound.send(OutboundFrame::Binary(data)).await.is_err() {
            tracing::debug!("binary frame dropped: writer gone");
        }
    }

    /// Queue an encoded control message for transmission
    pub async fn send_text(&self, text: String) {
        if self.outbound.send(OutboundFrame::Text(text)).await.is_err() {
            tracing::debug!("text frame dropped: writer gone");
        }
    }

    /// Ask the writer to send a close frame and stop
    pub async fn close(&self) {
        let _ = self.outbound.send(OutboundFrame::Close).await;
    }

    /// Tear the connection down without a close handshake.
    ///
    /// Used when the connection is already presumed dead (health check
    /// fired) and a graceful close would just block.
    pub fn force_terminate(&self) {
        self.shutdown.cancel();
    }
}

/// Connect to the session's websocket endpoint.
///
/// The handshake is bounded by `timeout`; a handshake that does not
/// complete in time fails with [`ConnectionError::Timeout`] and the
/// in-flight connection is dropped. On success returns the sending
/// half and the inbound event stream.
pub async fn connect(
    handle: &SessionHandle,
    timeout: Duration,
) -> Result<(TransportSender, mpsc::UnboundedReceiver<TransportEvent>), ConnectionError> {
    let mut request = handle
        .websocket_url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectionError::Transport(format!("invalid websocket url: {}", e)))?;

    let auth = HeaderValue::from_str(&format!("Bearer {}", handle.connect_token))
        .map_err(|e| ConnectionError::Transport(format!("invalid connect token: {}", e)))?;
    let machine = HeaderValue::from_str(&handle.machine_id)
        .map_err(|e| ConnectionError::Transport(format!("invalid machine id: {}", e)))?;
    request.headers_mut().insert("authorization", auth);
    request.headers_mut().insert(MACHINE_HEADER, machine);

    let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| ConnectionError::Timeout)?
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;

    let (mut sink, mut stream) = ws_stream.split();

    let shutdown = CancellationToken::new();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let writer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                frame = outbound_rx.recv() => {
                    let message = match frame {
                        Some(OutboundFrame::Binary(data)) => Message::Binary(data),
                        Some(OutboundFrame::Text(text)) => Message::Text(text),
                        Some(OutboundFrame::Close) => {
                            let _ = sink.send(Message::Close(None)).await;
                            let _ = sink.flush().await;
                            break;
                        }
                        None => break,
                    };
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = reader_shutdown.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Binary(data))) => {
                    if event_tx.send(TransportEvent::Binary(data)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if event_tx.send(TransportEvent::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite answers pings itself; the frame still
                    // counts as inbound data for liveness.
                    if event_tx.send(TransportEvent::Activity).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => {
                            let code = u16::from(f.code);
                            let reason = if f.reason.is_empty() {
                                format!("connection closed (code {})", code)
                            } else {
                                f.reason.into_owned()
                            };
                            (Some(code), reason)
                        }
                        None => (None, "connection closed".to_string()),
                    };
                    let _ = event_tx.send(TransportEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    let _ = event_tx.send(TransportEvent::Failed(e.to_string()));
                    break;
                }
                None => {
                    let _ = event_tx.send(TransportEvent::Closed {
                        code: None,
                        reason: "connection closed".to_string(),
                    });
                    break;
                }
            }
        }
    });

    Ok((
        TransportSender {
            outbound: outbound_tx,
            shutdown,
        },
        event_rx,
    ))
}
