//! Websocket transport seam.
//!
//! [`Connector`] opens one connection and [`Transport`] is the write half
//! the session owns. Reads run on a spawned task that only enqueues into
//! the session's inbound queue; no business logic ever runs on the reader.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, warn};

/// Write half of one live connection. Owned exclusively by the session;
/// replaced, never mutated, on reconnect.
#[async_trait]
pub(crate) trait Transport: Send {
    async fn send(&mut self, frame: &str) -> Result<()>;
    async fn close(&mut self, reason: &str);
    /// False once the read side saw a close or error, or a send failed.
    fn is_open(&self) -> bool;
}

/// Connection factory, one call per session attempt. `inbound` receives
/// every text frame until the connection dies.
#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        inbound: mpsc::UnboundedSender<String>,
    ) -> Result<Box<dyn Transport>>;
}

/// TLS websocket connector. TLS 1.2 is the floor.
pub(crate) struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        address: &str,
        inbound: mpsc::UnboundedSender<String>,
    ) -> Result<Box<dyn Transport>> {
        let tls = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()
            .context("building TLS connector")?;
        let (stream, _response) = connect_async_tls_with_config(
            address,
            None,
            false,
            Some(tokio_tungstenite::Connector::NativeTls(tls)),
        )
        .await
        .context("websocket connect")?;

        let (sink, mut source) = stream.split();
        let open = Arc::new(AtomicBool::new(true));
        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Server closed the connection");
                        break;
                    }
                    // Ping/pong replies are handled inside tungstenite.
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Websocket read failed");
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
        });

        Ok(Box::new(WsTransport { sink, open }))
    }
}

struct WsTransport {
    sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &str) -> Result<()> {
        if let Err(e) = self.sink.send(Message::Text(frame.to_string())).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(e).context("websocket send");
        }
        Ok(())
    }

    async fn close(&mut self, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "Close frame not delivered");
        }
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
