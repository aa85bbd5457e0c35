//! WebSocket connector built on tokio-tungstenite.
//!
//! An open socket is split into a writer task, fed by [`LinkCommand`]s, and a
//! reader task that turns frames into [`LinkEvent`]s. The reader always ends
//! with [`LinkEvent::Closed`].

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::{CloseReason, DuplexConnector, DuplexLink, LinkCommand, LinkEvent, TransportError};

/// Close code sent when the health monitor gives up on the socket.
const CLOSE_CODE_UNSTABLE: u16 = 4000;

fn close_frame(reason: CloseReason) -> CloseFrame {
    let code = match reason {
        CloseReason::Unstable => CloseCode::from(CLOSE_CODE_UNSTABLE),
        CloseReason::Reconnect | CloseReason::Superseded | CloseReason::Shutdown => {
            CloseCode::Normal
        }
    };
    CloseFrame {
        code,
        reason: reason.as_str().into(),
    }
}

/// Opens WebSocket links to one URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl DuplexConnector for WebSocketConnector {
    fn connect(&self) -> impl Future<Output = Result<DuplexLink, TransportError>> + Send + 'static {
        let url = self.url.to_string();
        async move {
            let (stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            debug!(
                target: "wsrpc::transport::websocket",
                "WebSocket open: {}",
                url
            );

            let (mut sink, mut source) = stream.split();
            let (command_tx, mut command_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();

            let writer_events = event_tx.clone();
            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    match command {
                        LinkCommand::Send(text) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                warn!(
                                    target: "wsrpc::transport::websocket",
                                    "Write error: {}",
                                    e
                                );
                                let _ = writer_events.send(LinkEvent::Error(e.to_string()));
                            }
                        }
                        LinkCommand::Close(reason) => {
                            let _ = sink.send(Message::Close(Some(close_frame(reason)))).await;
                            break;
                        }
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    let event = match frame {
                        Ok(Message::Text(text)) => LinkEvent::Message(text.as_str().to_owned()),
                        Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => LinkEvent::Message(text),
                            Err(e) => LinkEvent::Error(format!("non-UTF-8 binary frame: {}", e)),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => LinkEvent::Error(e.to_string()),
                    };
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
                let _ = event_tx.send(LinkEvent::Closed);
            });

            Ok(DuplexLink::new(command_tx, event_rx))
        }
    }
}
