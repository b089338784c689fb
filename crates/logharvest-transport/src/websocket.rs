//! WebSocket delivery channel.
//!
//! Each `open` spawns one connection task that owns the socket. Outbound
//! frames reach it through an unbounded queue; lifecycle and inbound control
//! events go back through the connection's event sink.

use futures_util::{SinkExt, StreamExt};
use logharvest_core::{
    ConnectionEvents, Connector, DeliveryChannel, InboundEvent, OutboundEvent, TransportError,
    TransportEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Opens WebSocket connections to one collector URL
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn open(&self, events: ConnectionEvents) -> Arc<dyn DeliveryChannel> {
        let (tx, rx) = mpsc::unbounded_channel();
        let writable = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_connection(self.url.clone(), rx, writable.clone(), events));

        Arc::new(WsChannel { tx, writable })
    }
}

/// Write half of one WebSocket connection
pub struct WsChannel {
    tx: mpsc::UnboundedSender<String>,
    writable: Arc<AtomicBool>,
}

impl WsChannel {
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }
}

impl DeliveryChannel for WsChannel {
    fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        if !self.is_writable() {
            return Err(TransportError::NotWritable(
                "socket is not open".to_string(),
            ));
        }

        let frame = event
            .to_json()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        self.tx
            .send(frame)
            .map_err(|_| TransportError::NotWritable("connection task ended".to_string()))
    }
}

async fn run_connection(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    writable: Arc<AtomicBool>,
    events: ConnectionEvents,
) {
    let generation = events.generation();

    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            let error = TransportError::Connect(e.to_string());
            debug!(url = %url, generation, error = %error, "WebSocket connect failed");
            events.report(TransportEvent::Error(error.to_string()));
            return;
        }
    };

    info!(url = %url, generation, "WebSocket connected");
    let (mut sink, mut stream) = socket.split();
    writable.store(true, Ordering::SeqCst);
    if !events.report(TransportEvent::Connected) {
        return;
    }

    let outcome = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break TransportEvent::Error(e.to_string());
                    }
                }
                None => {
                    // Channel dropped: this connection was replaced
                    writable.store(false, Ordering::SeqCst);
                    let _ = sink.close().await;
                    debug!(generation, "WebSocket released");
                    return;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match InboundEvent::from_json(text.as_str()) {
                    Ok(event) => {
                        events.report(TransportEvent::Message(event));
                    }
                    Err(e) => debug!(error = %e, "Ignoring unrecognized collector frame"),
                },
                Some(Ok(Message::Close(_))) | None => break TransportEvent::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => break TransportEvent::Error(e.to_string()),
            },
        }
    };

    writable.store(false, Ordering::SeqCst);
    if let TransportEvent::Error(ref reason) = outcome {
        warn!(url = %url, generation, error = %reason, "WebSocket failed");
    }
    events.report(outcome);
}
