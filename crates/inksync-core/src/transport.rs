//! Duplex channel to the relay server.
//!
//! The [`Transport`] trait is the seam between the session and the socket.
//! [`NativeWebSocket`] runs a blocking tungstenite client on a background
//! thread and talks to the owner over `std::sync::mpsc` channels.

use crate::protocol::{Envelope, ProtocolError};
use crate::sync::ConnectionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported WebSocket URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("socket thread has stopped")]
    ChannelClosed,
}

/// Events surfaced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message(Envelope),
    Error(String),
}

/// A non-blocking, poll-driven message channel.
pub trait Transport {
    fn connect(&mut self, url: &str) -> Result<(), TransportError>;

    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Drain pending events without blocking.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    fn disconnect(&mut self);

    fn state(&self) -> ConnectionState;
}

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the socket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation.
    pub struct NativeWebSocket {
        state: ConnectionState,
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }
    }

    fn validate_url(url: &str) -> Result<(), TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }

    fn run_socket(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<TransportEvent>) {
        log::info!("connecting to {url}");
        let (mut socket, response) = match connect(url.as_str()) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("connection to {url} failed: {e}");
                let _ = event_tx.send(TransportEvent::Error(format!("connection failed: {e}")));
                let _ = event_tx.send(TransportEvent::Disconnected);
                return;
            }
        };
        log::info!("connected, status: {}", response.status());
        let _ = event_tx.send(TransportEvent::Connected);

        // A short read timeout keeps the loop responsive to outgoing commands.
        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(text)) => {
                    if let Err(e) = socket.send(Message::Text(text)) {
                        log::error!("send failed: {e}");
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(text)) => match Envelope::decode(&text) {
                    Ok(envelope) => {
                        let _ = event_tx.send(TransportEvent::Message(envelope));
                    }
                    Err(e) => log::warn!("discarding malformed message: {e}"),
                },
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("read failed: {e}");
                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        log::info!("socket thread exiting");
        let _ = event_tx.send(TransportEvent::Disconnected);
    }

    impl Transport for NativeWebSocket {
        fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            if self.cmd_tx.is_some() && self.state != ConnectionState::Disconnected {
                return Err(TransportError::AlreadyConnected);
            }
            validate_url(url)?;

            self.state = ConnectionState::Connecting;
            let (cmd_tx, cmd_rx) = channel();
            let (event_tx, event_rx) = channel();
            let url = url.to_string();
            let handle = thread::spawn(move || run_socket(url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
            let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
            tx.send(WsCommand::Send(envelope.encode()?))
                .map_err(|_| TransportError::ChannelClosed)
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let Some(rx) = &self.event_rx else {
                return Vec::new();
            };
            let events: Vec<TransportEvent> = rx.try_iter().collect();
            for event in &events {
                match event {
                    TransportEvent::Connected => self.state = ConnectionState::Connected,
                    TransportEvent::Disconnected => {
                        self.state = ConnectionState::Disconnected;
                        self.cmd_tx = None;
                    }
                    _ => {}
                }
            }
            events
        }

        fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }

        fn state(&self) -> ConnectionState {
            self.state
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;
