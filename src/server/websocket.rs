//! Observer WebSocket server
//!
//! Each connected console receives every broadcast event as a JSON text frame
//! and may send control commands back over the same socket.

use anyhow::{Context, Result};
use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::session::{ControlCommand, ControlSurface, EventBroadcaster, ObserverEvent};

pub struct ObserverServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ObserverServer {
    /// Bind the listening socket
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind observer listener")?;
        let local_addr = listener.local_addr()?;
        info!("Observer server listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept observers until the listener fails
    pub async fn run(
        self,
        commands: mpsc::UnboundedSender<ControlCommand>,
        broadcaster: EventBroadcaster,
    ) -> Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("Failed to accept observer connection")?;

            // Subscribe before the handshake so no event published meanwhile is missed
            let events = broadcaster.subscribe();
            let commands = commands.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_observer(stream, peer, commands, events).await {
                    error!("Observer {} error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_observer(
    stream: TcpStream,
    peer: SocketAddr,
    commands: mpsc::UnboundedSender<ControlCommand>,
    mut events: broadcast::Receiver<ObserverEvent>,
) -> Result<()> {
    let ws = accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    info!("New client connected: {}", peer);

    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match ControlSurface::parse(&text) {
                        Ok(command) => {
                            debug!("Command from {}: {:?}", peer, command);
                            if commands.send(command).is_err() {
                                warn!("Session loop closed, dropping observer {}", peer);
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring frame from {}: {}", peer, e),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer, e);
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let text = serde_json::to_string(&event)?;
                        ws_tx.send(Message::Text(text)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Observer {} lagged, {} events dropped", peer, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Client disconnected: {}", peer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = ObserverServer::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }
}
