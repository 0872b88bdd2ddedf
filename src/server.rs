// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::handler::{self, ConnectionDeps};

/// Pause after a failed accept, e.g. while the process is out of descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Source of inbound client sockets.
#[async_trait]
pub trait Acceptor: Send {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Accepts connections forever. Accept errors are logged and retried.
///
/// At most `max_connections` sockets are served at once; extra sockets are
/// closed immediately. The upgrade itself must finish within `idle_timeout`.
pub async fn serve<A: Acceptor>(mut listener: A, deps: ConnectionDeps, max_connections: usize) {
    let slots = Arc::new(Semaphore::new(max_connections.max(1)));
    let metrics = deps.hub.metrics().clone();

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let permit = match slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Connection rejected: at max capacity ({})",
                    max_connections
                );
                metrics.connection_errors.inc();
                drop(stream);
                continue;
            }
        };

        let deps = deps.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let idle_timeout: Duration = deps.idle_timeout;

            match tokio::time::timeout(idle_timeout, handler::accept_connection(stream)).await {
                Ok(Ok((ws_stream, handshake))) => {
                    metrics.connections_total.inc();
                    metrics.connections_active.inc();
                    debug!("New WebSocket connection from {}", addr);

                    handler::handle_connection(ws_stream, handshake, deps).await;

                    metrics.connections_active.dec();
                    debug!("WebSocket connection closed");
                }
                Ok(Err(e)) => {
                    info!("WebSocket handshake failed: {}", e);
                    metrics.connection_errors.inc();
                }
                Err(_) => {
                    warn!("WebSocket handshake timeout");
                    metrics.connection_errors.inc();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::IDENTITY_HEADER;
    use crate::hub::test_support::memory_hub;
    use crate::protocol::{self, ClientFrame, Connect, Envelope, ServerEvent};
    use crate::rate_limit::RateLimiter;
    use futures_util::{SinkExt, StreamExt};
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message;

    /// Listener that fails a fixed number of accepts before delegating.
    struct FailingAcceptor {
        inner: TcpListener,
        failures: usize,
    }

    #[async_trait]
    impl Acceptor for FailingAcceptor {
        async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "too many open files"));
            }
            self.inner.accept().await
        }
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_server() {
        let (hub, _) = memory_hub();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let deps = ConnectionDeps {
            hub: Arc::new(hub),
            rate_limiter: Arc::new(RateLimiter::new(100)),
            max_message_size: 64 * 1024,
            idle_timeout: Duration::from_secs(5),
            outbound_buffer: 16,
        };
        let acceptor = FailingAcceptor {
            inner: listener,
            failures: 3,
        };
        tokio::spawn(serve(acceptor, deps, 4));

        let mut request = format!("ws://{}", addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert(IDENTITY_HEADER, "alice".parse().unwrap());
        let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

        let connect = Envelope::new(ClientFrame::Connect(Connect::default()));
        ws.send(Message::Binary(protocol::encode_frame(&connect).unwrap()))
            .await
            .unwrap();

        let reply = timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let data = match reply {
            Message::Binary(data) => data,
            other => panic!("Expected binary frame, got {:?}", other),
        };
        let envelope: Envelope<ServerEvent> = protocol::decode_frame(&data).unwrap();
        assert!(matches!(envelope.payload, ServerEvent::Connected { .. }));
    }
}
