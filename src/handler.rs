// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Adapts one client socket into hub calls. The upgrade request must carry
//! the identity header set by the authenticating proxy, and the first frame
//! must be `Connect`. Afterwards client commands and hub events are
//! multiplexed until the socket closes or goes idle.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::hub::ChatHub;
use crate::presence::ConnectionHandle;
use crate::protocol::{self, failed_ack, stored_ack, ClientFrame, Envelope, ServerEvent};
use crate::rate_limit::RateLimiter;
use crate::session::Session;

/// Query parameter naming the peer whose history is loaded on connect.
pub const PEER_QUERY_PARAM: &str = "senderId";

/// Header carrying the username or email verified by the authenticating proxy.
pub const IDENTITY_HEADER: &str = "x-authenticated-user";

/// What the upgrade request established about a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub identity: String,
    pub peer_id: Option<String>,
}

/// Extracts the percent-decoded peer id from an upgrade request query string.
pub fn peer_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == PEER_QUERY_PARAM)
        .and_then(|(_, value)| {
            let value = value.replace('+', " ");
            urlencoding::decode(&value)
                .ok()
                .map(|decoded| decoded.trim().to_string())
        })
        .filter(|value| !value.is_empty())
}

/// Reads the authenticated identity from the upgrade request headers.
pub fn identity_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDENTITY_HEADER)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("missing authenticated identity".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

/// Completes the WebSocket upgrade, rejecting requests without an identity.
pub async fn accept_connection(
    stream: TcpStream,
) -> Result<(WebSocketStream<TcpStream>, Handshake), tungstenite::Error> {
    let mut handshake = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let Some(identity) = identity_from_headers(request.headers()) else {
            return Err(unauthorized());
        };
        handshake = Some(Handshake {
            identity,
            peer_id: peer_from_query(request.uri().query()),
        });
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    let handshake =
        handshake.ok_or(tungstenite::Error::Protocol(ProtocolError::HandshakeIncomplete))?;
    Ok((ws_stream, handshake))
}

/// Dependencies shared by every connection task.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub hub: Arc<ChatHub>,
    pub rate_limiter: Arc<RateLimiter>,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
    pub outbound_buffer: usize,
}

/// Encodes and writes one event. Returns false if the socket is gone.
async fn send_event<W>(write: &mut W, event: ServerEvent, label: &str) -> bool
where
    W: Sink<Message> + Unpin,
{
    match protocol::encode_frame(&Envelope::new(event)) {
        Ok(data) => write.send(Message::Binary(data)).await.is_ok(),
        Err(e) => {
            error!("[{}] Failed to encode event: {}", label, e);
            true
        }
    }
}

/// Handles a WebSocket connection.
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    handshake: Handshake,
    deps: ConnectionDeps,
) {
    let ConnectionDeps {
        hub,
        rate_limiter,
        max_message_size,
        idle_timeout,
        outbound_buffer,
    } = deps;

    let (mut write, mut read) = ws_stream.split();
    let (handle, mut events) = ConnectionHandle::channel(outbound_buffer);
    let label = handle.label();

    let first_msg = match timeout(idle_timeout, read.next()).await {
        Ok(Some(Ok(Message::Binary(data)))) => data,
        Ok(Some(Ok(_))) => {
            warn!("[{}] Expected binary Connect frame", label);
            return;
        }
        Ok(Some(Err(e))) => {
            warn!("[{}] Error reading Connect frame: {}", label, e);
            return;
        }
        Ok(None) => {
            debug!("[{}] Connection closed before Connect", label);
            return;
        }
        Err(_) => {
            warn!("[{}] Connect timeout", label);
            return;
        }
    };

    match protocol::decode_frame::<ClientFrame>(&first_msg) {
        Ok(envelope) => match envelope.payload {
            ClientFrame::Connect(_) => {}
            other => {
                warn!("[{}] Expected Connect, got {:?}", label, other);
                return;
            }
        },
        Err(e) => {
            warn!("[{}] Failed to decode Connect: {}", label, e);
            return;
        }
    }

    let Handshake { identity, peer_id } = handshake;
    let session = match hub.connect(&identity, handle, peer_id.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            warn!("[{}] Connect rejected: {}", label, e);
            hub.metrics().connection_errors.inc();
            let _ = write.close().await;
            return;
        }
    };

    let connected = ServerEvent::Connected {
        user: session.user().into(),
    };
    if !send_event(&mut write, connected, &label).await {
        warn!("[{}] Failed to send Connected", label);
        hub.disconnect(session).await;
        return;
    }

    loop {
        let msg = tokio::select! {
            ws_msg = timeout(idle_timeout, read.next()) => {
                match ws_msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        debug!("[{}] Disconnected", label);
                        break;
                    }
                    Err(_) => {
                        info!("[{}] Idle timeout", label);
                        break;
                    }
                }
            }
            Some(event) = events.recv() => {
                if !send_event(&mut write, event, &label).await {
                    debug!("[{}] Socket closed while delivering", label);
                    break;
                }
                continue;
            }
        };

        match msg {
            Ok(Message::Binary(data)) => {
                if data.len() > max_message_size {
                    warn!("[{}] Frame too large: {} bytes", label, data.len());
                    continue;
                }

                if !rate_limiter.consume(&session.user().username) {
                    warn!("[{}] Rate limited", label);
                    hub.metrics().rate_limited.inc();
                    continue;
                }

                let envelope = match protocol::decode_frame::<ClientFrame>(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("[{}] Failed to decode frame: {}", label, e);
                        continue;
                    }
                };

                if let Some(reply) = process_command(&hub, &session, envelope).await {
                    if !send_event(&mut write, reply, &label).await {
                        break;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                debug!("[{}] Client sent close", label);
                break;
            }
            Ok(_) => {
                // Text and pong frames are ignored.
            }
            Err(e) => {
                warn!("[{}] Connection error: {}", label, e);
                break;
            }
        }
    }

    hub.disconnect(session).await;
}

/// Runs one client command and returns the reply for the caller, if any.
async fn process_command(
    hub: &ChatHub,
    session: &Session,
    envelope: Envelope<ClientFrame>,
) -> Option<ServerEvent> {
    let label = session.label();
    match envelope.payload {
        ClientFrame::SendMessage(send) => {
            match hub.send(session, &send.receive_id, &send.content).await {
                Ok(message) => Some(stored_ack(&envelope.message_id, message.id)),
                Err(e) => {
                    debug!("[{}] SendMessage failed: {}", label, e);
                    Some(failed_ack(&envelope.message_id, e.reason()))
                }
            }
        }
        ClientFrame::LoadMessages(load) => {
            match hub
                .load_history(session, &load.recipient_id, load.page_number)
                .await
            {
                Ok(page) => Some(ServerEvent::ReceiveMessageList {
                    messages: page.messages.iter().map(Into::into).collect(),
                }),
                Err(e) => {
                    warn!("[{}] LoadMessages failed: {}", label, e);
                    Some(failed_ack(&envelope.message_id, e.reason()))
                }
            }
        }
        ClientFrame::NotifyTyping(typing) => {
            hub.notify_typing(session, &typing.recipient_user_name);
            None
        }
        ClientFrame::Connect(_) => {
            debug!("[{}] Ignoring repeated Connect", label);
            None
        }
        ClientFrame::Unknown => {
            debug!("[{}] Unknown message type", label);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_from_query() {
        assert_eq!(
            peer_from_query(Some("senderId=id-bob")),
            Some("id-bob".to_string())
        );
        assert_eq!(
            peer_from_query(Some("token=x&senderId=id-bob&lang=en")),
            Some("id-bob".to_string())
        );
    }

    #[test]
    fn test_peer_from_query_percent_decodes() {
        assert_eq!(
            peer_from_query(Some("senderId=bob%40example.com")),
            Some("bob@example.com".to_string())
        );
        assert_eq!(
            peer_from_query(Some("senderId=id%2Fbob+jr")),
            Some("id/bob jr".to_string())
        );
        assert_eq!(peer_from_query(Some("senderId=%20%20")), None);
    }

    #[test]
    fn test_identity_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(identity_from_headers(&headers), None);

        headers.insert(IDENTITY_HEADER, " alice ".parse().unwrap());
        assert_eq!(identity_from_headers(&headers), Some("alice".to_string()));

        headers.insert(IDENTITY_HEADER, "".parse().unwrap());
        assert_eq!(identity_from_headers(&headers), None);
    }

    #[test]
    fn test_peer_from_query_missing_or_empty() {
        assert_eq!(peer_from_query(None), None);
        assert_eq!(peer_from_query(Some("")), None);
        assert_eq!(peer_from_query(Some("senderId=")), None);
        assert_eq!(peer_from_query(Some("senderid=id-bob")), None);
        assert_eq!(peer_from_query(Some("senderId")), None);
    }
}
