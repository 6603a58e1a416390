//! WebSocket transport for the price server

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::ConnectorError;
use crate::traits::{CloseReason, Connector, Link, LinkEvent};

/// Inbound frames buffered between the socket reader and the supervisor
const INBOUND_CAPACITY: usize = 1024;

/// Close codes the server uses to reject a credential (policy violation, app codes)
const AUTH_CLOSE_CODES: [u16; 3] = [1008, 4001, 4003];

/// Opens a text-frame WebSocket per `connect`, credential passed as `?token=`
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    inbound_capacity: Option<usize>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbound_capacity(capacity: usize) -> Self {
        Self {
            inbound_capacity: Some(capacity.max(1)),
        }
    }
}

/// Endpoint URL with the credential appended as a `token` query parameter
pub fn build_url(endpoint: &str, credential: Option<&str>) -> Result<Url, ConnectorError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| ConnectorError::ConnectionFailed(format!("invalid endpoint: {}", e)))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ConnectorError::ConnectionFailed(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    }
    if let Some(token) = credential {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

fn handshake_error(err: WsError) -> ConnectorError {
    if let WsError::Http(response) = &err {
        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            return ConnectorError::AuthFailed(format!("handshake rejected: HTTP {}", status));
        }
    }
    ConnectorError::ConnectionFailed(err.to_string())
}

fn close_reason(frame: Option<CloseFrame<'_>>) -> CloseReason {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            let detail = format!("close code {}: {}", code, frame.reason);
            if AUTH_CLOSE_CODES.contains(&code) {
                CloseReason::AuthRejected(detail)
            } else {
                CloseReason::Transient(detail)
            }
        }
        None => CloseReason::Transient("closed by server".to_string()),
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &str,
        credential: Option<&str>,
    ) -> Result<Link, ConnectorError> {
        let url = build_url(endpoint, credential)?;

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(handshake_error)?;
        info!(endpoint = %endpoint, "WebSocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::channel(self.inbound_capacity.unwrap_or(INBOUND_CAPACITY));

        // Writer: drains outbound commands, closes the socket once every sender is gone
        let writer_events = in_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                trace!(frame = %frame, "Sending frame");
                if let Err(e) = write.send(WsMessage::Text(frame)).await {
                    let _ = writer_events
                        .send(LinkEvent::Closed(CloseReason::Transient(format!(
                            "write failed: {}",
                            e
                        ))))
                        .await;
                    return;
                }
            }
            debug!("Outbound closed, closing WebSocket");
            let _ = write.send(WsMessage::Close(None)).await;
            let _ = write.close().await;
        });

        // Reader: forwards frames until the socket or the receiver goes away
        tokio::spawn(async move {
            let reason = loop {
                let msg = select! {
                    _ = in_tx.closed() => return,
                    msg = read.next() => msg,
                };
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if in_tx.send(LinkEvent::Frame(text.into_bytes())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        if in_tx.send(LinkEvent::Frame(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => break close_reason(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        break CloseReason::Transient(e.to_string());
                    }
                    None => break CloseReason::Transient("stream ended".to_string()),
                }
            };
            let _ = in_tx.send(LinkEvent::Closed(reason)).await;
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::http::Response;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_build_url_appends_token() {
        let url = build_url("wss://prices.example.com/ws", Some("a b&c")).unwrap();
        assert_eq!(url.as_str(), "wss://prices.example.com/ws?token=a+b%26c");
    }

    #[test]
    fn test_build_url_without_credential() {
        let url = build_url("ws://localhost:8080/ws", None).unwrap();
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_build_url_rejects_non_websocket_scheme() {
        assert!(matches!(
            build_url("https://example.com", None),
            Err(ConnectorError::ConnectionFailed(_))
        ));
        assert!(build_url("not a url", None).is_err());
    }

    #[test]
    fn test_unauthorized_handshake_is_auth_failure() {
        let response = Response::builder().status(401).body(None).unwrap();
        assert!(matches!(
            handshake_error(WsError::Http(response)),
            ConnectorError::AuthFailed(_)
        ));

        let response = Response::builder().status(502).body(None).unwrap();
        assert!(matches!(
            handshake_error(WsError::Http(response)),
            ConnectorError::ConnectionFailed(_)
        ));
    }

    #[test]
    fn test_close_codes() {
        let auth = close_reason(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "invalid token".into(),
        }));
        assert!(matches!(auth, CloseReason::AuthRejected(_)));

        let app = close_reason(Some(CloseFrame {
            code: CloseCode::from(4001),
            reason: "".into(),
        }));
        assert!(!app.is_retryable());

        let away = close_reason(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "restart".into(),
        }));
        assert!(away.is_retryable());
        assert!(close_reason(None).is_retryable());
    }

    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(WsMessage::Text(r#"{"type":"pong"}"#.to_string()))
                .await
                .unwrap();
            let received = loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected: {:?}", other),
                }
            };
            ws.close(Some(CloseFrame {
                code: CloseCode::from(4001),
                reason: "token expired".into(),
            }))
            .await
            .unwrap();
            received
        });

        let connector = WebSocketConnector::new();
        let mut link = connector
            .connect(&format!("ws://{}", addr), Some("secret"))
            .await
            .unwrap();

        match link.inbound.recv().await {
            Some(LinkEvent::Frame(data)) => assert_eq!(data, br#"{"type":"pong"}"#.to_vec()),
            other => panic!("expected frame, got {:?}", other),
        }

        link.outbound
            .send(r#"{"type":"subscribe","channel":"account"}"#.to_string())
            .unwrap();
        assert_eq!(
            server.await.unwrap(),
            r#"{"type":"subscribe","channel":"account"}"#
        );

        match link.inbound.recv().await {
            Some(LinkEvent::Closed(reason)) => {
                assert!(matches!(reason, CloseReason::AuthRejected(_)))
            }
            other => panic!("expected close, got {:?}", other),
        }
    }
}
