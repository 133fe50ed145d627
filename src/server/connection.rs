//! Client connection
//!
//! One WebSocket per session. Inbound text frames go to the router strictly
//! in receipt order; outbound messages are written by a separate task fed
//! from the session's channel.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};
use crate::protocol::MessageRouter;
use crate::server::config::ServerConfig;
use crate::session::{SessionContext, SessionId};

/// A client connection
pub struct Connection {
    session_id: SessionId,
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    router: MessageRouter,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(
        session_id: SessionId,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        router: MessageRouter,
    ) -> Self {
        Self {
            session_id,
            socket,
            peer_addr,
            config,
            router,
        }
    }

    /// Run the connection until the client goes away
    ///
    /// Whatever ends the connection, the session is stopped.
    pub async fn run(self) -> Result<()> {
        let Connection {
            session_id,
            socket,
            peer_addr,
            config,
            router,
        } = self;

        let path = config.path.clone();
        let check_path = move |request: &Request, response: Response| {
            if request.uri().path() == path {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws_stream =
            match tokio::time::timeout(config.handshake_timeout, accept_hdr_async(socket, check_path))
                .await
            {
                Ok(accepted) => accepted?,
                Err(_) => {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "WebSocket handshake timed out",
                    )))
                }
            };

        tracing::info!(session_id = %session_id, peer = %peer_addr, "Client connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (context, mut outbound) = SessionContext::channel(session_id);

        let writer_id = context.id.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(session_id = %writer_id, error = %e, "Failed to encode message");
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(session_id = %writer_id, error = %e, "Failed to write message");
                    break;
                }
            }
        });

        let result = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let _ = router.dispatch(&context, &text);
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(session_id = %context.id, len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(Error::from(e)),
            }
        };

        let _ = router.disconnect(&context.id);
        writer.abort();

        result
    }
}
