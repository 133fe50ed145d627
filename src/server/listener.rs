//! Relay server listener
//!
//! Handles TCP accept loop and spawns connection handlers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::protocol::MessageRouter;
use crate::relay::SessionRelay;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::session::SessionId;

/// WebSocket signaling server
pub struct RelayServer {
    config: ServerConfig,
    router: MessageRouter,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a new server in front of `relay`
    pub fn new(config: ServerConfig, relay: Arc<SessionRelay>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            router: MessageRouter::new(relay),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the session relay
    pub fn relay(&self) -> &Arc<SessionRelay> {
        self.router.relay()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, path = %self.config.path, "Relay server listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tracing::info!(
            addr = %listener.local_addr()?,
            path = %self.config.path,
            "Relay server listening"
        );

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = SessionId::from(self.next_session_id.fetch_add(1, Ordering::Relaxed));

        tracing::debug!(
            session_id = %session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let config = self.config.clone();
        let router = self.router.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let connection = Connection::new(session_id.clone(), socket, peer_addr, config, router);

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = %session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = %session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::sync::oneshot;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::relay::RelayConfig;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start(config: ServerConfig, engine: &MockEngine) -> (SocketAddr, Arc<SessionRelay>, oneshot::Sender<()>) {
        let relay = Arc::new(SessionRelay::new(RelayConfig::default(), Arc::new(engine.clone())));
        let server = RelayServer::new(config, Arc::clone(&relay));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        (addr, relay, shutdown_tx)
    }

    async fn send(client: &mut Client, value: Value) {
        client.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn receive(client: &mut Client) -> Value {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_signaling_over_websocket() {
        let engine = MockEngine::new();
        let (addr, relay, _shutdown) = start(ServerConfig::default(), &engine).await;
        let url = format!("ws://{}/relay", addr);

        let (mut presenter, _) = connect_async(url.as_str()).await.unwrap();
        let (mut viewer, _) = connect_async(url.as_str()).await.unwrap();

        send(&mut presenter, json!({"action": "initPresenter", "sdpOffer": "S1"})).await;
        assert_eq!(
            receive(&mut presenter).await,
            json!({"action": "presenterResponse", "response": "accepted", "sdpAnswer": "answer-for-S1"})
        );

        send(&mut viewer, json!({"action": "initViewer", "sdpOffer": "S2"})).await;
        assert_eq!(receive(&mut viewer).await["response"], "accepted");

        send(&mut viewer, json!({"action": "bogus"})).await;
        assert_eq!(
            receive(&mut viewer).await,
            json!({"action": "error", "message": r#"Invalid message {"action":"bogus"}"#})
        );

        // Presenter hangs up; the viewer is told to stop
        presenter.close(None).await.unwrap();
        assert_eq!(receive(&mut viewer).await, json!({"action": "stopCommunication"}));
        assert_eq!(relay.stats().presenter, None);
    }

    #[tokio::test]
    async fn test_wrong_path_rejected() {
        let engine = MockEngine::new();
        let (addr, _relay, _shutdown) = start(ServerConfig::default(), &engine).await;

        let result = connect_async(format!("ws://{}/elsewhere", addr)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let engine = MockEngine::new();
        let (addr, relay, _shutdown) = start(ServerConfig::default(), &engine).await;
        let url = format!("ws://{}/relay", addr);

        let (mut first, _) = connect_async(url.as_str()).await.unwrap();
        let (mut second, _) = connect_async(url.as_str()).await.unwrap();

        send(&mut first, json!({"action": "initPresenter", "sdpOffer": "S1"})).await;
        assert_eq!(receive(&mut first).await["response"], "accepted");

        // Same message from a different connection is a different session
        send(&mut second, json!({"action": "initPresenter", "sdpOffer": "S1"})).await;
        assert_eq!(receive(&mut second).await["response"], "rejected");

        let presenter = relay.stats().presenter.unwrap();
        assert_eq!(presenter, SessionId::new("1"));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let engine = MockEngine::new();
        let config = ServerConfig::default().max_connections(1);
        let (addr, _relay, _shutdown) = start(config, &engine).await;
        let url = format!("ws://{}/relay", addr);

        let (_first, _) = connect_async(url.as_str()).await.unwrap();

        let second = tokio::time::timeout(Duration::from_secs(5), connect_async(url.as_str()))
            .await
            .unwrap();
        assert!(second.is_err());
    }
}
