//! Kurento media server client
//!
//! Speaks the Kurento JSON-RPC 2.0 object protocol over a single WebSocket:
//!
//! ```text
//!   create     {type, constructorParams}            -> {value: objectId, sessionId}
//!   invoke     {object, operation, operationParams} -> {value}
//!   subscribe  {object, type}                       -> {value: subscriptionId}
//!   release    {object}                             -> {}
//!   onEvent    (server -> client notification)
//! ```
//!
//! Requests are correlated by id through a pending map of oneshot senders;
//! `onEvent` notifications are routed to the candidate listener registered for
//! the emitting endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{
    CandidateListener, ElementId, EngineError, FilterConfig, MediaElement, MediaEngine,
    MediaEngineConnector, MediaPipeline, WebRtcEndpoint,
};
use crate::protocol::IceCandidate;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Event type carrying locally gathered ICE candidates
const ICE_CANDIDATE_FOUND: &str = "IceCandidateFound";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connects to a Kurento media server
#[derive(Debug, Clone)]
pub struct KurentoConnector {
    uri: String,
    request_timeout: Option<Duration>,
}

impl KurentoConnector {
    /// Create a connector for the given `ws://` URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            request_timeout: None,
        }
    }

    /// Fail requests that get no answer within `timeout`
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Media server address
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl MediaEngineConnector for KurentoConnector {
    async fn connect(&self) -> Result<Arc<dyn MediaEngine>, EngineError> {
        let client = KurentoClient::connect(&self.uri, self.request_timeout).await?;
        Ok(Arc::new(client))
    }
}

/// A connected Kurento session
pub struct KurentoClient {
    rpc: Arc<RpcChannel>,
}

impl KurentoClient {
    /// Connect to the media server
    ///
    /// Spawns one task writing requests and one task reading responses and
    /// events. Both end when the socket closes.
    pub async fn connect(uri: &str, request_timeout: Option<Duration>) -> Result<Self, EngineError> {
        tracing::info!(uri = %uri, "Connecting to media server");

        let (ws_stream, _) = connect_async(uri).await.map_err(|e| {
            tracing::error!(uri = %uri, error = %e, "Could not find media server");
            EngineError::Connect {
                uri: uri.to_string(),
                reason: e.to_string(),
            }
        })?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let rpc = Arc::new(RpcChannel::new(tx, request_timeout));

        tokio::spawn(sender_task(write, rx));
        tokio::spawn(receiver_task(read, Arc::downgrade(&rpc)));

        tracing::info!(uri = %uri, "Connected to media server");

        Ok(Self { rpc })
    }
}

#[async_trait]
impl MediaEngine for KurentoClient {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, EngineError> {
        let id = self.rpc.create("MediaPipeline", Map::new()).await?;
        tracing::debug!(pipeline = %id, "Media pipeline created");

        Ok(Arc::new(KurentoPipeline {
            id,
            rpc: Arc::clone(&self.rpc),
        }))
    }

    fn is_closed(&self) -> bool {
        self.rpc.closed.load(Ordering::SeqCst)
    }
}

struct KurentoPipeline {
    id: ElementId,
    rpc: Arc<RpcChannel>,
}

impl KurentoPipeline {
    fn constructor(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("mediaPipeline".into(), Value::from(self.id.as_str()));
        params
    }
}

#[async_trait]
impl MediaPipeline for KurentoPipeline {
    fn id(&self) -> &ElementId {
        &self.id
    }

    async fn create_endpoint(&self) -> Result<Arc<dyn WebRtcEndpoint>, EngineError> {
        let id = self.rpc.create("WebRtcEndpoint", self.constructor()).await?;
        self.rpc.adopt(&self.id, &id);
        tracing::debug!(pipeline = %self.id, endpoint = %id, "WebRTC endpoint created");

        Ok(Arc::new(KurentoEndpoint {
            id,
            rpc: Arc::clone(&self.rpc),
        }))
    }

    async fn create_filter(
        &self,
        filter: &FilterConfig,
    ) -> Result<Arc<dyn MediaElement>, EngineError> {
        let mut params = filter.params.clone();
        params.extend(self.constructor());

        let id = self.rpc.create(&filter.kind, params).await?;
        self.rpc.adopt(&self.id, &id);
        tracing::debug!(pipeline = %self.id, filter = %id, kind = %filter.kind, "Filter created");

        Ok(Arc::new(KurentoElement {
            id,
            rpc: Arc::clone(&self.rpc),
        }))
    }

    async fn release(&self) -> Result<(), EngineError> {
        self.rpc.release(&self.id).await
    }
}

struct KurentoElement {
    id: ElementId,
    rpc: Arc<RpcChannel>,
}

#[async_trait]
impl MediaElement for KurentoElement {
    fn id(&self) -> &ElementId {
        &self.id
    }

    async fn connect(&self, sink: &ElementId) -> Result<(), EngineError> {
        self.rpc
            .invoke(&self.id, "connect", json!({ "sink": sink.as_str() }))
            .await
            .map(|_| ())
    }

    async fn release(&self) -> Result<(), EngineError> {
        self.rpc.release(&self.id).await
    }
}

struct KurentoEndpoint {
    id: ElementId,
    rpc: Arc<RpcChannel>,
}

#[async_trait]
impl MediaElement for KurentoEndpoint {
    fn id(&self) -> &ElementId {
        &self.id
    }

    async fn connect(&self, sink: &ElementId) -> Result<(), EngineError> {
        self.rpc
            .invoke(&self.id, "connect", json!({ "sink": sink.as_str() }))
            .await
            .map(|_| ())
    }

    async fn release(&self) -> Result<(), EngineError> {
        self.rpc.release(&self.id).await
    }
}

#[async_trait]
impl WebRtcEndpoint for KurentoEndpoint {
    async fn process_offer(&self, sdp_offer: &str) -> Result<String, EngineError> {
        let result = self
            .rpc
            .invoke(&self.id, "processOffer", json!({ "offer": sdp_offer }))
            .await?;

        string_value(&result)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError> {
        let candidate = json!({
            "__module__": "kurento",
            "__type__": "IceCandidate",
            "candidate": candidate.candidate,
            "sdpMid": candidate.sdp_mid.as_deref().unwrap_or_default(),
            "sdpMLineIndex": candidate.sdp_m_line_index.unwrap_or_default(),
        });

        self.rpc
            .invoke(&self.id, "addIceCandidate", json!({ "candidate": candidate }))
            .await
            .map(|_| ())
    }

    async fn gather_candidates(&self) -> Result<(), EngineError> {
        self.rpc
            .invoke(&self.id, "gatherCandidates", Value::Object(Map::new()))
            .await
            .map(|_| ())
    }

    async fn on_candidate_discovered(
        &self,
        listener: CandidateListener,
    ) -> Result<(), EngineError> {
        // Register first so candidates emitted right after the reply are not lost
        lock(&self.rpc.listeners).insert(self.id.clone(), listener);

        let subscribed = self
            .rpc
            .call(
                "subscribe",
                json!({ "object": self.id.as_str(), "type": ICE_CANDIDATE_FOUND }),
            )
            .await;

        if subscribed.is_err() {
            lock(&self.rpc.listeners).remove(&self.id);
        }

        subscribed.map(|_| ())
    }
}

/// Request/response correlation over one engine socket
struct RpcChannel {
    tx: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, EngineError>>>>,
    listeners: Mutex<HashMap<ElementId, CandidateListener>>,
    /// Elements created on each pipeline, released along with it
    children: Mutex<HashMap<ElementId, Vec<ElementId>>>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    request_timeout: Option<Duration>,
}

impl RpcChannel {
    fn new(tx: mpsc::UnboundedSender<Message>, request_timeout: Option<Duration>) -> Self {
        Self {
            tx,
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            request_timeout,
        }
    }

    async fn create(&self, kind: &str, constructor: Map<String, Value>) -> Result<ElementId, EngineError> {
        let result = self
            .call(
                "create",
                json!({ "type": kind, "constructorParams": constructor, "properties": {} }),
            )
            .await?;

        string_value(&result).map(ElementId::new)
    }

    async fn invoke(&self, object: &ElementId, operation: &str, params: Value) -> Result<Value, EngineError> {
        self.call(
            "invoke",
            json!({
                "object": object.as_str(),
                "operation": operation,
                "operationParams": params,
            }),
        )
        .await
    }

    fn adopt(&self, pipeline: &ElementId, element: &ElementId) {
        lock(&self.children)
            .entry(pipeline.clone())
            .or_default()
            .push(element.clone());
    }

    /// Drop local state for `object` and anything created on it
    fn forget(&self, object: &ElementId) {
        let owned = {
            let mut children = lock(&self.children);
            let owned = children.remove(object).unwrap_or_default();
            for elements in children.values_mut() {
                elements.retain(|id| id != object);
            }
            owned
        };

        let mut listeners = lock(&self.listeners);
        listeners.remove(object);
        for id in &owned {
            listeners.remove(id);
        }
    }

    async fn release(&self, object: &ElementId) -> Result<(), EngineError> {
        self.forget(object);
        self.call("release", json!({ "object": object.as_str() }))
            .await
            .map(|_| ())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session_id = lock(&self.session_id).clone();
        let frame = request_frame(id, method, params, session_id.as_deref());

        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(id, reply_tx);

        // fail_all() sets `closed` before draining, so re-checking after the
        // insert guarantees the entry is either drained or never waited on
        if self.closed.load(Ordering::SeqCst) {
            lock(&self.pending).remove(&id);
            return Err(EngineError::Disconnected);
        }

        tracing::trace!(id = id, method = method, "Sending media server request");

        if self.tx.send(Message::Text(frame.to_string())).is_err() {
            lock(&self.pending).remove(&id);
            return Err(EngineError::Disconnected);
        }

        let reply = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock(&self.pending).remove(&id);
                    tracing::warn!(id = id, method = method, "Media server request timed out");
                    return Err(EngineError::Timeout {
                        method: method.to_string(),
                    });
                }
            },
            None => reply_rx.await,
        };

        let result = reply.map_err(|_| EngineError::Disconnected)??;

        if let Some(session) = result.get("sessionId").and_then(Value::as_str) {
            let mut current = lock(&self.session_id);
            if current.as_deref() != Some(session) {
                *current = Some(session.to_string());
            }
        }

        Ok(result)
    }

    fn handle_text(&self, text: &str) {
        match parse_incoming(text) {
            Ok(Incoming::Response { id, result }) => {
                let waiter = lock(&self.pending).remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => tracing::debug!(id = id, "Response for unknown request"),
                }
            }
            Ok(Incoming::Candidate { element, candidate }) => {
                let listener = lock(&self.listeners).get(&element).cloned();
                match listener {
                    Some(listener) => listener(candidate),
                    None => tracing::debug!(element = %element, "Candidate for unwatched element"),
                }
            }
            Ok(Incoming::Ignored) => {}
            Err(e) => tracing::warn!(error = %e, "Unreadable media server message"),
        }
    }

    fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let pending: Vec<_> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        for waiter in pending {
            let _ = waiter.send(Err(EngineError::Disconnected));
        }

        lock(&self.listeners).clear();
        lock(&self.children).clear();
    }
}

async fn sender_task(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write.send(msg).await {
            tracing::error!(error = %e, "Failed to send media server request");
            break;
        }
    }

    tracing::debug!("Media server sender task terminated");
}

async fn receiver_task(mut read: SplitStream<WsStream>, rpc: Weak<RpcChannel>) {
    while let Some(msg) = read.next().await {
        let Some(channel) = rpc.upgrade() else {
            break;
        };

        match msg {
            Ok(Message::Text(text)) => channel.handle_text(&text),
            Ok(Message::Close(_)) => {
                tracing::warn!("Media server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Media server connection error");
                break;
            }
        }
    }

    if let Some(channel) = rpc.upgrade() {
        channel.fail_all();
    }

    tracing::debug!("Media server receiver task terminated");
}

/// Build a JSON-RPC request frame
fn request_frame(id: u64, method: &str, mut params: Value, session_id: Option<&str>) -> Value {
    if let (Some(session), Some(fields)) = (session_id, params.as_object_mut()) {
        fields.insert("sessionId".into(), Value::from(session));
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// A decoded frame from the media server
#[derive(Debug, PartialEq)]
enum Incoming {
    /// Reply to one of our requests
    Response {
        id: u64,
        result: Result<Value, EngineError>,
    },
    /// An endpoint discovered a local candidate
    Candidate {
        element: ElementId,
        candidate: IceCandidate,
    },
    /// Anything we do not act on
    Ignored,
}

fn parse_incoming(text: &str) -> Result<Incoming, EngineError> {
    let frame: Value =
        serde_json::from_str(text).map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        if let Some(error) = frame.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Ok(Incoming::Response {
                id,
                result: Err(EngineError::Rpc { code, message }),
            });
        }

        if let Some(result) = frame.get("result") {
            return Ok(Incoming::Response {
                id,
                result: Ok(result.clone()),
            });
        }
    }

    if frame.get("method").and_then(Value::as_str) != Some("onEvent") {
        return Ok(Incoming::Ignored);
    }

    let event = &frame["params"]["value"];
    let kind = event.get("type").and_then(Value::as_str);
    if kind != Some(ICE_CANDIDATE_FOUND) {
        return Ok(Incoming::Ignored);
    }

    let element = event
        .get("object")
        .or_else(|| event["data"].get("source"))
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::InvalidResponse("event without source object".into()))?;

    let candidate: IceCandidate = serde_json::from_value(event["data"]["candidate"].clone())
        .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

    Ok(Incoming::Candidate {
        element: ElementId::new(element),
        candidate,
    })
}

fn string_value(result: &Value) -> Result<String, EngineError> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::InvalidResponse(format!("expected string value in {}", result)))
}
