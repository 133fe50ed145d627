//! Media engine client interface
//!
//! The relay never touches media itself. Everything that encodes, mixes or
//! routes audio/video lives in a remote media engine, reached through the
//! object-safe async traits below.
//!
//! # Object model
//!
//! ```text
//!   MediaEngineConnector ──connect()──► MediaEngine
//!                                           │ create_pipeline()
//!                                           ▼
//!                                     MediaPipeline ──create_filter()──► MediaElement
//!                                           │ create_endpoint()
//!                                           ▼
//!                                     WebRtcEndpoint (is a MediaElement)
//! ```
//!
//! Releasing a pipeline releases every element created on it.

pub mod chain;
pub mod error;
pub mod kurento;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::IceCandidate;

pub use chain::{FilterConfig, MediaChain, MediaSource};
pub use error::EngineError;
pub use kurento::{KurentoClient, KurentoConnector};

/// Identifier of a remote media object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(String);

impl ElementId {
    /// Wrap an engine-assigned object id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback invoked for every candidate the engine discovers on an endpoint
pub type CandidateListener = Arc<dyn Fn(IceCandidate) + Send + Sync>;

/// Opens connections to a media engine
#[async_trait]
pub trait MediaEngineConnector: Send + Sync {
    /// Establish a new engine connection
    async fn connect(&self) -> Result<Arc<dyn MediaEngine>, EngineError>;
}

/// A live connection to a media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create an empty media pipeline
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, EngineError>;

    /// Whether the connection has gone away and must be re-established
    fn is_closed(&self) -> bool {
        false
    }
}

/// A media processing graph on the engine
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Engine-assigned id
    fn id(&self) -> &ElementId;

    /// Create a WebRTC endpoint inside this pipeline
    async fn create_endpoint(&self) -> Result<Arc<dyn WebRtcEndpoint>, EngineError>;

    /// Create a processing element (filter) inside this pipeline
    async fn create_filter(
        &self,
        filter: &FilterConfig,
    ) -> Result<Arc<dyn MediaElement>, EngineError>;

    /// Release the pipeline and everything created on it
    async fn release(&self) -> Result<(), EngineError>;
}

/// Any element of a pipeline that can source media
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Engine-assigned id
    fn id(&self) -> &ElementId;

    /// Send this element's media to `sink`
    async fn connect(&self, sink: &ElementId) -> Result<(), EngineError>;

    /// Release this element
    async fn release(&self) -> Result<(), EngineError>;
}

/// One side of a WebRTC connection inside a pipeline
#[async_trait]
pub trait WebRtcEndpoint: MediaElement {
    /// Process a remote SDP offer and return the SDP answer
    async fn process_offer(&self, sdp_offer: &str) -> Result<String, EngineError>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError>;

    /// Start gathering local ICE candidates
    async fn gather_candidates(&self) -> Result<(), EngineError>;

    /// Register the listener for locally discovered candidates
    async fn on_candidate_discovered(&self, listener: CandidateListener)
        -> Result<(), EngineError>;
}

/// Release a pipeline, logging instead of failing
///
/// Used on teardown paths where nobody is left to report the error to.
pub async fn release_pipeline(pipeline: &dyn MediaPipeline) {
    if let Err(e) = pipeline.release().await {
        tracing::debug!(pipeline = %pipeline.id(), error = %e, "Pipeline release failed");
    }
}

/// Release an element, logging instead of failing
pub async fn release_element(element: &dyn MediaElement) {
    if let Err(e) = element.release().await {
        tracing::debug!(element = %element.id(), error = %e, "Element release failed");
    }
}

/// Release a WebRTC endpoint, logging instead of failing
pub async fn release_endpoint(endpoint: &dyn WebRtcEndpoint) {
    if let Err(e) = endpoint.release().await {
        tracing::debug!(endpoint = %endpoint.id(), error = %e, "Endpoint release failed");
    }
}
