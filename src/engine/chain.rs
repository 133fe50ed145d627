//! Presenter media chain
//!
//! The presenter's endpoint can feed an ordered list of processing stages
//! (overlays, GStreamer filters, ...) before media reaches the viewers:
//!
//! ```text
//!   presenter endpoint ──► filter 1 ──► ... ──► filter N ──► viewer endpoints
//! ```
//!
//! An empty chain connects viewers straight to the presenter endpoint.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{ElementId, EngineError, MediaElement, WebRtcEndpoint};

/// One processing stage, created on the presenter's pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Engine element type (e.g. `GStreamerFilter`, `FaceOverlayFilter`)
    pub kind: String,

    /// Constructor parameters besides the owning pipeline
    pub params: Map<String, Value>,
}

impl FilterConfig {
    /// Create a filter stage without parameters
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }

    /// GStreamer filter running the given pipeline description
    pub fn gstreamer(command: impl Into<String>) -> Self {
        Self::new("GStreamerFilter").param("command", command.into())
    }

    /// Add a constructor parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Ordered list of stages between the presenter and its viewers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaChain {
    filters: Vec<FilterConfig>,
}

impl MediaChain {
    /// Plain chain: viewers attach directly to the presenter endpoint
    pub fn direct() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filters.push(filter);
        self
    }

    /// Stages in media order
    pub fn filters(&self) -> &[FilterConfig] {
        &self.filters
    }

    /// Whether viewers attach directly to the presenter endpoint
    pub fn is_direct(&self) -> bool {
        self.filters.is_empty()
    }
}

/// The element viewers receive media from
#[derive(Clone)]
pub enum MediaSource {
    /// The presenter endpoint itself
    Endpoint(Arc<dyn WebRtcEndpoint>),
    /// The last stage of the chain
    Stage(Arc<dyn MediaElement>),
}

impl MediaSource {
    /// Engine id of the source element
    pub fn id(&self) -> &ElementId {
        match self {
            MediaSource::Endpoint(endpoint) => endpoint.id(),
            MediaSource::Stage(stage) => stage.id(),
        }
    }

    /// Send this source's media to `sink`
    pub async fn connect(&self, sink: &ElementId) -> Result<(), EngineError> {
        match self {
            MediaSource::Endpoint(endpoint) => endpoint.connect(sink).await,
            MediaSource::Stage(stage) => stage.connect(sink).await,
        }
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Endpoint(endpoint) => write!(f, "Endpoint({})", endpoint.id()),
            MediaSource::Stage(stage) => write!(f, "Stage({})", stage.id()),
        }
    }
}
