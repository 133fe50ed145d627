//! Scriptable in-process media engine for tests
//!
//! Every engine call passes through a [`Step`]. Tests can hold a step at a
//! [`Gate`] to interleave other operations while a call is suspended, or make
//! the next call at a step fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{
    CandidateListener, ElementId, EngineError, FilterConfig, MediaElement, MediaEngine,
    MediaEngineConnector, MediaPipeline, WebRtcEndpoint,
};
use crate::protocol::IceCandidate;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine call kinds that can be held or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Step {
    Connect,
    CreatePipeline,
    CreateEndpoint,
    CreateFilter,
    ConnectElement,
    Subscribe,
    ProcessOffer,
    AddIceCandidate,
    GatherCandidates,
}

/// A completed engine call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreatePipeline(ElementId),
    CreateEndpoint {
        pipeline: ElementId,
        endpoint: ElementId,
    },
    CreateFilter {
        pipeline: ElementId,
        filter: ElementId,
        kind: String,
    },
    Connect {
        source: ElementId,
        sink: ElementId,
    },
    Subscribe(ElementId),
    ProcessOffer {
        endpoint: ElementId,
        offer: String,
    },
    AddIceCandidate {
        endpoint: ElementId,
        candidate: IceCandidate,
    },
    GatherCandidates(ElementId),
    Release(ElementId),
}

/// Suspension point for one call
#[derive(Default)]
pub(crate) struct Gate {
    reached: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until a call is parked at this gate
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the parked call continue
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct MockState {
    gates: HashMap<Step, Arc<Gate>>,
    failures: HashMap<Step, EngineError>,
    answers: HashMap<String, String>,
    calls: Vec<Call>,
    listeners: HashMap<ElementId, CandidateListener>,
    connects: usize,
}

#[derive(Default)]
struct Inner {
    state: Mutex<MockState>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// In-process engine and connector sharing one call log
#[derive(Clone, Default)]
pub(crate) struct MockEngine {
    inner: Arc<Inner>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park the next call at `step` until the returned gate is released
    pub fn hold(&self, step: Step) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        lock(&self.inner.state).gates.insert(step, Arc::clone(&gate));
        gate
    }

    /// Make the next call at `step` fail with `error`
    pub fn fail(&self, step: Step, error: EngineError) {
        lock(&self.inner.state).failures.insert(step, error);
    }

    /// Answer `offer` with `answer` instead of the default
    pub fn answer(&self, offer: &str, answer: &str) {
        lock(&self.inner.state)
            .answers
            .insert(offer.to_string(), answer.to_string());
    }

    /// Mark the connection as dropped
    pub fn set_closed(&self, closed: bool) {
        self.inner.closed.store(closed, Ordering::SeqCst);
    }

    /// Deliver a locally discovered candidate for `endpoint`
    pub fn emit_candidate(&self, endpoint: &ElementId, candidate: IceCandidate) -> bool {
        let listener = lock(&self.inner.state).listeners.get(endpoint).cloned();
        match listener {
            Some(listener) => {
                listener(candidate);
                true
            }
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.inner.state).calls.clone()
    }

    pub fn connects(&self) -> usize {
        lock(&self.inner.state).connects
    }

    pub fn released(&self, id: &ElementId) -> bool {
        self.calls()
            .iter()
            .any(|call| matches!(call, Call::Release(released) if released == id))
    }

    /// Candidates applied to `endpoint`, in order
    pub fn candidates_for(&self, endpoint: &ElementId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddIceCandidate {
                    endpoint: target,
                    candidate,
                } if &target == endpoint => Some(candidate.candidate),
                _ => None,
            })
            .collect()
    }

    /// `(source, sink)` pairs, in connection order
    pub fn connections(&self) -> Vec<(ElementId, ElementId)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Connect { source, sink } => Some((source, sink)),
                _ => None,
            })
            .collect()
    }

    /// Endpoints created so far, in creation order
    pub fn endpoints(&self) -> Vec<ElementId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CreateEndpoint { endpoint, .. } => Some(endpoint),
                _ => None,
            })
            .collect()
    }

    pub fn pipelines(&self) -> Vec<ElementId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CreatePipeline(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        lock(&self.inner.state).calls.push(call);
    }

    fn next_id(&self, prefix: &str) -> ElementId {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        ElementId::new(format!("{}-{}", prefix, n))
    }

    async fn enter(&self, step: Step) -> Result<(), EngineError> {
        let gate = lock(&self.inner.state).gates.remove(&step);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        if step != Step::Connect && self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Disconnected);
        }

        match lock(&self.inner.state).failures.remove(&step) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MediaEngineConnector for MockEngine {
    async fn connect(&self) -> Result<Arc<dyn MediaEngine>, EngineError> {
        self.enter(Step::Connect).await?;
        lock(&self.inner.state).connects += 1;
        self.set_closed(false);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, EngineError> {
        self.enter(Step::CreatePipeline).await?;
        let id = self.next_id("pipeline");
        self.record(Call::CreatePipeline(id.clone()));

        Ok(Arc::new(MockPipeline {
            id,
            engine: self.clone(),
        }))
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

struct MockPipeline {
    id: ElementId,
    engine: MockEngine,
}

#[async_trait]
impl MediaPipeline for MockPipeline {
    fn id(&self) -> &ElementId {
        &self.id
    }

    async fn create_endpoint(&self) -> Result<Arc<dyn WebRtcEndpoint>, EngineError> {
        self.engine.enter(Step::CreateEndpoint).await?;
        let endpoint = self.engine.next_id("endpoint");
        self.engine.record(Call::CreateEndpoint {
            pipeline: self.id.clone(),
            endpoint: endpoint.clone(),
        });

        Ok(Arc::new(MockElement {
            id: endpoint,
            engine: self.engine.clone(),
        }))
    }

    async fn create_filter(
        &self,
        filter: &FilterConfig,
    ) -> Result<Arc<dyn MediaElement>, EngineError> {
        self.engine.enter(Step::CreateFilter).await?;
        let id = self.engine.next_id("filter");
        self.engine.record(Call::CreateFilter {
            pipeline: self.id.clone(),
            filter: id.clone(),
            kind: filter.kind.clone(),
        });

        Ok(Arc::new(MockElement {
            id,
            engine: self.engine.clone(),
        }))
    }

    async fn release(&self) -> Result<(), EngineError> {
        self.engine.record(Call::Release(self.id.clone()));
        Ok(())
    }
}

struct MockElement {
    id: ElementId,
    engine: MockEngine,
}

#[async_trait]
impl MediaElement for MockElement {
    fn id(&self) -> &ElementId {
        &self.id
    }

    async fn connect(&self, sink: &ElementId) -> Result<(), EngineError> {
        self.engine.enter(Step::ConnectElement).await?;
        self.engine.record(Call::Connect {
            source: self.id.clone(),
            sink: sink.clone(),
        });
        Ok(())
    }

    async fn release(&self) -> Result<(), EngineError> {
        lock(&self.engine.inner.state).listeners.remove(&self.id);
        self.engine.record(Call::Release(self.id.clone()));
        Ok(())
    }
}

#[async_trait]
impl WebRtcEndpoint for MockElement {
    async fn process_offer(&self, sdp_offer: &str) -> Result<String, EngineError> {
        self.engine.enter(Step::ProcessOffer).await?;
        self.engine.record(Call::ProcessOffer {
            endpoint: self.id.clone(),
            offer: sdp_offer.to_string(),
        });

        let answer = lock(&self.engine.inner.state).answers.get(sdp_offer).cloned();
        Ok(answer.unwrap_or_else(|| format!("answer-for-{}", sdp_offer)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError> {
        self.engine.enter(Step::AddIceCandidate).await?;
        self.engine.record(Call::AddIceCandidate {
            endpoint: self.id.clone(),
            candidate: candidate.clone(),
        });
        Ok(())
    }

    async fn gather_candidates(&self) -> Result<(), EngineError> {
        self.engine.enter(Step::GatherCandidates).await?;
        self.engine.record(Call::GatherCandidates(self.id.clone()));
        Ok(())
    }

    async fn on_candidate_discovered(
        &self,
        listener: CandidateListener,
    ) -> Result<(), EngineError> {
        self.engine.enter(Step::Subscribe).await?;
        lock(&self.engine.inner.state)
            .listeners
            .insert(self.id.clone(), listener);
        self.engine.record(Call::Subscribe(self.id.clone()));
        Ok(())
    }
}
