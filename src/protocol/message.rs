//! Signaling message types
//!
//! Every frame on the signaling socket is a JSON object tagged by its
//! `action` field.

use serde::{Deserialize, Serialize};

use crate::session::SessionRole;

/// ICE candidate as exchanged with browsers and the media engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line (`candidate:...`)
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate bound to a media line
    pub fn new(candidate: impl Into<String>, sdp_mid: impl Into<String>, index: u16) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some(sdp_mid.into()),
            sdp_m_line_index: Some(index),
        }
    }
}

/// Inbound control message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Become the presenter
    InitPresenter {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    /// Join as a viewer
    InitViewer {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    /// Submit a client-side ICE candidate
    OnIceCandidate { candidate: IceCandidate },
    /// Leave the room
    Stop,
}

impl ControlMessage {
    /// Parse a control message from a text frame
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Action tag, for logging
    pub fn action(&self) -> &'static str {
        match self {
            ControlMessage::InitPresenter { .. } => "initPresenter",
            ControlMessage::InitViewer { .. } => "initViewer",
            ControlMessage::OnIceCandidate { .. } => "onIceCandidate",
            ControlMessage::Stop => "stop",
        }
    }
}

/// Outcome carried by presenter and viewer responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Negotiation succeeded, `sdpAnswer` is set
    Accepted,
    /// Negotiation failed, `message` is set
    Rejected,
}

/// Body of a presenter or viewer response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Accepted or rejected
    pub response: ResponseKind,

    /// SDP answer (accepted only)
    #[serde(rename = "sdpAnswer", default, skip_serializing_if = "Option::is_none")]
    pub sdp_answer: Option<String>,

    /// Reason (rejected only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Accepted response carrying an SDP answer
    pub fn accepted(sdp_answer: impl Into<String>) -> Self {
        Self {
            response: ResponseKind::Accepted,
            sdp_answer: Some(sdp_answer.into()),
            message: None,
        }
    }

    /// Rejected response carrying a reason
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            response: ResponseKind::Rejected,
            sdp_answer: None,
            message: Some(message.into()),
        }
    }
}

/// Outbound message to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Result of `initPresenter`
    PresenterResponse(Response),
    /// Result of `initViewer`
    ViewerResponse(Response),
    /// Candidate discovered by the media engine
    IceCandidate { candidate: IceCandidate },
    /// The presenter left; the viewer's session is over
    StopCommunication,
    /// Malformed or unknown control message
    Error { message: String },
}

impl OutboundMessage {
    /// Response for the given role
    pub fn response(role: SessionRole, response: Response) -> Self {
        match role {
            SessionRole::Presenter => OutboundMessage::PresenterResponse(response),
            SessionRole::Viewer => OutboundMessage::ViewerResponse(response),
        }
    }

    /// Protocol error message
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }

    /// Serialize to a text frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
