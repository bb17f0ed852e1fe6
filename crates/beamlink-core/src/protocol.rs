//! Wire envelopes exchanged with the node-side bridge
//!
//! Envelopes are encoded as one JSON object per line. The bridge running
//! inside the node translates them to and from distribution-protocol terms,
//! so this side only sees [`Term`] values.

use crate::error::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured value carried in arguments, results and event payloads.
///
/// Atoms arrive as strings, tuples and lists as arrays, maps as objects.
pub type Term = Value;

/// Correlation id pairing an outbound call with its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Envelopes sent to the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Request expecting exactly one reply with the same id
    Call {
        id: CorrelationId,
        module: String,
        function: String,
        #[serde(default)]
        args: Vec<Term>,
    },
    /// One-way invocation
    Cast {
        module: String,
        function: String,
        #[serde(default)]
        args: Vec<Term>,
    },
    /// Console input for the node's standard input
    Input { text: String },
}

impl Outbound {
    /// Get the `module:function` pair for calls and casts
    pub fn mfa(&self) -> Option<(&str, &str, &[Term])> {
        match self {
            Self::Call {
                module,
                function,
                args,
                ..
            }
            | Self::Cast {
                module,
                function,
                args,
            } => Some((module, function, args)),
            Self::Input { .. } => None,
        }
    }

    /// Get the correlation id of a call
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Call { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Result carried by a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Term),
    Error(Term),
}

impl Outcome {
    /// Convert into a result, mapping error terms to [`BackendError::Remote`]
    pub fn into_result(self) -> BackendResult<Term> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error(reason) => Err(BackendError::remote(reason)),
        }
    }
}

/// Envelopes received from the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Reply to an earlier call
    Reply { id: CorrelationId, outcome: Outcome },
    /// Out-of-band event
    Event { category: String, payload: Term },
}

impl Inbound {
    /// Create a success reply
    pub fn ok(id: CorrelationId, value: Term) -> Self {
        Self::Reply {
            id,
            outcome: Outcome::Ok(value),
        }
    }

    /// Create an error reply
    pub fn error(id: CorrelationId, reason: Term) -> Self {
        Self::Reply {
            id,
            outcome: Outcome::Error(reason),
        }
    }

    /// Create an event
    pub fn event(category: impl Into<String>, payload: Term) -> Self {
        Self::Event {
            category: category.into(),
            payload,
        }
    }
}

/// Encode an outbound envelope as a single line (without the newline)
pub fn encode_outbound(message: &Outbound) -> BackendResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode an outbound envelope; used by the loopback remote end
pub fn decode_outbound(line: &str) -> BackendResult<Outbound> {
    serde_json::from_str(line.trim())
        .map_err(|e| BackendError::protocol(format!("undecodable outbound envelope: {e}")))
}

/// Encode an inbound envelope as a single line (without the newline)
pub fn encode_inbound(message: &Inbound) -> BackendResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one inbound line
pub fn decode_inbound(line: &str) -> BackendResult<Inbound> {
    serde_json::from_str(line.trim())
        .map_err(|e| BackendError::protocol(format!("unrecognized envelope: {e}")))
}
