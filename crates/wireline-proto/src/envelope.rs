//! Envelope types for the wireline protocol.
//!
//! One envelope serializes to a flat JSON object
//! `{"t": <kind>, "d": <payload>, "id": <correlation id>, "idleTimeout": <ms>}`.
//! Optional fields are omitted entirely when absent — omission is
//! semantically distinct from zero and must survive a round-trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The tagged kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
    /// Handshake opener from the initiating side, carrying the auth token.
    Init,
    /// Handshake acceptance from the responding side.
    Accepted,
    /// Handshake rejection from the responding side.
    Denied,
    /// Fire-and-forget message, no reply expected.
    Msg,
    /// Question expecting exactly one `resp` or `respError`.
    Ask,
    /// Successful answer to an `ask`.
    Resp,
    /// Failed answer to an `ask`.
    RespError,
    /// Request that the peer produce a streamed sequence.
    SubscribeObservable,
    /// One value of a streamed sequence.
    Obs,
    /// Natural completion of a streamed sequence.
    ObsComplete,
    /// Consumer-side cancellation of a streamed sequence.
    CancelObservable,
    /// Error terminal of a streamed sequence (the producer could not or
    /// can no longer provide it).
    ObsError,
    /// Idle-keepalive probe. No payload, no reply, no handler callback.
    Ping,
}

/// One discrete protocol record exchanged over the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind tag.
    #[serde(rename = "t")]
    pub kind: Kind,
    /// Opaque application payload. The protocol never inspects it beyond
    /// carrying it; schemas are a caller concern.
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Correlation id, present only for kinds that correlate a
    /// request/response pair or identify a streamed sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Idle-probe interval hint in milliseconds, carried by `init` and
    /// `accepted`. Zero or absent disables keepalive for the advertiser.
    #[serde(
        rename = "idleTimeout",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<u64>,
}

impl Envelope {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            payload: None,
            id: None,
            idle_timeout: None,
        }
    }

    /// Handshake opener carrying the authentication token.
    pub fn init(token: &str, idle_timeout: Option<u64>) -> Self {
        Self {
            payload: Some(Value::String(token.to_string())),
            idle_timeout,
            ..Self::new(Kind::Init)
        }
    }

    /// Handshake acceptance, advertising the responder's idle hint.
    pub fn accepted(idle_timeout: Option<u64>) -> Self {
        Self {
            idle_timeout,
            ..Self::new(Kind::Accepted)
        }
    }

    /// Handshake rejection.
    pub fn denied() -> Self {
        Self::new(Kind::Denied)
    }

    /// Fire-and-forget message.
    pub fn msg(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(Kind::Msg)
        }
    }

    /// Question expecting exactly one answer, correlated by `id`.
    pub fn ask(id: u64, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            id: Some(id),
            ..Self::new(Kind::Ask)
        }
    }

    /// Successful answer to the question `id`.
    pub fn resp(id: u64, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            id: Some(id),
            ..Self::new(Kind::Resp)
        }
    }

    /// Failed answer to the question `id`.
    pub fn resp_error(id: u64, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            id: Some(id),
            ..Self::new(Kind::RespError)
        }
    }

    /// Request a streamed sequence from the peer under the local id `id`.
    pub fn subscribe_observable(id: u64, params: Value) -> Self {
        Self {
            payload: Some(params),
            id: Some(id),
            ..Self::new(Kind::SubscribeObservable)
        }
    }

    /// One value of the streamed sequence `id`.
    pub fn obs(id: u64, value: Value) -> Self {
        Self {
            payload: Some(value),
            id: Some(id),
            ..Self::new(Kind::Obs)
        }
    }

    /// Natural completion of the streamed sequence `id`.
    pub fn obs_complete(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::new(Kind::ObsComplete)
        }
    }

    /// Error terminal of the streamed sequence `id`.
    pub fn obs_error(id: u64, reason: Value) -> Self {
        Self {
            payload: Some(reason),
            id: Some(id),
            ..Self::new(Kind::ObsError)
        }
    }

    /// Consumer-side cancellation of the streamed sequence `id`.
    pub fn cancel_observable(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::new(Kind::CancelObservable)
        }
    }

    /// Idle-keepalive probe.
    pub fn ping() -> Self {
        Self::new(Kind::Ping)
    }
}
