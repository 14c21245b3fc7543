use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric status codes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    Unimplemented,
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        match code {
            Code::Ok => 0,
            Code::Cancelled => 1,
            Code::Unknown => 2,
            Code::Unimplemented => 12,
        }
    }
}

impl From<i32> for Code {
    fn from(v: i32) -> Code {
        match v {
            0 => Code::Ok,
            1 => Code::Cancelled,
            12 => Code::Unimplemented,
            _ => Code::Unknown,
        }
    }
}

/// Failure of a stage or index call.
///
/// `Cancelled` is the only kind stages produce at request time: a missing
/// scope or field, a malformed seed, a key-field mismatch or an unreachable
/// peer. `Unimplemented` means the capability was never wired to a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Status {
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("unimplemented: {0}")]
    Unimplemented(String),
}

pub type StatusResult<T> = Result<T, Status>;

impl Status {
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Status::Cancelled(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Status::Unimplemented(msg.into())
    }

    pub fn code(&self) -> Code {
        match self {
            Status::Cancelled(_) => Code::Cancelled,
            Status::Unimplemented(_) => Code::Unimplemented,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Status::Cancelled(m) | Status::Unimplemented(m) => m,
        }
    }
}

/// JSON body returned by a stage endpoint when the call fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: Code,
    pub message: String,
}

impl From<&Status> for ErrorBody {
    fn from(status: &Status) -> Self {
        ErrorBody { code: status.code(), message: status.message().to_string() }
    }
}

impl From<ErrorBody> for Status {
    fn from(body: ErrorBody) -> Self {
        match body.code {
            Code::Unimplemented => Status::Unimplemented(body.message),
            // Anything else the peer reports is a failed precondition from our side.
            _ => Status::Cancelled(body.message),
        }
    }
}
