//! Error type for the pickle codec

use thiserror::Error;

/// Errors surfaced by the encoder and the decoder.
///
/// All of them abort the session; none are retried internally.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PickleError {
    /// Unexpected opcode, wrong protocol version, truncated operand,
    /// illegal identifier character, or a missing STOP.
    #[error("malformed stream: {0}")]
    MalformedStream(String),
    /// A GET referenced a memo id no PUT has bound.
    #[error("memo id {0} referenced before it was bound")]
    MemoMiss(u32),
    /// A close opcode with no open MARK, an empty stack for a unary
    /// operation, or a MARK left open at STOP.
    #[error("unbalanced container: {0}")]
    UnbalancedContainer(String),
    /// A GLOBAL operand outside the recognized set.
    #[error("unknown global for unpickler: {module}.{name}")]
    UnknownGlobal { module: String, name: String },
    /// A value of the wrong variant where a specific one is required.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    /// The next memo id would not fit in 32 bits.
    #[error("memo id space exhausted")]
    TooManyMemoIds,
}

pub type Result<T> = std::result::Result<T, PickleError>;
