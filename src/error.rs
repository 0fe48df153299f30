//! Error taxonomy. Lex and parse failures carry the offending line; runtime
//! failures abort the interpreter; agent failures map to PDU error codes or
//! logged drops.

use thiserror::Error;

/// Lexing or parsing failure, reported once and fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            message: message.into(),
        }
    }
}

/// Failure while running the script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("negative bit position {0} in bitset")]
    NegativeBitPosition(i64),
    #[error("value {value} does not fit field '{field}' of {size} byte(s)")]
    FieldOverflow { field: String, value: i64, size: u8 },
    #[error("no such field '{field}' on variable \"{identifier}\"")]
    NoSuchField { identifier: String, field: String },
    #[error("undefined variable \"{0}\"")]
    UndefinedVariable(String),
    #[error("write channel for \"{0}\" closed")]
    ChannelClosed(String),
}

/// Failure answering an SNMP request. Mapped onto the v1/v2c error-status
/// space by the agent dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("no object registered at {0}")]
    NoSuchObject(String),
    #[error("illegal value for {0}")]
    IllegalValue(String),
    #[error("object {0} is not writable")]
    NotWritable(String),
    #[error("wrong type for {oid}: expected {expected}")]
    WrongType { oid: String, expected: String },
}
