//! Error taxonomy for the document kernel.
//!
//! Every error is a caller error surfaced synchronously; none of them are retried internally.
//! Operations validate their inputs before touching the live tree, so an `Err` always means the
//! document, caret and history are unchanged.

use crate::tree::EnvironmentType;
use thiserror::Error;

/// What was being nested when an [`DocumentError::IllegalNesting`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestedContent {
    /// A sub-environment.
    Environment(EnvironmentType),
    /// An image or smiley.
    Image,
}

impl std::fmt::Display for NestedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NestedContent::Environment(kind) => write!(f, "{kind} environment"),
            NestedContent::Image => write!(f, "image"),
        }
    }
}

/// Kind of a markup parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupErrorKind {
    /// An opening tag was never closed.
    UnclosedTag,
    /// A closing tag did not match the innermost open tag.
    UnexpectedClosingTag,
    /// A tag name is not understood by the parser.
    UnknownTag,
    /// A tag argument could not be parsed (bad color, size, url, ...).
    InvalidArgument,
    /// The markup describes a structure the document model rejects (e.g. code inside code).
    IllegalNesting,
}

/// Structured markup parse error: the kind plus the offending fragment and its byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} at byte {position}: `{fragment}`")]
pub struct MarkupError {
    /// Error kind.
    pub kind: MarkupErrorKind,
    /// Byte offset of the offending fragment in the markup source.
    pub position: usize,
    /// The offending source text (usually a tag).
    pub fragment: String,
}

impl MarkupError {
    /// Create a new markup error.
    pub fn new(kind: MarkupErrorKind, position: usize, fragment: impl Into<String>) -> Self {
        Self {
            kind,
            position,
            fragment: fragment.into(),
        }
    }
}

/// Errors returned by the edit engine and the history engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// A global position lies outside `0..=len`.
    #[error("invalid position {position} (document length {len})")]
    InvalidPosition {
        /// The offending position.
        position: usize,
        /// Document length at the time of the call.
        len: usize,
    },

    /// `start > end` or `end > len`.
    #[error("invalid range {start}..{end} (document length {len})")]
    InvalidRange {
        /// Range start.
        start: usize,
        /// Range end.
        end: usize,
        /// Document length at the time of the call.
        len: usize,
    },

    /// The tree would contain a structurally disallowed nesting (code in code, image in code, ...).
    #[error("cannot place {child} inside a {parent} environment")]
    IllegalNesting {
        /// The environment that would receive the content.
        parent: EnvironmentType,
        /// What was being inserted.
        child: NestedContent,
    },

    /// The operation is not valid in the current state (empty undo stack, unbalanced group, ...).
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// Markup could not be parsed; nothing was inserted.
    #[error("markup error: {0}")]
    Markup(#[from] MarkupError),
}

/// Result alias used across the crate.
pub type Result<T, E = DocumentError> = std::result::Result<T, E>;
