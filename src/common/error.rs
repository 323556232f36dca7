//! Common error types for the codec
//!
//! Each layer defines its own error enum (header, encoder, page writer).
//! `CodecError` wraps them for the write path, which crosses all three.

use thiserror::Error;

use crate::reader::rdh::HeaderError;
use crate::writer::{EncodeError, PageWriterError};

/// Errors surfaced by the end-to-end write path
#[derive(Error, Debug)]
pub enum CodecError {
    /// Page header could not be built
    #[error("Page header error: {0}")]
    Header(#[from] HeaderError),

    /// Digits could not be framed
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Page writer rejected its configuration
    #[error("Page writer error: {0}")]
    PageWriter(#[from] PageWriterError),
}

/// Result type alias using CodecError
pub type CodecResult<T> = Result<T, CodecError>;
