//! Decoder module for CPV payloads
//!
//! Converts the frame words of a logical payload into digits and framing
//! error records.

pub mod payload;
pub mod words;

pub use payload::{dump_words, DecoderConfig, PayloadDecoder};
pub use words::{EoEWord, PadWord, RawWord, RowMarker, SegmentMarker};
