//! Writer module: the inverse of the reader
//!
//! - Payload encoder (digits to frame words)
//! - Raw page writer (frame words to paged buffers)
//! - Digit generator for simulated input

pub mod encoder;
pub mod page_writer;
pub mod simulation;

pub use encoder::{EncodeError, EncoderConfig, PayloadEncoder};
pub use page_writer::{PageWriterConfig, PageWriterError, RawPageWriter};
pub use simulation::DigitGenerator;
