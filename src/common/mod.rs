//! Common data types shared across the codec
//!
//! This module defines the digit and error-record types produced by the
//! payload decoder and consumed by the encoder, plus small word/byte helpers.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cli;
pub mod error;

pub use cli::{CommonArgs, DecodeArgs, SimulateArgs};
pub use error::{CodecError, CodecResult};

/// Largest charge representable in a pad word (11-bit ADC range)
pub const MAX_CHARGE: u16 = 2047;

/// Number of bytes in one frame word
pub const WORD_SIZE: usize = 4;

mod constants {
    /// Digit transport word: abs id in bits 0-17, charge in bits 18-31
    pub const ABS_ID_MASK: u32 = 0x3_FFFF;
    pub const CHARGE_SHIFT: u32 = 18;
    pub const CHARGE_MASK: u32 = 0x3FFF;
}

/// Clamp a raw charge to the representable maximum
#[inline]
pub fn clamp_charge(charge: u32) -> u16 {
    charge.min(MAX_CHARGE as u32) as u16
}

// ---------------------------------------------------------------------------
// Scan direction
// ---------------------------------------------------------------------------

/// Word order in which a payload is laid out and scanned.
///
/// `Forward` payloads open every region with its marker (segment, row,
/// end-of-block) and are read in ascending word order. `Backward` payloads
/// close segments and dilogic blocks with their markers, keep a leading
/// row marker, and are read from the last word towards the first.
/// Decoder and encoder must agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    #[default]
    Forward,
    Backward,
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanDirection::Forward => write!(f, "forward"),
            ScanDirection::Backward => write!(f, "backward"),
        }
    }
}

impl std::str::FromStr for ScanDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(ScanDirection::Forward),
            "backward" => Ok(ScanDirection::Backward),
            other => Err(format!("unknown scan direction '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Digits and hardware addresses
// ---------------------------------------------------------------------------

/// One decoded (channel, charge) observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digit {
    /// Absolute channel id
    pub abs_id: u32,
    /// Charge in ADC counts, never above [`MAX_CHARGE`]
    pub charge: u16,
}

impl Digit {
    /// Create a digit, clamping the charge
    pub fn new(abs_id: u32, charge: u32) -> Self {
        Self {
            abs_id,
            charge: clamp_charge(charge),
        }
    }

    /// Pack into the 32-bit transport word
    pub fn to_word(&self) -> u32 {
        (self.abs_id & constants::ABS_ID_MASK)
            | ((self.charge as u32 & constants::CHARGE_MASK) << constants::CHARGE_SHIFT)
    }

    /// Unpack from the 32-bit transport word
    pub fn from_word(word: u32) -> Self {
        Self {
            abs_id: word & constants::ABS_ID_MASK,
            charge: ((word >> constants::CHARGE_SHIFT) & constants::CHARGE_MASK) as u16,
        }
    }
}

/// Hardware coordinates of one pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HwAddress {
    pub readout_unit: u16,
    pub row: u8,
    pub dilogic: u8,
    pub address: u8,
}

impl HwAddress {
    pub fn new(readout_unit: u16, row: u8, dilogic: u8, address: u8) -> Self {
        Self {
            readout_unit,
            row,
            dilogic,
            address,
        }
    }
}

impl fmt::Display for HwAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(ru={}, row={}, dilogic={}, address={})",
            self.readout_unit, self.row, self.dilogic, self.address
        )
    }
}

// ---------------------------------------------------------------------------
// Error records
// ---------------------------------------------------------------------------

/// Classification of everything that can go wrong while reading a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    NoPayload,
    PageNotFound,
    HeaderDecoding,
    PayloadDecoding,
    SegmentHeaderError,
    RowHeaderError,
    EoEHeaderError,
    PadError,
    PadAddressError,
    MappingError,
}

impl ErrorKind {
    /// All kinds, in declaration order
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::NoPayload,
        ErrorKind::PageNotFound,
        ErrorKind::HeaderDecoding,
        ErrorKind::PayloadDecoding,
        ErrorKind::SegmentHeaderError,
        ErrorKind::RowHeaderError,
        ErrorKind::EoEHeaderError,
        ErrorKind::PadError,
        ErrorKind::PadAddressError,
        ErrorKind::MappingError,
    ];

    /// Page-level kinds abort the current trigger; framing kinds are recovered
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::NoPayload
                | ErrorKind::PageNotFound
                | ErrorKind::HeaderDecoding
                | ErrorKind::PayloadDecoding
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoPayload => "NoPayload",
            ErrorKind::PageNotFound => "PageNotFound",
            ErrorKind::HeaderDecoding => "HeaderDecoding",
            ErrorKind::PayloadDecoding => "PayloadDecoding",
            ErrorKind::SegmentHeaderError => "SegmentHeaderError",
            ErrorKind::RowHeaderError => "RowHeaderError",
            ErrorKind::EoEHeaderError => "EoEHeaderError",
            ErrorKind::PadError => "PadError",
            ErrorKind::PadAddressError => "PadAddressError",
            ErrorKind::MappingError => "MappingError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framing or page error, located in hardware coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub readout_unit: u16,
    pub row: u8,
    pub dilogic: u8,
    pub address: u8,
    pub kind: ErrorKind,
}

impl ErrorRecord {
    pub fn new(readout_unit: u16, row: u8, dilogic: u8, address: u8, kind: ErrorKind) -> Self {
        Self {
            readout_unit,
            row,
            dilogic,
            address,
            kind,
        }
    }

    pub fn hw_address(&self) -> HwAddress {
        HwAddress::new(self.readout_unit, self.row, self.dilogic, self.address)
    }
}

/// Result of decoding one logical payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPayload {
    /// Digits in encounter order, duplicates retained
    pub digits: Vec<Digit>,
    /// Errors in encounter order
    pub errors: Vec<ErrorRecord>,
}

impl DecodedPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no error was recorded
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors of the given kind
    pub fn count(&self, kind: ErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    /// Append another result, keeping order
    pub fn extend(&mut self, other: DecodedPayload) {
        self.digits.extend(other.digits);
        self.errors.extend(other.errors);
    }
}

// ---------------------------------------------------------------------------
// Word helpers
// ---------------------------------------------------------------------------

/// Split a byte slice into Little-Endian words; `None` if not word aligned
pub fn bytes_to_words(data: &[u8]) -> Option<Vec<u32>> {
    if data.len() % WORD_SIZE != 0 {
        return None;
    }
    Some(
        data.chunks_exact(WORD_SIZE)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Serialize words as Little-Endian bytes
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * WORD_SIZE);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}
