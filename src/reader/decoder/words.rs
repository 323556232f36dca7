//! Bit-packed frame words of a CPV payload
//!
//! Every frame word is one 32-bit Little-Endian value. The four kinds share
//! no tag bits, so the same word can be reparsed under any view; this is
//! how the decoder falls back to treating a broken marker as pad data.
//!
//! | word    | layout |
//! |---------|--------|
//! | segment | row[0:8] nwords[8:20] marker[20:32]=0xAB0 |
//! | row     | nwords[0:16] marker[16:32]=0x36A8 |
//! | EoE     | nwords[0:7] event[7:18] dilogic[18:22] row[22:27] check[27]=1 |
//! | pad     | charge[0:12] address[12:18] dilogic[18:22] row[22:27] zero[27]=0 |

use std::fmt;

use crate::common::{clamp_charge, HwAddress};

pub(crate) mod constants {
    pub mod segment {
        pub const ROW_MASK: u32 = 0xFF;
        pub const NWORDS_SHIFT: u32 = 8;
        pub const NWORDS_MASK: u32 = 0xFFF;
        pub const MARKER_SHIFT: u32 = 20;
        pub const MARKER_MASK: u32 = 0xFFF;
        pub const MARKER: u32 = 0xAB0;
        /// Rows grouped under one segment marker
        pub const ROWS_PER_SEGMENT: u8 = 8;
    }

    pub mod row {
        pub const NWORDS_MASK: u32 = 0xFFFF;
        pub const MARKER_SHIFT: u32 = 16;
        pub const MARKER_MASK: u32 = 0xFFFF;
        pub const MARKER: u32 = 0x36A8;
    }

    pub mod eoe {
        pub const NWORDS_MASK: u32 = 0x7F;
        pub const EVENT_SHIFT: u32 = 7;
        pub const EVENT_MASK: u32 = 0x7FF;
        pub const CHECK_SHIFT: u32 = 27;
        /// Bits above the check bit are always zero
        pub const HIGH_SHIFT: u32 = 28;
    }

    pub mod pad {
        pub const CHARGE_MASK: u32 = 0xFFF;
        pub const ADDRESS_SHIFT: u32 = 12;
        pub const ADDRESS_MASK: u32 = 0x3F;
        pub const ZERO_SHIFT: u32 = 27;
    }

    /// Shared by EoE and pad words
    pub const DILOGIC_SHIFT: u32 = 18;
    pub const DILOGIC_MASK: u32 = 0xF;
    pub const ROW_SHIFT: u32 = 22;
    pub const ROW_MASK: u32 = 0x1F;
}

use constants::{eoe, pad, row, segment};

// ---------------------------------------------------------------------------
// Raw word
// ---------------------------------------------------------------------------

/// An uninterpreted payload word
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawWord(pub u32);

impl RawWord {
    pub fn as_segment(self) -> SegmentMarker {
        SegmentMarker(self.0)
    }

    pub fn as_row(self) -> RowMarker {
        RowMarker(self.0)
    }

    pub fn as_eoe(self) -> EoEWord {
        EoEWord(self.0)
    }

    pub fn as_pad(self) -> PadWord {
        PadWord(self.0)
    }

    /// Best guess of the word kind, used for dumps
    pub fn classify(self) -> &'static str {
        if self.as_segment().is_valid() {
            "SEG"
        } else if self.as_row().is_valid() {
            "ROW"
        } else if self.as_eoe().is_valid() {
            "EOE"
        } else if self.as_pad().is_valid() {
            "PAD"
        } else {
            "???"
        }
    }
}

impl fmt::Debug for RawWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawWord(0x{:08x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Segment marker
// ---------------------------------------------------------------------------

/// Opens (forward) or closes (backward) a group of up to 8 rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMarker(pub u32);

impl SegmentMarker {
    /// Pack a marker; `nwords` counts the marker itself
    pub fn new(row: u8, nwords: u16) -> Self {
        Self(
            (row as u32 & segment::ROW_MASK)
                | ((nwords as u32 & segment::NWORDS_MASK) << segment::NWORDS_SHIFT)
                | (segment::MARKER << segment::MARKER_SHIFT),
        )
    }

    pub fn marker(&self) -> u32 {
        (self.0 >> segment::MARKER_SHIFT) & segment::MARKER_MASK
    }

    pub fn is_valid(&self) -> bool {
        self.marker() == segment::MARKER
    }

    pub fn row(&self) -> u8 {
        (self.0 & segment::ROW_MASK) as u8
    }

    pub fn nwords(&self) -> u16 {
        ((self.0 >> segment::NWORDS_SHIFT) & segment::NWORDS_MASK) as u16
    }

    pub const MAX_NWORDS: usize = segment::NWORDS_MASK as usize;
}

// ---------------------------------------------------------------------------
// Row marker
// ---------------------------------------------------------------------------

/// Row header; `nwords` counts the words of the row excluding the marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMarker(pub u32);

impl RowMarker {
    pub fn new(nwords: u16) -> Self {
        Self((nwords as u32 & row::NWORDS_MASK) | (row::MARKER << row::MARKER_SHIFT))
    }

    pub fn marker(&self) -> u32 {
        (self.0 >> row::MARKER_SHIFT) & row::MARKER_MASK
    }

    pub fn is_valid(&self) -> bool {
        self.marker() == row::MARKER
    }

    pub fn nwords(&self) -> u16 {
        (self.0 & row::NWORDS_MASK) as u16
    }

    pub const MAX_NWORDS: usize = row::NWORDS_MASK as usize;
}

// ---------------------------------------------------------------------------
// End-of-event word
// ---------------------------------------------------------------------------

/// Closes one dilogic block; `nwords` counts its pad words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EoEWord(pub u32);

impl EoEWord {
    pub fn new(row: u8, dilogic: u8, nwords: u8) -> Self {
        Self(
            (nwords as u32 & eoe::NWORDS_MASK)
                | ((dilogic as u32 & constants::DILOGIC_MASK) << constants::DILOGIC_SHIFT)
                | ((row as u32 & constants::ROW_MASK) << constants::ROW_SHIFT)
                | (1 << eoe::CHECK_SHIFT),
        )
    }

    pub fn check_bit(&self) -> bool {
        (self.0 >> eoe::CHECK_SHIFT) & 1 == 1
    }

    /// Check bit set and no stray high bits
    pub fn is_valid(&self) -> bool {
        self.check_bit() && self.0 >> eoe::HIGH_SHIFT == 0
    }

    pub fn nwords(&self) -> u8 {
        (self.0 & eoe::NWORDS_MASK) as u8
    }

    pub fn event_number(&self) -> u16 {
        ((self.0 >> eoe::EVENT_SHIFT) & eoe::EVENT_MASK) as u16
    }

    pub fn dilogic(&self) -> u8 {
        ((self.0 >> constants::DILOGIC_SHIFT) & constants::DILOGIC_MASK) as u8
    }

    pub fn row(&self) -> u8 {
        ((self.0 >> constants::ROW_SHIFT) & constants::ROW_MASK) as u8
    }

    pub const MAX_NWORDS: usize = eoe::NWORDS_MASK as usize;
}

// ---------------------------------------------------------------------------
// Pad word
// ---------------------------------------------------------------------------

/// One channel measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadWord(pub u32);

impl PadWord {
    /// Pack a pad word, clamping the charge
    pub fn new(row: u8, dilogic: u8, address: u8, charge: u32) -> Self {
        Self(
            (clamp_charge(charge) as u32 & pad::CHARGE_MASK)
                | ((address as u32 & pad::ADDRESS_MASK) << pad::ADDRESS_SHIFT)
                | ((dilogic as u32 & constants::DILOGIC_MASK) << constants::DILOGIC_SHIFT)
                | ((row as u32 & constants::ROW_MASK) << constants::ROW_SHIFT),
        )
    }

    /// The zero-check bit must be clear on a data word
    pub fn is_valid(&self) -> bool {
        (self.0 >> pad::ZERO_SHIFT) & 1 == 0
    }

    /// Raw 12-bit charge field
    pub fn raw_charge(&self) -> u16 {
        (self.0 & pad::CHARGE_MASK) as u16
    }

    /// Charge clamped to the ADC range
    pub fn charge(&self) -> u16 {
        clamp_charge(self.raw_charge() as u32)
    }

    pub fn address(&self) -> u8 {
        ((self.0 >> pad::ADDRESS_SHIFT) & pad::ADDRESS_MASK) as u8
    }

    pub fn dilogic(&self) -> u8 {
        ((self.0 >> constants::DILOGIC_SHIFT) & constants::DILOGIC_MASK) as u8
    }

    pub fn row(&self) -> u8 {
        ((self.0 >> constants::ROW_SHIFT) & constants::ROW_MASK) as u8
    }

    /// Hardware address embedded in the word
    pub fn hw_address(&self, readout_unit: u16) -> HwAddress {
        HwAddress::new(readout_unit, self.row(), self.dilogic(), self.address())
    }
}
