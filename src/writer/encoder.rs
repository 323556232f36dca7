//! Payload encoder: digits to framed payload words
//!
//! The inverse of [`crate::reader::decoder::PayloadDecoder`]. Every row and
//! every dilogic of a readout unit is emitted, empty dilogics included, and
//! a segment marker groups each run of 8 rows (the last may be shorter).
//!
//! ```text
//! Forward : [SEG][ROW][EoE][pad..]..[EoE][pad..][ROW]...      read first to last
//! Backward: [ROW][pad..][EoE]..[pad..][EoE][ROW]...[SEG]      read last to first
//! ```
//!
//! Row markers and forward segment markers are written as placeholders and
//! patched with their word counts once the region is complete. The backward
//! layout is the one produced by the detector raw writer: a segment marker
//! closes every 8th row and counts the words since the previous one, and a
//! row marker holds the number of words after it minus one, the closing
//! segment marker included.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::common::{words_to_bytes, Digit, HwAddress, ScanDirection};
use crate::geometry::{GeometryLayout, GeometryMap, MappingError};
use crate::reader::decoder::words::constants::segment::ROWS_PER_SEGMENT;
use crate::reader::decoder::{EoEWord, PadWord, RowMarker, SegmentMarker};

/// Encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Cannot place digit: {0}")]
    Mapping(#[from] MappingError),

    #[error("{region} of readout unit {readout_unit} row {row} holds {count} words (max {max})")]
    Overflow {
        region: &'static str,
        readout_unit: u16,
        row: u8,
        count: usize,
        max: usize,
    },

    #[error("Digit {abs_id} belongs to readout unit {found}, not {expected}")]
    WrongReadoutUnit {
        abs_id: u32,
        expected: u16,
        found: u16,
    },
}

/// Payload encoder configuration
#[derive(Debug, Clone, Default)]
pub struct EncoderConfig {
    /// Word order of the produced payload
    pub direction: ScanDirection,
}

/// Stateless payload encoder
#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    geometry: Arc<GeometryMap>,
    config: EncoderConfig,
}

impl PayloadEncoder {
    pub fn new(geometry: Arc<GeometryMap>, config: EncoderConfig) -> Self {
        Self { geometry, config }
    }

    pub fn with_defaults(geometry: Arc<GeometryMap>) -> Self {
        Self::new(geometry, EncoderConfig::default())
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode digits into one payload per readout unit of the layout
    pub fn encode(&self, digits: &[Digit]) -> Result<BTreeMap<u16, Vec<u32>>, EncodeError> {
        let layout = self.geometry.layout();
        let mut grouped: BTreeMap<u16, Vec<(HwAddress, u16)>> =
            (0..layout.readout_units).map(|ru| (ru, Vec::new())).collect();

        for digit in digits {
            let hw = self.geometry.abs_to_hw(digit.abs_id)?;
            grouped
                .entry(hw.readout_unit)
                .or_default()
                .push((hw, digit.charge));
        }

        grouped
            .into_iter()
            .map(|(ru, pads)| Ok((ru, self.encode_pads(ru, &pads)?)))
            .collect()
    }

    /// Like [`PayloadEncoder::encode`], one little-endian byte buffer per readout unit
    pub fn encode_bytes(&self, digits: &[Digit]) -> Result<BTreeMap<u16, Vec<u8>>, EncodeError> {
        Ok(self
            .encode(digits)?
            .into_iter()
            .map(|(ru, words)| (ru, words_to_bytes(&words)))
            .collect())
    }

    /// Encode the digits of a single readout unit
    pub fn encode_readout_unit(
        &self,
        readout_unit: u16,
        digits: &[Digit],
    ) -> Result<Vec<u32>, EncodeError> {
        let mut pads = Vec::with_capacity(digits.len());
        for digit in digits {
            let hw = self.geometry.abs_to_hw(digit.abs_id)?;
            if hw.readout_unit != readout_unit {
                return Err(EncodeError::WrongReadoutUnit {
                    abs_id: digit.abs_id,
                    expected: readout_unit,
                    found: hw.readout_unit,
                });
            }
            pads.push((hw, digit.charge));
        }
        self.encode_pads(readout_unit, &pads)
    }

    fn encode_pads(&self, readout_unit: u16, pads: &[(HwAddress, u16)]) -> Result<Vec<u32>, EncodeError> {
        let layout = self.geometry.layout();
        let mut blocks: Vec<Vec<u32>> = vec![Vec::new(); layout.rows as usize * layout.dilogics as usize];
        for (hw, charge) in pads {
            let index = hw.row as usize * layout.dilogics as usize + hw.dilogic as usize;
            blocks[index].push(PadWord::new(hw.row, hw.dilogic, hw.address, *charge as u32).0);
        }

        let words = Frame {
            layout,
            blocks: &blocks,
            readout_unit,
        }
        .build(self.config.direction)?;

        trace!(readout_unit, digits = pads.len(), words = words.len(), "Payload encoded");
        Ok(words)
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

struct Frame<'a> {
    layout: &'a GeometryLayout,
    /// Pad words per (row, dilogic), row-major
    blocks: &'a [Vec<u32>],
    readout_unit: u16,
}

impl Frame<'_> {
    fn build(&self, direction: ScanDirection) -> Result<Vec<u32>, EncodeError> {
        let mut out = Vec::new();
        for first_row in (0..self.layout.rows).step_by(ROWS_PER_SEGMENT as usize) {
            let last_row = first_row.saturating_add(ROWS_PER_SEGMENT).min(self.layout.rows) - 1;
            match direction {
                ScanDirection::Forward => self.forward_segment(&mut out, first_row, last_row)?,
                ScanDirection::Backward => self.backward_segment(&mut out, first_row, last_row)?,
            }
        }
        Ok(out)
    }

    fn forward_segment(&self, out: &mut Vec<u32>, first_row: u8, last_row: u8) -> Result<(), EncodeError> {
        let segment_pos = out.len();
        out.push(0);
        for row in first_row..=last_row {
            let row_pos = out.len();
            out.push(0);
            for dilogic in 0..self.layout.dilogics {
                let pads = self.block(row, dilogic);
                out.push(EoEWord::new(row, dilogic, self.eoe_count(row, pads.len())?).0);
                out.extend_from_slice(pads);
            }
            out[row_pos] = RowMarker::new(self.row_count(row, out.len() - row_pos - 1)?).0;
        }
        out[segment_pos] =
            SegmentMarker::new(first_row, self.segment_count(first_row, out.len() - segment_pos)?).0;
        Ok(())
    }

    fn backward_segment(&self, out: &mut Vec<u32>, first_row: u8, last_row: u8) -> Result<(), EncodeError> {
        let segment_start = out.len();
        for row in first_row..=last_row {
            let row_pos = out.len();
            out.push(0);
            for dilogic in 0..self.layout.dilogics {
                let pads = self.block(row, dilogic);
                out.extend_from_slice(pads);
                out.push(EoEWord::new(row, dilogic, self.eoe_count(row, pads.len())?).0);
            }
            let mut row_words = out.len() - row_pos - 1;
            if row == last_row {
                row_words += 1;
            }
            out[row_pos] = RowMarker::new(self.row_count(row, row_words - 1)?).0;
        }
        let count = self.segment_count(last_row, out.len() - segment_start)?;
        out.push(SegmentMarker::new(last_row, count).0);
        Ok(())
    }

    fn block(&self, row: u8, dilogic: u8) -> &[u32] {
        &self.blocks[row as usize * self.layout.dilogics as usize + dilogic as usize]
    }

    fn overflow(&self, region: &'static str, row: u8, count: usize, max: usize) -> EncodeError {
        EncodeError::Overflow {
            region,
            readout_unit: self.readout_unit,
            row,
            count,
            max,
        }
    }

    fn eoe_count(&self, row: u8, count: usize) -> Result<u8, EncodeError> {
        if count > EoEWord::MAX_NWORDS {
            return Err(self.overflow("Dilogic block", row, count, EoEWord::MAX_NWORDS));
        }
        Ok(count as u8)
    }

    fn row_count(&self, row: u8, count: usize) -> Result<u16, EncodeError> {
        if count > RowMarker::MAX_NWORDS {
            return Err(self.overflow("Row", row, count, RowMarker::MAX_NWORDS));
        }
        Ok(count as u16)
    }

    fn segment_count(&self, row: u8, count: usize) -> Result<u16, EncodeError> {
        if count > SegmentMarker::MAX_NWORDS {
            return Err(self.overflow("Segment", row, count, SegmentMarker::MAX_NWORDS));
        }
        Ok(count as u16)
    }
}
