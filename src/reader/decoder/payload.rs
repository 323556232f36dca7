//! Payload decoder for CPV readout units
//!
//! Decodes the frame words of one logical payload into digits.
//!
//! # Data Format
//!
//! A payload is a sequence of counted regions nested three deep:
//! Segment (up to 8 rows) → Row → End-of-Event block (one dilogic) → pad words.
//!
//! `Forward` payloads open every region with its marker and are read from
//! the first word. Segment, row and EoE counts bound their regions.
//!
//! `Backward` payloads are read from the last word. Each segment is closed
//! by its marker, which carries the last row of the segment, and each
//! dilogic block is closed by its EoE word, so both are met before their
//! contents. Rows are not counted: a row ends after one EoE block per
//! dilogic, where its row marker is expected, and the row index then
//! decreases.
//!
//! Framing violations never abort the scan. They are recorded as
//! [`ErrorRecord`]s and the offending word is reparsed as a pad word.

use std::sync::Arc;

use tracing::{debug, trace};

use super::words::{PadWord, RawWord};
use crate::common::{DecodedPayload, Digit, ErrorKind, ErrorRecord, ScanDirection};
use crate::geometry::GeometryMap;
use crate::reader::LogicalPayload;

// ---------------------------------------------------------------------------
// Configuration & Decoder
// ---------------------------------------------------------------------------

/// Payload decoder configuration
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Word order of the payload
    pub direction: ScanDirection,
    /// Enable debug dump output
    pub dump_enabled: bool,
}

/// Stateless payload decoder; every call returns a fresh result
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    geometry: Arc<GeometryMap>,
    config: DecoderConfig,
}

impl PayloadDecoder {
    /// Create a new decoder with given configuration
    pub fn new(geometry: Arc<GeometryMap>, config: DecoderConfig) -> Self {
        Self { geometry, config }
    }

    /// Create a forward decoder with dump disabled
    pub fn with_defaults(geometry: Arc<GeometryMap>) -> Self {
        Self::new(geometry, DecoderConfig::default())
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn geometry(&self) -> &Arc<GeometryMap> {
        &self.geometry
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Decode a reassembled trigger; the readout unit is the page `fee_id`
    pub fn decode(&self, payload: &LogicalPayload) -> DecodedPayload {
        self.decode_words(payload.header.fee_id(), &payload.words)
    }

    /// Decode raw frame words of one readout unit
    pub fn decode_words(&self, readout_unit: u16, words: &[u32]) -> DecodedPayload {
        if self.config.dump_enabled {
            dump_words(readout_unit, words, 32);
        }

        if words.is_empty() {
            debug!(readout_unit, "Empty payload");
            let mut result = DecodedPayload::new();
            result
                .errors
                .push(ErrorRecord::new(readout_unit, 0, 0, 0, ErrorKind::NoPayload));
            return result;
        }

        let result = Scan::new(self, readout_unit, words).run();

        if self.config.dump_enabled {
            println!(
                "[CPV] ru={} decoded {} digits, {} errors",
                readout_unit,
                result.digits.len(),
                result.errors.len()
            );
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Scan state
// ---------------------------------------------------------------------------

/// One pass over a payload in the configured direction
struct Scan<'a> {
    words: &'a [u32],
    consumed: usize,
    direction: ScanDirection,
    readout_unit: u16,
    n_dilogics: u8,
    geometry: &'a GeometryMap,
    out: DecodedPayload,
}

impl<'a> Scan<'a> {
    fn new(decoder: &'a PayloadDecoder, readout_unit: u16, words: &'a [u32]) -> Self {
        Self {
            words,
            consumed: 0,
            direction: decoder.config.direction,
            readout_unit,
            n_dilogics: decoder.geometry.layout().dilogics,
            geometry: &decoder.geometry,
            out: DecodedPayload::new(),
        }
    }

    fn remaining(&self) -> usize {
        self.words.len() - self.consumed
    }

    fn next_word(&mut self) -> Option<RawWord> {
        if self.consumed >= self.words.len() {
            return None;
        }
        let index = match self.direction {
            ScanDirection::Forward => self.consumed,
            ScanDirection::Backward => self.words.len() - 1 - self.consumed,
        };
        self.consumed += 1;
        Some(RawWord(self.words[index]))
    }

    fn record(&mut self, row: u8, dilogic: u8, address: u8, kind: ErrorKind) {
        debug!(
            readout_unit = self.readout_unit,
            row,
            dilogic,
            address,
            kind = %kind,
            "Framing error"
        );
        self.out.errors.push(ErrorRecord::new(
            self.readout_unit,
            row,
            dilogic,
            address,
            kind,
        ));
    }

    /// Limit a declared word count to what the enclosing region still holds
    fn clip(&mut self, declared: usize, available: usize, row: u8, dilogic: u8, kind: ErrorKind) -> usize {
        if declared > available {
            trace!(declared, available, "Region overruns its parent");
            self.record(row, dilogic, 0, kind);
            available
        } else {
            declared
        }
    }

    fn run(mut self) -> DecodedPayload {
        match self.direction {
            ScanDirection::Forward => self.scan_forward(),
            ScanDirection::Backward => self.scan_backward(),
        }
        self.out
    }

    fn scan_forward(&mut self) {
        let mut row: u8 = 0;

        while let Some(word) = self.next_word() {
            let segment = word.as_segment();
            if !segment.is_valid() {
                self.record(row, 0, 0, ErrorKind::SegmentHeaderError);
                self.fallback(word);
                continue;
            }

            row = segment.row();
            let declared = (segment.nwords() as usize).saturating_sub(1);
            let available = self.remaining();
            let mut segment_left =
                self.clip(declared, available, row, 0, ErrorKind::SegmentHeaderError);

            while segment_left > 0 {
                let Some(word) = self.next_word() else { break };
                segment_left -= 1;

                let marker = word.as_row();
                if !marker.is_valid() {
                    self.record(row, 0, 0, ErrorKind::RowHeaderError);
                    self.fallback(word);
                    continue;
                }

                let row_left =
                    self.clip(marker.nwords() as usize, segment_left, row, 0, ErrorKind::RowHeaderError);
                segment_left -= row_left;
                self.scan_row(row, row_left);
                row = row.wrapping_add(1);
            }
        }
    }

    fn scan_backward(&mut self) {
        let mut row: u8 = 0;

        while let Some(word) = self.next_word() {
            let segment = word.as_segment();
            if !segment.is_valid() {
                self.record(row, 0, 0, ErrorKind::SegmentHeaderError);
                self.fallback(word);
                continue;
            }

            // The closing marker does not count itself
            row = segment.row();
            let available = self.remaining();
            let mut segment_left = self.clip(
                segment.nwords() as usize,
                available,
                row,
                0,
                ErrorKind::SegmentHeaderError,
            );
            let mut blocks: u8 = 0;

            while segment_left > 0 {
                let Some(word) = self.next_word() else { break };
                segment_left -= 1;

                if blocks == self.n_dilogics {
                    if !word.as_row().is_valid() {
                        self.record(row, 0, 0, ErrorKind::RowHeaderError);
                        self.fallback(word);
                    }
                    blocks = 0;
                    row = row.wrapping_sub(1);
                    continue;
                }

                let eoe = word.as_eoe();
                if !eoe.is_valid() {
                    // A row marker met early closes a row with missing blocks
                    if word.as_row().is_valid() {
                        blocks = 0;
                        row = row.wrapping_sub(1);
                        continue;
                    }
                    self.record(row, eoe.dilogic(), 0, ErrorKind::EoEHeaderError);
                    self.fallback(word);
                    continue;
                }
                if eoe.row() != row || eoe.dilogic() >= self.n_dilogics {
                    self.record(eoe.row(), eoe.dilogic(), 0, ErrorKind::EoEHeaderError);
                    self.fallback(word);
                    continue;
                }

                let dilogic = eoe.dilogic();
                let pads_left = self.clip(
                    eoe.nwords() as usize,
                    segment_left,
                    row,
                    dilogic,
                    ErrorKind::EoEHeaderError,
                );
                segment_left -= pads_left;
                for _ in 0..pads_left {
                    let Some(word) = self.next_word() else { return };
                    self.pad(word.as_pad(), row, dilogic);
                }
                blocks += 1;
            }
        }
    }

    fn scan_row(&mut self, row: u8, mut row_left: usize) {
        while row_left > 0 {
            let Some(word) = self.next_word() else { return };
            row_left -= 1;

            let eoe = word.as_eoe();
            if !eoe.is_valid() {
                self.record(row, eoe.dilogic(), 0, ErrorKind::EoEHeaderError);
                self.fallback(word);
                continue;
            }
            if eoe.row() != row || eoe.dilogic() >= self.n_dilogics {
                self.record(eoe.row(), eoe.dilogic(), 0, ErrorKind::EoEHeaderError);
                self.fallback(word);
                continue;
            }

            let dilogic = eoe.dilogic();
            let pads_left =
                self.clip(eoe.nwords() as usize, row_left, row, dilogic, ErrorKind::EoEHeaderError);
            row_left -= pads_left;
            for _ in 0..pads_left {
                let Some(word) = self.next_word() else { return };
                self.pad(word.as_pad(), row, dilogic);
            }
        }
    }

    fn pad(&mut self, pad: PadWord, row: u8, dilogic: u8) {
        if !pad.is_valid() {
            self.record(pad.row(), pad.dilogic(), pad.address(), ErrorKind::PadError);
            return;
        }
        if pad.row() != row || pad.dilogic() != dilogic {
            self.record(pad.row(), pad.dilogic(), pad.address(), ErrorKind::PadAddressError);
        }
        self.translate(pad);
    }

    /// Reparse a rejected marker as pad data
    fn fallback(&mut self, word: RawWord) {
        let pad = word.as_pad();
        if pad.is_valid() {
            self.translate(pad);
        }
    }

    fn translate(&mut self, pad: PadWord) {
        let hw = pad.hw_address(self.readout_unit);
        match self.geometry.hw_to_abs(hw) {
            Ok(abs_id) => self.out.digits.push(Digit {
                abs_id,
                charge: pad.charge(),
            }),
            Err(_) => self.record(hw.row, hw.dilogic, hw.address, ErrorKind::MappingError),
        }
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Print the first `limit` words with their likely interpretation
pub fn dump_words(readout_unit: u16, words: &[u32], limit: usize) {
    println!("[CPV] ru={} payload: {} words", readout_unit, words.len());
    for (i, w) in words.iter().take(limit).enumerate() {
        println!("[CPV]   {:5}: 0x{:08x} {}", i, w, RawWord(*w).classify());
    }
    if words.len() > limit {
        println!("[CPV]   ... {} more", words.len() - limit);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{HwAddress, MAX_CHARGE};
    use crate::reader::decoder::words::{EoEWord, RowMarker, SegmentMarker};

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn geometry() -> Arc<GeometryMap> {
        Arc::new(GeometryMap::with_defaults())
    }

    fn forward() -> PayloadDecoder {
        PayloadDecoder::with_defaults(geometry())
    }

    fn backward() -> PayloadDecoder {
        PayloadDecoder::new(
            geometry(),
            DecoderConfig {
                direction: ScanDirection::Backward,
                dump_enabled: false,
            },
        )
    }

    fn abs(ru: u16, row: u8, dilogic: u8, address: u8) -> u32 {
        GeometryMap::with_defaults()
            .hw_to_abs(HwAddress::new(ru, row, dilogic, address))
            .unwrap()
    }

    /// Forward segment with a single row holding the given dilogic blocks
    fn one_row_segment(row: u8, blocks: &[(u8, Vec<u32>)]) -> Vec<u32> {
        let mut row_words = Vec::new();
        for (dilogic, pads) in blocks {
            row_words.push(EoEWord::new(row, *dilogic, pads.len() as u8).0);
            row_words.extend(pads);
        }
        let mut words = vec![
            SegmentMarker::new(row, (row_words.len() + 2) as u16).0,
            RowMarker::new(row_words.len() as u16).0,
        ];
        words.extend(row_words);
        words
    }

    /// One row in stored order for backward reading: row marker, then the
    /// pads and EoE of every dilogic, empty ones included
    fn backward_row(row: u8, blocks: &[(u8, Vec<u32>)]) -> Vec<u32> {
        let mut words = vec![0];
        for dilogic in 0..10u8 {
            let pads: &[u32] = blocks
                .iter()
                .find(|(d, _)| *d == dilogic)
                .map(|(_, p)| p.as_slice())
                .unwrap_or(&[]);
            words.extend_from_slice(pads);
            words.push(EoEWord::new(row, dilogic, pads.len() as u8).0);
        }
        words[0] = RowMarker::new((words.len() - 2) as u16).0;
        words
    }

    /// Rows followed by the segment marker that closes them
    fn backward_segment(last_row: u8, rows: &[Vec<u32>]) -> Vec<u32> {
        let mut words = rows.concat();
        words.push(SegmentMarker::new(last_row, words.len() as u16).0);
        words
    }

    // -----------------------------------------------------------------------
    // Basic decoding
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_payload() {
        let result = forward().decode_words(1, &[]);
        assert!(result.digits.is_empty());
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(1, 0, 0, 0, ErrorKind::NoPayload)]
        );
    }

    #[test]
    fn test_two_pads_second_clamped() {
        let words = one_row_segment(
            2,
            &[(
                3,
                vec![PadWord::new(2, 3, 5, 100).0, PadWord(2200 | (7 << 12) | (3 << 18) | (2 << 22)).0],
            )],
        );
        let result = forward().decode_words(0, &words);
        assert!(result.is_clean(), "errors: {:?}", result.errors);
        assert_eq!(
            result.digits,
            vec![
                Digit { abs_id: abs(0, 2, 3, 5), charge: 100 },
                Digit { abs_id: abs(0, 2, 3, 7), charge: MAX_CHARGE },
            ]
        );
    }

    #[test]
    fn test_readout_unit_offsets_ids() {
        let words = one_row_segment(0, &[(0, vec![PadWord::new(0, 0, 0, 10).0])]);
        let result = forward().decode_words(2, &words);
        assert_eq!(result.digits, vec![Digit { abs_id: 2 * 7680, charge: 10 }]);
    }

    #[test]
    fn test_multiple_rows_in_segment() {
        // rows 4 and 5 in one segment
        let r4 = [EoEWord::new(4, 0, 1).0, PadWord::new(4, 0, 1, 11).0];
        let r5 = [EoEWord::new(5, 9, 1).0, PadWord::new(5, 9, 2, 22).0];
        let mut words = vec![SegmentMarker::new(4, 7).0, RowMarker::new(2).0];
        words.extend(r4);
        words.push(RowMarker::new(2).0);
        words.extend(r5);

        let result = forward().decode_words(0, &words);
        assert!(result.is_clean(), "errors: {:?}", result.errors);
        assert_eq!(
            result.digits,
            vec![
                Digit { abs_id: abs(0, 4, 0, 1), charge: 11 },
                Digit { abs_id: abs(0, 5, 9, 2), charge: 22 },
            ]
        );
    }

    #[test]
    fn test_duplicates_retained_in_order() {
        let pad = PadWord::new(1, 1, 1, 50).0;
        let pileup = PadWord::new(1, 1, 1, 60).0;
        let words = one_row_segment(1, &[(1, vec![pad, pileup])]);
        let result = forward().decode_words(0, &words);
        let id = abs(0, 1, 1, 1);
        assert_eq!(
            result.digits,
            vec![Digit { abs_id: id, charge: 50 }, Digit { abs_id: id, charge: 60 }]
        );
    }

    #[test]
    fn test_backward_scan() {
        let pads = vec![PadWord::new(3, 2, 1, 30).0, PadWord::new(3, 2, 4, 40).0];
        let words = backward_segment(3, &[backward_row(3, &[(2, pads)])]);
        assert_eq!(words.len(), 14);

        let result = backward().decode_words(1, &words);
        assert!(result.is_clean(), "errors: {:?}", result.errors);
        assert_eq!(
            result.digits,
            vec![
                Digit { abs_id: abs(1, 3, 2, 4), charge: 40 },
                Digit { abs_id: abs(1, 3, 2, 1), charge: 30 },
            ]
        );
    }

    #[test]
    fn test_backward_rows_decrement() {
        let words = backward_segment(
            7,
            &[
                backward_row(6, &[(9, vec![PadWord::new(6, 9, 3, 60).0])]),
                backward_row(7, &[(0, vec![PadWord::new(7, 0, 0, 70).0])]),
            ],
        );
        let result = backward().decode_words(0, &words);
        assert!(result.is_clean(), "errors: {:?}", result.errors);
        assert_eq!(
            result.digits,
            vec![
                Digit { abs_id: abs(0, 7, 0, 0), charge: 70 },
                Digit { abs_id: abs(0, 6, 9, 3), charge: 60 },
            ]
        );
    }

    #[test]
    fn test_backward_two_segments() {
        let mut words = backward_segment(0, &[backward_row(0, &[(4, vec![PadWord::new(0, 4, 1, 1).0])])]);
        words.extend(backward_segment(
            8,
            &[backward_row(8, &[(5, vec![PadWord::new(8, 5, 2, 2).0])])],
        ));
        let result = backward().decode_words(0, &words);
        assert!(result.is_clean(), "errors: {:?}", result.errors);
        assert_eq!(
            result.digits,
            vec![
                Digit { abs_id: abs(0, 8, 5, 2), charge: 2 },
                Digit { abs_id: abs(0, 0, 4, 1), charge: 1 },
            ]
        );
    }

    // -----------------------------------------------------------------------
    // Recovery policy
    // -----------------------------------------------------------------------

    #[test]
    fn test_bad_row_marker_reinterpreted() {
        // The row-marker slot holds a pad word: one RowHeaderError, one extra digit
        let stray = PadWord::new(0, 4, 4, 99).0;
        let mut words = vec![SegmentMarker::new(0, 5).0, stray, RowMarker::new(2).0];
        words.push(EoEWord::new(0, 1, 1).0);
        words.push(PadWord::new(0, 1, 0, 10).0);

        let result = forward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 0, 0, ErrorKind::RowHeaderError)]
        );
        assert_eq!(
            result.digits,
            vec![
                Digit { abs_id: abs(0, 0, 4, 4), charge: 99 },
                Digit { abs_id: abs(0, 0, 1, 0), charge: 10 },
            ]
        );
    }

    #[test]
    fn test_bad_row_marker_failing_zero_check_dropped() {
        let stray = 0x0800_0000 | PadWord::new(0, 4, 4, 99).0;
        let words = vec![SegmentMarker::new(0, 2).0, stray | (1 << 30)];
        let result = forward().decode_words(0, &words);
        assert_eq!(result.count(ErrorKind::RowHeaderError), 1);
        assert!(result.digits.is_empty());
    }

    #[test]
    fn test_bad_segment_marker_reinterpreted() {
        let words = vec![PadWord::new(1, 2, 3, 44).0];
        let result = forward().decode_words(0, &words);
        assert_eq!(result.count(ErrorKind::SegmentHeaderError), 1);
        assert_eq!(result.digits, vec![Digit { abs_id: abs(0, 1, 2, 3), charge: 44 }]);
    }

    #[test]
    fn test_eoe_check_bit_unset() {
        // EoE slot holds a pad word; its count of 0 means the real pad is next EoE slot
        let mut words = vec![SegmentMarker::new(0, 4).0, RowMarker::new(2).0];
        words.push(PadWord::new(0, 5, 6, 12).0);
        words.push(EoEWord::new(0, 5, 0).0);
        let result = forward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 5, 0, ErrorKind::EoEHeaderError)]
        );
        assert_eq!(result.digits, vec![Digit { abs_id: abs(0, 0, 5, 6), charge: 12 }]);
    }

    #[test]
    fn test_eoe_row_mismatch() {
        // row 3 holds an EoE stamped with row 4
        let words = vec![
            SegmentMarker::new(3, 3).0,
            RowMarker::new(1).0,
            EoEWord::new(4, 1, 0).0,
        ];
        let result = forward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 4, 1, 0, ErrorKind::EoEHeaderError)]
        );
        // EoE words fail the zero check and are dropped
        assert!(result.digits.is_empty());
    }

    #[test]
    fn test_eoe_dilogic_out_of_range() {
        let words = vec![
            SegmentMarker::new(0, 3).0,
            RowMarker::new(1).0,
            EoEWord::new(0, 12, 0).0,
        ];
        let result = forward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 12, 0, ErrorKind::EoEHeaderError)]
        );
    }

    #[test]
    fn test_pad_zero_bit_skipped() {
        let bad = PadWord::new(0, 0, 2, 5).0 | (1 << 27) | (1 << 29);
        let words = one_row_segment(0, &[(0, vec![bad, PadWord::new(0, 0, 3, 6).0])]);
        let result = forward().decode_words(0, &words);
        assert_eq!(result.count(ErrorKind::PadError), 1);
        assert_eq!(result.errors[0].address, 2);
        assert_eq!(result.digits, vec![Digit { abs_id: abs(0, 0, 0, 3), charge: 6 }]);
    }

    #[test]
    fn test_pad_address_mismatch_kept() {
        let foreign = PadWord::new(1, 4, 2, 77).0;
        let words = one_row_segment(0, &[(0, vec![foreign])]);
        let result = forward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 1, 4, 2, ErrorKind::PadAddressError)]
        );
        assert_eq!(result.digits, vec![Digit { abs_id: abs(0, 1, 4, 2), charge: 77 }]);
    }

    #[test]
    fn test_mapping_error() {
        // address 50 is not a pad of a 48-pad dilogic
        let words = one_row_segment(0, &[(0, vec![PadWord::new(0, 0, 50, 1).0])]);
        let result = forward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 0, 50, ErrorKind::MappingError)]
        );
        assert!(result.digits.is_empty());

        // readout unit outside the layout
        let words = one_row_segment(0, &[(0, vec![PadWord::new(0, 0, 1, 1).0])]);
        let result = forward().decode_words(7, &words);
        assert_eq!(result.count(ErrorKind::MappingError), 1);
    }

    #[test]
    fn test_backward_bad_row_marker_reinterpreted() {
        // The row-marker slot holds a pad word: one RowHeaderError, one extra digit
        let mut row = backward_row(0, &[(1, vec![PadWord::new(0, 1, 0, 10).0])]);
        row[0] = PadWord::new(0, 4, 4, 99).0;
        let words = backward_segment(0, &[row]);

        let result = backward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 0, 0, ErrorKind::RowHeaderError)]
        );
        assert_eq!(
            result.digits,
            vec![
                Digit { abs_id: abs(0, 0, 1, 0), charge: 10 },
                Digit { abs_id: abs(0, 0, 4, 4), charge: 99 },
            ]
        );
    }

    #[test]
    fn test_backward_bad_segment_marker_reinterpreted() {
        let words = vec![PadWord::new(1, 2, 3, 44).0];
        let result = backward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 0, 0, ErrorKind::SegmentHeaderError)]
        );
        assert_eq!(result.digits, vec![Digit { abs_id: abs(0, 1, 2, 3), charge: 44 }]);
    }

    #[test]
    fn test_backward_eoe_row_mismatch() {
        // Dilogic 9 of row 3 is stamped with row 4; the row marker still closes row 3
        let mut row = backward_row(3, &[]);
        row[10] = EoEWord::new(4, 9, 0).0;
        let mut words = backward_segment(3, &[row]);
        words.splice(0..0, backward_row(2, &[(0, vec![PadWord::new(2, 0, 8, 5).0])]));
        let last = words.len() - 1;
        words[last] = SegmentMarker::new(3, last as u16).0;

        let result = backward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 4, 9, 0, ErrorKind::EoEHeaderError)]
        );
        assert_eq!(result.digits, vec![Digit { abs_id: abs(0, 2, 0, 8), charge: 5 }]);
    }

    #[test]
    fn test_backward_eoe_check_bit_unset() {
        // An empty block whose EoE lost its check bit reads as a pad
        let mut row = backward_row(5, &[]);
        row[1] = EoEWord::new(5, 0, 0).0 & !(1 << 27);
        let words = backward_segment(5, &[row]);

        let result = backward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 5, 0, 0, ErrorKind::EoEHeaderError)]
        );
        assert_eq!(result.digits, vec![Digit { abs_id: abs(0, 5, 0, 0), charge: 0 }]);
    }

    // -----------------------------------------------------------------------
    // Counted regions
    // -----------------------------------------------------------------------

    #[test]
    fn test_truncated_segment() {
        let mut words = one_row_segment(0, &[(0, vec![PadWord::new(0, 0, 0, 1).0; 3])]);
        words.truncate(4);
        let result = forward().decode_words(0, &words);
        assert!(result.count(ErrorKind::SegmentHeaderError) >= 1);
        assert!(result.count(ErrorKind::RowHeaderError) >= 1);
        assert!(result.count(ErrorKind::EoEHeaderError) >= 1);
        assert_eq!(result.digits.len(), 1);
    }

    #[test]
    fn test_eoe_count_clipped_to_row() {
        // EoE claims 5 pads but the row only has 2 words after it
        let words = vec![
            SegmentMarker::new(0, 5).0,
            RowMarker::new(3).0,
            EoEWord::new(0, 0, 5).0,
            PadWord::new(0, 0, 0, 1).0,
            PadWord::new(0, 0, 1, 2).0,
        ];
        let result = forward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 0, 0, ErrorKind::EoEHeaderError)]
        );
        assert_eq!(result.digits.len(), 2);
    }

    #[test]
    fn test_backward_truncated_segment() {
        // Leading row marker and first pad lost: the segment and EoE counts overrun
        let mut words = backward_segment(0, &[backward_row(0, &[(0, vec![PadWord::new(0, 0, 0, 1).0; 3])])]);
        words.drain(..2);

        let result = backward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![
                ErrorRecord::new(0, 0, 0, 0, ErrorKind::SegmentHeaderError),
                ErrorRecord::new(0, 0, 0, 0, ErrorKind::EoEHeaderError),
            ]
        );
        assert_eq!(result.digits.len(), 2);
    }

    #[test]
    fn test_backward_eoe_count_clipped_to_segment() {
        // EoE of dilogic 0 claims 5 pads but the segment holds only 2 more words
        let mut words = vec![PadWord::new(0, 0, 0, 1).0, PadWord::new(0, 0, 1, 2).0];
        words.push(EoEWord::new(0, 0, 5).0);
        for dilogic in 1..10 {
            words.push(EoEWord::new(0, dilogic, 0).0);
        }
        words.push(SegmentMarker::new(0, 12).0);

        let result = backward().decode_words(0, &words);
        assert_eq!(
            result.errors,
            vec![ErrorRecord::new(0, 0, 0, 0, ErrorKind::EoEHeaderError)]
        );
        assert_eq!(result.digits.len(), 2);
    }

    #[test]
    fn test_segment_bounds_scan() {
        // Segment declares 2 words; the trailing pad starts a new (bad) segment
        let words = vec![
            SegmentMarker::new(0, 2).0,
            RowMarker::new(0).0,
            PadWord::new(0, 0, 0, 9).0,
        ];
        let result = forward().decode_words(0, &words);
        assert_eq!(result.count(ErrorKind::SegmentHeaderError), 1);
        assert_eq!(result.digits.len(), 1);
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let words: Vec<u32> = (0..200u32).map(|i| i.wrapping_mul(0x9E37_79B9)).collect();
        let a = forward().decode_words(0, &words);
        let b = forward().decode_words(0, &words);
        assert_eq!(a, b);
        let c = backward().decode_words(0, &words);
        let d = backward().decode_words(0, &words);
        assert_eq!(c, d);
    }

    #[test]
    fn test_decoder_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PayloadDecoder>();
    }
}
