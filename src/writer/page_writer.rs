//! Raw page writer: framed payloads to paged byte buffers
//!
//! Each trigger is split into pages of a fixed stride. A page carries a
//! header, a chunk of payload words and its own RCU trailer, then zero
//! padding up to the stride. Continuation pages keep the trigger identity
//! and count up `page_counter`; the last page sets the stop bit.

use std::collections::BTreeMap;

use bytes::BufMut;
use thiserror::Error;
use tracing::debug;

use crate::common::CodecResult;
use crate::common::Digit;
use crate::reader::rdh::{PageInfo, RawHeader, RDH_SIZE};
use crate::reader::trailer::RcuTrailer;

use super::encoder::PayloadEncoder;

mod constants {
    /// rcu_id field width in the trailer last word
    pub const RCU_ID_MASK: u16 = 0x1FF;
}

/// Page writer construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageWriterError {
    #[error("Page size {0} cannot hold a header, a trailer and one payload word")]
    InvalidPageSize(usize),

    #[error("RDH version {0} cannot be written (expected 4, 5 or 6)")]
    UnsupportedVersion(u8),
}

/// Page writer configuration
#[derive(Debug, Clone)]
pub struct PageWriterConfig {
    /// Header version to emit (4, 5 or 6)
    pub rdh_version: u8,
    /// Page stride in bytes
    pub page_size: usize,
}

impl Default for PageWriterConfig {
    fn default() -> Self {
        Self {
            rdh_version: 6,
            page_size: 8192,
        }
    }
}

/// Writes triggers as raw pages
#[derive(Debug, Clone)]
pub struct RawPageWriter {
    config: PageWriterConfig,
    /// Per-link packet counter, wraps at 256
    packet_counters: BTreeMap<u16, u8>,
}

impl RawPageWriter {
    pub fn new(config: PageWriterConfig) -> Result<Self, PageWriterError> {
        if !RawHeader::is_supported(config.rdh_version) {
            return Err(PageWriterError::UnsupportedVersion(config.rdh_version));
        }
        let min_size = RDH_SIZE + 4 * (RcuTrailer::encoded_size() + 1);
        if config.page_size < min_size
            || config.page_size % 4 != 0
            || config.page_size > u16::MAX as usize
        {
            return Err(PageWriterError::InvalidPageSize(config.page_size));
        }
        Ok(Self {
            config,
            packet_counters: BTreeMap::new(),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: PageWriterConfig::default(),
            packet_counters: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &PageWriterConfig {
        &self.config
    }

    /// Payload words that fit on one page next to the header and trailer
    pub fn words_per_page(&self) -> usize {
        (self.config.page_size - RDH_SIZE) / 4 - RcuTrailer::encoded_size()
    }

    fn next_packet_counter(&mut self, fee_id: u16) -> u8 {
        let counter = self.packet_counters.entry(fee_id).or_insert(0);
        let current = *counter;
        *counter = counter.wrapping_add(1);
        current
    }

    /// Append one trigger of `fee_id` to `out`; returns the number of pages
    ///
    /// An empty payload still produces one page holding only the trailer.
    pub fn write_trigger(
        &mut self,
        out: &mut Vec<u8>,
        fee_id: u16,
        bc: u16,
        orbit: u32,
        payload: &[u32],
    ) -> CodecResult<usize> {
        let per_page = self.words_per_page();
        let chunks: Vec<&[u32]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(per_page).collect()
        };
        let n_pages = chunks.len();
        let rcu_id = fee_id & constants::RCU_ID_MASK;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let used_words = chunk.len() + RcuTrailer::encoded_size();
            let info = PageInfo {
                fee_id,
                trigger_bc: bc,
                trigger_orbit: orbit,
                offset_to_next: self.config.page_size as u16,
                memory_size: (RDH_SIZE + 4 * used_words) as u16,
                page_counter: index as u16,
                packet_counter: self.next_packet_counter(fee_id),
                stop: index + 1 == n_pages,
                ..Default::default()
            };
            let header = RawHeader::from_info(self.config.rdh_version, &info)?;

            out.reserve(self.config.page_size);
            header.write(out);
            for &word in chunk {
                out.put_u32_le(word);
            }
            for word in RcuTrailer::new(chunk.len() as u32, rcu_id).encode() {
                out.put_u32_le(word);
            }
            out.put_bytes(0, self.config.page_size - RDH_SIZE - 4 * used_words);
        }

        debug!(
            fee_id,
            bc,
            orbit,
            words = payload.len(),
            pages = n_pages,
            "Trigger written"
        );
        Ok(n_pages)
    }

    /// Append a header-only filler page
    pub fn write_filler_page(
        &mut self,
        out: &mut Vec<u8>,
        fee_id: u16,
        bc: u16,
        orbit: u32,
    ) -> CodecResult<()> {
        let info = PageInfo {
            fee_id,
            trigger_bc: bc,
            trigger_orbit: orbit,
            offset_to_next: RDH_SIZE as u16,
            memory_size: RDH_SIZE as u16,
            stop: true,
            ..Default::default()
        };
        RawHeader::from_info(self.config.rdh_version, &info)?.write(out);
        Ok(())
    }

    /// Encode `digits` and append one trigger per readout unit
    pub fn write_digits(
        &mut self,
        out: &mut Vec<u8>,
        encoder: &PayloadEncoder,
        digits: &[Digit],
        bc: u16,
        orbit: u32,
    ) -> CodecResult<usize> {
        let payloads = encoder.encode(digits)?;
        let mut pages = 0;
        for (readout_unit, words) in &payloads {
            pages += self.write_trigger(out, *readout_unit, bc, orbit, words)?;
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read_page, RawReaderMemory};

    fn small_writer(version: u8) -> RawPageWriter {
        RawPageWriter::new(PageWriterConfig {
            rdh_version: version,
            page_size: 256,
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_page_sizes() {
        for size in [0, 64, 100, 258, 70000] {
            let config = PageWriterConfig {
                rdh_version: 6,
                page_size: size,
            };
            assert!(
                matches!(RawPageWriter::new(config), Err(PageWriterError::InvalidPageSize(s)) if s == size),
                "size {}",
                size
            );
        }
        // Header, trailer and one word
        assert!(RawPageWriter::new(PageWriterConfig {
            rdh_version: 6,
            page_size: 104,
        })
        .is_ok());
    }

    #[test]
    fn test_words_per_page() {
        assert_eq!(small_writer(6).words_per_page(), 39);
        assert_eq!(RawPageWriter::with_defaults().words_per_page(), 2023);
    }

    #[test]
    fn test_single_page() {
        let mut writer = small_writer(6);
        let mut out = Vec::new();
        let pages = writer.write_trigger(&mut out, 2, 100, 7, &[1, 2, 3]).unwrap();
        assert_eq!(pages, 1);
        assert_eq!(out.len(), 256);

        let page = read_page(&out, 0).unwrap();
        assert_eq!(page.payload, vec![1, 2, 3]);
        assert_eq!(page.trailer.payload_size, 3);
        assert_eq!(page.trailer.rcu_id, 2);
        assert_eq!(page.header.fee_id(), 2);
        assert_eq!(page.header.memory_size(), 64 + 4 * 12);
        assert_eq!(page.header.offset_to_next(), 256);
        assert!(page.header.stop());
        assert_eq!(page.next_position, 256);
    }

    #[test]
    fn test_multi_page_split() {
        let mut writer = small_writer(5);
        let payload: Vec<u32> = (0..100).collect();
        let mut out = Vec::new();
        let pages = writer.write_trigger(&mut out, 1, 5, 9, &payload).unwrap();
        // 39 + 39 + 22
        assert_eq!(pages, 3);
        assert_eq!(out.len(), 3 * 256);

        let first = read_page(&out, 0).unwrap();
        let last = read_page(&out, 512).unwrap();
        assert_eq!(first.header.page_counter(), 0);
        assert!(!first.header.stop());
        assert_eq!(last.header.page_counter(), 2);
        assert!(last.header.stop());
        assert_eq!(last.payload.len(), 22);
        assert_eq!(first.header.packet_counter(), 0);
        assert_eq!(last.header.packet_counter(), 2);

        let mut reader = RawReaderMemory::new(&out);
        let trigger = reader.next_trigger().unwrap();
        assert_eq!(trigger.words, payload);
        assert_eq!(trigger.page_count, 3);
        assert_eq!(trigger.trailer.payload_size, 100);
    }

    #[test]
    fn test_empty_payload_writes_one_page() {
        let mut writer = small_writer(4);
        let mut out = Vec::new();
        assert_eq!(writer.write_trigger(&mut out, 0, 1, 1, &[]).unwrap(), 1);
        let page = read_page(&out, 0).unwrap();
        assert!(page.payload.is_empty());
        assert_eq!(page.trailer.payload_size, 0);
    }

    #[test]
    fn test_filler_page_is_skipped() {
        let mut writer = small_writer(6);
        let mut out = Vec::new();
        writer.write_filler_page(&mut out, 0, 1, 1).unwrap();
        assert_eq!(out.len(), 64);
        writer.write_trigger(&mut out, 0, 1, 1, &[42]).unwrap();

        let page = read_page(&out, 0).unwrap();
        assert_eq!(page.position, 64);
        assert_eq!(page.payload, vec![42]);
    }

    #[test]
    fn test_packet_counter_per_link() {
        let mut writer = small_writer(6);
        let mut out = Vec::new();
        writer.write_trigger(&mut out, 0, 1, 1, &[]).unwrap();
        writer.write_trigger(&mut out, 1, 1, 1, &[]).unwrap();
        writer.write_trigger(&mut out, 0, 2, 1, &[]).unwrap();
        assert_eq!(read_page(&out, 0).unwrap().header.packet_counter(), 0);
        assert_eq!(read_page(&out, 256).unwrap().header.packet_counter(), 0);
        assert_eq!(read_page(&out, 512).unwrap().header.packet_counter(), 1);
    }

    #[test]
    fn test_unsupported_version() {
        for version in [0, 3, 7] {
            let config = PageWriterConfig {
                rdh_version: version,
                page_size: 256,
            };
            assert_eq!(
                RawPageWriter::new(config).unwrap_err(),
                PageWriterError::UnsupportedVersion(version)
            );
        }
        for version in [4, 5, 6] {
            assert_eq!(small_writer(version).config().rdh_version, version);
        }
    }
}
