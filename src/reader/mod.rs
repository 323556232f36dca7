//! Reader module for raw CPV readout buffers
//!
//! This module provides:
//! - Page header (rdh) and page trailer (trailer) codecs
//! - The page walk over a memory buffer (`read_page`, `RawReaderMemory`)
//! - Payload decoders (decoder)
//!
//! A trigger may span several pages. Continuation pages share the trigger
//! bunch crossing and orbit of the first page and carry a nonzero page
//! counter; their payloads are concatenated into one [`LogicalPayload`].

pub mod decoder;
pub mod rdh;
pub mod trailer;

pub use decoder::{DecoderConfig, PayloadDecoder};
pub use rdh::{HeaderError, PageInfo, RawHeader, RDH_SIZE};
pub use trailer::{RcuTrailer, TrailerError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::common::{bytes_to_words, ErrorKind};

/// Page-level reader errors; each is fatal for the current trigger
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RawReaderError {
    #[error("No page at position {position}")]
    PageNotFound { position: usize },

    #[error("Page header decoding failed at position {position}: {source}")]
    HeaderDecoding { position: usize, source: HeaderError },

    #[error("Page trailer decoding failed at position {position}: {source}")]
    TrailerDecoding { position: usize, source: TrailerError },

    #[error("Page payload decoding failed at position {position}: {reason}")]
    PayloadDecoding { position: usize, reason: String },
}

impl RawReaderError {
    /// Error classification shared with decoder records
    pub fn kind(&self) -> ErrorKind {
        match self {
            RawReaderError::PageNotFound { .. } => ErrorKind::PageNotFound,
            RawReaderError::HeaderDecoding { .. } | RawReaderError::TrailerDecoding { .. } => {
                ErrorKind::HeaderDecoding
            }
            RawReaderError::PayloadDecoding { .. } => ErrorKind::PayloadDecoding,
        }
    }

    pub fn position(&self) -> usize {
        match self {
            RawReaderError::PageNotFound { position }
            | RawReaderError::HeaderDecoding { position, .. }
            | RawReaderError::TrailerDecoding { position, .. }
            | RawReaderError::PayloadDecoding { position, .. } => *position,
        }
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// One decoded page with its trailer stripped from the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub header: RawHeader,
    pub payload: Vec<u32>,
    pub trailer: RcuTrailer,
    /// Byte offset of the header
    pub position: usize,
    /// Byte offset of the following page (position + offset_to_next)
    pub next_position: usize,
}

/// Read the page at `position`, skipping header-only filler pages
pub fn read_page(buffer: &[u8], mut position: usize) -> Result<Page, RawReaderError> {
    loop {
        if position >= buffer.len() {
            return Err(RawReaderError::PageNotFound { position });
        }

        let header = RawHeader::parse(&buffer[position..])
            .map_err(|source| RawReaderError::HeaderDecoding { position, source })?;

        if header.is_filler() {
            debug!(position, "Skipping filler page");
            position += header.header_size() as usize;
            continue;
        }

        let header_size = header.header_size() as usize;
        let memory_size = header.memory_size() as usize;
        let end = position + memory_size;
        if end > buffer.len() {
            return Err(RawReaderError::PayloadDecoding {
                position,
                reason: format!(
                    "memory size {} exceeds remaining {} bytes",
                    memory_size,
                    buffer.len() - position
                ),
            });
        }

        let words = bytes_to_words(&buffer[position + header_size..end]).ok_or_else(|| {
            RawReaderError::PayloadDecoding {
                position,
                reason: format!("{} payload bytes are not word aligned", memory_size - header_size),
            }
        })?;

        let trailer = RcuTrailer::parse(&words)
            .map_err(|source| RawReaderError::TrailerDecoding { position, source })?;

        let payload_len = words.len() - trailer.trailer_size();
        if trailer.payload_size as usize != payload_len {
            warn!(
                position,
                declared = trailer.payload_size,
                found = payload_len,
                "Trailer payload size mismatch"
            );
        }

        let mut payload = words;
        payload.truncate(payload_len);

        return Ok(Page {
            header,
            payload,
            trailer,
            position,
            next_position: position + header.offset_to_next() as usize,
        });
    }
}

// ---------------------------------------------------------------------------
// Logical payload
// ---------------------------------------------------------------------------

/// All pages of one trigger, concatenated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPayload {
    /// Header of the first page
    pub header: RawHeader,
    /// Frame words of all pages, trailers stripped
    pub words: Vec<u32>,
    /// Last page's trailer with the summed payload size
    pub trailer: RcuTrailer,
    pub page_count: usize,
}

impl LogicalPayload {
    pub fn readout_unit(&self) -> u16 {
        self.header.fee_id()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Frame words followed by the combined trailer
    pub fn to_words(&self) -> Vec<u32> {
        let mut out = self.words.clone();
        out.extend(self.trailer.encode());
        out
    }
}

// ---------------------------------------------------------------------------
// Memory reader
// ---------------------------------------------------------------------------

/// Walks a borrowed buffer trigger by trigger
///
/// As an iterator it yields one item per trigger and stops after the first
/// error, since a broken page leaves the following offsets unknown.
#[derive(Debug, Clone)]
pub struct RawReaderMemory<'a> {
    buffer: &'a [u8],
    position: usize,
    failed: bool,
}

impl<'a> RawReaderMemory<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            failed: false,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Restart from the beginning of the buffer
    pub fn rewind(&mut self) {
        self.position = 0;
        self.failed = false;
    }

    /// Read the next trigger, merging its continuation pages
    pub fn next_trigger(&mut self) -> Result<LogicalPayload, RawReaderError> {
        let first = read_page(self.buffer, self.position)?;
        self.position = first.next_position;

        let header = first.header;
        let mut total_payload = first.trailer.payload_size;
        let mut words = first.payload;
        let mut trailer = first.trailer;
        let mut page_count = 1;

        while let Some(next) = self.peek_header() {
            if !next.same_trigger(&header) || next.page_counter() == 0 {
                break;
            }
            let page = read_page(self.buffer, self.position)?;
            self.position = page.next_position;
            total_payload += page.trailer.payload_size;
            words.extend(page.payload);
            trailer = page.trailer;
            page_count += 1;
        }

        trailer.payload_size = total_payload;
        debug!(
            fee_id = header.fee_id(),
            orbit = header.trigger_orbit(),
            bc = header.trigger_bc(),
            pages = page_count,
            words = words.len(),
            "Trigger assembled"
        );

        Ok(LogicalPayload {
            header,
            words,
            trailer,
            page_count,
        })
    }

    /// Header of the next non-filler page, if one can be decoded
    fn peek_header(&self) -> Option<RawHeader> {
        let mut position = self.position;
        while position < self.buffer.len() {
            let header = RawHeader::parse(&self.buffer[position..]).ok()?;
            if !header.is_filler() {
                return Some(header);
            }
            position += header.header_size() as usize;
        }
        None
    }
}

impl Iterator for RawReaderMemory<'_> {
    type Item = Result<LogicalPayload, RawReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.buffer.len() {
            return None;
        }
        match self.next_trigger() {
            Ok(payload) => Some(Ok(payload)),
            // Only filler pages were left
            Err(RawReaderError::PageNotFound { .. }) => {
                self.position = self.buffer.len();
                None
            }
            Err(e) => {
                warn!(position = e.position(), error = %e, "Raw reader stopped");
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::words_to_bytes;

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    const STRIDE: u16 = 256;

    /// Build one page: header, payload words, trailer, zero padding to stride
    fn make_page(bc: u16, orbit: u32, page_counter: u16, payload: &[u32]) -> Vec<u8> {
        make_page_with_trailer(bc, orbit, page_counter, payload, &RcuTrailer::new(payload.len() as u32, 1))
    }

    fn make_page_with_trailer(
        bc: u16,
        orbit: u32,
        page_counter: u16,
        payload: &[u32],
        trailer: &RcuTrailer,
    ) -> Vec<u8> {
        let mut body = payload.to_vec();
        body.extend(trailer.encode());
        let body = words_to_bytes(&body);

        let info = PageInfo {
            fee_id: 1,
            trigger_bc: bc,
            trigger_orbit: orbit,
            offset_to_next: STRIDE,
            memory_size: (RDH_SIZE + body.len()) as u16,
            page_counter,
            ..Default::default()
        };
        let mut page = RawHeader::from_info(6, &info).unwrap().to_bytes();
        page.extend(body);
        page.resize(STRIDE as usize, 0);
        page
    }

    fn make_filler() -> Vec<u8> {
        let info = PageInfo {
            offset_to_next: RDH_SIZE as u16,
            memory_size: RDH_SIZE as u16,
            ..Default::default()
        };
        RawHeader::from_info(6, &info).unwrap().to_bytes()
    }

    // -----------------------------------------------------------------------
    // read_page
    // -----------------------------------------------------------------------

    #[test]
    fn test_read_single_page() {
        let buffer = make_page(10, 20, 0, &[1, 2, 3]);
        let page = read_page(&buffer, 0).unwrap();
        assert_eq!(page.payload, vec![1, 2, 3]);
        assert_eq!(page.trailer.payload_size, 3);
        assert_eq!(page.position, 0);
        assert_eq!(page.next_position, STRIDE as usize);
        assert_eq!(page.header.trigger_bc(), 10);
    }

    #[test]
    fn test_page_not_found() {
        let buffer = make_page(1, 1, 0, &[]);
        assert_eq!(
            read_page(&buffer, buffer.len()),
            Err(RawReaderError::PageNotFound {
                position: buffer.len()
            })
        );
    }

    #[test]
    fn test_filler_page_skipped() {
        let mut buffer = make_filler();
        buffer.extend(make_filler());
        buffer.extend(make_page(1, 1, 0, &[42]));
        let page = read_page(&buffer, 0).unwrap();
        assert_eq!(page.position, 2 * RDH_SIZE);
        assert_eq!(page.payload, vec![42]);
    }

    #[test]
    fn test_unknown_version() {
        let mut buffer = make_page(1, 1, 0, &[42]);
        buffer[0] = 8;
        let err = read_page(&buffer, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HeaderDecoding);
        assert!(matches!(
            err,
            RawReaderError::HeaderDecoding {
                source: HeaderError::UnknownVersion(8),
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_page() {
        let buffer = make_page(1, 1, 0, &[1, 2, 3, 4]);
        let err = read_page(&buffer[..RDH_SIZE + 8], 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadDecoding);
    }

    #[test]
    fn test_bad_trailer() {
        let mut buffer = make_page(1, 1, 0, &[7]);
        // Corrupt the last trailer word
        let last = RDH_SIZE + 4 * 9;
        buffer[last..last + 4].copy_from_slice(&0u32.to_le_bytes());
        let err = read_page(&buffer, 0).unwrap_err();
        assert!(matches!(err, RawReaderError::TrailerDecoding { .. }));
        assert_eq!(err.kind(), ErrorKind::HeaderDecoding);
    }

    // -----------------------------------------------------------------------
    // Trigger reassembly
    // -----------------------------------------------------------------------

    #[test]
    fn test_two_pages_one_trigger() {
        let mut buffer = make_page(5, 100, 0, &[1, 2]);
        buffer.extend(make_page(5, 100, 1, &[3, 4, 5]));

        let mut reader = RawReaderMemory::new(&buffer);
        let payload = reader.next_trigger().unwrap();
        assert_eq!(payload.page_count, 2);
        assert_eq!(payload.words, vec![1, 2, 3, 4, 5]);
        assert_eq!(payload.trailer.payload_size, 5);
        assert_eq!(payload.header.page_counter(), 0);

        let words = payload.to_words();
        assert_eq!(&words[..5], &[1, 2, 3, 4, 5]);
        assert_eq!(RcuTrailer::parse(&words).unwrap().payload_size, 5);

        assert!(reader.next().is_none());
    }

    #[test]
    fn test_short_trailer_survives_reassembly() {
        // Pages closed by a two-word trailer (first and last word only)
        let short = |payload_size: u32| RcuTrailer {
            parameters: Vec::new(),
            ..RcuTrailer::new(payload_size, 1)
        };
        let mut buffer = make_page_with_trailer(5, 100, 0, &[1, 2], &short(2));
        buffer.extend(make_page_with_trailer(5, 100, 1, &[3, 4, 5], &short(3)));

        let payload = RawReaderMemory::new(&buffer).next_trigger().unwrap();
        assert_eq!(payload.words, vec![1, 2, 3, 4, 5]);
        assert_eq!(payload.trailer, short(5));

        let words = payload.to_words();
        assert_eq!(words.len(), 7);
        assert_eq!(&words[5..], short(5).encode().as_slice());
        let reparsed = RcuTrailer::parse(&words).unwrap();
        assert_eq!(reparsed.trailer_size(), 2);
        assert_eq!(reparsed.payload_size, 5);
    }

    #[test]
    fn test_page_counter_zero_starts_new_trigger() {
        let mut buffer = make_page(5, 100, 0, &[1]);
        buffer.extend(make_page(5, 100, 0, &[2]));
        let payloads: Vec<_> = RawReaderMemory::new(&buffer)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].words, vec![1]);
        assert_eq!(payloads[1].words, vec![2]);
    }

    #[test]
    fn test_different_trigger_ids_split() {
        let mut buffer = make_page(5, 100, 0, &[1]);
        buffer.extend(make_page(6, 100, 1, &[2]));
        buffer.extend(make_page(6, 101, 1, &[3]));
        let payloads: Vec<_> = RawReaderMemory::new(&buffer)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(payloads.len(), 3);
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let mut buffer = make_page(5, 100, 0, &[1]);
        let mut broken = make_page(6, 100, 0, &[2]);
        broken[0] = 2;
        buffer.extend(broken);
        buffer.extend(make_page(7, 100, 0, &[3]));

        let items: Vec<_> = RawReaderMemory::new(&buffer).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().kind(), ErrorKind::HeaderDecoding);
    }

    #[test]
    fn test_trailing_fillers_end_iteration() {
        let mut buffer = make_page(5, 100, 0, &[1]);
        buffer.extend(make_filler());
        let items: Vec<_> = RawReaderMemory::new(&buffer).collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[test]
    fn test_rewind() {
        let buffer = make_page(5, 100, 0, &[1]);
        let mut reader = RawReaderMemory::new(&buffer);
        assert!(reader.next().is_some());
        assert!(reader.next().is_none());
        reader.rewind();
        assert_eq!(reader.position(), 0);
        assert!(reader.next().is_some());
    }
}
