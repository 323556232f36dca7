//! Raw Data Header (RDH) of a readout page
//!
//! Every page starts with a 64-byte Little-Endian header. The version byte
//! at offset 0 selects the layout:
//!
//! ```text
//! field            v4 offset   v5/v6 offset
//! version            0           0
//! header_size        1           1
//! block_length       2 (u16)     -
//! fee_id             4 (u16)     2 (u16)
//! priority           6           4
//! source_id          -           5 (v6)
//! offset_to_next     8 (u16)     8 (u16)
//! memory_size       10 (u16)    10 (u16)
//! link_id           12          12
//! packet_counter    13          13
//! cru_id/dpw_id     14 (u16)    14 (u16)
//! trigger_orbit     16 (u32)    20 (u32)
//! heartbeat_orbit   20 (u32)     -
//! trigger_bc        32 (u16)    16 (u16)
//! heartbeat_bc      34 (u16)     -
//! trigger_type      36 (u32)    32 (u32)
//! detector_field    48 (u16)    48 (u32)
//! par               50 (u16)    52 (u16)
//! stop              52          38
//! page_counter      53 (u16)    36 (u16)
//! ```
//!
//! An unknown version is an error; the layout is never guessed.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Size of the fixed part of every RDH version
pub const RDH_SIZE: usize = 64;

mod constants {
    pub const BC_MASK: u16 = 0xFFF;
    pub const CRU_ID_MASK: u16 = 0xFFF;
    pub const DPW_SHIFT: u16 = 12;
    pub const DPW_MASK: u16 = 0xF;
}

/// Page header decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Insufficient data for page header: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("Unknown RDH version {0}")]
    UnknownVersion(u8),

    #[error("Header size {0} is smaller than 64 bytes")]
    HeaderTooSmall(u8),

    #[error("Offset to next page {offset_to_next} is smaller than header size {header_size}")]
    BadStride { header_size: u8, offset_to_next: u16 },

    #[error("Memory size {memory_size} outside [{header_size}, {offset_to_next}]")]
    BadMemorySize {
        header_size: u8,
        memory_size: u16,
        offset_to_next: u16,
    },
}

// ---------------------------------------------------------------------------
// Layouts
// ---------------------------------------------------------------------------

/// RDH version 4
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RdhV4 {
    pub header_size: u8,
    pub block_length: u16,
    pub fee_id: u16,
    pub priority: u8,
    pub offset_to_next: u16,
    pub memory_size: u16,
    pub link_id: u8,
    pub packet_counter: u8,
    pub cru_id: u16,
    pub dpw_id: u8,
    pub trigger_orbit: u32,
    pub heartbeat_orbit: u32,
    pub trigger_bc: u16,
    pub heartbeat_bc: u16,
    pub trigger_type: u32,
    pub detector_field: u16,
    pub par: u16,
    pub stop: u8,
    pub page_counter: u16,
}

impl RdhV4 {
    fn read(mut buf: &[u8]) -> Self {
        buf.advance(1); // version
        let header_size = buf.get_u8();
        let block_length = buf.get_u16_le();
        let fee_id = buf.get_u16_le();
        let priority = buf.get_u8();
        buf.advance(1);
        let offset_to_next = buf.get_u16_le();
        let memory_size = buf.get_u16_le();
        let link_id = buf.get_u8();
        let packet_counter = buf.get_u8();
        let cru = buf.get_u16_le();
        let trigger_orbit = buf.get_u32_le();
        let heartbeat_orbit = buf.get_u32_le();
        buf.advance(8);
        let trigger_bc = buf.get_u16_le() & constants::BC_MASK;
        let heartbeat_bc = buf.get_u16_le() & constants::BC_MASK;
        let trigger_type = buf.get_u32_le();
        buf.advance(8);
        let detector_field = buf.get_u16_le();
        let par = buf.get_u16_le();
        let stop = buf.get_u8();
        let page_counter = buf.get_u16_le();

        Self {
            header_size,
            block_length,
            fee_id,
            priority,
            offset_to_next,
            memory_size,
            link_id,
            packet_counter,
            cru_id: cru & constants::CRU_ID_MASK,
            dpw_id: ((cru >> constants::DPW_SHIFT) & constants::DPW_MASK) as u8,
            trigger_orbit,
            heartbeat_orbit,
            trigger_bc,
            heartbeat_bc,
            trigger_type,
            detector_field,
            par,
            stop,
            page_counter,
        }
    }

    fn write<B: BufMut>(&self, out: &mut B) {
        out.put_u8(4);
        out.put_u8(self.header_size);
        out.put_u16_le(self.block_length);
        out.put_u16_le(self.fee_id);
        out.put_u8(self.priority);
        out.put_u8(0);
        out.put_u16_le(self.offset_to_next);
        out.put_u16_le(self.memory_size);
        out.put_u8(self.link_id);
        out.put_u8(self.packet_counter);
        out.put_u16_le(pack_cru(self.cru_id, self.dpw_id));
        out.put_u32_le(self.trigger_orbit);
        out.put_u32_le(self.heartbeat_orbit);
        out.put_bytes(0, 8);
        out.put_u16_le(self.trigger_bc & constants::BC_MASK);
        out.put_u16_le(self.heartbeat_bc & constants::BC_MASK);
        out.put_u32_le(self.trigger_type);
        out.put_bytes(0, 8);
        out.put_u16_le(self.detector_field);
        out.put_u16_le(self.par);
        out.put_u8(self.stop);
        out.put_u16_le(self.page_counter);
        out.put_bytes(0, 9);
    }
}

/// RDH versions 5 and 6 (v6 adds `source_id`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RdhV5 {
    pub header_size: u8,
    pub fee_id: u16,
    pub priority: u8,
    pub source_id: u8,
    pub offset_to_next: u16,
    pub memory_size: u16,
    pub link_id: u8,
    pub packet_counter: u8,
    pub cru_id: u16,
    pub dpw_id: u8,
    pub bunch_crossing: u16,
    pub orbit: u32,
    pub trigger_type: u32,
    pub page_counter: u16,
    pub stop: u8,
    pub detector_field: u32,
    pub detector_par: u16,
}

impl RdhV5 {
    fn read(mut buf: &[u8]) -> Self {
        buf.advance(1); // version
        let header_size = buf.get_u8();
        let fee_id = buf.get_u16_le();
        let priority = buf.get_u8();
        let source_id = buf.get_u8();
        buf.advance(2);
        let offset_to_next = buf.get_u16_le();
        let memory_size = buf.get_u16_le();
        let link_id = buf.get_u8();
        let packet_counter = buf.get_u8();
        let cru = buf.get_u16_le();
        let bunch_crossing = buf.get_u16_le() & constants::BC_MASK;
        buf.advance(2);
        let orbit = buf.get_u32_le();
        buf.advance(8);
        let trigger_type = buf.get_u32_le();
        let page_counter = buf.get_u16_le();
        let stop = buf.get_u8();
        buf.advance(9);
        let detector_field = buf.get_u32_le();
        let detector_par = buf.get_u16_le();

        Self {
            header_size,
            fee_id,
            priority,
            source_id,
            offset_to_next,
            memory_size,
            link_id,
            packet_counter,
            cru_id: cru & constants::CRU_ID_MASK,
            dpw_id: ((cru >> constants::DPW_SHIFT) & constants::DPW_MASK) as u8,
            bunch_crossing,
            orbit,
            trigger_type,
            page_counter,
            stop,
            detector_field,
            detector_par,
        }
    }

    fn write<B: BufMut>(&self, version: u8, out: &mut B) {
        out.put_u8(version);
        out.put_u8(self.header_size);
        out.put_u16_le(self.fee_id);
        out.put_u8(self.priority);
        out.put_u8(if version >= 6 { self.source_id } else { 0 });
        out.put_bytes(0, 2);
        out.put_u16_le(self.offset_to_next);
        out.put_u16_le(self.memory_size);
        out.put_u8(self.link_id);
        out.put_u8(self.packet_counter);
        out.put_u16_le(pack_cru(self.cru_id, self.dpw_id));
        out.put_u16_le(self.bunch_crossing & constants::BC_MASK);
        out.put_bytes(0, 2);
        out.put_u32_le(self.orbit);
        out.put_bytes(0, 8);
        out.put_u32_le(self.trigger_type);
        out.put_u16_le(self.page_counter);
        out.put_u8(self.stop);
        out.put_bytes(0, 9);
        out.put_u32_le(self.detector_field);
        out.put_u16_le(self.detector_par);
        out.put_bytes(0, 10);
    }
}

fn pack_cru(cru_id: u16, dpw_id: u8) -> u16 {
    (cru_id & constants::CRU_ID_MASK) | ((dpw_id as u16 & constants::DPW_MASK) << constants::DPW_SHIFT)
}

// ---------------------------------------------------------------------------
// Version-tagged header
// ---------------------------------------------------------------------------

/// Version-independent description of a page, used to build headers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub fee_id: u16,
    pub link_id: u8,
    pub cru_id: u16,
    pub trigger_bc: u16,
    pub trigger_orbit: u32,
    pub trigger_type: u32,
    pub offset_to_next: u16,
    pub memory_size: u16,
    pub page_counter: u16,
    pub packet_counter: u8,
    pub stop: bool,
}

/// Page header, one variant per supported layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHeader {
    V4(RdhV4),
    V5(RdhV5),
    V6(RdhV5),
}

impl RawHeader {
    /// Decode and validate the header at the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        let version = *data.first().ok_or(HeaderError::TooShort {
            needed: RDH_SIZE,
            available: 0,
        })?;
        if !Self::is_supported(version) {
            return Err(HeaderError::UnknownVersion(version));
        }
        if data.len() < RDH_SIZE {
            return Err(HeaderError::TooShort {
                needed: RDH_SIZE,
                available: data.len(),
            });
        }

        let header = match version {
            4 => RawHeader::V4(RdhV4::read(data)),
            5 => RawHeader::V5(RdhV5::read(data)),
            _ => RawHeader::V6(RdhV5::read(data)),
        };
        header.validate()?;
        Ok(header)
    }

    pub fn is_supported(version: u8) -> bool {
        (4..=6).contains(&version)
    }

    /// Build a header of the given version
    pub fn from_info(version: u8, info: &PageInfo) -> Result<Self, HeaderError> {
        let header = match version {
            4 => RawHeader::V4(RdhV4 {
                header_size: RDH_SIZE as u8,
                block_length: info.memory_size.saturating_sub(RDH_SIZE as u16),
                fee_id: info.fee_id,
                offset_to_next: info.offset_to_next,
                memory_size: info.memory_size,
                link_id: info.link_id,
                packet_counter: info.packet_counter,
                cru_id: info.cru_id,
                trigger_orbit: info.trigger_orbit,
                heartbeat_orbit: info.trigger_orbit,
                trigger_bc: info.trigger_bc,
                heartbeat_bc: info.trigger_bc,
                trigger_type: info.trigger_type,
                stop: info.stop as u8,
                page_counter: info.page_counter,
                ..Default::default()
            }),
            5 | 6 => {
                let rdh = RdhV5 {
                    header_size: RDH_SIZE as u8,
                    fee_id: info.fee_id,
                    offset_to_next: info.offset_to_next,
                    memory_size: info.memory_size,
                    link_id: info.link_id,
                    packet_counter: info.packet_counter,
                    cru_id: info.cru_id,
                    bunch_crossing: info.trigger_bc,
                    orbit: info.trigger_orbit,
                    trigger_type: info.trigger_type,
                    page_counter: info.page_counter,
                    stop: info.stop as u8,
                    ..Default::default()
                };
                if version == 5 {
                    RawHeader::V5(rdh)
                } else {
                    RawHeader::V6(rdh)
                }
            }
            other => return Err(HeaderError::UnknownVersion(other)),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), HeaderError> {
        let header_size = self.header_size();
        let offset_to_next = self.offset_to_next();
        let memory_size = self.memory_size();

        if (header_size as usize) < RDH_SIZE {
            return Err(HeaderError::HeaderTooSmall(header_size));
        }
        if offset_to_next < header_size as u16 {
            return Err(HeaderError::BadStride {
                header_size,
                offset_to_next,
            });
        }
        // Filler pages leave memory_size unchecked; only their stride is used
        if !self.is_filler() && (memory_size < header_size as u16 || memory_size > offset_to_next) {
            return Err(HeaderError::BadMemorySize {
                header_size,
                memory_size,
                offset_to_next,
            });
        }
        Ok(())
    }

    /// Serialize the header, padded to `header_size`
    pub fn write<B: BufMut>(&self, out: &mut B) {
        match self {
            RawHeader::V4(h) => h.write(out),
            RawHeader::V5(h) => h.write(5, out),
            RawHeader::V6(h) => h.write(6, out),
        }
        let extra = (self.header_size() as usize).saturating_sub(RDH_SIZE);
        out.put_bytes(0, extra);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_size() as usize);
        self.write(&mut out);
        out
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn version(&self) -> u8 {
        match self {
            RawHeader::V4(_) => 4,
            RawHeader::V5(_) => 5,
            RawHeader::V6(_) => 6,
        }
    }

    pub fn header_size(&self) -> u8 {
        match self {
            RawHeader::V4(h) => h.header_size,
            RawHeader::V5(h) | RawHeader::V6(h) => h.header_size,
        }
    }

    pub fn fee_id(&self) -> u16 {
        match self {
            RawHeader::V4(h) => h.fee_id,
            RawHeader::V5(h) | RawHeader::V6(h) => h.fee_id,
        }
    }

    pub fn offset_to_next(&self) -> u16 {
        match self {
            RawHeader::V4(h) => h.offset_to_next,
            RawHeader::V5(h) | RawHeader::V6(h) => h.offset_to_next,
        }
    }

    /// Bytes used by the page: header, payload and trailer
    pub fn memory_size(&self) -> u16 {
        match self {
            RawHeader::V4(h) => h.memory_size,
            RawHeader::V5(h) | RawHeader::V6(h) => h.memory_size,
        }
    }

    pub fn page_counter(&self) -> u16 {
        match self {
            RawHeader::V4(h) => h.page_counter,
            RawHeader::V5(h) | RawHeader::V6(h) => h.page_counter,
        }
    }

    pub fn packet_counter(&self) -> u8 {
        match self {
            RawHeader::V4(h) => h.packet_counter,
            RawHeader::V5(h) | RawHeader::V6(h) => h.packet_counter,
        }
    }

    pub fn trigger_bc(&self) -> u16 {
        match self {
            RawHeader::V4(h) => h.trigger_bc,
            RawHeader::V5(h) | RawHeader::V6(h) => h.bunch_crossing,
        }
    }

    pub fn trigger_orbit(&self) -> u32 {
        match self {
            RawHeader::V4(h) => h.trigger_orbit,
            RawHeader::V5(h) | RawHeader::V6(h) => h.orbit,
        }
    }

    pub fn stop(&self) -> bool {
        match self {
            RawHeader::V4(h) => h.stop != 0,
            RawHeader::V5(h) | RawHeader::V6(h) => h.stop != 0,
        }
    }

    /// Header-only page carrying no payload
    pub fn is_filler(&self) -> bool {
        self.offset_to_next() == self.header_size() as u16
    }

    /// Same trigger: equal bunch crossing and orbit
    pub fn same_trigger(&self, other: &RawHeader) -> bool {
        self.trigger_bc() == other.trigger_bc() && self.trigger_orbit() == other.trigger_orbit()
    }
}
