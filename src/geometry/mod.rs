//! Geometry map: hardware address <-> absolute channel id
//!
//! The map is a total bijection over the valid channels of a layout. Both
//! directions are served from lookup tables built once at construction, so
//! a `GeometryMap` is immutable and can be shared as `Arc<GeometryMap>`.
//!
//! Two sources are supported:
//! - the built-in pad-plane layout (`GeometryMap::new`)
//! - an external CSV table `readout_unit,row,dilogic,address,abs_id`
//!   (`GeometryMap::from_table`)

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::common::HwAddress;

mod constants {
    /// Address slots reserved per dilogic (6-bit local address)
    pub const ADDRESS_SLOTS: usize = 64;
    /// Row field width (5 bits)
    pub const MAX_ROWS: u8 = 32;
    /// Dilogic field width (4 bits)
    pub const MAX_DILOGICS: u8 = 16;
    /// Absolute ids must fit the 18-bit digit field
    pub const MAX_CHANNELS: usize = 1 << 18;
    /// Columns in a mapping table line
    pub const TABLE_COLUMNS: usize = 5;
}

/// Lookup failure on an address or id outside the map
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    #[error("no channel at hardware address {0}")]
    InvalidHardware(HwAddress),

    #[error("absolute id {0} is not mapped")]
    InvalidAbsId(u32),
}

/// Errors while building a geometry map
#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Failed to read mapping table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid geometry layout: {0}")]
    InvalidLayout(String),

    #[error("Mapping table line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Mapping table line {line}: hardware address {hw} outside layout")]
    AddressOutOfRange { line: usize, hw: HwAddress },

    #[error("Mapping table line {line}: absolute id {id} out of range")]
    IdOutOfRange { line: usize, id: u32 },

    #[error("Mapping table line {line}: hardware address {hw} mapped twice")]
    DuplicateAddress { line: usize, hw: HwAddress },

    #[error("Mapping table line {line}: absolute id {id} mapped twice")]
    DuplicateId { line: usize, id: u32 },
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Dimensions of the readout hierarchy
///
/// Each dilogic reads `pads_phi * pads_z` pads. Local address `a` sits at
/// `(a / pads_z, a % pads_z)` inside the dilogic block; rows stack along phi
/// and dilogics along z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GeometryLayout {
    pub readout_units: u16,
    pub rows: u8,
    pub dilogics: u8,
    pub pads_phi: u8,
    pub pads_z: u8,
}

impl Default for GeometryLayout {
    fn default() -> Self {
        Self {
            readout_units: 3,
            rows: 16,
            dilogics: 10,
            pads_phi: 8,
            pads_z: 6,
        }
    }
}

impl GeometryLayout {
    pub fn pads_per_dilogic(&self) -> usize {
        self.pads_phi as usize * self.pads_z as usize
    }

    /// Pads along z in one readout unit
    pub fn z_size(&self) -> usize {
        self.dilogics as usize * self.pads_z as usize
    }

    pub fn channels_per_unit(&self) -> usize {
        self.rows as usize * self.dilogics as usize * self.pads_per_dilogic()
    }

    pub fn n_channels(&self) -> usize {
        self.readout_units as usize * self.channels_per_unit()
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.readout_units == 0
            || self.rows == 0
            || self.dilogics == 0
            || self.pads_phi == 0
            || self.pads_z == 0
        {
            return Err(GeometryError::InvalidLayout(
                "all dimensions must be nonzero".into(),
            ));
        }
        if self.rows > constants::MAX_ROWS {
            return Err(GeometryError::InvalidLayout(format!(
                "{} rows exceed the {}-row field",
                self.rows,
                constants::MAX_ROWS
            )));
        }
        if self.dilogics > constants::MAX_DILOGICS {
            return Err(GeometryError::InvalidLayout(format!(
                "{} dilogics exceed the {}-dilogic field",
                self.dilogics,
                constants::MAX_DILOGICS
            )));
        }
        if self.pads_per_dilogic() > constants::ADDRESS_SLOTS {
            return Err(GeometryError::InvalidLayout(format!(
                "{} pads per dilogic exceed {} address slots",
                self.pads_per_dilogic(),
                constants::ADDRESS_SLOTS
            )));
        }
        if self.n_channels() > constants::MAX_CHANNELS {
            return Err(GeometryError::InvalidLayout(format!(
                "{} channels do not fit an 18-bit id",
                self.n_channels()
            )));
        }
        Ok(())
    }

    /// True if the tuple names a slot of this layout
    pub fn contains(&self, hw: HwAddress) -> bool {
        hw.readout_unit < self.readout_units
            && hw.row < self.rows
            && hw.dilogic < self.dilogics
            && (hw.address as usize) < self.pads_per_dilogic()
    }

    /// Dense index of a hardware slot (row-major over ru, row, dilogic, address)
    fn slot(&self, hw: HwAddress) -> usize {
        ((hw.readout_unit as usize * self.rows as usize + hw.row as usize)
            * self.dilogics as usize
            + hw.dilogic as usize)
            * constants::ADDRESS_SLOTS
            + hw.address as usize
    }

    fn n_slots(&self) -> usize {
        self.readout_units as usize
            * self.rows as usize
            * self.dilogics as usize
            * constants::ADDRESS_SLOTS
    }

    /// Pad-plane formula used by the built-in map
    fn pad_plane_id(&self, hw: HwAddress) -> u32 {
        let pads_z = self.pads_z as usize;
        let phi = hw.row as usize * self.pads_phi as usize + hw.address as usize / pads_z;
        let z = hw.dilogic as usize * pads_z + hw.address as usize % pads_z;
        (hw.readout_unit as usize * self.channels_per_unit() + phi * self.z_size() + z) as u32
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// Immutable bijection between hardware addresses and absolute ids
#[derive(Debug, Clone)]
pub struct GeometryMap {
    layout: GeometryLayout,
    hw_to_abs: Vec<Option<u32>>,
    abs_to_hw: Vec<Option<HwAddress>>,
}

impl GeometryMap {
    /// Build the built-in pad-plane map for a layout
    pub fn new(layout: GeometryLayout) -> Result<Self, GeometryError> {
        layout.validate()?;

        let mut hw_to_abs = vec![None; layout.n_slots()];
        let mut abs_to_hw = vec![None; layout.n_channels()];

        for ru in 0..layout.readout_units {
            for row in 0..layout.rows {
                for dilogic in 0..layout.dilogics {
                    for address in 0..layout.pads_per_dilogic() as u8 {
                        let hw = HwAddress::new(ru, row, dilogic, address);
                        let id = layout.pad_plane_id(hw);
                        hw_to_abs[layout.slot(hw)] = Some(id);
                        abs_to_hw[id as usize] = Some(hw);
                    }
                }
            }
        }

        Ok(Self {
            layout,
            hw_to_abs,
            abs_to_hw,
        })
    }

    /// Built-in map with the default layout
    pub fn with_defaults() -> Self {
        match Self::new(GeometryLayout::default()) {
            Ok(map) => map,
            // The default layout is a compile-time constant that always validates.
            Err(e) => unreachable!("default geometry layout rejected: {e}"),
        }
    }

    /// Load a CSV mapping table from a file
    pub fn from_table<P: AsRef<Path>>(layout: GeometryLayout, path: P) -> Result<Self, GeometryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_table_str(layout, &content)
    }

    /// Parse a CSV mapping table
    ///
    /// Lines are `readout_unit,row,dilogic,address,abs_id`. Blank lines, `#`
    /// comments and a non-numeric header line are skipped. Every hardware
    /// address and every id may appear at most once.
    pub fn from_table_str(layout: GeometryLayout, content: &str) -> Result<Self, GeometryError> {
        layout.validate()?;

        let mut hw_to_abs = vec![None; layout.n_slots()];
        let mut entries: Vec<(u32, HwAddress, usize)> = Vec::new();
        let mut max_id = 0u32;

        for (idx, raw_line) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != constants::TABLE_COLUMNS {
                return Err(GeometryError::Parse {
                    line: line_no,
                    message: format!(
                        "expected {} columns, found {}",
                        constants::TABLE_COLUMNS,
                        fields.len()
                    ),
                });
            }
            // Header line
            if entries.is_empty() && fields[0].parse::<u64>().is_err() {
                continue;
            }

            let hw = HwAddress::new(
                parse_field(fields[0], line_no)?,
                parse_field(fields[1], line_no)?,
                parse_field(fields[2], line_no)?,
                parse_field(fields[3], line_no)?,
            );
            let id: u32 = parse_field(fields[4], line_no)?;

            if !layout.contains(hw) {
                return Err(GeometryError::AddressOutOfRange { line: line_no, hw });
            }
            if id as usize >= constants::MAX_CHANNELS {
                return Err(GeometryError::IdOutOfRange { line: line_no, id });
            }
            let slot = layout.slot(hw);
            if hw_to_abs[slot].is_some() {
                return Err(GeometryError::DuplicateAddress { line: line_no, hw });
            }
            hw_to_abs[slot] = Some(id);
            max_id = max_id.max(id);
            entries.push((id, hw, line_no));
        }

        let mut abs_to_hw = vec![None; if entries.is_empty() { 0 } else { max_id as usize + 1 }];
        for (id, hw, line) in entries {
            let cell = &mut abs_to_hw[id as usize];
            if cell.is_some() {
                return Err(GeometryError::DuplicateId { line, id });
            }
            *cell = Some(hw);
        }

        Ok(Self {
            layout,
            hw_to_abs,
            abs_to_hw,
        })
    }

    pub fn layout(&self) -> &GeometryLayout {
        &self.layout
    }

    /// Number of mapped channels
    pub fn len(&self) -> usize {
        self.abs_to_hw.iter().filter(|h| h.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translate a hardware address into an absolute id
    #[inline]
    pub fn hw_to_abs(&self, hw: HwAddress) -> Result<u32, MappingError> {
        if !self.layout.contains(hw) {
            return Err(MappingError::InvalidHardware(hw));
        }
        self.hw_to_abs[self.layout.slot(hw)].ok_or(MappingError::InvalidHardware(hw))
    }

    /// Translate an absolute id into its hardware address
    #[inline]
    pub fn abs_to_hw(&self, abs_id: u32) -> Result<HwAddress, MappingError> {
        self.abs_to_hw
            .get(abs_id as usize)
            .copied()
            .flatten()
            .ok_or(MappingError::InvalidAbsId(abs_id))
    }

    /// Iterate over all mapped (abs_id, hardware address) pairs in id order
    pub fn channels(&self) -> impl Iterator<Item = (u32, HwAddress)> + '_ {
        self.abs_to_hw
            .iter()
            .enumerate()
            .filter_map(|(id, hw)| hw.map(|hw| (id as u32, hw)))
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, line: usize) -> Result<T, GeometryError> {
    field.parse().map_err(|_| GeometryError::Parse {
        line,
        message: format!("invalid number '{}'", field),
    })
}
