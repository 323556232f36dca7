//! CPVRAW-RS: raw data codec for the CPV calorimeter readout
//!
//! This crate reads paged raw buffers, decodes the framed payload of each
//! readout unit into digits with error records, and encodes digits back
//! into the same page format.

pub mod common;
pub mod config;
pub mod geometry;
pub mod reader;
pub mod writer;
