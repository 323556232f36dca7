//! RCU trailer closing the used memory of each page
//!
//! The trailer is self-describing: its last word carries the trailer size,
//! so it can be parsed backwards from the end of a page.
//!
//! ```text
//! word 0       : 10 | payload_size[26]                 (first word)
//! words 1..n-2 : 10 | code[4] | data[26]               (parameters)
//! word n-1     : 11 | 0[6] | fw[8] | rcu_id[9] | size[7]
//! ```
//!
//! Parameter codes: 7 ALTRO CFG2, 6 ALTRO CFG1, 5 active FECs B,
//! 4 active FECs A, 3 ERRREG3, 2 ERRREG2, 1 FEC errors A/B.

use thiserror::Error;

mod constants {
    pub const TYPE_SHIFT: u32 = 30;
    pub const PARAMETER_TYPE: u32 = 2;
    pub const LAST_TYPE: u32 = 3;
    pub const DATA_MASK: u32 = 0x3FF_FFFF;
    pub const CODE_SHIFT: u32 = 26;
    pub const CODE_MASK: u32 = 0xF;

    pub const SIZE_MASK: u32 = 0x7F;
    pub const RCU_ID_SHIFT: u32 = 7;
    pub const RCU_ID_MASK: u32 = 0x1FF;
    pub const FIRMWARE_SHIFT: u32 = 16;
    pub const FIRMWARE_MASK: u32 = 0xFF;

    pub const FEC_ERROR_MASK: u32 = 0x1FFF;
    pub const FEC_ERROR_A_SHIFT: u32 = 13;

    pub const CODE_FEC_ERRORS: u32 = 1;
    pub const CODE_ERRREG2: u32 = 2;
    pub const CODE_ERRREG3: u32 = 3;
    pub const CODE_ACTIVE_FECS_A: u32 = 4;
    pub const CODE_ACTIVE_FECS_B: u32 = 5;
    pub const CODE_ALTRO_CFG1: u32 = 6;
    pub const CODE_ALTRO_CFG2: u32 = 7;

    /// Parameter words of a full trailer, in the order they are written
    pub const FULL_PARAMETERS: [u8; 7] = [
        CODE_ALTRO_CFG2 as u8,
        CODE_ALTRO_CFG1 as u8,
        CODE_ACTIVE_FECS_B as u8,
        CODE_ACTIVE_FECS_A as u8,
        CODE_ERRREG3 as u8,
        CODE_ERRREG2 as u8,
        CODE_FEC_ERRORS as u8,
    ];

    /// First word, seven parameters, last word
    pub const ENCODED_SIZE: usize = FULL_PARAMETERS.len() + 2;
}

/// Trailer decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrailerError {
    #[error("Insufficient data for RCU trailer: {0} words")]
    TooShort(usize),

    #[error("Invalid last trailer word 0x{0:08x}")]
    BadLastWord(u32),

    #[error("Trailer size {size} invalid for {available} words")]
    BadSize { size: usize, available: usize },

    #[error("Invalid first trailer word 0x{0:08x}")]
    BadFirstWord(u32),

    #[error("Invalid trailer parameter word 0x{0:08x}")]
    BadParameter(u32),
}

/// Decoded RCU trailer
///
/// `parameters` lists the parameter codes in word order, so a parsed
/// trailer encodes back to the same words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcuTrailer {
    /// Payload size in 32-bit words
    pub payload_size: u32,
    pub firmware_version: u8,
    pub rcu_id: u16,
    pub altro_cfg1: u32,
    pub altro_cfg2: u32,
    pub active_fecs_a: u32,
    pub active_fecs_b: u32,
    pub err_reg2: u32,
    pub err_reg3: u32,
    pub fec_errors_a: u16,
    pub fec_errors_b: u16,
    /// Parameter codes present between the first and last word
    pub parameters: Vec<u8>,
}

impl Default for RcuTrailer {
    fn default() -> Self {
        Self {
            payload_size: 0,
            firmware_version: 2,
            rcu_id: 0,
            altro_cfg1: 0,
            altro_cfg2: 0,
            active_fecs_a: 0,
            active_fecs_b: 0,
            err_reg2: 0,
            err_reg3: 0,
            fec_errors_a: 0,
            fec_errors_b: 0,
            parameters: constants::FULL_PARAMETERS.to_vec(),
        }
    }
}

impl RcuTrailer {
    pub fn new(payload_size: u32, rcu_id: u16) -> Self {
        Self {
            payload_size,
            rcu_id,
            ..Default::default()
        }
    }

    /// Number of words of a trailer built by [`RcuTrailer::new`]
    pub const fn encoded_size() -> usize {
        constants::ENCODED_SIZE
    }

    /// Size in words, first and last word included
    pub fn trailer_size(&self) -> usize {
        self.parameters.len() + 2
    }

    /// Parse the trailer at the tail of `words`
    pub fn parse(words: &[u32]) -> Result<Self, TrailerError> {
        let last = *words.last().ok_or(TrailerError::TooShort(0))?;
        if last >> constants::TYPE_SHIFT != constants::LAST_TYPE {
            return Err(TrailerError::BadLastWord(last));
        }
        let size = (last & constants::SIZE_MASK) as usize;
        if size < 2 || size > words.len() {
            return Err(TrailerError::BadSize {
                size,
                available: words.len(),
            });
        }

        let start = words.len() - size;
        let first = words[start];
        if first >> constants::TYPE_SHIFT != constants::PARAMETER_TYPE {
            return Err(TrailerError::BadFirstWord(first));
        }

        let mut trailer = Self {
            payload_size: first & constants::DATA_MASK,
            firmware_version: ((last >> constants::FIRMWARE_SHIFT) & constants::FIRMWARE_MASK) as u8,
            rcu_id: ((last >> constants::RCU_ID_SHIFT) & constants::RCU_ID_MASK) as u16,
            parameters: Vec::with_capacity(size - 2),
            ..Default::default()
        };

        for &word in &words[start + 1..words.len() - 1] {
            if word >> constants::TYPE_SHIFT != constants::PARAMETER_TYPE {
                return Err(TrailerError::BadParameter(word));
            }
            let data = word & constants::DATA_MASK;
            let code = (word >> constants::CODE_SHIFT) & constants::CODE_MASK;
            match code {
                constants::CODE_FEC_ERRORS => {
                    trailer.fec_errors_b = (data & constants::FEC_ERROR_MASK) as u16;
                    trailer.fec_errors_a =
                        ((data >> constants::FEC_ERROR_A_SHIFT) & constants::FEC_ERROR_MASK) as u16;
                }
                constants::CODE_ERRREG2 => trailer.err_reg2 = data,
                constants::CODE_ERRREG3 => trailer.err_reg3 = data,
                constants::CODE_ACTIVE_FECS_A => trailer.active_fecs_a = data,
                constants::CODE_ACTIVE_FECS_B => trailer.active_fecs_b = data,
                constants::CODE_ALTRO_CFG1 => trailer.altro_cfg1 = data,
                constants::CODE_ALTRO_CFG2 => trailer.altro_cfg2 = data,
                _ => return Err(TrailerError::BadParameter(word)),
            }
            trailer.parameters.push(code as u8);
        }

        Ok(trailer)
    }

    /// Encode as trailer words, one parameter word per entry of `parameters`
    pub fn encode(&self) -> Vec<u32> {
        let fec_errors = (self.fec_errors_b as u32 & constants::FEC_ERROR_MASK)
            | ((self.fec_errors_a as u32 & constants::FEC_ERROR_MASK) << constants::FEC_ERROR_A_SHIFT);

        let mut words = Vec::with_capacity(self.trailer_size());
        words.push((constants::PARAMETER_TYPE << constants::TYPE_SHIFT) | (self.payload_size & constants::DATA_MASK));
        for &code in &self.parameters {
            let code = code as u32 & constants::CODE_MASK;
            let data = match code {
                constants::CODE_FEC_ERRORS => fec_errors,
                constants::CODE_ERRREG2 => self.err_reg2,
                constants::CODE_ERRREG3 => self.err_reg3,
                constants::CODE_ACTIVE_FECS_A => self.active_fecs_a,
                constants::CODE_ACTIVE_FECS_B => self.active_fecs_b,
                constants::CODE_ALTRO_CFG1 => self.altro_cfg1,
                constants::CODE_ALTRO_CFG2 => self.altro_cfg2,
                _ => 0,
            };
            words.push(
                (constants::PARAMETER_TYPE << constants::TYPE_SHIFT)
                    | (code << constants::CODE_SHIFT)
                    | (data & constants::DATA_MASK),
            );
        }
        words.push(
            (constants::LAST_TYPE << constants::TYPE_SHIFT)
                | ((self.firmware_version as u32 & constants::FIRMWARE_MASK) << constants::FIRMWARE_SHIFT)
                | ((self.rcu_id as u32 & constants::RCU_ID_MASK) << constants::RCU_ID_SHIFT)
                | (self.trailer_size() as u32 & constants::SIZE_MASK),
        );
        words
    }
}
