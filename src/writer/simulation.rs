//! Random digit generation for test data
//!
//! Channels fire independently with the configured occupancy and get a
//! Gaussian pedestal-like charge, clamped to the ADC range.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::common::{Digit, MAX_CHARGE};
use crate::config::{ConfigError, SimulationConfig};
use crate::geometry::GeometryMap;

/// Bunch crossings per LHC orbit
const BC_PER_ORBIT: u64 = 3564;
/// Bunch crossings between consecutive simulated triggers
const TRIGGER_SPACING: u64 = 40;

/// Generates digits over all channels of a geometry
pub struct DigitGenerator {
    geometry: Arc<GeometryMap>,
    config: SimulationConfig,
    rng: StdRng,
    charge: Normal<f64>,
}

impl DigitGenerator {
    pub fn new(geometry: Arc<GeometryMap>, config: &SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let charge = Normal::new(config.pedestal_mean, config.pedestal_sigma).map_err(|e| {
            ConfigError::InvalidValue {
                field: "simulation.pedestal_sigma",
                reason: e.to_string(),
            }
        })?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            geometry,
            config: config.clone(),
            rng,
            charge,
        })
    }

    /// Digits of one trigger, ordered by absolute id
    pub fn generate(&mut self) -> Vec<Digit> {
        let geometry = Arc::clone(&self.geometry);
        let mut digits = Vec::new();
        for (abs_id, _) in geometry.channels() {
            if !self.rng.gen_bool(self.config.occupancy) {
                continue;
            }
            digits.push(Digit::new(abs_id, self.sample_charge()));
            if self.config.pileup_probability > 0.0 && self.rng.gen_bool(self.config.pileup_probability) {
                digits.push(Digit::new(abs_id, self.sample_charge()));
            }
        }
        digits.sort_by_key(|d| d.abs_id);
        digits
    }

    fn sample_charge(&mut self) -> u32 {
        self.charge
            .sample(&mut self.rng)
            .round()
            .clamp(0.0, MAX_CHARGE as f64) as u32
    }

    /// Bunch crossing and orbit of the `index`-th simulated trigger
    pub fn trigger_id(index: u32) -> (u16, u32) {
        let global = index as u64 * TRIGGER_SPACING;
        ((global % BC_PER_ORBIT) as u16, (global / BC_PER_ORBIT) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(occupancy: f64, seed: u64) -> SimulationConfig {
        SimulationConfig {
            occupancy,
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let geometry = Arc::new(GeometryMap::with_defaults());
        let mut a = DigitGenerator::new(geometry.clone(), &config(0.05, 42)).unwrap();
        let mut b = DigitGenerator::new(geometry, &config(0.05, 42)).unwrap();
        assert_eq!(a.generate(), b.generate());
        assert_eq!(a.generate(), b.generate());
    }

    #[test]
    fn test_occupancy_bounds() {
        let geometry = Arc::new(GeometryMap::with_defaults());
        let mut none = DigitGenerator::new(geometry.clone(), &config(0.0, 1)).unwrap();
        assert!(none.generate().is_empty());

        let mut all = DigitGenerator::new(geometry.clone(), &config(1.0, 1)).unwrap();
        let digits = all.generate();
        assert_eq!(digits.len(), geometry.len());
        assert!(digits.windows(2).all(|w| w[0].abs_id < w[1].abs_id));
    }

    #[test]
    fn test_charges_within_range() {
        let geometry = Arc::new(GeometryMap::with_defaults());
        let cfg = SimulationConfig {
            occupancy: 0.2,
            pedestal_mean: 2000.0,
            pedestal_sigma: 200.0,
            seed: Some(7),
            ..Default::default()
        };
        let mut generator = DigitGenerator::new(geometry, &cfg).unwrap();
        let digits = generator.generate();
        assert!(!digits.is_empty());
        assert!(digits.iter().all(|d| d.charge <= MAX_CHARGE));
        assert!(digits.iter().any(|d| d.charge == MAX_CHARGE));
    }

    #[test]
    fn test_pileup_duplicates_channels() {
        let geometry = Arc::new(GeometryMap::with_defaults());
        let cfg = SimulationConfig {
            occupancy: 1.0,
            pileup_probability: 1.0,
            seed: Some(3),
            ..Default::default()
        };
        let mut generator = DigitGenerator::new(geometry.clone(), &cfg).unwrap();
        assert_eq!(generator.generate().len(), 2 * geometry.len());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let geometry = Arc::new(GeometryMap::with_defaults());
        let cfg = SimulationConfig {
            occupancy: 2.0,
            ..Default::default()
        };
        assert!(DigitGenerator::new(geometry, &cfg).is_err());
    }

    #[test]
    fn test_trigger_ids() {
        assert_eq!(DigitGenerator::trigger_id(0), (0, 0));
        assert_eq!(DigitGenerator::trigger_id(1), (40, 0));
        // 90 * 40 = 3600 = 3564 + 36
        assert_eq!(DigitGenerator::trigger_id(90), (36, 1));
    }
}
