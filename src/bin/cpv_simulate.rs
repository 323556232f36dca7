//! cpv_simulate - generate a raw CPV file from random digits
//!
//! Usage:
//!   cpv_simulate -o sim.raw
//!   cpv_simulate -o sim.raw -n 100 --seed 42 --digits sim_digits.jsonl
//!   cpv_simulate --config config.toml -o sim.raw
//!
//! Every trigger produces one page sequence per readout unit, so a decode
//! of the output reproduces the generated digits.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::Context;
use clap::Parser;
use cpvraw_rs::common::SimulateArgs;
use cpvraw_rs::config::Config;
use cpvraw_rs::writer::{DigitGenerator, PayloadEncoder, RawPageWriter};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Generated digits of one trigger, as written by `--digits`
#[derive(Serialize)]
struct TriggerDigits<'a> {
    trigger: u32,
    orbit: u32,
    bc: u16,
    digits: &'a [cpvraw_rs::common::Digit],
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cpvraw_rs=info".parse()?))
        .init();

    let args = SimulateArgs::parse();
    let mut config = Config::load_or_default(&args.common.config_file)?;
    if let Some(triggers) = args.triggers {
        config.simulation.triggers = triggers;
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = Some(seed);
    }

    let geometry = config.geometry.build()?;
    let mut generator = DigitGenerator::new(geometry.clone(), &config.simulation)?;
    let encoder = PayloadEncoder::new(geometry, config.codec.encoder_config());
    let mut writer = RawPageWriter::new(config.codec.page_writer_config())?;

    let mut digits_out = match &args.digits {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let mut buffer = Vec::new();
    let mut total_digits = 0;
    let mut total_pages = 0;

    for trigger in 0..config.simulation.triggers {
        let (bc, orbit) = DigitGenerator::trigger_id(trigger);
        let digits = generator.generate();
        total_pages += writer.write_digits(&mut buffer, &encoder, &digits, bc, orbit)?;
        total_digits += digits.len();

        if let Some(out) = digits_out.as_mut() {
            let line = TriggerDigits {
                trigger,
                orbit,
                bc,
                digits: &digits,
            };
            serde_json::to_writer(&mut *out, &line)?;
            writeln!(out)?;
        }
    }

    std::fs::write(&args.output, &buffer)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    if let Some(mut out) = digits_out {
        out.flush()?;
    }

    info!(
        output = %args.output.display(),
        triggers = config.simulation.triggers,
        digits = total_digits,
        pages = total_pages,
        bytes = buffer.len(),
        direction = %encoder.config().direction,
        "Simulation written"
    );
    Ok(())
}
