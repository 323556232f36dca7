//! cpv_decode - decode raw CPV files into digits
//!
//! Usage:
//!   cpv_decode run1.raw run2.raw
//!   cpv_decode --config config.toml --direction backward run.raw
//!   cpv_decode --json run.raw > digits.jsonl
//!
//! Files are decoded in parallel, one thread per file, sharing one
//! geometry map. A summary per file and an error count per kind are
//! printed at the end.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cpvraw_rs::common::{DecodeArgs, Digit, ErrorKind};
use cpvraw_rs::config::Config;
use cpvraw_rs::reader::{PayloadDecoder, RawReaderMemory};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// One decoded digit with its trigger, as written by `--json`
#[derive(Serialize)]
struct DigitLine {
    file: String,
    orbit: u32,
    bc: u16,
    readout_unit: u16,
    #[serde(flatten)]
    digit: Digit,
}

#[derive(Debug, Default)]
struct FileSummary {
    triggers: usize,
    pages: usize,
    digits: usize,
    errors: BTreeMap<ErrorKind, usize>,
    /// Page-level failure that stopped the walk, if any
    fatal: Option<String>,
    lines: Vec<String>,
}

fn decode_file(path: &Path, decoder: &PayloadDecoder, json: bool) -> anyhow::Result<FileSummary> {
    let buffer =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path.display().to_string();
    let mut summary = FileSummary::default();

    for item in RawReaderMemory::new(&buffer) {
        let payload = match item {
            Ok(payload) => payload,
            Err(e) => {
                warn!(file = %name, error = %e, "Stopping at page error");
                *summary.errors.entry(e.kind()).or_default() += 1;
                summary.fatal = Some(e.to_string());
                break;
            }
        };

        let decoded = decoder.decode(&payload);
        summary.triggers += 1;
        summary.pages += payload.page_count;
        summary.digits += decoded.digits.len();
        for record in &decoded.errors {
            *summary.errors.entry(record.kind).or_default() += 1;
        }

        if json {
            for digit in &decoded.digits {
                let line = DigitLine {
                    file: name.clone(),
                    orbit: payload.header.trigger_orbit(),
                    bc: payload.header.trigger_bc(),
                    readout_unit: payload.readout_unit(),
                    digit: *digit,
                };
                summary.lines.push(serde_json::to_string(&line)?);
            }
        }
    }

    info!(
        file = %name,
        triggers = summary.triggers,
        pages = summary.pages,
        digits = summary.digits,
        "File decoded"
    );
    Ok(summary)
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so that --json output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("cpvraw_rs=info".parse()?))
        .init();

    let args = DecodeArgs::parse();
    let config = Config::load_or_default(&args.common.config_file)?;

    let mut decoder_config = config.codec.decoder_config();
    if let Some(direction) = args.direction {
        decoder_config.direction = direction;
    }
    decoder_config.dump_enabled = args.dump;

    let geometry = config.geometry.build()?;
    let decoder = PayloadDecoder::new(Arc::clone(&geometry), decoder_config);
    info!(
        files = args.inputs.len(),
        direction = %decoder.config().direction,
        "Decoding"
    );

    let results: Vec<(PathBuf, anyhow::Result<FileSummary>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = args
            .inputs
            .iter()
            .map(|path| {
                let decoder = &decoder;
                let json = args.json;
                (path.clone(), scope.spawn(move || decode_file(path, decoder, json)))
            })
            .collect();
        handles
            .into_iter()
            .map(|(path, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("decoder thread panicked")));
                (path, result)
            })
            .collect()
    });

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut totals: BTreeMap<ErrorKind, usize> = BTreeMap::new();
    let mut failed_files = 0;

    for (path, result) in &results {
        match result {
            Ok(summary) => {
                for line in &summary.lines {
                    writeln!(out, "{}", line)?;
                }
                for (kind, count) in &summary.errors {
                    *totals.entry(*kind).or_default() += count;
                }
                if let Some(reason) = &summary.fatal {
                    eprintln!("{}: stopped early: {}", path.display(), reason);
                }
                if !args.json {
                    writeln!(
                        out,
                        "{}: {} triggers, {} pages, {} digits",
                        path.display(),
                        summary.triggers,
                        summary.pages,
                        summary.digits
                    )?;
                }
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "Decoding failed");
                failed_files += 1;
            }
        }
    }

    if !args.json {
        writeln!(out, "Errors by kind:")?;
        for kind in ErrorKind::ALL {
            writeln!(out, "  {:<24} {}", kind.as_str(), totals.get(&kind).copied().unwrap_or(0))?;
        }
    }

    if failed_files > 0 {
        anyhow::bail!("{} of {} files could not be decoded", failed_files, results.len());
    }
    Ok(())
}
