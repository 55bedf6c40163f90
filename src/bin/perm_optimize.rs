// src/bin/perm_optimize.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver binary: `perm-optimize splits groups dataset.txt output.txt [-v]`.
//! Grounded on `analysis.cpp`'s `main`: load the dataset, run the two-phase
//! optimizer independently on `splits` contiguous chunks with `groups`
//! groups each, and write the resulting permutation, one index per line.

use anyhow::{Context, Result};
use parasvm::dataset::LocalDataset;
use parasvm::optimizer::phase_a::PhaseAConfig;
use parasvm::optimizer::phase_b::PhaseBConfig;
use parasvm::optimizer::{optimize, write_permutation, OptimizerConfig};
use std::process::ExitCode;
use std::time::Instant;

struct Args {
    splits: usize,
    groups: usize,
    dataset: String,
    output: String,
    verbose: bool,
}

fn parse_args() -> Option<Args> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let verbose = argv.iter().any(|a| a == "-v");
    let positional: Vec<&String> = argv.iter().filter(|a| a.as_str() != "-v").collect();
    if positional.len() != 4 {
        return None;
    }
    let splits: usize = positional[0].parse().ok()?;
    let groups: usize = positional[1].parse().ok()?;
    Some(Args {
        splits,
        groups,
        dataset: positional[2].clone(),
        output: positional[3].clone(),
        verbose,
    })
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Some(a) => a,
        None => {
            eprintln!("usage: perm-optimize splits groups dataset.txt output.txt [-v]");
            return ExitCode::from(1);
        }
    };

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
            .init();
    }

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("perm-optimize: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let dataset = LocalDataset::from_libsvm_path(&args.dataset).context("loading dataset")?;

    let config = OptimizerConfig {
        splits: args.splits,
        groups: args.groups,
        phase_a: PhaseAConfig::default(),
        phase_b: PhaseBConfig::default(),
    };

    let start = Instant::now();
    let permutation = optimize(&dataset, &config).context("running block-permutation optimizer")?;
    let elapsed = start.elapsed();

    if args.verbose {
        tracing::info!(
            points = dataset.len(),
            splits = args.splits,
            groups = args.groups,
            elapsed_s = elapsed.as_secs_f64(),
            "optimization finished"
        );
    } else {
        println!("optimized {} points in {:.3}s", dataset.len(), elapsed.as_secs_f64());
    }

    write_permutation(&args.output, &permutation).context("writing permutation output")?;
    Ok(ExitCode::SUCCESS)
}
