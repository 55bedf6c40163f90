// src/bin/sgd_train.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver binary: `sgd-train train test validate output.csv [commands.txt] [-v]`.
//! Grounded on `main.cpp`'s experiment-command-loop driver: reads one
//! experiment-command line at a time (from a file or, absent one, from
//! stdin until EOF or a line that is exactly `exit`), runs it to completion,
//! and appends one CSV row per repeat.

use anyhow::{Context, Result};
use parasvm::dataset::ReplicatedDataset;
use parasvm::optimizer;
use parasvm::pool::WorkerPool;
use parasvm::sgd::{run_experiment_repeats, ExperimentConfig, ExperimentResult};
use parasvm::topology::Topology;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::process::ExitCode;
use std::sync::Arc;

struct Args {
    train: String,
    test: String,
    validate: String,
    output: String,
    commands: Option<String>,
    verbose: bool,
}

fn parse_args() -> Option<Args> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let verbose = argv.iter().any(|a| a == "-v");
    let positional: Vec<&String> = argv.iter().filter(|a| a.as_str() != "-v").collect();
    if positional.len() < 4 || positional.len() > 5 {
        return None;
    }
    Some(Args {
        train: positional[0].clone(),
        test: positional[1].clone(),
        validate: positional[2].clone(),
        output: positional[3].clone(),
        commands: positional.get(4).map(|s| s.to_string()),
        verbose,
    })
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Some(a) => a,
        None => {
            eprintln!("usage: sgd-train train test validate output.csv [commands.txt] [-v]");
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
            eprintln!("sgd-train: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let topology = Topology::detect(num_cpus::get()).unwrap_or_else(|_| Topology::single_node(num_cpus::get().max(1)));

    let train = Arc::new(ReplicatedDataset::from_path(&topology, &args.train).context("loading training set")?);
    let test = Arc::new(ReplicatedDataset::from_path(&topology, &args.test).context("loading test set")?);
    let validate = Arc::new(ReplicatedDataset::from_path(&topology, &args.validate).context("loading validation set")?);

    let mut output = match File::create(&args.output) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("sgd-train: cannot open output CSV {}: {err}", args.output);
            return Ok(ExitCode::from(3));
        }
    };
    writeln!(output, "{}", ExperimentResult::CSV_HEADER)?;

    let lines: Box<dyn Iterator<Item = io::Result<String>>> = match &args.commands {
        Some(path) => match File::open(path) {
            Ok(f) => Box::new(BufReader::new(f).lines()),
            Err(err) => {
                eprintln!("sgd-train: cannot open commands file {path}: {err}");
                return Ok(ExitCode::from(2));
            }
        },
        None => Box::new(BufReader::new(io::stdin()).lines()),
    };

    for line in lines {
        let line = line.context("reading experiment command line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" {
            break;
        }

        let config = match ExperimentConfig::from_line(trimmed) {
            Ok(c) => c,
            Err(err) => {
                eprintln!("sgd-train: skipping malformed command {trimmed:?}: {err}");
                continue;
            }
        };

        let (experiment_train, permuted) = match &config.permutation_file {
            Some(path) => {
                let perm = optimizer::read_permutation(path, train.len())
                    .with_context(|| format!("loading permutation file {}", path.display()))?;
                let inverse = optimizer::invert(&perm);
                let reordered = ReplicatedDataset::reordered(&topology, &train, &inverse)
                    .context("applying permutation to training set")?;
                (Arc::new(reordered), true)
            }
            None => (train.clone(), false),
        };

        let pool = WorkerPool::new(Arc::new(topology.clone()), config.threads.max(1));
        let summary = run_experiment_repeats(&pool, &topology, &experiment_train, &validate, &test, &config, permuted)?;

        for row in &summary.rows {
            writeln!(output, "{}", row.to_csv_row())?;
            if args.verbose {
                tracing::info!(
                    algorithm = %row.algorithm,
                    threads = row.threads,
                    success = row.success,
                    train_score = row.train_score,
                    test_score = row.test_score,
                    "experiment finished"
                );
            } else {
                print!("{}", if row.success { '.' } else { '!' });
                io::stdout().flush().ok();
            }
        }
    }

    if !args.verbose {
        println!();
    }
    Ok(ExitCode::SUCCESS)
}
