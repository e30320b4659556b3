//! CLI entrypoint for the heapsim harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use heapsim_core::Arena;
use heapsim_harness::capture::{build_churn_fixture, churn_ops, CAPTURE_HEAP_BYTES};
use heapsim_harness::runner::{apply_op, parse_script, run_ops};
use heapsim_harness::verify::check_snapshot;

/// Driver tooling for the heapsim allocator simulator.
#[derive(Debug, Parser)]
#[command(name = "heapsim-harness")]
#[command(about = "Scenario driver and invariant checker for heapsim")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a deterministic churn workload and emit a fixture JSON.
    Capture {
        /// Workload seed.
        #[arg(long, default_value_t = 0xA5A5_5A5A_DEAD_BEEF)]
        seed: u64,
        /// Number of workload steps.
        #[arg(long, default_value_t = 256)]
        steps: u32,
        /// Output path (prints to stdout if omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Execute a scenario script and print the final snapshot JSON.
    Run {
        /// Script path; see the runner module for the line format.
        script: PathBuf,
        /// Also print the event log.
        #[arg(long)]
        events: bool,
    },
    /// Run a churn workload, checking arena invariants after every step.
    Check {
        /// Workload seed.
        #[arg(long, default_value_t = 0xA5A5_5A5A_DEAD_BEEF)]
        seed: u64,
        /// Number of workload steps.
        #[arg(long, default_value_t = 512)]
        steps: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Capture { seed, steps, output } => {
            let fixture = build_churn_fixture(seed, steps);
            let json = match serde_json::to_string_pretty(&fixture) {
                Ok(json) => json,
                Err(err) => {
                    eprintln!("error: failed to serialize fixture: {}", err);
                    return ExitCode::FAILURE;
                }
            };
            match output {
                Some(path) => {
                    if let Err(err) = std::fs::write(&path, json) {
                        eprintln!("error: failed to write {}: {}", path.display(), err);
                        return ExitCode::FAILURE;
                    }
                    println!("wrote fixture (seed={}, steps={}) to {}", seed, steps, path.display());
                }
                None => println!("{}", json),
            }
            ExitCode::SUCCESS
        }
        Command::Run { script, events } => {
            let text = match std::fs::read_to_string(&script) {
                Ok(text) => text,
                Err(err) => {
                    eprintln!("error: failed to read {}: {}", script.display(), err);
                    return ExitCode::FAILURE;
                }
            };
            let ops = match parse_script(&text) {
                Ok(ops) => ops,
                Err(err) => {
                    eprintln!("error: {}: {}", script.display(), err);
                    return ExitCode::FAILURE;
                }
            };
            let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
            let slots = run_ops(&mut arena, &ops);
            for (slot, ptr) in slots.iter().enumerate() {
                match ptr {
                    Some(ptr) => println!("slot {} = {:#x}", slot, ptr),
                    None => println!("slot {} = (failed)", slot),
                }
            }
            if events {
                for event in arena.events() {
                    println!("{}", event.msg());
                }
            }
            match serde_json::to_string_pretty(&arena.snapshot()) {
                Ok(json) => println!("{}", json),
                Err(err) => {
                    eprintln!("error: failed to serialize snapshot: {}", err);
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Command::Check { seed, steps } => {
            let ops = churn_ops(seed, steps);
            let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
            let mut slots = Vec::new();
            for (step, op) in ops.iter().enumerate() {
                apply_op(&mut arena, &mut slots, *op);
                let report = check_snapshot(&arena.snapshot());
                if !report.all_passed() {
                    eprintln!("invariant violations after step {} ({:?}):", step, op);
                    for violation in &report.violations {
                        eprintln!("  [{}] {}", violation.rule, violation.detail);
                    }
                    return ExitCode::FAILURE;
                }
            }
            println!(
                "ok: {} steps, {} chunks, {} events, no violations",
                steps,
                arena.snapshot().chunks.len(),
                arena.events().len()
            );
            ExitCode::SUCCESS
        }
    }
}
