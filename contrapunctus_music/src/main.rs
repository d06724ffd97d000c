// Contrapunctus: CLI entry point.
//
// Builds a piece from a JSON config (or the built-in two-voice default),
// searches it with Monte Carlo beam search, and prints the best sequences
// with their rewards and a piano roll of the winner.
//
// Usage:
//   cargo run -p contrapunctus_music --bin compose -- [--config PATH]
//     [--seed N] [--beam-width N] [--print-json]
//
// Log verbosity follows RUST_LOG (default: info), written to stderr.

use contrapunctus_music::config::ComposerConfig;
use contrapunctus_music::environment::{CounterpointEnv, Environment};
use contrapunctus_music::error::Result;
use contrapunctus_music::piece::Piece;
use contrapunctus_music::search::{optimize_with_monte_carlo_beam_search, roll_in};
use std::path::Path;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path: Option<String> = parse_flag(&args, "--config");
    let seed: Option<u64> = parse_flag(&args, "--seed");
    let beam_width: Option<usize> = parse_flag(&args, "--beam-width");
    let print_json = args.iter().any(|a| a == "--print-json");

    println!("=== Contrapunctus ===");
    println!("[1/4] Loading configuration...");
    let mut config = match &config_path {
        Some(path) => {
            println!("  From {path}");
            ComposerConfig::load(Path::new(path))?
        }
        None => {
            println!("  Using the built-in two-voice default.");
            ComposerConfig::default()
        }
    };
    if let Some(seed) = seed {
        config.search.seed = seed;
    }
    if let Some(width) = beam_width {
        config.search.beam_width = width;
    }
    config.validate()?;

    println!("[2/4] Building piece...");
    let piece = Piece::new(&config.piece)?;
    println!(
        "  {}, {} lines, {} measures of {} steps",
        piece.scale().name(),
        piece.n_lines(),
        piece.n_measures(),
        piece.steps_per_measure()
    );
    for line in 0..piece.n_lines() {
        println!(
            "  {}: {} pitches, max skip {}",
            piece.line_name(line),
            piece.line_range_size(line),
            piece.max_skip(line)
        );
    }
    let env = CounterpointEnv::new(piece, config.environment.clone());
    println!("  {} valid first actions.", env.valid_actions().len());

    println!(
        "[3/4] Searching (beam width {}, seed {})...",
        config.search.beam_width, config.search.seed
    );
    let records = optimize_with_monte_carlo_beam_search(&env, &config.search)?;
    for (rank, record) in records.iter().enumerate() {
        println!(
            "  #{}: reward {:.4} with {:?}",
            rank + 1,
            record.reward,
            record.actions
        );
    }

    println!("[4/4] Best piece:");
    let mut best = env.clone();
    if let Some(record) = records.first() {
        roll_in(&mut best, &record.actions)?;
    }
    print!("{}", best.piece().piano_roll().to_ascii());
    for (function, score) in best.score_breakdown() {
        println!("  {function:?}: {score:.4}");
    }
    if print_json {
        println!("{}", serde_json::to_string_pretty(&best.render())?);
    }
    Ok(())
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}
