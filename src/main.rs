//! Replays a recorded encounter through the cooldown tracker and prints what
//! it reconstructed as JSON lines.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;

use cooldown_ledger::{abilities, config, init_logging, replay_file};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Output {
    /// One spell-usable update per line
    #[default]
    Updates,
    /// Coaching advice
    Advice,
    /// Desyncs and mutations on abilities that were not recharging
    Diagnostics,
    /// Per-ability counts
    Summary,
}

#[derive(Parser, Debug)]
#[command(name = "cooldown-ledger")]
#[command(about = "Reconstruct ability cooldowns from a recorded event stream")]
#[command(version)]
struct Args {
    /// JSON-lines event file
    #[arg(required_unless_present = "list_specs")]
    events: Option<PathBuf>,

    /// Embedded spec profile, e.g. "PRIEST/Holy"
    #[arg(short, long)]
    spec: Option<String>,

    /// Extra ability TOML files, merged over the spec profile in order
    #[arg(short, long = "abilities")]
    abilities: Vec<PathBuf>,

    /// Directory holding config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Major cooldown ids for drift advice (overrides config and spec)
    #[arg(short, long = "major")]
    major: Vec<u32>,

    #[arg(short, long, value_enum, default_value_t = Output::Updates)]
    output: Output,

    /// Print the embedded spec profiles and exit
    #[arg(long)]
    list_specs: bool,
}

fn print_lines<T: Serialize>(items: &[T]) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for item in items {
        writeln!(out, "{}", serde_json::to_string(item)?)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.list_specs {
        return print_lines(&abilities::list_all());
    }

    let mut cfg = match &args.config {
        Some(dir) => config::load_or_default(dir)?,
        None => config::ReplayConfig::default(),
    };
    if let Some(spec) = args.spec {
        cfg.spec = spec;
    }
    cfg.ability_files.extend(args.abilities);
    if !args.major.is_empty() {
        cfg.major_cds = args.major;
    }

    init_logging(&cfg.log_filter, cfg.log_dir.as_deref())?;

    let Some(events) = args.events else {
        anyhow::bail!("no event file given");
    };

    let (book, profile_majors) = abilities::assemble(&cfg.spec, &cfg.ability_files)?;
    tracing::info!(
        "Loaded {} abilities ({})",
        book.len(),
        if cfg.spec.is_empty() { "no spec" } else { cfg.spec.as_str() }
    );

    let report = replay_file(&events, book, profile_majors, &cfg)
        .await
        .with_context(|| format!("replaying {}", events.display()))?;

    match args.output {
        Output::Updates     => print_lines(&report.updates),
        Output::Advice      => print_lines(&report.advice),
        Output::Diagnostics => print_lines(&report.diagnostics),
        Output::Summary     => {
            println!("{}", serde_json::to_string_pretty(&report.summary())?);
            Ok(())
        }
    }
}
