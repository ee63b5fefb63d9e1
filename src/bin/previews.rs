//! Manage preview rules and decode log lines with them.
//!
//! Usage:
//!   previews [--config FILE] [-v...] list
//!   previews import FILE
//!   previews remove NAME | clear | enable NAME | disable NAME
//!   previews decode [--rule NAME] [FILE ...]
//!
//! `decode` reads stdin when no file is given. Each line is decoded with the
//! named rule, or with the first enabled rule that matches it.

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use logpreview::dump::outcome_to_dump;
use logpreview::{ConfigStore, DecodeOutcome, PreviewRegistry};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "previews", about = "Decode log lines with declarative preview rules")]
struct Cli {
    /// Previews file (default: <config dir>/logpreview/previews.json)
    #[arg(long, env = "LOGPREVIEW_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// -v for info, -vv for debug logging
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List rules in registry order
    List,
    /// Merge the rules of a previews file into the configuration
    Import { file: PathBuf },
    Remove { name: String },
    /// Remove every rule
    Clear,
    Enable { name: String },
    Disable { name: String },
    /// Decode lines from files or stdin
    Decode {
        #[arg(long)]
        rule: Option<String>,
        files: Vec<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    // ignored: a logger may already be installed
    let _ = TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

fn decode_lines(
    registry: &PreviewRegistry,
    rule: Option<&str>,
    source: &str,
    reader: impl BufRead,
) -> anyhow::Result<usize> {
    let mut failures = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", source))?;
        let line = line.trim_end_matches('\r');
        let decoded = match rule {
            Some(name) => registry
                .decode(name, line)
                .map(|outcome| (name.to_string(), outcome)),
            None => registry.auto_decode(line),
        };
        let Some((name, outcome)) = decoded else {
            continue;
        };
        if matches!(outcome, DecodeOutcome::NoMatch) {
            continue;
        }
        if matches!(outcome, DecodeOutcome::Failed(_)) {
            failures += 1;
        }
        println!("{}:{}: {}", source, index + 1, outcome_to_dump(&name, &outcome));
    }
    Ok(failures)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = match cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::default_location(),
    };
    let (registry, summary) = PreviewRegistry::open(store);
    log::info!(
        "{} previews loaded from {}",
        summary.loaded,
        registry.store().path().display()
    );

    match cli.command {
        Command::List => {
            for rule in registry.all().iter() {
                println!(
                    "{}\t{}\t{}",
                    if rule.enabled { "on" } else { "off" },
                    rule.name,
                    rule.pattern.as_str()
                );
            }
        }
        Command::Import { file } => {
            let result = registry.import_from(&file);
            for warning in &result.warnings {
                eprintln!("{}: warning: {}", file.display(), warning);
            }
            for error in &result.errors {
                eprintln!("{}: error: {}", file.display(), error);
            }
            if !result.ok {
                std::process::exit(1);
            }
            println!("{} previews configured", registry.len());
        }
        Command::Remove { name } => registry.remove_by_name(&name)?,
        Command::Clear => registry.clear_all()?,
        Command::Enable { name } => {
            registry.set_enabled(&name, true)?;
        }
        Command::Disable { name } => {
            registry.set_enabled(&name, false)?;
        }
        Command::Decode { rule, files } => {
            if let Some(name) = &rule {
                if registry.find_by_name(name).is_none() {
                    anyhow::bail!("no preview named '{}'", name);
                }
            }
            let mut failures = 0;
            if files.is_empty() {
                let stdin = io::stdin();
                failures += decode_lines(&registry, rule.as_deref(), "<stdin>", stdin.lock())?;
            } else {
                for path in &files {
                    let file = std::fs::File::open(path)
                        .with_context(|| format!("opening {}", path.display()))?;
                    failures += decode_lines(
                        &registry,
                        rule.as_deref(),
                        &path.display().to_string(),
                        BufReader::new(file),
                    )?;
                }
            }
            if failures > 0 {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
