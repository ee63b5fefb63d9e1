//! Check previews files: report parse errors and warnings.
//!
//! Usage:
//!   check_previews [OPTIONS] FILE.json ...
//!
//! Options:
//!   --human, -H      Human-readable output
//!   --normalize, -n  Print the canonical form of the accepted rules
//!
//! Exits with status 1 when any file has an error.

use clap::Parser;
use logpreview::parser::parse_file;
use logpreview::store::to_string_pretty;
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "check_previews", about = "Check previews configuration files")]
struct Args {
    #[arg(short = 'H', long)]
    human: bool,
    #[arg(short, long)]
    normalize: bool,
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_message(path: &str, severity: &str, message: &str, style: OutputStyle) {
    match style {
        OutputStyle::Compact => println!("{}: {}: {}", path, severity, message),
        OutputStyle::Human => println!("  {:<8} {}", severity, message),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = TermLogger::init(
        LevelFilter::Warn,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
    let style = if args.human {
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };

    let mut total_errors = 0usize;
    let mut total_warnings = 0usize;
    for path in &args.files {
        let display_path = path.display().to_string();
        let report = parse_file(path);
        if matches!(style, OutputStyle::Human) {
            println!(
                "{}: {} rule(s) accepted",
                display_path,
                report.rules.len()
            );
        }
        for error in &report.errors {
            print_message(&display_path, "error", error, style);
        }
        for warning in &report.warnings {
            print_message(&display_path, "warning", warning, style);
        }
        total_errors += report.errors.len();
        total_warnings += report.warnings.len();
        if args.normalize {
            println!("{}", to_string_pretty(&report.rules)?);
        }
    }

    if total_errors > 0 || total_warnings > 0 {
        eprintln!(
            "check: {} error(s), {} warning(s)",
            total_errors, total_warnings
        );
    }
    if total_errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
