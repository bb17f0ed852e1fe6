//! CLI console utilities

use beamlink_core::{IoKind, IoRecord};
use colored::*;
use std::io::{self, Write};

/// CLI console for formatted output
pub struct CliConsole {
    verbose: bool,
}

impl CliConsole {
    pub const fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Print an info message (verbose only)
    pub fn info(&self, message: &str) {
        if self.verbose {
            println!("{} {}", "ℹ".blue().bold(), message);
        }
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", "✓".green().bold(), message.green());
    }

    pub fn warn(&self, message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    }

    pub fn print_header(&self, title: &str) {
        println!();
        println!("{}", title.bold().underline());
        println!("{}", "=".repeat(title.len()).dimmed());
    }

    /// Print a `key: value` line
    pub fn field(&self, key: &str, value: impl std::fmt::Display) {
        println!("  {} {}", format!("{key}:").cyan(), value);
    }

    /// Print console output of a shell; input echoes are skipped
    pub fn shell_output(&self, record: &IoRecord) {
        match record.kind {
            IoKind::Stdin => {}
            IoKind::Stdout => {
                print!("{}", record.text);
                let _ = io::stdout().flush();
            }
            IoKind::Stderr => {
                eprint!("{}", record.text.red());
                let _ = io::stderr().flush();
            }
        }
    }
}
