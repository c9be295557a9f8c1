// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! CLI output reporter with colored formatting

use crate::classify::ErrorClassification;
use crate::engine::EngineCapabilities;
use crate::job::JobResult;
use colored::*;
use std::time::Duration;

/// CLI reporter for formatted output
pub struct Reporter;

impl Reporter {
    /// Report a finished render
    pub fn report_result(file: &str, output: &str, result: &JobResult) {
        println!("\n{}", "━".repeat(80).bright_black());
        println!("{} {} → {}", "Rendered:".bold(), file.cyan(), output.cyan());
        println!("{}", "━".repeat(80).bright_black());
        println!(
            "  {} {}",
            "Format:".bright_black(),
            result.format.to_string().cyan()
        );
        println!(
            "  {} {}",
            "Primitives:".bright_black(),
            result.stats.primitive_count.to_string().cyan()
        );
        println!(
            "  {} {}",
            "Size:".bright_black(),
            Self::format_bytes(result.stats.byte_size).cyan()
        );

        println!("\n{}", "Timing:".bold());
        let timing = &result.timing;
        println!(
            "  {} {:>8} | {} {:>8} | {} {:>8} | {} {:>8}",
            "Mount:".bright_black(),
            Self::format_duration(Duration::from_millis(timing.mount_ms)).yellow(),
            "Render:".bright_black(),
            Self::format_duration(Duration::from_millis(timing.render_ms)).yellow(),
            "Validate:".bright_black(),
            Self::format_duration(Duration::from_millis(timing.validate_ms)).yellow(),
            "Total:".bright_black(),
            Self::format_duration(Duration::from_millis(timing.total_ms)).cyan()
        );

        for warning in &result.warnings {
            Self::report_classification_warning(warning);
        }
        println!("{}", "━".repeat(80).bright_black());
    }

    /// Report a failed render with its classification and engine output
    pub fn report_failure(
        file: &str,
        classification: &ErrorClassification,
        transcript: &[String],
        verbose: bool,
    ) {
        eprintln!("\n{}", "━".repeat(80).bright_black());
        eprintln!("{} {}", "Failed:".red().bold(), file.cyan());
        eprintln!("{}", "━".repeat(80).bright_black());
        eprintln!(
            "  {} {}",
            "Code:".bright_black(),
            classification.code.as_str().red()
        );
        eprintln!("  {} {}", "Message:".bright_black(), classification.message);
        if classification.needs_restart {
            eprintln!(
                "  {}",
                "The engine state is corrupted; it will be recreated.".yellow()
            );
        }

        if verbose && !transcript.is_empty() {
            eprintln!("\n{}", "Engine output:".bold());
            for line in transcript {
                eprintln!("  {}", line.bright_black());
            }
        }
        eprintln!("{}", "━".repeat(80).bright_black());
    }

    /// Report detected engine features
    pub fn report_capabilities(engine: &str, caps: &EngineCapabilities, init: Duration) {
        println!("{} {}", "Engine:".bold(), engine.cyan());
        println!(
            "  {} {}",
            "Version:".bright_black(),
            caps.version.as_deref().unwrap_or("unknown").cyan()
        );
        Self::print_flag("Manifold backend", caps.alternate_backend);
        Self::print_flag("Fast CSG", caps.fast_csg);
        Self::print_flag("Lazy union", caps.lazy_union);
        Self::print_flag("Binary STL", caps.binary_stl);
        println!(
            "  {} {}",
            "Startup:".bright_black(),
            Self::format_duration(init).yellow()
        );
    }

    fn report_classification_warning(warning: &ErrorClassification) {
        println!(
            "\n{} {} {}",
            "⚠️  Warning:".yellow().bold(),
            warning.code.as_str().yellow(),
            warning.message
        );
    }

    /// Report error
    pub fn report_error(message: &str) {
        eprintln!("\n{} {}", "❌ Error:".red().bold(), message);
    }

    /// Report warning
    pub fn report_warning(message: &str) {
        eprintln!("{} {}", "⚠️  Warning:".yellow().bold(), message);
    }

    fn print_flag(name: &str, enabled: bool) {
        let value = if enabled { "yes".green() } else { "no".bright_black() };
        println!("  {} {}", format!("{}:", name).bright_black(), value);
    }

    /// Format duration for display
    fn format_duration(duration: Duration) -> String {
        let micros = duration.as_micros();

        if micros < 1_000 {
            format!("{}µs", micros)
        } else if micros < 1_000_000 {
            format!("{:.2}ms", micros as f64 / 1_000.0)
        } else {
            format!("{:.2}s", micros as f64 / 1_000_000.0)
        }
    }

    fn format_bytes(bytes: u64) -> String {
        if bytes < 1024 {
            format!("{} B", bytes)
        } else if bytes < 1024 * 1024 {
            format!("{:.1} KiB", bytes as f64 / 1024.0)
        } else {
            format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
        }
    }

    /// Print success message
    pub fn success(message: &str) {
        println!("{} {}", "✅".green(), message.green());
    }
}
