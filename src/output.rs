//! Console summaries.
//!
//! Per-file progress goes through `tracing`; this module only prints the
//! end-of-run tables a person at the terminal reads.

use crate::report::RunReport;
use crate::undo::UndoReport;
use colored::*;
use std::collections::BTreeMap;

/// Prints styled summaries for finished runs and undos.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dorg::output::OutputFormatter;
    /// OutputFormatter::error("configuration file not found");
    /// ```
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {message}").yellow());
    }

    /// Prints the per-category table and the totals of a finished run.
    pub fn run_summary(report: &RunReport) {
        if report.dry_run {
            Self::dry_run_notice("no files were moved");
        }
        Self::summary_table(&report.by_category, report.moved + report.planned);

        let verb = if report.dry_run { "Planned" } else { "Moved" };
        println!(
            "{}: {}  Skipped: {}  Errors: {}",
            verb,
            (report.moved + report.planned).to_string().green(),
            report.skipped(),
            if report.errored > 0 {
                report.errored.to_string().red()
            } else {
                report.errored.to_string().normal()
            }
        );
        if report.errored > 0 {
            Self::warning("Some files could not be organized. See the log for details.");
        }
    }

    /// Prints a summary table with file counts by category.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dorg::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("Documents".to_string(), 15);
    /// counts.insert("Images".to_string(), 8);
    /// OutputFormatter::summary_table(&counts, 23);
    /// ```
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = category_counts
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max("Category".len());

        println!("{:<width$} | {}", "Category".bold(), "Files".bold());
        println!("{}", "-".repeat(width + 10));
        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count)
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files)
        );
    }

    pub fn undo_summary(report: &UndoReport) {
        Self::header("UNDO");
        Self::success(&format!("Restored: {}", report.restored_files));

        if !report.skipped_files.is_empty() {
            Self::warning(&format!("Skipped: {}", report.skipped_files.len()));
            for (path, reason) in &report.skipped_files {
                println!("    - {}: {}", path.display(), reason);
            }
        }

        if !report.failed_restores.is_empty() {
            Self::error(&format!("Failed: {}", report.failed_restores.len()));
            for (path, reason) in &report.failed_restores {
                eprintln!("    - {}: {}", path.display(), reason);
            }
        }

        if !report.is_complete_success() {
            Self::warning("History was kept. Fix the issues above and run --undo again.");
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}
