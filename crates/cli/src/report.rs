//! Human and JSON renderings of a run.

use exifcraft_core::config::AppConfig;
use exifcraft_core::models::RunSummary;
use std::fmt::Write;

pub fn render_json(summary: &RunSummary) -> serde_json::Result<String> {
    serde_json::to_string_pretty(summary)
}

/// Resolved configuration as JSON. The API key never appears.
pub fn render_config(cfg: &AppConfig) -> serde_json::Result<String> {
    serde_json::to_string_pretty(cfg)
}

pub fn render_text(summary: &RunSummary, verbose: bool) -> String {
    let mut out = String::new();

    if verbose {
        for outcome in &summary.outcomes {
            let _ = writeln!(
                out,
                "{} {}",
                if outcome.success { "[ok]  " } else { "[fail]" },
                outcome.path.display()
            );
            for p in &outcome.dry_run_preview {
                let _ = writeln!(out, "    would write {}: {}", p.tag, p.preview);
            }
            for (tag, value) in &outcome.written {
                let _ = writeln!(out, "    wrote {}: {}", tag, value);
            }
            for s in &outcome.skipped {
                let _ = writeln!(out, "    kept {} (existing: {})", s.tag, s.existing);
            }
            for f in &outcome.task_failures {
                let _ = writeln!(out, "    task {} failed: {}", f.task, f.error);
            }
            for w in &outcome.warnings {
                let _ = writeln!(out, "    warning: {}", w);
            }
            if let Some(err) = &outcome.error {
                let _ = writeln!(out, "    error: {}", err);
            }
        }
        let _ = writeln!(out);
    } else if !summary.failed.is_empty() {
        let _ = writeln!(out, "Failed files:");
        for f in &summary.failed {
            let _ = writeln!(out, "  {}: {}", f.file_name, f.error);
        }
    }

    let elapsed = (summary.finished_at - summary.started_at).num_milliseconds() as f64 / 1000.0;
    let _ = writeln!(
        out,
        "{}: {} succeeded, {} failed, {} of {} files processed in {:.1}s",
        if summary.dry_run {
            "Dry run complete"
        } else {
            "Processing complete"
        },
        summary.successful.len(),
        summary.failed.len(),
        summary.processed(),
        summary.total,
        elapsed
    );
    if summary.cancelled {
        let _ = writeln!(
            out,
            "Cancelled at {}; remaining files were not touched.",
            summary
                .finished_at
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
        );
    }
    out
}
