//! Run report generation.
//!
//! A markdown summary written next to the generated tasks: counts, the
//! emitted task list with oracle dispositions, and everything skipped.

use std::fmt::Write as _;
use std::io;
use std::path::Path;

use chrono::Utc;

use crate::oracle::delegate::Disposition;
use crate::task::TaskRecord;

/// A sample that produced no task, with the reason.
#[derive(Debug, Clone)]
pub struct SkipRecord {
    /// Policy identifier (`category/policy`).
    pub policy_id: String,
    /// Sample directory name.
    pub sample: String,
    /// Why the sample was skipped.
    pub reason: String,
}

/// Accumulated outcome of one generation run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Tasks emitted this run.
    pub generated: Vec<TaskRecord>,
    /// Samples skipped this run.
    pub skipped: Vec<SkipRecord>,
}

impl RunReport {
    /// Record an emitted task.
    pub fn record_task(&mut self, record: TaskRecord) {
        self.generated.push(record);
    }

    /// Record a skipped sample.
    pub fn record_skip(&mut self, policy_id: impl Into<String>, sample: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkipRecord {
            policy_id: policy_id.into(),
            sample: sample.into(),
            reason: reason.into(),
        });
    }

    /// Number of fixtures whose oracle delegation fell back to the input.
    pub fn fallback_count(&self) -> usize {
        self.generated
            .iter()
            .flat_map(|record| {
                [&record.compliant_disposition, &record.violating_disposition]
            })
            .filter(|disposition| matches!(disposition, Some(Disposition::Fallback(_))))
            .count()
    }

    /// Render the report as markdown.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Gatebench Generation Report\n\n");
        let _ = writeln!(out, "Generated: {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"));

        out.push_str("## Summary\n\n");
        out.push_str("| Outcome | Count |\n");
        out.push_str("|---------|-------|\n");
        let _ = writeln!(out, "| Tasks generated | {} |", self.generated.len());
        let _ = writeln!(out, "| Samples skipped | {} |", self.skipped.len());
        let _ = writeln!(out, "| Oracle fallbacks | {} |", self.fallback_count());
        out.push_str("\n---\n\n");

        if !self.generated.is_empty() {
            out.push_str("## Generated Tasks\n\n");
            for record in &self.generated {
                let _ = writeln!(
                    out,
                    "- `{}` ({}) — namespace `{}`, expected answer `VIOLATING: {}`{}",
                    record.task_name,
                    record.policy_id,
                    record.namespace,
                    record.violating_name,
                    disposition_note(record),
                );
            }
            out.push_str("\n---\n\n");
        }

        if !self.skipped.is_empty() {
            out.push_str("## Skipped Samples\n\n");
            for skip in &self.skipped {
                let _ = writeln!(
                    out,
                    "- `{}` sample `{}`: {}",
                    skip.policy_id, skip.sample, skip.reason
                );
            }
            out.push('\n');
        }

        out
    }

    /// Write the rendered report to `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be written.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.render())
    }
}

fn disposition_note(record: &TaskRecord) -> String {
    let describe = |disposition: &Option<Disposition>| match disposition {
        None => "off",
        Some(Disposition::Repaired) => "repaired",
        Some(Disposition::NoChanges) => "no changes",
        Some(Disposition::Fallback(_)) => "fallback",
    };
    format!(
        " (oracle: alpha {}, beta {})",
        describe(&record.compliant_disposition),
        describe(&record.violating_disposition)
    )
}
