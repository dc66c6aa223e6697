//! Policy library synchronization and sample discovery.
//!
//! The upstream policy library is mirrored with a shallow `git` clone and
//! walked for sample directories. A sample is usable only when it carries a
//! constraint plus at least one allowed and one disallowed example; anything
//! less is skipped with a log line, never a batch failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors from library synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Spawning or awaiting `git` failed.
    #[error("failed to run git {action}: {source}")]
    Spawn {
        /// The git action attempted.
        action: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// `git` exited non-zero.
    #[error("git {action} failed ({status}): {stderr}")]
    Git {
        /// The git action attempted.
        action: &'static str,
        /// Exit status display string.
        status: String,
        /// Captured stderr.
        stderr: String,
    },
    /// `git` exceeded the configured timeout.
    #[error("git {action} timed out after {seconds}s")]
    Timeout {
        /// The git action attempted.
        action: &'static str,
        /// Timeout in seconds.
        seconds: u64,
    },
}

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

/// Shallow clone/update of the upstream policy library.
#[derive(Debug, Clone)]
pub struct LibrarySync {
    repo_url: String,
    local_dir: PathBuf,
    timeout: Duration,
}

impl LibrarySync {
    /// Create a synchronizer for `repo_url` mirrored at `local_dir`.
    pub fn new(repo_url: impl Into<String>, local_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_url: repo_url.into(),
            local_dir: local_dir.into(),
            timeout,
        }
    }

    /// The local mirror directory.
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Clone the library if absent, otherwise pull.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when `git` cannot be spawned, exits non-zero,
    /// or exceeds the timeout.
    pub async fn sync(&self) -> Result<(), SyncError> {
        if self.local_dir.exists() {
            info!(dir = %self.local_dir.display(), "updating policy library");
            self.run_git("pull", &["pull"], Some(&self.local_dir)).await
        } else {
            info!(url = %self.repo_url, dir = %self.local_dir.display(), "cloning policy library");
            let dir = self.local_dir.display().to_string();
            self.run_git(
                "clone",
                &["clone", "--depth", "1", &self.repo_url, &dir],
                None,
            )
            .await
        }
    }

    async fn run_git(
        &self,
        action: &'static str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<(), SyncError> {
        let mut command = Command::new("git");
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| SyncError::Timeout {
                action,
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| SyncError::Spawn { action, source })?;

        if !output.status.success() {
            return Err(SyncError::Git {
                action,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// One raw sample: a constraint with paired example documents.
#[derive(Debug, Clone)]
pub struct SampleCase {
    /// Category name (last segment of the category path).
    pub category: String,
    /// Policy directory name.
    pub policy: String,
    /// Sample directory name.
    pub sample: String,
    /// Constraint document text.
    pub constraint: String,
    /// Allowed example text (expected compliant).
    pub allowed: String,
    /// Disallowed example text (expected violating).
    pub disallowed: String,
}

/// Walks a library checkout for usable samples.
#[derive(Debug, Clone)]
pub struct SampleSource {
    root: PathBuf,
    categories: Vec<String>,
    excluded_policies: Vec<String>,
}

impl SampleSource {
    /// Create a source over `root` for the given category paths.
    ///
    /// A policy whose directory name contains any entry of
    /// `excluded_policies` is skipped entirely.
    pub fn new(
        root: impl Into<PathBuf>,
        categories: Vec<String>,
        excluded_policies: Vec<String>,
    ) -> Self {
        Self {
            root: root.into(),
            categories,
            excluded_policies,
        }
    }

    /// Discover all usable samples in deterministic (sorted) order.
    ///
    /// Unreadable directories and incomplete samples are logged and
    /// skipped; this function never errors.
    pub fn discover(&self) -> Vec<SampleCase> {
        let mut samples = Vec::new();
        for category_path in &self.categories {
            let category = category_path
                .rsplit('/')
                .next()
                .unwrap_or(category_path.as_str())
                .to_owned();
            let dir = self.root.join(category_path);
            if !dir.is_dir() {
                warn!(dir = %dir.display(), "category path not found");
                continue;
            }
            for policy_dir in sorted_subdirs(&dir) {
                let policy = dir_name(&policy_dir);
                if self.is_excluded(&policy) {
                    debug!(policy, "skipping excluded policy");
                    continue;
                }
                let samples_dir = policy_dir.join("samples");
                if !samples_dir.is_dir() {
                    debug!(policy, "no samples directory");
                    continue;
                }
                for sample_dir in sorted_subdirs(&samples_dir) {
                    if let Some(case) = load_sample(&sample_dir, &category, &policy) {
                        samples.push(case);
                    }
                }
            }
        }
        samples
    }

    fn is_excluded(&self, policy: &str) -> bool {
        self.excluded_policies
            .iter()
            .any(|excluded| policy.contains(excluded.as_str()))
    }
}

/// Load one sample directory, or `None` if it lacks a constraint or one
/// example of each outcome.
fn load_sample(dir: &Path, category: &str, policy: &str) -> Option<SampleCase> {
    let sample = dir_name(dir);
    let files = sorted_files(dir);

    let Some(constraint) = files.iter().find(|name| name.as_str() == "constraint.yaml") else {
        debug!(policy, sample, "sample missing constraint.yaml");
        return None;
    };
    let Some(allowed) = files.iter().find(|name| name.starts_with("example_allowed")) else {
        debug!(policy, sample, "sample missing allowed example");
        return None;
    };
    let Some(disallowed) = files
        .iter()
        .find(|name| name.starts_with("example_disallowed") && !name.contains("both"))
    else {
        debug!(policy, sample, "sample missing disallowed example");
        return None;
    };

    let read = |name: &str| match std::fs::read_to_string(dir.join(name)) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(file = name, sample, error = %err, "failed to read sample file");
            None
        }
    };

    let constraint = read(constraint)?;
    let allowed = read(allowed)?;
    let disallowed = read(disallowed)?;

    Some(SampleCase {
        category: category.to_owned(),
        policy: policy.to_owned(),
        sample,
        constraint,
        allowed,
        disallowed,
    })
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut subdirs: Vec<PathBuf> = read_dir_entries(dir)
        .into_iter()
        .filter(|path| path.is_dir() && !dir_name(path).starts_with('.'))
        .collect();
    subdirs.sort();
    subdirs
}

fn sorted_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = read_dir_entries(dir)
        .into_iter()
        .filter(|path| path.is_file())
        .map(|path| dir_name(&path))
        .collect();
    files.sort();
    files
}

fn read_dir_entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect(),
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "failed to read directory");
            Vec::new()
        }
    }
}
