//! Configuration loading.
//!
//! Every field has a default, so running without a config file works out of
//! the box; a TOML file overrides the pieces it names. Sections:
//! `[library]` — upstream sync and discovery, `[oracle]` — delegation
//! knobs, `[output]` — benchmark emission.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Policy library sync and discovery.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Oracle delegation settings.
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Benchmark output settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Upstream policy library settings.
#[derive(Debug, Deserialize)]
pub struct LibraryConfig {
    /// Git URL of the policy library.
    #[serde(default = "default_repo_url")]
    pub repo_url: String,

    /// Local mirror directory.
    #[serde(default = "default_local_dir")]
    pub local_dir: String,

    /// Category paths (relative to the library root) to walk for samples.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Policies skipped entirely; matched as directory-name substrings.
    #[serde(default = "default_excluded_policies")]
    pub excluded_policies: Vec<String>,

    /// Timeout for git operations, in seconds.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            repo_url: default_repo_url(),
            local_dir: default_local_dir(),
            categories: default_categories(),
            excluded_policies: default_excluded_policies(),
            sync_timeout_secs: default_sync_timeout_secs(),
        }
    }
}

impl LibraryConfig {
    /// Git timeout as a [`Duration`].
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Oracle delegation settings.
#[derive(Debug, Deserialize)]
pub struct OracleConfig {
    /// Whether to delegate to the oracle at all.
    #[serde(default = "default_oracle_enabled")]
    pub enabled: bool,

    /// Model identifier passed to the oracle service.
    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Upper bound for one oracle call, in seconds.
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum delay before each oracle call, in milliseconds.
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: default_oracle_enabled(),
            model: default_oracle_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_oracle_timeout_secs(),
            min_call_interval_ms: default_min_call_interval_ms(),
        }
    }
}

impl OracleConfig {
    /// Call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Minimum inter-call delay as a [`Duration`].
    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }
}

/// Benchmark output settings.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving generated task directories.
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Prefix for generated deploy namespaces.
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Difficulty label written into task descriptors.
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            namespace_prefix: default_namespace_prefix(),
            difficulty: default_difficulty(),
        }
    }
}

// Default value functions for serde

fn default_repo_url() -> String {
    "https://github.com/open-policy-agent/gatekeeper-library.git".to_owned()
}
fn default_local_dir() -> String {
    ".gatekeeper-library".to_owned()
}
fn default_categories() -> Vec<String> {
    vec![
        "library/general".to_owned(),
        "library/pod-security-policy".to_owned(),
    ]
}
fn default_excluded_policies() -> Vec<String> {
    [
        "verifydeprecatedapi",
        "ephemeralstoragelimit",
        // Requires sysctl values that are hard to patch safely.
        "forbidden-sysctls",
        // Test drivers don't exist on standard clusters.
        "flexvolume-drivers",
        // Requires a kubelet feature gate.
        "proc-mount",
        // Requires image swapping beyond the substitution tables.
        "allowedrepos",
        "allowedreposv2",
        "disallowedrepos",
        // Requires probe port patching.
        "requiredprobes",
        // Requires fake digest injection.
        "imagedigests",
        // AppArmor not enabled on target hosts.
        "apparmor",
        // Init containers hang without patching beyond the tables.
        "privileged-containers",
    ]
    .iter()
    .map(|name| (*name).to_owned())
    .collect()
}
fn default_sync_timeout_secs() -> u64 {
    300
}
fn default_oracle_enabled() -> bool {
    true
}
fn default_oracle_model() -> String {
    "gemini-2.0-flash".to_owned()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_owned()
}
fn default_oracle_timeout_secs() -> u64 {
    30
}
fn default_min_call_interval_ms() -> u64 {
    500
}
fn default_output_dir() -> String {
    "tasks/gatekeeper".to_owned()
}
fn default_namespace_prefix() -> String {
    "gk-test".to_owned()
}
fn default_difficulty() -> String {
    "medium".to_owned()
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Load configuration from `path` if given, defaults otherwise.
///
/// # Errors
///
/// Returns an error only when an explicit path cannot be loaded.
pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}
