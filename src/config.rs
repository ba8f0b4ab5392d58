//! Project configuration loader for rehosting runs.

use std::fs;
use std::path::Path;

use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "rehost.config.json";

/// Browser-like user agent sent with every fetch.
///
/// Hosts negotiate on the user agent; identifying as a current browser keeps
/// responses (compressed font formats in particular) consistent between runs.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Discoverable configuration describing how a rehosting run behaves.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RehostConfig {
  /// User agent attached to every outgoing request.
  pub user_agent: String,
  /// How often a transient connection reset is retried before failing.
  pub transient_retries: usize,
  /// Number of hex digits of the content digest spliced into emitted names.
  pub hash_length: usize,
  /// File name of the serialised bundle manifest.
  pub manifest_file: String,
}

impl Default for RehostConfig {
  fn default() -> Self {
    Self {
      user_agent: DEFAULT_USER_AGENT.into(),
      transient_retries: 1,
      hash_length: 8,
      manifest_file: "rehost_manifest.json".into(),
    }
  }
}

impl RehostConfig {
  /// Attempt to load configuration from the provided directory.
  ///
  /// When the configuration file does not exist or fails to parse we fall
  /// back to default values so downstream callers can continue operating
  /// with sensible assumptions.
  pub fn discover(base_dir: &Path) -> Self {
    let candidate = base_dir.join(DEFAULT_CONFIG_FILE);
    Self::from_path(&candidate).unwrap_or_default()
  }

  /// Read configuration from a specific JSON file.
  pub fn from_path(path: &Path) -> Option<Self> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
  }
}
