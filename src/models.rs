//! Data structures shared between the rehosting engine and the emission phase.

use serde::{Deserialize, Serialize};

/// Role an external reference plays in the document being rehosted.
///
/// The role decides which fetch cache serves the resource: stylesheets need
/// text so their embedded references can be scanned, everything else is kept
/// as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
  /// A stylesheet whose body is scanned for nested `url(...)` references.
  Stylesheet,
  /// A script body, stored verbatim.
  Script,
  /// Any other asset (images, fonts, ...) stored verbatim.
  Raw,
}

/// Resolved body of a registered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
  /// Rewritten stylesheet text.
  Text(String),
  /// Verbatim bytes of a script or raw asset.
  Bytes(Vec<u8>),
}

impl FileContent {
  /// Raw bytes of the content, suitable for hashing and persistence.
  pub fn as_bytes(&self) -> &[u8] {
    match self {
      Self::Text(text) => text.as_bytes(),
      Self::Bytes(bytes) => bytes,
    }
  }
}

/// A file identity together with its settled content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
  /// Canonical identity the file was registered under, rooted at `/`.
  pub identity: String,
  /// Content decided for the identity.
  pub content: FileContent,
}

/// Mapping from a file identity to the path it was emitted at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmittedFile {
  /// Canonical identity the file was registered under.
  pub identity: String,
  /// Path of the written file relative to the bundle root.
  pub path: String,
}

/// Serializable summary of an emitted bundle.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BundleManifest {
  /// Emitted files in the order their identities were registered.
  pub files: Vec<EmittedFile>,
}

impl BundleManifest {
  /// Look up the emitted path for an identity.
  pub fn path_for(&self, identity: &str) -> Option<&str> {
    self
      .files
      .iter()
      .find(|file| file.identity == identity)
      .map(|file| file.path.as_str())
  }
}
