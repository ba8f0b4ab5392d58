//! Persistence of resolved files under a bundle root with hashed names.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::RehostConfig;
use crate::models::{BundleManifest, EmittedFile, ResolvedFile};

/// Derive the on-disk file name for an identity and its resolved content.
///
/// A short content digest is spliced in before the extension so changed
/// upstream content produces a new name, e.g. `app.css` becomes
/// `app-1a2b3c4d.css`.
pub fn hashed_file_name(identity: &str, content: &[u8], hash_length: usize) -> String {
  let file_name = identity.rsplit('/').next().unwrap_or(identity);
  let digest = hex::encode(Sha256::digest(content));
  let short = &digest[..hash_length.min(digest.len())];

  match file_name.rsplit_once('.') {
    Some((stem, extension)) if !stem.is_empty() => format!("{stem}-{short}.{extension}"),
    _ => format!("{file_name}-{short}"),
  }
}

/// Write every resolved file under `bundle_root`, preserving identity paths.
///
/// Files are written in the order they were materialised, each exactly once,
/// and the returned manifest records where each identity ended up.
pub fn write_bundle(
  files: &[ResolvedFile],
  bundle_root: &Path,
  config: &RehostConfig,
) -> Result<BundleManifest> {
  let mut manifest = BundleManifest::default();

  for file in files {
    let relative = emitted_path(&file.identity, file.content.as_bytes(), config.hash_length);
    let destination = bundle_root.join(&relative);
    if let Some(parent) = destination.parent() {
      fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    fs::write(&destination, file.content.as_bytes())
      .with_context(|| format!("failed to write {}", destination.display()))?;
    debug!(identity = %file.identity, path = %relative, "emitted file");

    manifest.files.push(EmittedFile {
      identity: file.identity.clone(),
      path: relative,
    });
  }

  Ok(manifest)
}

/// Serialise the bundle manifest as prettified JSON next to the emitted files.
pub fn write_manifest(
  manifest: &BundleManifest,
  bundle_root: &Path,
  config: &RehostConfig,
) -> Result<PathBuf> {
  let path = bundle_root.join(&config.manifest_file);
  let json =
    serde_json::to_string_pretty(manifest).context("failed to serialise bundle manifest")?;
  fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
  Ok(path)
}

/// Bundle-relative path for an identity, with the hashed file name.
fn emitted_path(identity: &str, content: &[u8], hash_length: usize) -> String {
  let trimmed = identity.trim_start_matches('/');
  let hashed = hashed_file_name(identity, content, hash_length);
  match trimmed.rsplit_once('/') {
    Some((directory, _)) => format!("{directory}/{hashed}"),
    None => hashed,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::FileContent;
  use tempfile::tempdir;

  #[test]
  fn splices_the_content_hash_before_the_extension() {
    let name = hashed_file_name("/cdn.example.com/app.css", b"body{}", 8);

    let (stem, extension) = name.rsplit_once('.').unwrap();
    assert_eq!(extension, "css");
    let (base, hash) = stem.rsplit_once('-').unwrap();
    assert_eq!(base, "app");
    assert_eq!(hash.len(), 8);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn hashed_names_are_deterministic_and_content_addressed() {
    let first = hashed_file_name("/cdn.example.com/app.css", b"body{}", 8);
    let second = hashed_file_name("/cdn.example.com/app.css", b"body{}", 8);
    let changed = hashed_file_name("/cdn.example.com/app.css", b"body{color:red}", 8);

    assert_eq!(first, second);
    assert_ne!(first, changed);
  }

  #[test]
  fn names_without_extensions_get_a_hash_suffix() {
    let name = hashed_file_name("/www.googletagmanager.com/gtag", b"x", 8);
    assert!(name.starts_with("gtag-"));
    assert!(!name.contains('.'));
  }

  #[test]
  fn writes_files_under_their_identity_directories() {
    let temp = tempdir().unwrap();
    let config = RehostConfig::default();
    let files = vec![
      ResolvedFile {
        identity: "/fonts.googleapis.com/Roboto.css".into(),
        content: FileContent::Text("body{}".into()),
      },
      ResolvedFile {
        identity: "/cdn.example.com/img/bg.png".into(),
        content: FileContent::Bytes(vec![0xAB, 0xCD]),
      },
    ];

    let manifest = write_bundle(&files, temp.path(), &config).unwrap();

    assert_eq!(manifest.files.len(), 2);
    let stylesheet = manifest.path_for("/fonts.googleapis.com/Roboto.css").unwrap();
    assert!(stylesheet.starts_with("fonts.googleapis.com/Roboto-"));
    assert_eq!(fs::read_to_string(temp.path().join(stylesheet)).unwrap(), "body{}");

    let image = manifest.path_for("/cdn.example.com/img/bg.png").unwrap();
    assert_eq!(fs::read(temp.path().join(image)).unwrap(), vec![0xAB, 0xCD]);
  }

  #[test]
  fn manifest_is_written_as_json() {
    let temp = tempdir().unwrap();
    let config = RehostConfig::default();
    let manifest = BundleManifest {
      files: vec![EmittedFile {
        identity: "/cdn.example.com/app.css".into(),
        path: "cdn.example.com/app-1a2b3c4d.css".into(),
      }],
    };

    let path = write_manifest(&manifest, temp.path(), &config).unwrap();

    let parsed: BundleManifest =
      serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(
      parsed.path_for("/cdn.example.com/app.css"),
      Some("cdn.example.com/app-1a2b3c4d.css")
    );
  }
}
