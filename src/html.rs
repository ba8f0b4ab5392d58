//! Discovery and rewriting of URL-bearing attributes in an HTML document.
//!
//! The engine itself never traverses documents; this module is the text
//! based collaborator that finds candidate `<link>`/`<script>` attributes,
//! feeds them through the engine, and splices replacements back in at their
//! original offsets.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::css::apply_edits;
use crate::engine::{Rehoster, UrlAttributeHandle};
use crate::identity::IdentityError;
use crate::models::AssetKind;

fn link_tag_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(r"(?i)<link\b[^>]*>").expect("invalid link tag regex"))
}

fn script_tag_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(r"(?i)<script\b[^>]*>").expect("invalid script tag regex"))
}

fn rel_stylesheet_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(r#"(?i)\brel\s*=\s*["']?stylesheet["']?"#).expect("invalid rel regex")
  })
}

fn href_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN
    .get_or_init(|| Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']*)["']"#).expect("invalid href regex"))
}

fn src_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN
    .get_or_init(|| Regex::new(r#"(?i)\bsrc\s*=\s*["']([^"']*)["']"#).expect("invalid src regex"))
}

/// Attribute of one matched tag, exposed to the engine through the handle
/// trait so the engine stays decoupled from this text representation.
struct TagAttribute {
  name: &'static str,
  value: String,
  replacement: Option<String>,
}

impl UrlAttributeHandle for TagAttribute {
  fn attribute(&self, name: &str) -> Option<String> {
    (name == self.name).then(|| self.value.clone())
  }

  fn set_attribute(&mut self, name: &str, value: String) {
    if name == self.name {
      self.replacement = Some(value);
    }
  }
}

/// Rewrite stylesheet and script references in an HTML document.
///
/// External `<link rel="stylesheet" href>` and `<script src>` values are
/// replaced with their local identities and registered with the engine;
/// everything else is left byte-for-byte untouched. The registered files are
/// resolved later through the engine's registry.
pub fn rewrite_document(engine: &Rehoster, html: &str) -> Result<String, IdentityError> {
  let mut edits: Vec<(Range<usize>, String)> = Vec::new();

  for tag in link_tag_pattern().find_iter(html) {
    if !rel_stylesheet_pattern().is_match(tag.as_str()) {
      continue;
    }
    collect_attribute_edit(
      engine,
      tag.as_str(),
      tag.start(),
      href_pattern(),
      "href",
      AssetKind::Stylesheet,
      &mut edits,
    )?;
  }

  for tag in script_tag_pattern().find_iter(html) {
    collect_attribute_edit(
      engine,
      tag.as_str(),
      tag.start(),
      src_pattern(),
      "src",
      AssetKind::Script,
      &mut edits,
    )?;
  }

  Ok(apply_edits(html, edits))
}

fn collect_attribute_edit(
  engine: &Rehoster,
  tag: &str,
  tag_start: usize,
  pattern: &Regex,
  name: &'static str,
  kind: AssetKind,
  edits: &mut Vec<(Range<usize>, String)>,
) -> Result<(), IdentityError> {
  let Some(captures) = pattern.captures(tag) else {
    return Ok(());
  };
  let Some(value) = captures.get(1) else {
    return Ok(());
  };

  let mut attribute = TagAttribute {
    name,
    value: value.as_str().to_string(),
    replacement: None,
  };
  engine.rewrite_attribute(&mut attribute, name, kind)?;

  if let Some(replacement) = attribute.replacement {
    let span = tag_start + value.start()..tag_start + value.end();
    edits.push((span, replacement));
  }
  Ok(())
}
