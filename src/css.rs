//! Scanning and rewriting of `url(...)` references inside stylesheet text.
//!
//! Only the `url()` syntax is recognised; no further CSS parsing happens
//! here. References are collected with their byte spans in the original
//! text, replacements are computed concurrently, and all edits are applied
//! in one reverse-offset pass so asynchronous completion order can never
//! corrupt the output.

use std::future::Future;
use std::ops::Range;

use futures::future::join_all;
use url::Url;

use crate::classify::is_external;
use crate::registry::ResolveError;

/// One `url(...)` reference found in stylesheet text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReference {
  /// Byte span of the token in the original text, excluding any quotes.
  pub span: Range<usize>,
  /// The token with surrounding quotes stripped.
  pub target: String,
  /// Whether the token was quoted in the source.
  pub quoted: bool,
}

/// Scan stylesheet text for `url( <token> )` expressions.
///
/// Tokens may be single-quoted, double-quoted, or bare (terminated by the
/// closing parenthesis). The span always covers the token alone so a
/// replacement can be spliced without touching the surrounding syntax.
pub fn scan_url_references(css: &str) -> Vec<UrlReference> {
  let bytes = css.as_bytes();
  let mut references = Vec::new();
  let mut index = 0;

  while index + 4 <= bytes.len() {
    if !bytes[index..index + 4].eq_ignore_ascii_case(b"url(") {
      index += 1;
      continue;
    }
    // `blur(...)` and friends end in the same four bytes.
    if index > 0 && is_ident_byte(bytes[index - 1]) {
      index += 4;
      continue;
    }

    let mut cursor = index + 4;
    while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
      cursor += 1;
    }
    if cursor >= bytes.len() {
      break;
    }

    match bytes[cursor] {
      quote @ (b'"' | b'\'') => {
        let start = cursor + 1;
        let Some(end) = find_byte(bytes, start, quote) else {
          index = cursor + 1;
          continue;
        };
        let mut close = end + 1;
        while close < bytes.len() && bytes[close].is_ascii_whitespace() {
          close += 1;
        }
        if close < bytes.len() && bytes[close] == b')' {
          references.push(UrlReference {
            span: start..end,
            target: css[start..end].to_string(),
            quoted: true,
          });
          index = close + 1;
        } else {
          index = end + 1;
        }
      }
      _ => {
        let Some(close) = find_byte(bytes, cursor, b')') else {
          break;
        };
        let raw = css[cursor..close].trim_end();
        if raw.is_empty() {
          index = close + 1;
          continue;
        }
        references.push(UrlReference {
          span: cursor..cursor + raw.len(),
          target: raw.to_string(),
          quoted: false,
        });
        index = close + 1;
      }
    }
  }

  references
}

/// Resolve a reference token against the URL its stylesheet was fetched from.
///
/// Explicitly relative tokens (`./x`, `../x`) use standard relative-URL
/// resolution against the stylesheet's directory name (without a trailing
/// slash, so `../` steps out of the directory containing the stylesheet).
/// Tokens that already carry a scheme or host are returned as-is. Anything
/// else (root-relative or bare paths) is appended to the stylesheet URL's
/// directory prefix. Returns `None` when no usable absolute URL can be
/// derived, in which case the original token must be left untouched.
pub fn resolve_reference(stylesheet_url: &str, target: &str) -> Option<String> {
  if target.is_empty() {
    return None;
  }

  if target.starts_with("./") || target.starts_with("../") {
    let directory = directory_prefix(stylesheet_url)?;
    let anchor = Url::parse(directory.trim_end_matches('/')).ok()?;
    return anchor.join(target).ok().map(|resolved| resolved.to_string());
  }

  if is_external(target) || has_scheme(target) {
    return Some(target.to_string());
  }

  let prefix = directory_prefix(stylesheet_url)?;
  Some(format!("{prefix}{target}"))
}

/// Rewrite every external `url(...)` reference using the supplied replacer.
///
/// The replacer receives the resolved absolute URL and returns the local path
/// to splice in, or `None` to leave the token alone. Replacements are
/// computed concurrently; edits are addressed by original byte offsets. A
/// replacement standing where a bare token was is emitted quoted, since the
/// local path may not be a valid bare CSS token.
pub async fn rewrite_stylesheet<F, Fut>(
  css: &str,
  stylesheet_url: &str,
  replace: F,
) -> Result<String, ResolveError>
where
  F: Fn(String) -> Fut,
  Fut: Future<Output = Result<Option<String>, ResolveError>>,
{
  let mut candidates = Vec::new();
  for reference in scan_url_references(css) {
    let Some(resolved) = resolve_reference(stylesheet_url, &reference.target) else {
      continue;
    };
    if !is_external(&resolved) {
      continue;
    }
    candidates.push((reference, resolved));
  }

  let replacements = join_all(
    candidates
      .iter()
      .map(|(_, resolved)| replace(resolved.clone())),
  )
  .await;

  let mut edits = Vec::new();
  for ((reference, _), replacement) in candidates.iter().zip(replacements) {
    let Some(path) = replacement? else {
      continue;
    };
    let value = if reference.quoted {
      path
    } else {
      quote_css_string(&path)
    };
    edits.push((reference.span.clone(), value));
  }

  Ok(apply_edits(css, edits))
}

/// Apply (span, replacement) edits addressed by original byte offsets.
///
/// Edits are applied in reverse offset order so earlier spans remain valid
/// while later ones are spliced.
pub fn apply_edits(text: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
  edits.sort_by_key(|(span, _)| span.start);
  let mut output = text.to_string();
  for (span, replacement) in edits.into_iter().rev() {
    output.replace_range(span, &replacement);
  }
  output
}

fn is_ident_byte(byte: u8) -> bool {
  byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
  bytes[from..]
    .iter()
    .position(|&byte| byte == needle)
    .map(|position| from + position)
}

/// Scheme prefix per RFC 3986: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":".
fn has_scheme(value: &str) -> bool {
  let Some((scheme, _)) = value.split_once(':') else {
    return false;
  };
  let mut chars = scheme.chars();
  match chars.next() {
    Some(first) if first.is_ascii_alphabetic() => {
      chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    }
    _ => false,
  }
}

/// Directory prefix of a stylesheet URL, ending in `/`.
fn directory_prefix(stylesheet_url: &str) -> Option<String> {
  let base = Url::parse(stylesheet_url).ok()?;
  base.join(".").ok().map(|directory| directory.to_string())
}

fn quote_css_string(value: &str) -> String {
  let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
  format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spans(css: &str) -> Vec<(String, bool)> {
    scan_url_references(css)
      .into_iter()
      .map(|reference| (reference.target, reference.quoted))
      .collect()
  }

  #[test]
  fn scans_quoted_and_bare_tokens() {
    let css = r#"a{background:url("a.png")}b{background:url('b.png')}c{background:url( c.png )}"#;
    assert_eq!(spans(css), vec![
      ("a.png".to_string(), true),
      ("b.png".to_string(), true),
      ("c.png".to_string(), false),
    ]);
  }

  #[test]
  fn spans_cover_the_token_without_quotes() {
    let css = r#"x{background:url( "img/a.png" )}"#;
    let references = scan_url_references(css);
    assert_eq!(&css[references[0].span.clone()], "img/a.png");
  }

  #[test]
  fn ignores_longer_identifiers_ending_in_url() {
    assert!(scan_url_references("x{filter:blur(4px)}").is_empty());
    assert_eq!(spans("x{filter:blur(4px);background:url(a.png)}").len(), 1);
  }

  #[test]
  fn skips_empty_and_unterminated_tokens() {
    assert!(scan_url_references("x{background:url()}").is_empty());
    assert!(scan_url_references("x{background:url(\"a.png\"").is_empty());
  }

  #[test]
  fn resolves_parent_references_against_the_stylesheet_directory() {
    let resolved =
      resolve_reference("https://cdn.example.com/styles/a/app.css", "../img/a.png").unwrap();
    assert_eq!(resolved, "https://cdn.example.com/img/a.png");
  }

  #[test]
  fn resolves_same_directory_references() {
    let resolved =
      resolve_reference("https://cdn.example.com/styles/a/app.css", "./img/a.png").unwrap();
    assert_eq!(resolved, "https://cdn.example.com/styles/img/a.png");
  }

  #[test]
  fn clamps_parent_references_at_the_host_root() {
    let resolved = resolve_reference("https://cdn.example.com/app.css", "../img/a.png").unwrap();
    assert_eq!(resolved, "https://cdn.example.com/img/a.png");
  }

  #[test]
  fn concatenates_bare_paths_onto_the_directory_prefix() {
    let resolved =
      resolve_reference("https://cdn.example.com/styles/app.css", "fonts/a.woff2").unwrap();
    assert_eq!(resolved, "https://cdn.example.com/styles/fonts/a.woff2");
  }

  #[test]
  fn passes_through_tokens_that_already_carry_a_host() {
    assert_eq!(
      resolve_reference("https://cdn.example.com/app.css", "//assets.example.com/a.png").unwrap(),
      "//assets.example.com/a.png"
    );
    assert_eq!(
      resolve_reference("https://cdn.example.com/app.css", "data:image/png;base64,aa").unwrap(),
      "data:image/png;base64,aa"
    );
  }

  #[test]
  fn yields_nothing_for_unresolvable_references() {
    assert!(resolve_reference("not a url", "./img/a.png").is_none());
    assert!(resolve_reference("https://cdn.example.com/app.css", "").is_none());
  }

  #[tokio::test]
  async fn replaces_external_references_and_quotes_bare_tokens() {
    let css = "a{background:url(//analytics.example.com/track.png)}b{color:red}";
    let rewritten = rewrite_stylesheet(css, "https://cdn.example.com/app.css", |resolved| async move {
      assert_eq!(resolved, "//analytics.example.com/track.png");
      Ok(Some("/analytics.example.com/track.png".to_string()))
    })
    .await
    .unwrap();

    assert_eq!(
      rewritten,
      "a{background:url(\"/analytics.example.com/track.png\")}b{color:red}"
    );
  }

  #[tokio::test]
  async fn quoted_tokens_keep_their_original_quotes() {
    let css = "a{background:url('https://cdn.example.com/img/a.png')}";
    let rewritten = rewrite_stylesheet(css, "https://cdn.example.com/app.css", |_| async move {
      Ok(Some("/cdn.example.com/img/a.png".to_string()))
    })
    .await
    .unwrap();

    assert_eq!(rewritten, "a{background:url('/cdn.example.com/img/a.png')}");
  }

  #[tokio::test]
  async fn leaves_local_and_data_references_untouched() {
    // The replacer fails loudly, so the test also proves it is never invoked
    // for references that stay local or cannot be resolved.
    let css = "a{background:url(/local/a.png)}b{background:url(data:image/png;base64,aa)}";
    let rewritten = rewrite_stylesheet(css, "not a url", |resolved| async move {
      Err(ResolveError::Fetch(crate::fetch::FetchError::Encoding {
        url: resolved,
      }))
    })
    .await
    .unwrap();

    assert_eq!(rewritten, css);
  }

  #[tokio::test]
  async fn edits_are_applied_at_original_offsets() {
    let css = "a{background:url(https://cdn.example.com/a.png)}\
b{background:url(https://cdn.example.com/bb.png)}";
    let rewritten = rewrite_stylesheet(css, "https://cdn.example.com/app.css", |resolved| async move {
      let path = resolved.trim_start_matches("https:/").to_string();
      Ok(Some(path))
    })
    .await
    .unwrap();

    assert_eq!(
      rewritten,
      "a{background:url(\"/cdn.example.com/a.png\")}b{background:url(\"/cdn.example.com/bb.png\")}"
    );
  }

  #[test]
  fn apply_edits_handles_out_of_order_spans() {
    let text = "one two three";
    let edits = vec![(8..13, "3".to_string()), (0..3, "1".to_string())];
    assert_eq!(apply_edits(text, edits), "1 two 3");
  }
}
