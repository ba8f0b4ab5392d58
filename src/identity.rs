//! Deterministic mapping from external URLs to local file identities.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

/// Analytics tag host whose requests all collapse onto one local file.
pub const TAG_MANAGER_HOST: &str = "www.googletagmanager.com";

/// Web-font host whose stylesheets are keyed by font family.
pub const FONT_HOST: &str = "fonts.googleapis.com";

/// Errors raised while deriving a file identity from a URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
  /// The URL string could not be parsed.
  #[error("failed to parse URL `{url}`: {source}")]
  Parse {
    /// Offending URL string.
    url: String,
    /// Underlying parse error.
    source: url::ParseError,
  },
  /// The URL has no host component to derive an identity from.
  #[error("URL `{0}` has no host")]
  MissingHost(String),
  /// A web-font URL is missing the expected `family` query parameter.
  ///
  /// Deriving a fallback identity here would risk colliding distinct font
  /// stylesheets onto one local file, so the derivation fails instead.
  #[error("font stylesheet URL `{0}` is missing the family query parameter")]
  MissingFontFamily(String),
  /// The percent-decoded path is not valid UTF-8.
  #[error("percent-decoded path of `{0}` is not valid UTF-8")]
  PathEncoding(String),
}

/// Derive the canonical local file identity for an external URL.
///
/// The same URL always maps to the same identity within a run. Query-string
/// variation that does not affect the semantic resource identity is
/// deliberately collapsed for the known analytics-tag and web-font hosts so
/// the same logical asset is never rehosted twice under different names:
///
/// - `www.googletagmanager.com` requests all share `/www.googletagmanager.com/gtag.js`;
/// - `fonts.googleapis.com` stylesheets are keyed by the font family name,
///   using only the portion before the first `:` in the `family` value;
/// - any other host maps to `/<host><percent-decoded path>`.
pub fn identity_for(url: &str) -> Result<String, IdentityError> {
  let parsed = parse_external(url)?;
  let host = parsed
    .host_str()
    .ok_or_else(|| IdentityError::MissingHost(url.to_string()))?;

  if host == TAG_MANAGER_HOST {
    return Ok(format!("/{TAG_MANAGER_HOST}/gtag.js"));
  }

  if host == FONT_HOST {
    let family = parsed
      .query_pairs()
      .find(|(name, _)| name == "family")
      .map(|(_, value)| value.into_owned())
      .ok_or_else(|| IdentityError::MissingFontFamily(url.to_string()))?;
    let name = family
      .split(':')
      .next()
      .map(str::trim)
      .filter(|name| !name.is_empty())
      .ok_or_else(|| IdentityError::MissingFontFamily(url.to_string()))?;
    return Ok(format!("/{FONT_HOST}/{name}.css"));
  }

  let path = percent_decode_str(parsed.path())
    .decode_utf8()
    .map_err(|_| IdentityError::PathEncoding(url.to_string()))?;
  Ok(format!("/{host}{path}"))
}

/// Parse an external URL, treating protocol-relative references as `https`.
fn parse_external(url: &str) -> Result<Url, IdentityError> {
  let absolute = match url.strip_prefix("//") {
    Some(rest) => format!("https://{rest}"),
    None => url.to_string(),
  };

  Url::parse(&absolute).map_err(|source| IdentityError::Parse {
    url: url.to_string(),
    source,
  })
}
