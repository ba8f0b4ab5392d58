//! Classification of URL-bearing attribute values as external or local.

/// Returns `true` when a reference points at an externally-hosted resource.
///
/// External means an explicit `http://` or `https://` scheme or a
/// protocol-relative `//host/...` form. Everything else, including absolute
/// and root-relative paths, `data:` URIs and fragment references, is local
/// and must never enter the rewrite pipeline.
pub fn is_external(value: &str) -> bool {
  value.starts_with("http://") || value.starts_with("https://") || value.starts_with("//")
}
