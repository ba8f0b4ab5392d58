//! Per-run rehosting engine owning the fetch cache and the file registry.

use std::sync::Arc;

use tracing::debug;

use crate::classify::is_external;
use crate::config::RehostConfig;
use crate::css;
use crate::fetch::{FetchCache, HttpTransport};
use crate::identity::{IdentityError, identity_for};
use crate::models::{AssetKind, FileContent};
use crate::registry::{FileRegistry, ResolveError};

/// Narrow view of a document element carrying URL attributes.
///
/// The engine never sees a document tree; callers hand it handles like this
/// one so any representation (parsed DOM, text splicing, test double) can
/// drive the rewrite.
pub trait UrlAttributeHandle {
  /// Current value of the named attribute, if present.
  fn attribute(&self, name: &str) -> Option<String>;
  /// Replace the named attribute's value.
  fn set_attribute(&mut self, name: &str, value: String);
}

/// Rewrite-and-cache engine for one build pass.
///
/// All caches live on the instance and are discarded with it, so separate
/// runs (watch-mode rebuilds) get isolated state. Cloning is cheap and
/// shares the same run.
#[derive(Clone)]
pub struct Rehoster {
  inner: Arc<RehosterInner>,
}

struct RehosterInner {
  fetcher: FetchCache,
  registry: FileRegistry,
}

impl Rehoster {
  /// Create an engine fetching over `transport`.
  pub fn new(transport: Arc<dyn HttpTransport>, config: &RehostConfig) -> Self {
    Self {
      inner: Arc::new(RehosterInner {
        fetcher: FetchCache::new(transport, config.transient_retries),
        registry: FileRegistry::new(),
      }),
    }
  }

  /// The registry of files discovered during this run.
  pub fn registry(&self) -> &FileRegistry {
    &self.inner.registry
  }

  /// Map an external URL to its local identity, registering it when new.
  ///
  /// Local references yield `None` and are never touched. Registration is
  /// synchronous; the fetch only starts once the registry resolves the
  /// entry.
  pub fn rehost_url(&self, url: &str, kind: AssetKind) -> Result<Option<String>, IdentityError> {
    if !is_external(url) {
      return Ok(None);
    }

    let identity = identity_for(url)?;
    if !self.inner.registry.has(&identity) {
      self.register_producer(&identity, url, kind);
    }
    Ok(Some(identity))
  }

  /// Rewrite one URL-bearing attribute in place.
  ///
  /// Returns `true` when the attribute referenced an external resource and
  /// was replaced with its local identity.
  pub fn rewrite_attribute(
    &self,
    element: &mut dyn UrlAttributeHandle,
    name: &str,
    kind: AssetKind,
  ) -> Result<bool, IdentityError> {
    let Some(value) = element.attribute(name) else {
      return Ok(false);
    };

    match self.rehost_url(&value, kind)? {
      Some(identity) => {
        element.set_attribute(name, identity);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Rewrite external `url(...)` references inside fetched stylesheet text.
  ///
  /// Every nested external reference is registered as a raw asset and its
  /// identity spliced into the text.
  pub async fn rewrite_stylesheet_text(
    &self,
    text: &str,
    stylesheet_url: &str,
  ) -> Result<String, ResolveError> {
    css::rewrite_stylesheet(text, stylesheet_url, |resolved| {
      let engine = self.clone();
      async move {
        engine
          .rehost_url(&resolved, AssetKind::Raw)
          .map_err(ResolveError::from)
      }
    })
    .await
  }

  fn register_producer(&self, identity: &str, url: &str, kind: AssetKind) {
    debug!(url, identity, ?kind, "rehosting external reference");
    let engine = self.clone();
    let url = url.to_string();

    match kind {
      AssetKind::Stylesheet => self.inner.registry.register(identity, async move {
        let body = engine.inner.fetcher.text(&url).await?;
        let rewritten = engine.rewrite_stylesheet_text(&body, &url).await?;
        Ok(FileContent::Text(rewritten))
      }),
      AssetKind::Script | AssetKind::Raw => self.inner.registry.register(identity, async move {
        let body = engine.inner.fetcher.bytes(&url).await?;
        Ok(FileContent::Bytes(body.to_vec()))
      }),
    }
  }
}
