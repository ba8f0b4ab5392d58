//! Registry mapping file identities to their content-producing computations.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::fetch::FetchError;
use crate::identity::IdentityError;
use crate::models::{FileContent, ResolvedFile};

/// Errors raised while resolving a registered file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
  /// Fetching the backing resource failed.
  #[error(transparent)]
  Fetch(#[from] FetchError),
  /// Deriving the identity of a nested reference failed.
  #[error(transparent)]
  Identity(#[from] IdentityError),
}

type FileProducer = Pin<Box<dyn Future<Output = Result<FileContent, ResolveError>> + Send>>;

/// One registered file: its producer and its settled result.
struct FileEntry {
  identity: String,
  /// Position in registration order, used as the emission sequence.
  sequence: u64,
  producer: Mutex<Option<FileProducer>>,
  result: OnceCell<Result<FileContent, ResolveError>>,
}

impl FileEntry {
  /// Run the producer on first access and share its outcome afterwards.
  async fn resolve(self: Arc<Self>) -> Result<FileContent, ResolveError> {
    self
      .result
      .get_or_init(|| {
        let entry = Arc::clone(&self);
        async move {
          let producer = entry
            .producer
            .lock()
            .take()
            .expect("file producer already taken");
          producer.await
        }
      })
      .await
      .clone()
  }
}

/// Per-run cache of file identities and their lazily-started producers.
///
/// Registration is synchronous and idempotent, so duplicate detection is
/// race-free even though resolution is asynchronous. Every registration bumps
/// a generation counter; [`FileRegistry::materialize_all`] re-checks the
/// counter between passes so files discovered while earlier ones were still
/// resolving are driven to completion too.
pub struct FileRegistry {
  entries: Mutex<BTreeMap<String, Arc<FileEntry>>>,
  generation: AtomicU64,
}

impl Default for FileRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl FileRegistry {
  /// Create an empty registry.
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
      generation: AtomicU64::new(0),
    }
  }

  /// Whether an identity is registered, pending or resolved.
  pub fn has(&self, identity: &str) -> bool {
    self.entries.lock().contains_key(identity)
  }

  /// Number of registered identities.
  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  /// Whether no identities have been registered yet.
  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }

  /// Current registration generation.
  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Register a producer for an identity; a no-op when already registered.
  ///
  /// The producer is not started here. It runs on first access through
  /// [`FileRegistry::get`] or [`FileRegistry::materialize_all`].
  pub fn register<F>(&self, identity: &str, producer: F)
  where
    F: Future<Output = Result<FileContent, ResolveError>> + Send + 'static,
  {
    let mut entries = self.entries.lock();
    if entries.contains_key(identity) {
      return;
    }

    let sequence = entries.len() as u64;
    entries.insert(
      identity.to_string(),
      Arc::new(FileEntry {
        identity: identity.to_string(),
        sequence,
        producer: Mutex::new(Some(Box::pin(producer))),
        result: OnceCell::new(),
      }),
    );
    self.generation.fetch_add(1, Ordering::SeqCst);
    debug!(identity, sequence, "registered file identity");
  }

  /// Shared result handle for an identity, starting its producer if needed.
  pub async fn get(&self, identity: &str) -> Option<Result<FileContent, ResolveError>> {
    let entry = self.entries.lock().get(identity).cloned()?;
    Some(entry.resolve().await)
  }

  /// Drive every registered producer to completion and collect the results.
  ///
  /// Producers may register further identities while they run; the loop keeps
  /// driving the currently-known set until the generation stops changing
  /// between passes. The first failure, in registration order, aborts the
  /// materialisation. Results are returned in registration order.
  pub async fn materialize_all(&self) -> Result<Vec<ResolvedFile>, ResolveError> {
    loop {
      let generation = self.generation();
      let pending = self.snapshot();
      debug!(
        generation,
        files = pending.len(),
        "driving registered producers"
      );

      let results = join_all(pending.iter().map(|entry| Arc::clone(entry).resolve())).await;
      for result in results {
        result?;
      }

      if self.generation() == generation {
        break;
      }
    }

    self
      .snapshot()
      .into_iter()
      .map(|entry| {
        let content = entry
          .result
          .get()
          .expect("registered file left unresolved")
          .clone()?;
        Ok(ResolvedFile {
          identity: entry.identity.clone(),
          content,
        })
      })
      .collect()
  }

  /// Snapshot of the current entries in registration order.
  fn snapshot(&self) -> Vec<Arc<FileEntry>> {
    let mut entries: Vec<Arc<FileEntry>> = self.entries.lock().values().cloned().collect();
    entries.sort_by_key(|entry| entry.sequence);
    entries
  }
}
