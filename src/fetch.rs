//! Network fetch memoisation with per-URL request deduplication.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Failure reported by an [`HttpTransport`] implementation.
///
/// Transport errors are reduced to a message plus a transient flag so the
/// shared fetch handles can deliver the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
  message: String,
  transient: bool,
}

impl TransportError {
  /// A permanent transport failure.
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      transient: false,
    }
  }

  /// A transient failure (connection reset) eligible for one retry.
  pub fn transient(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      transient: true,
    }
  }

  /// Whether the failure is worth retrying once.
  pub fn is_transient(&self) -> bool {
    self.transient
  }
}

/// Errors surfaced by the fetch cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The transport failed after any transparent retries.
  #[error("request for `{url}` failed: {source}")]
  Transport {
    /// URL that was being fetched.
    url: String,
    /// Final transport failure.
    source: TransportError,
  },
  /// A response body requested as text is not valid UTF-8.
  #[error("response body for `{url}` is not valid UTF-8")]
  Encoding {
    /// URL that was being fetched.
    url: String,
  },
}

/// Minimal asynchronous HTTP transport used by the fetch cache.
///
/// The production implementation is [`ReqwestTransport`]; tests substitute an
/// in-memory double so no network is involved.
#[async_trait]
pub trait HttpTransport: Send + Sync {
  /// Perform a GET request and return the response body.
  async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// [`HttpTransport`] backed by a shared [`reqwest::Client`].
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// Build a transport sending the provided `User-Agent` on every request.
  ///
  /// Identifying as a modern browser keeps content negotiation consistent,
  /// e.g. font hosts serve compressed font formats instead of legacy ones.
  pub fn new(user_agent: &str) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .user_agent(user_agent)
      .build()
      .map_err(|err| TransportError::new(format!("failed to build HTTP client: {err}")))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn get(&self, url: &str) -> Result<Vec<u8>, TransportError> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(classify_reqwest_error)?;

    let status = response.status();
    if !status.is_success() {
      return Err(TransportError::new(format!("HTTP {status}")));
    }

    let body = response.bytes().await.map_err(classify_reqwest_error)?;
    Ok(body.to_vec())
  }
}

/// Map a reqwest error onto a transport error, flagging connection resets.
fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
  if error_chain_contains_reset(&err) {
    TransportError::transient(err.to_string())
  } else {
    TransportError::new(err.to_string())
  }
}

fn error_chain_contains_reset(err: &(dyn std::error::Error + 'static)) -> bool {
  let mut source = Some(err);
  while let Some(current) = source {
    if let Some(io) = current.downcast_ref::<std::io::Error>()
      && io.kind() == std::io::ErrorKind::ConnectionReset
    {
      return true;
    }
    source = current.source();
  }
  false
}

type TextCell = Arc<OnceCell<Result<Arc<str>, FetchError>>>;
type BytesCell = Arc<OnceCell<Result<Arc<[u8]>, FetchError>>>;

/// Deduplicating fetch cache.
///
/// For a given URL and body kind at most one network request is issued per
/// run; all callers share the eventual outcome, success or failure. Text and
/// binary requests are cached separately because an asset discovered as a
/// stylesheet may be re-discovered as a raw asset, and the two must not
/// collide.
pub struct FetchCache {
  transport: Arc<dyn HttpTransport>,
  transient_retries: usize,
  text: Mutex<HashMap<String, TextCell>>,
  bytes: Mutex<HashMap<String, BytesCell>>,
}

impl FetchCache {
  /// Create a cache issuing requests over `transport`.
  pub fn new(transport: Arc<dyn HttpTransport>, transient_retries: usize) -> Self {
    Self {
      transport,
      transient_retries,
      text: Mutex::new(HashMap::new()),
      bytes: Mutex::new(HashMap::new()),
    }
  }

  /// Fetch a URL as text, sharing the request with concurrent callers.
  pub async fn text(&self, url: &str) -> Result<Arc<str>, FetchError> {
    let cell = {
      let mut cells = self.text.lock();
      Arc::clone(cells.entry(url.to_string()).or_default())
    };

    cell
      .get_or_init(|| async {
        let body = self.request(url).await?;
        match String::from_utf8(body) {
          Ok(text) => Ok(Arc::from(text)),
          Err(_) => Err(FetchError::Encoding {
            url: url.to_string(),
          }),
        }
      })
      .await
      .clone()
  }

  /// Fetch a URL as raw bytes, sharing the request with concurrent callers.
  pub async fn bytes(&self, url: &str) -> Result<Arc<[u8]>, FetchError> {
    let cell = {
      let mut cells = self.bytes.lock();
      Arc::clone(cells.entry(url.to_string()).or_default())
    };

    cell
      .get_or_init(|| async {
        let body = self.request(url).await?;
        Ok(Arc::from(body))
      })
      .await
      .clone()
  }

  /// Issue the request, retrying transient connection resets transparently.
  async fn request(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    debug!(url, "fetching remote asset");
    let mut attempts = 0;
    loop {
      match self.transport.get(url).await {
        Ok(body) => return Ok(body),
        Err(err) if err.is_transient() && attempts < self.transient_retries => {
          attempts += 1;
          warn!(url, attempt = attempts, "retrying after connection reset");
        }
        Err(source) => {
          return Err(FetchError::Transport {
            url: url.to_string(),
            source,
          });
        }
      }
    }
  }
}


#[cfg(test)]
mod tests {
  use super::testing::FakeTransport;
  use super::*;

  fn cache(transport: &Arc<FakeTransport>) -> FetchCache {
    FetchCache::new(Arc::clone(transport) as Arc<dyn HttpTransport>, 1)
  }

  #[tokio::test]
  async fn concurrent_text_fetches_share_one_request() {
    let transport = FakeTransport::new();
    transport.respond("https://cdn.example.com/app.css", b"body{}");
    let cache = cache(&transport);

    let (first, second) = tokio::join!(
      cache.text("https://cdn.example.com/app.css"),
      cache.text("https://cdn.example.com/app.css"),
    );

    assert_eq!(first.unwrap().as_ref(), "body{}");
    assert_eq!(second.unwrap().as_ref(), "body{}");
    assert_eq!(transport.hits("https://cdn.example.com/app.css"), 1);
  }

  #[tokio::test]
  async fn text_and_byte_caches_do_not_collide() {
    let transport = FakeTransport::new();
    transport.respond("https://cdn.example.com/app.css", b"body{}");
    let cache = cache(&transport);

    cache.text("https://cdn.example.com/app.css").await.unwrap();
    cache.bytes("https://cdn.example.com/app.css").await.unwrap();

    assert_eq!(transport.hits("https://cdn.example.com/app.css"), 2);
  }

  #[tokio::test]
  async fn failures_propagate_to_every_waiter() {
    let transport = FakeTransport::new();
    transport.fail(
      "https://cdn.example.com/gone.png",
      TransportError::new("HTTP 404 Not Found"),
    );
    let cache = cache(&transport);

    let (first, second) = tokio::join!(
      cache.bytes("https://cdn.example.com/gone.png"),
      cache.bytes("https://cdn.example.com/gone.png"),
    );

    assert_eq!(first.unwrap_err(), second.unwrap_err());
    assert_eq!(transport.hits("https://cdn.example.com/gone.png"), 1);
  }

  #[tokio::test]
  async fn transient_resets_are_retried_once() {
    let transport = FakeTransport::new();
    transport.enqueue(
      "https://cdn.example.com/flaky.js",
      Err(TransportError::transient("connection reset by peer")),
    );
    transport.respond("https://cdn.example.com/flaky.js", b"ok()");
    let cache = cache(&transport);

    let body = cache.bytes("https://cdn.example.com/flaky.js").await.unwrap();

    assert_eq!(body.as_ref(), b"ok()");
    assert_eq!(transport.hits("https://cdn.example.com/flaky.js"), 2);
  }

  #[tokio::test]
  async fn repeated_resets_exhaust_the_retry_budget() {
    let transport = FakeTransport::new();
    transport.fail(
      "https://cdn.example.com/flaky.js",
      TransportError::transient("connection reset by peer"),
    );
    let cache = cache(&transport);

    let result = cache.bytes("https://cdn.example.com/flaky.js").await;

    assert!(matches!(result, Err(FetchError::Transport { .. })));
    assert_eq!(transport.hits("https://cdn.example.com/flaky.js"), 2);
  }

  #[tokio::test]
  async fn non_utf8_text_bodies_are_rejected() {
    let transport = FakeTransport::new();
    transport.respond("https://cdn.example.com/app.css", &[0xff, 0xfe]);
    let cache = cache(&transport);

    let result = cache.text("https://cdn.example.com/app.css").await;

    assert!(matches!(result, Err(FetchError::Encoding { .. })));
  }
}
