//! Network I/O behind a trait so the fetcher can be exercised offline.

use std::time::Duration;

use async_trait::async_trait;

use super::FetchError;

/// Opens HTTP(S) GET requests.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn get(&self, url: &str) -> Result<Box<dyn Body>, FetchError>;
}

/// A response body read incrementally.
#[async_trait]
pub trait Body: Send {
  /// Total size if the server announced one.
  fn content_length(&self) -> Option<u64>;

  /// Next chunk of the body, or `None` at the end.
  async fn chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// `timeout` bounds connecting and each wait for more body data, never the
  /// whole transfer.
  pub fn new(timeout: Duration) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .connect_timeout(timeout)
      .read_timeout(timeout)
      .user_agent(concat!("ohook-build/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::Request {
        url: String::new(),
        message: e.to_string(),
      })?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn get(&self, url: &str) -> Result<Box<dyn Body>, FetchError> {
    let response = self.client.get(url).send().await.map_err(|e| FetchError::Request {
      url: url.to_string(),
      message: e.to_string(),
    })?;

    if !response.status().is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: response.status().as_u16(),
      });
    }

    Ok(Box::new(ReqwestBody {
      url: url.to_string(),
      response,
    }))
  }
}

struct ReqwestBody {
  url: String,
  response: reqwest::Response,
}

#[async_trait]
impl Body for ReqwestBody {
  fn content_length(&self) -> Option<u64> {
    self.response.content_length()
  }

  async fn chunk(&mut self) -> Result<Option<Vec<u8>>, FetchError> {
    let chunk = self.response.chunk().await.map_err(|e| FetchError::Request {
      url: self.url.clone(),
      message: e.to_string(),
    })?;
    Ok(chunk.map(|bytes| bytes.to_vec()))
  }
}
