//! Connection contract for the storage service.
//!
//! The engine drives everything through the [`Connection`] trait: one
//! capability per HTTP verb/scope pair, an `attempts` counter reflecting the
//! retries the transport actually made, and the auth handshake timestamp.
//! Orchestrator tests swap in mock implementations; production code uses the
//! reqwest-backed [`HttpConnection`].

mod http;
mod retry;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SwiftError;
use crate::options::Options;
use crate::segment::SegmentSource;

pub use http::{HttpConnection, HttpConnectionFactory};
pub use retry::{classify_status, parse_retry_after, RetryPolicy};

/// Response headers, lower-cased keys.
pub type Headers = HashMap<String, String>;

/// Streaming response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, ConnError>> + Send>>;

/// Transport-populated record attached to every reply and result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseDict {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

/// A successful reply: the value plus the transport record.
#[derive(Debug)]
pub struct Reply<T> {
    pub value: T,
    pub response: ResponseDict,
}

impl<T> Reply<T> {
    pub fn new(value: T, response: ResponseDict) -> Self {
        Self { value, response }
    }
}

/// Outcome of a single connection call.
pub type ConnResult<T> = Result<Reply<T>, ConnError>;

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The server answered with a non-success status.
    #[error("{verb} {path} failed: HTTP {status} {reason}")]
    Http {
        verb: &'static str,
        path: String,
        status: u16,
        reason: String,
        response: ResponseDict,
    },

    /// Network-level error (DNS, refused connection, TLS, mid-body abort).
    #[error("network error on {path}: {source}")]
    Network {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request timed out after the retry budget was spent.
    #[error("timeout on {path}")]
    Timeout { path: String },

    /// Local IO failure while producing the request body.
    #[error("IO error reading request body: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

impl ConnError {
    /// HTTP status of the response, when there was one.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The transport record of the failing exchange, when one was captured.
    #[must_use]
    pub fn response(&self) -> Option<&ResponseDict> {
        match self {
            Self::Http { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// One entry of an account or container listing.
///
/// `subdir` entries appear instead of `name` when listing with a delimiter.
/// `meta` is attached by long account listings after a `head_container`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListEntry {
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Headers>,
}

impl ListEntry {
    /// Creates a plain named entry, as container listings return them.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Paging parameters for `get_account` / `get_container`.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub marker: String,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
}

/// Parameters for `get_object`.
#[derive(Debug, Clone, Default)]
pub struct GetParams {
    pub query_string: Option<String>,
    pub headers: Headers,
}

/// Parameters for `put_object`.
#[derive(Debug, Default)]
pub struct PutParams {
    pub content_length: Option<u64>,
    pub headers: Headers,
    pub query_string: Option<String>,
}

/// Capability set the engine requires from the transport.
///
/// A connection is owned by one worker for the duration of a job; methods
/// take `&mut self` so implementations can track per-call retry counters
/// without interior locking.
#[async_trait]
pub trait Connection: Send {
    async fn get_account(&mut self, params: &ListParams) -> ConnResult<Vec<ListEntry>>;

    async fn get_container(
        &mut self,
        container: &str,
        params: &ListParams,
    ) -> ConnResult<Vec<ListEntry>>;

    async fn head_account(&mut self) -> ConnResult<Headers>;

    async fn head_container(&mut self, container: &str) -> ConnResult<Headers>;

    async fn head_object(&mut self, container: &str, object: &str) -> ConnResult<Headers>;

    async fn get_object(
        &mut self,
        container: &str,
        object: &str,
        params: &GetParams,
    ) -> ConnResult<(Headers, BodyStream)>;

    /// Uploads a body; returns the etag reported by the server (may be
    /// empty when the server omits it).
    async fn put_object(
        &mut self,
        container: &str,
        object: &str,
        body: SegmentSource,
        params: PutParams,
    ) -> ConnResult<String>;

    async fn post_account(&mut self, headers: &Headers) -> ConnResult<()>;

    async fn post_container(&mut self, container: &str, headers: &Headers) -> ConnResult<()>;

    async fn post_object(
        &mut self,
        container: &str,
        object: &str,
        headers: &Headers,
    ) -> ConnResult<()>;

    /// Server-side copy to `destination` of the form `/<container>/<object>`.
    async fn copy_object(
        &mut self,
        container: &str,
        object: &str,
        destination: &str,
        headers: &Headers,
        fresh_metadata: bool,
    ) -> ConnResult<()>;

    async fn delete_object(
        &mut self,
        container: &str,
        object: &str,
        query_string: Option<&str>,
    ) -> ConnResult<()>;

    async fn put_container(&mut self, container: &str, headers: &Headers) -> ConnResult<()>;

    async fn delete_container(&mut self, container: &str) -> ConnResult<()>;

    /// Attempts made by the most recent call, including retries.
    fn attempts(&self) -> u32;

    /// Wall-clock instant the auth handshake finished, seconds since epoch.
    fn auth_end_time(&self) -> f64;
}

/// Produces fresh connections for workers.
///
/// Shared read-only across every pool of a service; each worker checks out
/// its own connection.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Connection>, SwiftError>;
}

/// Builds the default reqwest-backed factory from merged options.
pub fn default_factory(options: &Options) -> Result<Box<dyn ConnectionFactory>, SwiftError> {
    Ok(Box::new(HttpConnectionFactory::from_options(options)?))
}
