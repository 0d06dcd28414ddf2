//! reqwest-backed [`Connection`] implementation.
//!
//! One `HttpConnection` wraps a shared `reqwest::Client` plus the
//! preauthorised storage endpoint and token. Transient failures are retried
//! here, inside the connection, so callers only see the final outcome and
//! the attempt count.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::{debug, instrument, warn};
use url::Url;

use super::retry::{classify_status, parse_retry_after, RetryPolicy};
use super::{
    BodyStream, ConnError, ConnResult, Connection, ConnectionFactory, GetParams, Headers,
    ListEntry, ListParams, PutParams, Reply, ResponseDict,
};
use crate::clock::epoch_seconds;
use crate::error::SwiftError;
use crate::options::Options;
use crate::segment::SegmentSource;

/// Connect timeout for every request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request timeout; generous because object bodies can be large.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Token header of the storage dialect.
const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Factory producing [`HttpConnection`] handles.
///
/// The underlying `reqwest::Client` is shared; each connection gets its own
/// attempt counter and retry budget.
#[derive(Debug, Clone)]
pub struct HttpConnectionFactory {
    client: Client,
    storage_url: Url,
    token: String,
    policy: RetryPolicy,
    auth_end_time: f64,
}

impl HttpConnectionFactory {
    /// Builds a factory from merged options.
    ///
    /// Token acquisition is out of scope for the engine: the options must
    /// carry a preauthorised storage URL and token in `os_options`.
    pub fn from_options(options: &Options) -> Result<Self, SwiftError> {
        let storage_url = options
            .os_options
            .get("object_storage_url")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                SwiftError::new("preauthorised object_storage_url required in os_options")
            })?;
        let token = options
            .os_options
            .get("auth_token")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SwiftError::new("preauthorised auth_token required in os_options"))?;
        let storage_url = Url::parse(storage_url)
            .map_err(|e| SwiftError::new(format!("invalid storage URL: {e}")))?;
        Ok(Self::new(
            storage_url,
            token.clone(),
            RetryPolicy::with_max_attempts(options.retries + 1),
        ))
    }

    /// Builds a factory from explicit endpoint parts.
    #[must_use]
    pub fn new(storage_url: Url, token: String, policy: RetryPolicy) -> Self {
        Self {
            client: build_client(),
            storage_url,
            token,
            policy,
            auth_end_time: epoch_seconds(),
        }
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn create(&self) -> Result<Box<dyn Connection>, SwiftError> {
        Ok(Box::new(HttpConnection {
            client: self.client.clone(),
            storage_url: self.storage_url.clone(),
            token: self.token.clone(),
            policy: self.policy.clone(),
            attempts: 0,
            auth_end_time: self.auth_end_time,
        }))
    }
}

fn build_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .gzip(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// A single authenticated connection to the storage endpoint.
pub struct HttpConnection {
    client: Client,
    storage_url: Url,
    token: String,
    policy: RetryPolicy,
    attempts: u32,
    auth_end_time: f64,
}

impl HttpConnection {
    /// Joins container/object onto the storage URL, percent-encoding each
    /// component but keeping `/` separators inside object names.
    fn object_url(&self, container: &str, object: Option<&str>) -> String {
        let mut url = self.storage_url.as_str().trim_end_matches('/').to_string();
        url.push('/');
        url.push_str(&urlencoding::encode(container));
        if let Some(object) = object {
            url.push('/');
            url.push_str(&urlencoding::encode(object).replace("%2F", "/"));
        }
        url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTH_TOKEN_HEADER, &self.token)
    }

    /// Sends a replayable request with the retry budget applied.
    ///
    /// `prepare` decorates a fresh builder on every attempt; streaming
    /// uploads go through [`Self::send_once`] instead because their bodies
    /// cannot be replayed.
    async fn send_with_retry(
        &mut self,
        method: Method,
        url: &str,
        prepare: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, ConnError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.attempts = attempt;
            let request = prepare(self.request(method.clone(), url));
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !classify_status(status) || !self.policy.allows_retry(attempt) {
                        return Ok(resp);
                    }
                    let delay = resp
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after)
                        .unwrap_or_else(|| self.policy.backoff_delay(attempt));
                    warn!(url, status, attempt, delay_ms = delay.as_millis() as u64,
                        "retrying after transient status");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if !self.policy.allows_retry(attempt) {
                        return Err(if e.is_timeout() {
                            ConnError::Timeout {
                                path: url.to_string(),
                            }
                        } else {
                            ConnError::Network {
                                path: url.to_string(),
                                source: e,
                            }
                        });
                    }
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(url, attempt, error = %e, "retrying after network error");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Sends a one-shot request (streaming body, no retry).
    async fn send_once(&mut self, url: &str, request: RequestBuilder) -> Result<Response, ConnError> {
        self.attempts = 1;
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                ConnError::Timeout {
                    path: url.to_string(),
                }
            } else {
                ConnError::Network {
                    path: url.to_string(),
                    source: e,
                }
            }
        })
    }

    /// Maps a response into the transport record, failing on non-2xx.
    fn check(verb: &'static str, url: &str, resp: &Response) -> Result<ResponseDict, ConnError> {
        let response = response_dict(resp);
        if resp.status().is_success() {
            Ok(response)
        } else {
            Err(ConnError::Http {
                verb,
                path: url.to_string(),
                status: response.status,
                reason: response.reason.clone(),
                response,
            })
        }
    }

    async fn listing(
        &mut self,
        url: String,
        params: &ListParams,
    ) -> ConnResult<Vec<ListEntry>> {
        let query = listing_query(params);
        let resp = self
            .send_with_retry(Method::GET, &url, |r| r.query(&query))
            .await?;
        let response = Self::check("GET", &url, &resp)?;
        let entries = resp
            .json::<Vec<ListEntry>>()
            .await
            .map_err(|e| ConnError::Network {
                path: url,
                source: e,
            })?;
        Ok(Reply::new(entries, response))
    }

    async fn head(&mut self, url: String) -> ConnResult<Headers> {
        let resp = self.send_with_retry(Method::HEAD, &url, |r| r).await?;
        let response = Self::check("HEAD", &url, &resp)?;
        Ok(Reply::new(response.headers.clone(), response))
    }

    async fn post(&mut self, url: String, headers: &Headers) -> ConnResult<()> {
        let extra = to_header_map(headers);
        let resp = self
            .send_with_retry(Method::POST, &url, |r| r.headers(extra.clone()))
            .await?;
        let response = Self::check("POST", &url, &resp)?;
        Ok(Reply::new((), response))
    }
}

fn response_dict(resp: &Response) -> ResponseDict {
    let mut headers = Headers::new();
    for (name, value) in resp.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }
    ResponseDict {
        status: resp.status().as_u16(),
        reason: resp
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string(),
        headers,
    }
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(n, v);
        } else {
            warn!(name, "dropping unrepresentable header");
        }
    }
    map
}

fn listing_query(params: &ListParams) -> Vec<(&'static str, String)> {
    let mut query = vec![("format", "json".to_string())];
    if !params.marker.is_empty() {
        query.push(("marker", params.marker.clone()));
    }
    if let Some(prefix) = &params.prefix {
        query.push(("prefix", prefix.clone()));
    }
    if let Some(delimiter) = &params.delimiter {
        if !delimiter.is_empty() {
            query.push(("delimiter", delimiter.clone()));
        }
    }
    query
}

#[async_trait]
impl Connection for HttpConnection {
    #[instrument(level = "debug", skip(self, params), fields(marker = %params.marker))]
    async fn get_account(&mut self, params: &ListParams) -> ConnResult<Vec<ListEntry>> {
        self.listing(self.storage_url.to_string(), params).await
    }

    #[instrument(level = "debug", skip(self, params), fields(marker = %params.marker))]
    async fn get_container(
        &mut self,
        container: &str,
        params: &ListParams,
    ) -> ConnResult<Vec<ListEntry>> {
        self.listing(self.object_url(container, None), params).await
    }

    async fn head_account(&mut self) -> ConnResult<Headers> {
        self.head(self.storage_url.to_string()).await
    }

    async fn head_container(&mut self, container: &str) -> ConnResult<Headers> {
        self.head(self.object_url(container, None)).await
    }

    async fn head_object(&mut self, container: &str, object: &str) -> ConnResult<Headers> {
        self.head(self.object_url(container, Some(object))).await
    }

    #[instrument(level = "debug", skip(self, params))]
    async fn get_object(
        &mut self,
        container: &str,
        object: &str,
        params: &GetParams,
    ) -> ConnResult<(Headers, BodyStream)> {
        let mut url = self.object_url(container, Some(object));
        if let Some(qs) = &params.query_string {
            url.push('?');
            url.push_str(qs);
        }
        let extra = to_header_map(&params.headers);
        let resp = self
            .send_with_retry(Method::GET, &url, |r| r.headers(extra.clone()))
            .await?;
        let response = Self::check("GET", &url, &resp)?;
        let headers = response.headers.clone();
        let path = url.clone();
        let body: BodyStream = Box::pin(resp.bytes_stream().map_err(move |e| {
            ConnError::Network {
                path: path.clone(),
                source: e,
            }
        }));
        Ok(Reply::new((headers, body), response))
    }

    #[instrument(level = "debug", skip(self, body, params))]
    async fn put_object(
        &mut self,
        container: &str,
        object: &str,
        body: SegmentSource,
        params: PutParams,
    ) -> ConnResult<String> {
        let mut url = self.object_url(container, Some(object));
        if let Some(qs) = &params.query_string {
            url.push('?');
            url.push_str(qs);
        }
        let mut request = self
            .request(Method::PUT, &url)
            .headers(to_header_map(&params.headers))
            .body(reqwest::Body::wrap_stream(body.into_stream()));
        if let Some(length) = params.content_length {
            request = request.header(CONTENT_LENGTH, length);
        }
        let resp = self.send_once(&url, request).await?;
        let response = Self::check("PUT", &url, &resp)?;
        let etag = response.headers.get("etag").cloned().unwrap_or_default();
        debug!(container, object, etag, "object stored");
        Ok(Reply::new(etag, response))
    }

    async fn post_account(&mut self, headers: &Headers) -> ConnResult<()> {
        self.post(self.storage_url.to_string(), headers).await
    }

    async fn post_container(&mut self, container: &str, headers: &Headers) -> ConnResult<()> {
        self.post(self.object_url(container, None), headers).await
    }

    async fn post_object(
        &mut self,
        container: &str,
        object: &str,
        headers: &Headers,
    ) -> ConnResult<()> {
        self.post(self.object_url(container, Some(object)), headers)
            .await
    }

    async fn copy_object(
        &mut self,
        container: &str,
        object: &str,
        destination: &str,
        headers: &Headers,
        fresh_metadata: bool,
    ) -> ConnResult<()> {
        let url = self.object_url(container, Some(object));
        let method = Method::from_bytes(b"COPY").unwrap_or(Method::PUT);
        let extra = to_header_map(headers);
        let resp = self
            .send_with_retry(method, &url, |r| {
                let mut req = r.headers(extra.clone()).header("destination", destination);
                if fresh_metadata {
                    req = req.header("x-fresh-metadata", "true");
                }
                req
            })
            .await?;
        let response = Self::check("COPY", &url, &resp)?;
        Ok(Reply::new((), response))
    }

    async fn delete_object(
        &mut self,
        container: &str,
        object: &str,
        query_string: Option<&str>,
    ) -> ConnResult<()> {
        let mut url = self.object_url(container, Some(object));
        if let Some(qs) = query_string {
            url.push('?');
            url.push_str(qs);
        }
        let resp = self.send_with_retry(Method::DELETE, &url, |r| r).await?;
        let response = Self::check("DELETE", &url, &resp)?;
        Ok(Reply::new((), response))
    }

    async fn put_container(&mut self, container: &str, headers: &Headers) -> ConnResult<()> {
        let url = self.object_url(container, None);
        let extra = to_header_map(headers);
        let resp = self
            .send_with_retry(Method::PUT, &url, |r| r.headers(extra.clone()))
            .await?;
        let response = Self::check("PUT", &url, &resp)?;
        Ok(Reply::new((), response))
    }

    async fn delete_container(&mut self, container: &str) -> ConnResult<()> {
        let url = self.object_url(container, None);
        let resp = self.send_with_retry(Method::DELETE, &url, |r| r).await?;
        let response = Self::check("DELETE", &url, &resp)?;
        Ok(Reply::new((), response))
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn auth_end_time(&self) -> f64 {
        self.auth_end_time
    }
}
