//! Download-side body verification.
//!
//! A [`BodyVerifier`] rides along while a response body is streamed to its
//! destination, counting bytes and hashing them. On completion it checks the
//! total against `content-length` and the digest against `etag`. Both checks
//! are suppressed for large objects, whose etag is not a content hash.

use crate::connection::Headers;
use crate::error::SwiftError;
use crate::large_object::is_large_object;

/// Running length/etag validation for one downloaded body.
pub struct BodyVerifier {
    path: String,
    content_length: Option<u64>,
    expected_etag: Option<String>,
    md5: Option<md5::Context>,
    read: u64,
}

impl BodyVerifier {
    /// Prepares verification from the response headers.
    ///
    /// `path` only labels error messages. A malformed `content-length` is an
    /// immediate error; large-object headers disable both checks.
    pub fn new(path: &str, headers: &Headers) -> Result<Self, SwiftError> {
        let large = is_large_object(headers);
        let content_length = match headers.get("content-length") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                SwiftError::new(format!("content-length header must be an integer, got {raw}"))
            })?),
            None => None,
        };
        Ok(Self {
            path: path.to_string(),
            content_length: if large { None } else { content_length },
            expected_etag: if large {
                None
            } else {
                headers.get("etag").cloned()
            },
            md5: (!large).then(md5::Context::new),
            read: 0,
        })
    }

    /// Feeds one body chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        if let Some(ctx) = self.md5.as_mut() {
            ctx.consume(chunk);
        }
        self.read += chunk.len() as u64;
    }

    /// Bytes seen so far.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    /// Final validation; returns the byte count on success.
    pub fn finish(self) -> Result<u64, SwiftError> {
        if let Some(expected) = self.content_length {
            if self.read != expected {
                return Err(SwiftError::new(format!(
                    "{}: read_length != content_length, {} != {expected}",
                    self.path, self.read
                )));
            }
        }
        if let (Some(ctx), Some(expected)) = (self.md5, self.expected_etag.as_deref()) {
            let actual = format!("{:x}", ctx.finalize());
            // Some proxies quote the etag; compare without quotes.
            let expected = expected.trim_matches('"');
            if actual != expected {
                return Err(SwiftError::new(format!(
                    "{}: md5sum != etag, {actual} != {expected}",
                    self.path
                )));
            }
        }
        Ok(self.read)
    }
}
