//! Upload-side body sources with running checksums.
//!
//! A [`SegmentSource`] yields exactly the planned byte range of a file, a
//! caller-supplied stream, or an in-memory buffer, feeding an MD5 context as
//! bytes are actually read. The planning context keeps a [`HashHandle`] so
//! it can compare the computed digest against the etag the server returned
//! after the transport has consumed the body.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::Stream;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

/// Read granularity for file and stream sources.
pub const CHUNK_SIZE: usize = 65536;

#[derive(Default)]
struct HashInner {
    context: Option<md5::Context>,
    read: u64,
}

/// Shared view of a source's running hash and byte count.
///
/// Cloned by the planner before the source is handed to the transport.
#[derive(Clone, Default)]
pub struct HashHandle {
    inner: Arc<Mutex<HashInner>>,
}

impl HashHandle {
    fn new(checksum: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashInner {
                context: checksum.then(md5::Context::new),
                read: 0,
            })),
        }
    }

    fn update(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ctx) = inner.context.as_mut() {
            ctx.consume(chunk);
        }
        inner.read += chunk.len() as u64;
    }

    /// Hex digest of the bytes read so far; empty when checksumming is off.
    #[must_use]
    pub fn md5_hex(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .context
            .as_ref()
            .map(|ctx| format!("{:x}", ctx.clone().finalize()))
            .unwrap_or_default()
    }

    /// Total bytes the consumer has read from the source.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).read
    }
}

impl fmt::Debug for HashHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashHandle")
            .field("bytes_read", &self.bytes_read())
            .finish()
    }
}

enum SourceKind {
    /// File positioned at the segment start; yields at most `remaining`.
    FileRegion { file: File, remaining: u64 },
    /// In-memory body (manifests, empty markers).
    Buffer { data: Bytes },
    /// Caller-provided stream; length unknown up front.
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
    },
}

/// A bounded, hash-tracking request body.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// use rswift_core::segment::SegmentSource;
///
/// let mut source = SegmentSource::from_bytes(&b"hello"[..], true);
/// let body = source.read_to_end().await?;
/// assert_eq!(&body[..], b"hello");
/// assert_eq!(source.hash_handle().bytes_read(), 5);
/// # std::io::Result::Ok(()) });
/// ```
pub struct SegmentSource {
    kind: SourceKind,
    hash: HashHandle,
    length: Option<u64>,
}

impl SegmentSource {
    /// Opens `path` at `start` for exactly `size` bytes.
    ///
    /// The file is opened and positioned at planning time so workers never
    /// reopen it.
    pub async fn file_region(
        path: &Path,
        start: u64,
        size: u64,
        checksum: bool,
    ) -> io::Result<Self> {
        let mut file = File::open(path).await?;
        file.seek(io::SeekFrom::Start(start)).await?;
        Ok(Self {
            kind: SourceKind::FileRegion {
                file,
                remaining: size,
            },
            hash: HashHandle::new(checksum),
            length: Some(size),
        })
    }

    /// Wraps a whole file, using its current on-disk length.
    pub async fn whole_file(path: &Path, checksum: bool) -> io::Result<Self> {
        let size = tokio::fs::metadata(path).await?.len();
        Self::file_region(path, 0, size, checksum).await
    }

    /// Wraps an in-memory buffer.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>, checksum: bool) -> Self {
        let data = data.into();
        let length = Some(data.len() as u64);
        Self {
            kind: SourceKind::Buffer { data },
            hash: HashHandle::new(checksum),
            length,
        }
    }

    /// Wraps a caller-provided stream of unknown length.
    #[must_use]
    pub fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>, checksum: bool) -> Self {
        Self {
            kind: SourceKind::Reader { reader },
            hash: HashHandle::new(checksum),
            length: None,
        }
    }

    /// Planned byte count, when known.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Shared handle to the running hash.
    #[must_use]
    pub fn hash_handle(&self) -> HashHandle {
        self.hash.clone()
    }

    /// Reads the next chunk, updating the running hash.
    ///
    /// Returns `None` once the planned range (or the underlying source) is
    /// exhausted; bytes past a file region's limit are never yielded.
    pub async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let chunk = match &mut self.kind {
            SourceKind::FileRegion { file, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let want = CHUNK_SIZE.min(usize::try_from(*remaining).unwrap_or(CHUNK_SIZE));
                let mut buf = vec![0u8; want];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                *remaining -= n as u64;
                buf.truncate(n);
                Bytes::from(buf)
            }
            SourceKind::Buffer { data } => {
                if data.is_empty() {
                    return Ok(None);
                }
                data.split_to(CHUNK_SIZE.min(data.len()))
            }
            SourceKind::Reader { reader } => {
                let mut buf = vec![0u8; CHUNK_SIZE];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Bytes::from(buf)
            }
        };
        self.hash.update(&chunk);
        Ok(Some(chunk))
    }

    /// Drains the source into one buffer. Used by mock transports.
    pub async fn read_to_end(&mut self) -> io::Result<Bytes> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(out))
    }

    /// Adapts the source into a byte stream for `reqwest::Body::wrap_stream`.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send {
        futures_util::stream::unfold(self, |mut source| async move {
            match source.read_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), source)),
                Ok(None) => None,
                Err(e) => Some((Err(e), source)),
            }
        })
    }
}

/// Streams a whole file through MD5 without holding it in memory.
pub async fn file_md5(path: &Path) -> io::Result<String> {
    let mut source = SegmentSource::whole_file(path, true).await?;
    while source.read_chunk().await?.is_some() {}
    Ok(source.hash_handle().md5_hex())
}

impl fmt::Debug for SegmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentSource")
            .field("length", &self.length)
            .field("bytes_read", &self.hash.bytes_read())
            .finish()
    }
}
