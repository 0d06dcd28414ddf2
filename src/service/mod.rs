//! Public façade: [`SwiftService`] and its streaming results.
//!
//! Each operation validates its inputs synchronously, then spawns a producer
//! task that plans jobs, feeds the worker pools and forwards results into a
//! bounded channel. The caller consumes a [`ResultStream`]; dropping it early
//! raises the operation's cancel flag, which stops further submissions and
//! lets in-flight results be discarded.

mod delete;
mod download;
mod list;
mod stat;
mod upload;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::connection::{default_factory, Connection, ConnectionFactory};
use crate::error::SwiftError;
use crate::executor::JobExecutor;
use crate::options::{process_options, Options, OptionsPatch};
use crate::results::OpResult;

/// Result-channel capacity multiplier for non-listing operations.
const RESULT_QUEUE_FACTOR: usize = 10;

/// Lazy sequence of operation results.
///
/// Results arrive in completion order. Dropping the stream cancels pending
/// submissions; in-flight jobs finish but their results go nowhere.
pub struct ResultStream {
    rx: mpsc::Receiver<OpResult>,
    cancel: Arc<AtomicBool>,
}

impl ResultStream {
    fn channel(capacity: usize) -> (mpsc::Sender<OpResult>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                rx,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        )
    }

    /// The flag producers poll to notice early termination.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Requests cancellation without dropping the stream.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Next result, in completion order. `None` once the operation drained.
    pub async fn next(&mut self) -> Option<OpResult> {
        self.rx.recv().await
    }

    /// Drains the stream to completion.
    pub async fn collect(mut self) -> Vec<OpResult> {
        let mut out = Vec::new();
        while let Some(r) = self.next().await {
            out.push(r);
        }
        out
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("cancelled", &self.cancel.load(Ordering::SeqCst))
            .finish()
    }
}

/// Everything a producer task needs to plan and run jobs.
#[derive(Clone)]
pub(crate) struct OpContext {
    pub factory: Arc<dyn ConnectionFactory>,
    pub options: Arc<Options>,
    pub object_executor: JobExecutor,
    pub segment_executor: JobExecutor,
    pub cancel: Arc<AtomicBool>,
    pub tx: mpsc::Sender<OpResult>,
}

impl OpContext {
    pub(crate) fn connection(&self) -> Result<Box<dyn Connection>, SwiftError> {
        self.factory.create()
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Forwards one result; false when the consumer went away.
    pub(crate) async fn send(&self, result: OpResult) -> bool {
        self.tx.send(result).await.is_ok()
    }
}

/// Source of one upload.
pub enum UploadSource {
    /// Read from the filesystem.
    Path(PathBuf),
    /// Caller-provided stream; length unknown until read.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// No content: create an empty object (or a pseudo-directory marker).
    Empty,
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

/// One object to upload: a source, its in-container name, and optional
/// per-object option overrides.
#[derive(Debug)]
pub struct SwiftUploadObject {
    pub(crate) source: UploadSource,
    pub(crate) object_name: String,
    pub(crate) options: Option<OptionsPatch>,
}

impl SwiftUploadObject {
    /// Upload a file; the object name defaults to the path itself (leading
    /// `./`, `.\` and the current directory are stripped at planning time).
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, SwiftError> {
        let path = path.into();
        let name = path.to_string_lossy().into_owned();
        if name.is_empty() {
            return Err(SwiftError::new("upload source path must not be empty"));
        }
        Ok(Self {
            source: UploadSource::Path(path),
            object_name: name,
            options: None,
        })
    }

    /// Upload a file under an explicit object name.
    pub fn from_path_named(
        path: impl Into<PathBuf>,
        object_name: impl Into<String>,
    ) -> Result<Self, SwiftError> {
        let mut upload = Self::from_path(path)?;
        upload.object_name = checked_name(object_name)?;
        Ok(upload)
    }

    /// Upload from a stream. Streams carry no name of their own, so the
    /// object name is mandatory.
    pub fn from_stream(
        stream: Box<dyn AsyncRead + Send + Unpin>,
        object_name: impl Into<String>,
    ) -> Result<Self, SwiftError> {
        Ok(Self {
            source: UploadSource::Stream(stream),
            object_name: checked_name(object_name)?,
            options: None,
        })
    }

    /// Create an empty object (directory marker or placeholder).
    pub fn empty(object_name: impl Into<String>) -> Result<Self, SwiftError> {
        Ok(Self {
            source: UploadSource::Empty,
            object_name: checked_name(object_name)?,
            options: None,
        })
    }

    /// Attaches per-object option overrides.
    #[must_use]
    pub fn with_options(mut self, options: OptionsPatch) -> Self {
        self.options = Some(options);
        self
    }

    /// The name the object will have in the container (before planning-time
    /// path normalisation).
    #[must_use]
    pub fn object_name(&self) -> &str {
        &self.object_name
    }
}

/// One object to post metadata to.
#[derive(Debug, Clone)]
pub struct SwiftPostObject {
    pub(crate) object_name: String,
    pub(crate) options: Option<OptionsPatch>,
}

impl SwiftPostObject {
    pub fn new(object_name: impl Into<String>) -> Result<Self, SwiftError> {
        Ok(Self {
            object_name: checked_name(object_name)?,
            options: None,
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: OptionsPatch) -> Self {
        self.options = Some(options);
        self
    }

    #[must_use]
    pub fn object_name(&self) -> &str {
        &self.object_name
    }
}

fn checked_name(name: impl Into<String>) -> Result<String, SwiftError> {
    let name = name.into();
    if name.is_empty() {
        return Err(SwiftError::new("object names must be non-empty strings"));
    }
    Ok(name)
}

/// High-level operations over one account.
///
/// A service owns its worker pools and connection factory; every stream it
/// hands out is backed by jobs on those pools. Operations spawn their
/// producer tasks, so they must be called inside a tokio runtime.
pub struct SwiftService {
    options: Options,
    factory: Arc<dyn ConnectionFactory>,
    object_executor: JobExecutor,
    segment_executor: JobExecutor,
    container_executor: JobExecutor,
}

impl SwiftService {
    /// Builds a service from options, reconciling auth fields and creating
    /// the default HTTP connection factory.
    pub fn new(mut options: Options) -> Result<Self, SwiftError> {
        process_options(&mut options);
        let factory: Arc<dyn ConnectionFactory> = Arc::from(default_factory(&options)?);
        Ok(Self::with_factory(factory, options))
    }

    /// Builds a service over an explicit connection factory. Used by tests
    /// and by embedders with their own transports.
    #[must_use]
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>, options: Options) -> Self {
        let object_executor = JobExecutor::new(options.object_threads);
        let segment_executor = JobExecutor::new(options.segment_threads);
        let container_executor = JobExecutor::new(options.container_threads);
        Self {
            options,
            factory,
            object_executor,
            segment_executor,
            container_executor,
        }
    }

    /// The service's merged option set.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn merged(&self, patch: Option<&OptionsPatch>) -> Options {
        match patch {
            Some(p) => self.options.patched(p),
            None => self.options.clone(),
        }
    }

    fn context(
        &self,
        options: Options,
        capacity: usize,
    ) -> (OpContext, ResultStream) {
        let (tx, stream) = ResultStream::channel(capacity);
        let ctx = OpContext {
            factory: Arc::clone(&self.factory),
            options: Arc::new(options),
            object_executor: self.object_executor.clone(),
            segment_executor: self.segment_executor.clone(),
            cancel: stream.cancel_flag(),
            tx,
        };
        (ctx, stream)
    }

    /// Lists the account's containers, or a container's objects, in pages.
    #[instrument(level = "debug", skip(self, options))]
    pub fn list(
        &self,
        container: Option<String>,
        options: Option<&OptionsPatch>,
    ) -> Result<ResultStream, SwiftError> {
        let merged = self.merged(options);
        // Listing backpressure is exactly one worker pool of buffered pages.
        let (ctx, stream) = self.context(merged, self.container_executor.workers());
        tokio::spawn(list::produce(ctx, container));
        Ok(stream)
    }

    /// Deletes objects, or a whole container when `objects` is empty.
    #[instrument(level = "debug", skip(self, options))]
    pub fn delete(
        &self,
        container: String,
        objects: Vec<String>,
        options: Option<&OptionsPatch>,
    ) -> Result<ResultStream, SwiftError> {
        if container.is_empty() {
            return Err(SwiftError::new("container name must not be empty"));
        }
        let merged = self.merged(options);
        let capacity = self.object_executor.workers() * RESULT_QUEUE_FACTOR;
        let (ctx, stream) = self.context(merged, capacity);
        tokio::spawn(delete::produce(ctx, container, objects));
        Ok(stream)
    }

    /// Uploads objects into `container`.
    #[instrument(level = "debug", skip(self, objects, options))]
    pub fn upload(
        &self,
        container: String,
        objects: Vec<SwiftUploadObject>,
        options: Option<&OptionsPatch>,
    ) -> Result<ResultStream, SwiftError> {
        if container.is_empty() {
            return Err(SwiftError::new("container name must not be empty"));
        }
        let merged = self.merged(options);
        // Input validation happens before any job is scheduled.
        merged.segment_size_bytes()?;
        for object in &objects {
            if let Some(patch) = &object.options {
                merged.patched(patch).segment_size_bytes()?;
            }
        }
        let capacity = self.object_executor.workers() * RESULT_QUEUE_FACTOR;
        let (ctx, stream) = self.context(merged, capacity);
        tokio::spawn(upload::produce(ctx, container, objects));
        Ok(stream)
    }

    /// Downloads objects, a container, or the whole account.
    #[instrument(level = "debug", skip(self, options))]
    pub fn download(
        &self,
        container: Option<String>,
        objects: Option<Vec<String>>,
        options: Option<&OptionsPatch>,
    ) -> Result<ResultStream, SwiftError> {
        if container.is_none() && objects.is_some() {
            return Err(SwiftError::new(
                "object downloads require a container",
            ));
        }
        let merged = self.merged(options);
        let capacity = self.object_executor.workers() * RESULT_QUEUE_FACTOR;
        let (ctx, stream) = self.context(merged, capacity);
        tokio::spawn(download::produce(ctx, container, objects));
        Ok(stream)
    }

    /// Stats the account, a container, or objects within it.
    #[instrument(level = "debug", skip(self, options))]
    pub fn stat(
        &self,
        container: Option<String>,
        objects: Vec<String>,
        options: Option<&OptionsPatch>,
    ) -> Result<ResultStream, SwiftError> {
        if container.is_none() && !objects.is_empty() {
            return Err(SwiftError::new("object stats require a container"));
        }
        let merged = self.merged(options);
        let capacity = self.object_executor.workers() * RESULT_QUEUE_FACTOR;
        let (ctx, stream) = self.context(merged, capacity);
        tokio::spawn(stat::produce_stat(ctx, container, objects));
        Ok(stream)
    }

    /// Posts metadata to the account, a container, or objects.
    #[instrument(level = "debug", skip(self, objects, options))]
    pub fn post(
        &self,
        container: Option<String>,
        objects: Vec<SwiftPostObject>,
        options: Option<&OptionsPatch>,
    ) -> Result<ResultStream, SwiftError> {
        if container.is_none() && !objects.is_empty() {
            return Err(SwiftError::new("object posts require a container"));
        }
        // Malformed header/meta options fail before any job is scheduled.
        let merged = self.merged(options);
        crate::options::split_headers(&merged.header, "")?;
        crate::options::split_headers(&merged.meta, "")?;
        let capacity = self.object_executor.workers() * RESULT_QUEUE_FACTOR;
        let (ctx, stream) = self.context(merged, capacity);
        tokio::spawn(stat::produce_post(ctx, container, objects));
        Ok(stream)
    }

    /// Server-side copies of objects within the account.
    #[instrument(level = "debug", skip(self, options))]
    pub fn copy(
        &self,
        container: String,
        objects: Vec<String>,
        options: Option<&OptionsPatch>,
    ) -> Result<ResultStream, SwiftError> {
        if container.is_empty() {
            return Err(SwiftError::new("container name must not be empty"));
        }
        let merged = self.merged(options);
        if let Some(destination) = &merged.destination {
            if !destination.starts_with('/') {
                return Err(SwiftError::new(
                    "destination must be in the form /container[/object]",
                ));
            }
        }
        let capacity = self.object_executor.workers() * RESULT_QUEUE_FACTOR;
        let (ctx, stream) = self.context(merged, capacity);
        tokio::spawn(stat::produce_copy(ctx, container, objects));
        Ok(stream)
    }

    /// Cancels every outstanding job on the service's pools.
    pub fn shutdown(&self) {
        self.object_executor.cancel_all();
        self.segment_executor.cancel_all();
        self.container_executor.cancel_all();
    }
}

impl fmt::Debug for SwiftService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwiftService")
            .field("object_workers", &self.object_executor.workers())
            .field("segment_workers", &self.segment_executor.workers())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_object_requires_name_for_stream() {
        let stream: Box<dyn AsyncRead + Send + Unpin> = Box::new(&b"data"[..]);
        assert!(SwiftUploadObject::from_stream(stream, "").is_err());

        let stream: Box<dyn AsyncRead + Send + Unpin> = Box::new(&b"data"[..]);
        let upload = SwiftUploadObject::from_stream(stream, "obj").unwrap();
        assert_eq!(upload.object_name(), "obj");
    }

    #[test]
    fn test_upload_object_from_path_defaults_name() {
        let upload = SwiftUploadObject::from_path("./some/file").unwrap();
        assert_eq!(upload.object_name(), "./some/file");
    }

    #[test]
    fn test_upload_object_empty_source_requires_name() {
        assert!(SwiftUploadObject::empty("").is_err());
        let upload = SwiftUploadObject::empty("marker/").unwrap();
        assert!(matches!(upload.source, UploadSource::Empty));
    }

    #[test]
    fn test_post_object_name_validation() {
        assert!(SwiftPostObject::new("").is_err());
        let post = SwiftPostObject::new("obj").unwrap();
        assert_eq!(post.object_name(), "obj");
    }
}
