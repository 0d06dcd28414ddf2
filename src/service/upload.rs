//! Upload orchestrator: container creation, segmentation, manifests and
//! skip-identical probing.
//!
//! Large sources are split into fixed-size segments uploaded in parallel;
//! the manifest PUT happens only after every segment PUT succeeded, with
//! segment order fixed at planning time regardless of completion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::clock::epoch_seconds;
use crate::connection::{Connection, Headers, PutParams, ResponseDict};
use crate::error::SwiftError;
use crate::executor::AsCompleted;
use crate::large_object::{is_large_object, resolve, SegmentRef};
use crate::options::{split_headers, Options};
use crate::results::{Action, OpResult, ResultData, UploadStatus};
use crate::segment::SegmentSource;

use super::{OpContext, SwiftUploadObject, UploadSource};

/// Query string that stores a PUT body as an SLO manifest.
const SLO_PUT: &str = "multipart-manifest=put";

#[instrument(level = "debug", skip(ctx, objects))]
pub(crate) async fn produce(ctx: OpContext, container: String, objects: Vec<SwiftUploadObject>) {
    // The target container (and the segment container when segmenting) must
    // exist before any PUT is scheduled.
    let segmenting = objects_may_segment(&ctx.options, &objects);
    let seg_container = segment_container_name(&ctx.options, &container);
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            let result = create_container_result(&container, 0, ResponseDict::default(), Some(&err));
            let _ = ctx.send(result).await;
            return;
        }
    };
    if !create_container(&ctx, conn.as_mut(), &container).await {
        return;
    }
    if segmenting && !create_container(&ctx, conn.as_mut(), &seg_container).await {
        return;
    }
    drop(conn);

    let mut handles = Vec::with_capacity(objects.len());
    for object in objects {
        if ctx.cancelled() {
            break;
        }
        let options = match &object.options {
            Some(patch) => Arc::new(ctx.options.patched(patch)),
            None => Arc::clone(&ctx.options),
        };
        let job_ctx = ctx.clone();
        let job_container = container.clone();
        handles.push(
            ctx.object_executor
                .submit(async move {
                    upload_object_job(job_ctx, job_container, object, options).await
                })
                .await,
        );
    }

    let mut completed = AsCompleted::new(handles, ctx.cancel.clone());
    while let Some(result) = completed.next().await {
        if !ctx.send(result).await {
            return;
        }
    }
}

fn objects_may_segment(options: &Options, objects: &[SwiftUploadObject]) -> bool {
    let base = options.segment_size_bytes().ok().flatten().is_some();
    base || objects.iter().any(|o| {
        o.options
            .as_ref()
            .is_some_and(|p| p.segment_size.as_deref().is_some_and(|s| !s.is_empty()))
    })
}

fn segment_container_name(options: &Options, container: &str) -> String {
    options
        .segment_container
        .clone()
        .unwrap_or_else(|| format!("{container}_segments"))
}

async fn create_container(ctx: &OpContext, conn: &mut dyn Connection, container: &str) -> bool {
    let reply = conn.put_container(container, &Headers::new()).await;
    let attempts = conn.attempts();
    match reply {
        Ok(reply) => {
            ctx.send(create_container_result(container, attempts, reply.response, None))
                .await
        }
        Err(err) => {
            let response = err.response().cloned().unwrap_or_default();
            let err = SwiftError::from(err);
            let _ = ctx
                .send(create_container_result(container, attempts, response, Some(&err)))
                .await;
            false
        }
    }
}

fn create_container_result(
    container: &str,
    attempts: u32,
    response: ResponseDict,
    err: Option<&SwiftError>,
) -> OpResult {
    let data = ResultData::CreateContainer {
        container: container.to_string(),
    };
    match err {
        None => OpResult::ok(Action::CreateContainer, attempts, response, data),
        Some(err) => OpResult::failed(Action::CreateContainer, attempts, response, data, err),
    }
}

/// Strips the relative-path or working-directory prefix from a source path
/// to produce the in-container object name.
pub(crate) fn normalized_object_name(name: &str) -> String {
    if let Some(stripped) = name.strip_prefix("./").or_else(|| name.strip_prefix(".\\")) {
        return stripped.to_string();
    }
    if let Ok(cwd) = std::env::current_dir() {
        let cwd = cwd.to_string_lossy();
        if let Some(stripped) = name.strip_prefix(cwd.as_ref()) {
            return stripped.trim_start_matches('/').to_string();
        }
    }
    name.strip_prefix('/').unwrap_or(name).to_string()
}

struct PlannedSegment {
    index: usize,
    name: String,
    start: u64,
    size: u64,
}

/// Uploads one object end to end: probe, segment fan-out, manifest or plain
/// PUT, old-segment cleanup.
async fn upload_object_job(
    ctx: OpContext,
    container: String,
    object: SwiftUploadObject,
    options: Arc<Options>,
) -> OpResult {
    let SwiftUploadObject {
        source, object_name, ..
    } = object;
    let (obj_name, source_path) = match &source {
        UploadSource::Path(path) => (normalized_object_name(&object_name), Some(path.clone())),
        _ => (object_name.clone(), None),
    };

    let target = UploadTarget {
        container,
        object: obj_name,
        path: source_path,
    };

    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => return target.failed(0, Headers::new(), &err),
    };

    // Request headers: user-supplied plus the client mtime marker.
    let mut put_headers = match split_headers(&options.header, "") {
        Ok(headers) => headers,
        Err(err) => return target.failed(0, Headers::new(), &err),
    };
    let (mtime, file_size) = match &target.path {
        Some(path) => match file_times(path).await {
            Ok(pair) => pair,
            Err(err) => return target.failed(0, put_headers, &err),
        },
        None => (epoch_seconds(), 0),
    };
    let mtime_str = format!("{mtime:.6}");
    put_headers.insert("x-object-meta-mtime".to_string(), mtime_str.clone());

    // Probe the destination for skip decisions and stale segments.
    let probe_needed =
        options.skip_identical || options.changed || !options.leave_segments;
    let mut old_segments: Vec<SegmentRef> = Vec::new();
    if probe_needed {
        match conn.head_object(&target.container, &target.object).await {
            Ok(reply) => {
                let head = reply.value;
                let large = is_large_object(&head);

                // One manifest resolution serves both the identity check and
                // the stale-segment cleanup list.
                let mut segments: Vec<SegmentRef> = Vec::new();
                if large && (options.skip_identical || !options.leave_segments) {
                    match resolve(conn.as_mut(), &target.container, &target.object, &head).await {
                        Ok(Some(info)) => segments = info.segments,
                        Ok(None) => {}
                        Err(err) => {
                            if options.skip_identical {
                                return target.failed(conn.attempts(), put_headers, &err);
                            }
                            warn!(error = %err, "cannot enumerate old segments; leaving them");
                        }
                    }
                }

                if options.skip_identical {
                    let identical = if large {
                        match local_matches_segments(&segments, target.path.as_deref()).await {
                            Ok(identical) => identical,
                            Err(err) => return target.failed(conn.attempts(), put_headers, &err),
                        }
                    } else {
                        match check_plain_identical(&head, target.path.as_deref()).await {
                            Ok(identical) => identical,
                            Err(err) => return target.failed(conn.attempts(), put_headers, &err),
                        }
                    };
                    if identical {
                        return target.skipped(conn.attempts(), put_headers, large);
                    }
                }
                if options.changed
                    && !options.skip_identical
                    && unchanged(&head, file_size, &mtime_str)
                {
                    return target.skipped(conn.attempts(), put_headers, large);
                }
                if large && !options.leave_segments {
                    old_segments = segments;
                }
            }
            Err(err) if err.http_status() == Some(404) => {}
            Err(err) => {
                return target.failed(conn.attempts(), put_headers, &SwiftError::from(err));
            }
        }
    }

    // Already validated at the façade; a job-level failure here means the
    // per-object options were inconsistent.
    let segment_size = match options.segment_size_bytes() {
        Ok(size) => size,
        Err(err) => return target.failed(conn.attempts(), put_headers, &err),
    };

    let segmented = match (&target.path, segment_size) {
        (Some(_), Some(seg)) => file_size >= seg,
        _ => false,
    };

    let outcome = if segmented {
        let path = target.path.clone().unwrap_or_default();
        upload_segmented(
            &ctx,
            conn.as_mut(),
            &target.container,
            &target.object,
            &path,
            file_size,
            segment_size.unwrap_or(u64::MAX),
            &mtime_str,
            put_headers.clone(),
            &options,
        )
        .await
    } else {
        upload_plain(
            conn.as_mut(),
            &target.container,
            &target.object,
            source,
            target.path.as_deref(),
            file_size,
            put_headers.clone(),
            &options,
        )
        .await
    };

    match outcome {
        Ok((response, large_object)) => {
            if !old_segments.is_empty() {
                cleanup_old_segments(conn.as_mut(), &old_segments).await;
            }
            target.uploaded(conn.attempts(), response, put_headers, large_object)
        }
        Err(err) => target.failed(conn.attempts(), put_headers, &err),
    }
}

/// Identity of one upload destination, stamped on every result it produces.
struct UploadTarget {
    container: String,
    object: String,
    path: Option<PathBuf>,
}

impl UploadTarget {
    fn data(&self, headers: Headers, large_object: bool, status: UploadStatus) -> ResultData {
        ResultData::UploadObject {
            container: self.container.clone(),
            object: self.object.clone(),
            path: self.path.clone(),
            headers,
            large_object,
            status,
        }
    }

    fn failed(&self, attempts: u32, headers: Headers, err: &SwiftError) -> OpResult {
        let response = ResponseDict {
            status: err.http_status().unwrap_or_default(),
            ..ResponseDict::default()
        };
        OpResult::failed(
            Action::UploadObject,
            attempts,
            response,
            self.data(headers, false, UploadStatus::Uploaded),
            err,
        )
    }

    fn skipped(&self, attempts: u32, headers: Headers, large_object: bool) -> OpResult {
        debug!(
            container = self.container,
            object = self.object,
            "destination identical; skipping upload"
        );
        OpResult::ok(
            Action::UploadObject,
            attempts,
            ResponseDict::default(),
            self.data(headers, large_object, UploadStatus::SkippedIdentical),
        )
    }

    fn uploaded(
        &self,
        attempts: u32,
        response: ResponseDict,
        headers: Headers,
        large_object: bool,
    ) -> OpResult {
        OpResult::ok(
            Action::UploadObject,
            attempts,
            response,
            self.data(headers, large_object, UploadStatus::Uploaded),
        )
    }
}

async fn file_times(path: &Path) -> Result<(f64, u64), SwiftError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        SwiftError::new(format!("cannot stat {}: {e}", path.display())).with_source(e)
    })?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or_else(epoch_seconds);
    Ok((mtime, meta.len()))
}

fn unchanged(head: &Headers, file_size: u64, mtime_str: &str) -> bool {
    let same_length = head
        .get("content-length")
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len == file_size);
    let same_mtime = head
        .get("x-object-meta-mtime")
        .is_some_and(|m| m == mtime_str);
    same_length && same_mtime
}

async fn check_plain_identical(
    head: &Headers,
    source_path: Option<&Path>,
) -> Result<bool, SwiftError> {
    let Some(path) = source_path else {
        return Ok(false);
    };
    let Some(etag) = head.get("etag") else {
        return Ok(false);
    };
    let size = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    if head
        .get("content-length")
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len != size)
    {
        return Ok(false);
    }
    let mut source = SegmentSource::whole_file(path, true)
        .await
        .map_err(|e| SwiftError::new(format!("cannot read {}: {e}", path.display())))?;
    source
        .read_to_end()
        .await
        .map_err(|e| SwiftError::new(format!("read error: {e}")))?;
    Ok(source.hash_handle().md5_hex() == etag.trim_matches('"'))
}

async fn local_matches_segments(
    segments: &[SegmentRef],
    source_path: Option<&Path>,
) -> Result<bool, SwiftError> {
    let Some(path) = source_path else {
        return Ok(false);
    };
    if segments.is_empty() {
        return Ok(false);
    }
    crate::large_object::segments_identical(segments, path).await
}

#[allow(clippy::too_many_arguments)]
async fn upload_segmented(
    ctx: &OpContext,
    conn: &mut dyn Connection,
    container: &str,
    obj_name: &str,
    path: &Path,
    full_size: u64,
    segment_size: u64,
    mtime_str: &str,
    put_headers: Headers,
    options: &Options,
) -> Result<(ResponseDict, bool), SwiftError> {
    let seg_container = segment_container_name(options, container);
    let prefix = format!("{obj_name}/{mtime_str}/{full_size}/{segment_size}/");

    // Plan every segment up front; order here is manifest order.
    let mut planned = Vec::new();
    let mut start = 0u64;
    let mut index = 0usize;
    while start < full_size {
        let size = segment_size.min(full_size - start);
        planned.push(PlannedSegment {
            index,
            name: format!("{prefix}{index:08}"),
            start,
            size,
        });
        start += size;
        index += 1;
    }
    let total = planned.len();

    let mut handles = Vec::with_capacity(total);
    for segment in planned {
        if ctx.cancelled() {
            return Err(SwiftError::new("operation cancelled"));
        }
        // Open at planning time; workers never reopen the file.
        let source = SegmentSource::file_region(path, segment.start, segment.size, options.checksum)
            .await
            .map_err(|e| {
                SwiftError::for_segment(
                    container,
                    obj_name,
                    &segment.name,
                    format!("cannot open segment: {e}"),
                )
            })?;
        let job_ctx = ctx.clone();
        let job = SegmentJob {
            seg_container: seg_container.clone(),
            segment_name: segment.name,
            segment_index: segment.index,
            segment_size: segment.size,
            for_object: obj_name.to_string(),
            checksum: options.checksum,
        };
        handles.push(
            ctx.segment_executor
                .submit(async move { upload_segment_job(job_ctx, job, source).await })
                .await,
        );
    }

    // Collect etags by planned index while streaming per-segment results out.
    let mut etags: Vec<Option<(String, u64, String)>> = vec![None; total];
    let mut first_error: Option<String> = None;
    let mut completed = AsCompleted::new(handles, ctx.cancel.clone());
    while let Some(result) = completed.next().await {
        if let ResultData::UploadSegment {
            segment_index,
            segment_etag,
            segment_size,
            segment_location,
            ..
        } = &result.data
        {
            if result.success {
                etags[*segment_index] = Some((
                    segment_etag.clone(),
                    *segment_size,
                    segment_location.clone(),
                ));
            } else if first_error.is_none() {
                first_error = Some(
                    result
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| "segment upload failed".to_string()),
                );
            }
        }
        let _ = ctx.send(result).await;
    }

    if let Some(message) = first_error {
        return Err(SwiftError::for_object(container, obj_name, message));
    }
    let segments: Vec<(String, u64, String)> = etags.into_iter().flatten().collect();
    if segments.len() != total {
        // Cancellation or a dropped worker left holes; never PUT a manifest
        // with missing entries.
        return Err(SwiftError::for_object(
            container,
            obj_name,
            "segment upload incomplete",
        ));
    }

    if options.use_slo {
        let manifest: Vec<serde_json::Value> = segments
            .iter()
            .map(|(etag, size, location)| {
                serde_json::json!({
                    "path": location,
                    "etag": etag,
                    "size_bytes": size,
                })
            })
            .collect();
        let body = serde_json::to_vec(&manifest)
            .map_err(|e| SwiftError::for_object(container, obj_name, e.to_string()))?;
        let reply = conn
            .put_object(
                container,
                obj_name,
                SegmentSource::from_bytes(body, false),
                PutParams {
                    content_length: None,
                    headers: put_headers,
                    query_string: Some(SLO_PUT.to_string()),
                },
            )
            .await?;
        Ok((reply.response, true))
    } else {
        let mut headers = put_headers;
        headers.insert(
            "x-object-manifest".to_string(),
            format!("{seg_container}/{prefix}"),
        );
        let reply = conn
            .put_object(
                container,
                obj_name,
                SegmentSource::from_bytes(Vec::new(), false),
                PutParams {
                    content_length: Some(0),
                    headers,
                    query_string: None,
                },
            )
            .await?;
        Ok((reply.response, true))
    }
}

struct SegmentJob {
    seg_container: String,
    segment_name: String,
    segment_index: usize,
    segment_size: u64,
    for_object: String,
    checksum: bool,
}

async fn upload_segment_job(ctx: OpContext, job: SegmentJob, source: SegmentSource) -> OpResult {
    let data = |etag: String| ResultData::UploadSegment {
        for_object: job.for_object.clone(),
        segment_index: job.segment_index,
        segment_size: job.segment_size,
        segment_location: format!("/{}/{}", job.seg_container, job.segment_name),
        log_line: format!("{} segment {}", job.for_object, job.segment_index),
        segment_etag: etag,
    };

    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(
                Action::UploadSegment,
                0,
                ResponseDict::default(),
                data(String::new()),
                &err,
            );
        }
    };

    let hash = source.hash_handle();
    let reply = conn
        .put_object(
            &job.seg_container,
            &job.segment_name,
            source,
            PutParams {
                content_length: Some(job.segment_size),
                headers: Headers::new(),
                query_string: None,
            },
        )
        .await;
    let attempts = conn.attempts();
    match reply {
        Ok(reply) => {
            let etag = reply.value;
            let local = hash.md5_hex();
            if job.checksum && !etag.is_empty() && etag != local {
                let err = SwiftError::for_segment(
                    &job.seg_container,
                    &job.for_object,
                    &job.segment_name,
                    format!("md5 mismatch: local {local} != remote {etag}"),
                );
                return OpResult::failed(
                    Action::UploadSegment,
                    attempts,
                    reply.response,
                    data(etag),
                    &err,
                );
            }
            OpResult::ok(Action::UploadSegment, attempts, reply.response, data(etag))
        }
        Err(err) => {
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::UploadSegment,
                attempts,
                response,
                data(String::new()),
                &SwiftError::from(err),
            )
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn upload_plain(
    conn: &mut dyn Connection,
    container: &str,
    obj_name: &str,
    source: UploadSource,
    source_path: Option<&Path>,
    file_size: u64,
    put_headers: Headers,
    options: &Options,
) -> Result<(ResponseDict, bool), SwiftError> {
    let (body, content_length) = match source {
        UploadSource::Path(_) => {
            let path = source_path.unwrap_or_else(|| Path::new(""));
            let body = SegmentSource::whole_file(path, options.checksum)
                .await
                .map_err(|e| {
                    SwiftError::for_object(
                        container,
                        obj_name,
                        format!("cannot open {}: {e}", path.display()),
                    )
                })?;
            (body, Some(file_size))
        }
        UploadSource::Stream(reader) => (
            SegmentSource::from_reader(reader, options.checksum),
            None,
        ),
        UploadSource::Empty => (
            SegmentSource::from_bytes(Vec::new(), options.checksum),
            Some(0),
        ),
    };

    let hash = body.hash_handle();
    let reply = conn
        .put_object(
            container,
            obj_name,
            body,
            PutParams {
                content_length,
                headers: put_headers,
                query_string: None,
            },
        )
        .await?;
    let etag = reply.value;
    let local = hash.md5_hex();
    if options.checksum && !etag.is_empty() && !local.is_empty() && etag != local {
        return Err(SwiftError::for_object(
            container,
            obj_name,
            format!("md5 mismatch: local {local} != remote {etag}"),
        ));
    }
    Ok((reply.response, false))
}

/// Best-effort removal of segments superseded by a re-upload.
async fn cleanup_old_segments(conn: &mut dyn Connection, segments: &[SegmentRef]) {
    for segment in segments {
        if let Err(err) = conn
            .delete_object(&segment.container, &segment.name, None)
            .await
        {
            warn!(
                container = segment.container,
                segment = segment.name,
                error = %err,
                "stale segment left behind"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_object_name_relative() {
        assert_eq!(normalized_object_name("./test"), "test");
        assert_eq!(normalized_object_name(".\\test"), "test");
        assert_eq!(normalized_object_name("plain/name"), "plain/name");
    }

    #[test]
    fn test_normalized_object_name_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let path = format!("{}/test", cwd.to_string_lossy());
        assert_eq!(normalized_object_name(&path), "test");
    }

    #[test]
    fn test_segment_container_name_defaults() {
        let options = Options::default();
        assert_eq!(segment_container_name(&options, "docs"), "docs_segments");

        let options = Options {
            segment_container: Some("elsewhere".to_string()),
            ..Options::default()
        };
        assert_eq!(segment_container_name(&options, "docs"), "elsewhere");
    }

    #[test]
    fn test_unchanged_wants_both_length_and_mtime() {
        let mut head = Headers::new();
        head.insert("content-length".to_string(), "30".to_string());
        head.insert("x-object-meta-mtime".to_string(), "1.000000".to_string());
        assert!(unchanged(&head, 30, "1.000000"));
        assert!(!unchanged(&head, 31, "1.000000"));
        assert!(!unchanged(&head, 30, "2.000000"));
    }
}
