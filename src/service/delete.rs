//! Delete orchestrator: objects, segments, and whole containers.
//!
//! Deleting a segmented object fans out one `delete_segment` job per
//! segment before the main delete; deleting a container walks its listing,
//! deletes every object (segments included), then removes the now-empty
//! container. Deletes are idempotent: a 404 anywhere is reported as success.

use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};

use crate::connection::{Connection, ResponseDict};
use crate::error::SwiftError;
use crate::executor::AsCompleted;
use crate::large_object::{dlo_segments, kind_from_headers, LargeObjectKind, SegmentRef};
use crate::results::{Action, OpResult, ResultData};

use super::{list, OpContext};

/// Query string that makes the server drop an SLO with its segments.
const SLO_DELETE: &str = "multipart-manifest=delete";

#[instrument(level = "debug", skip(ctx))]
pub(crate) async fn produce(ctx: OpContext, container: String, objects: Vec<String>) {
    if objects.is_empty() {
        produce_container_delete(ctx, container).await;
        return;
    }

    let mut handles = Vec::with_capacity(objects.len());
    for object in objects {
        if ctx.cancelled() {
            break;
        }
        let job_ctx = ctx.clone();
        let job_container = container.clone();
        handles.push(
            ctx.object_executor
                .submit(async move { delete_object_job(job_ctx, job_container, object).await })
                .await,
        );
    }
    drain(&ctx, handles).await;
}

async fn produce_container_delete(ctx: OpContext, container: String) {
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            let result = container_result(&container, 0, ResponseDict::default(), Some(&err));
            let _ = ctx.send(result).await;
            return;
        }
    };

    // Empty out the container first; the final delete only succeeds on an
    // empty container.
    let mut handles = Vec::new();
    let page_ctx = ctx.clone();
    let page_container = container.clone();
    let handles_ref = &mut handles;
    let paged = list::each_page(conn.as_mut(), &container, None, async move |page| {
        for entry in page {
            if page_ctx.cancelled() {
                return Err(SwiftError::new("operation cancelled"));
            }
            let job_ctx = page_ctx.clone();
            let job_container = page_container.clone();
            let object = if entry.name.is_empty() {
                entry.subdir.unwrap_or_default()
            } else {
                entry.name
            };
            handles_ref.push(
                page_ctx
                    .object_executor
                    .submit(async move { delete_object_job(job_ctx, job_container, object).await })
                    .await,
            );
        }
        Ok(())
    })
    .await;

    let all_deleted = drain(&ctx, handles).await;
    if let Err(err) = paged {
        let result = container_result(&container, conn.attempts(), ResponseDict::default(), Some(&err));
        let _ = ctx.send(result).await;
        return;
    }
    if !all_deleted || ctx.cancelled() {
        return;
    }

    let reply = conn.delete_container(&container).await;
    let attempts = conn.attempts();
    let result = match reply {
        Ok(reply) => container_result(&container, attempts, reply.response, None),
        Err(err) if err.http_status() == Some(404) => {
            container_result(&container, attempts, ResponseDict::default(), None)
        }
        Err(err) => {
            let response = err.response().cloned().unwrap_or_default();
            container_result(&container, attempts, response, Some(&SwiftError::from(err)))
        }
    };
    let _ = ctx.send(result).await;
}

/// Forwards completed results; true when every one succeeded.
async fn drain(ctx: &OpContext, handles: Vec<crate::executor::JobHandle<OpResult>>) -> bool {
    let mut all_ok = true;
    let mut completed = AsCompleted::new(handles, ctx.cancel.clone());
    while let Some(result) = completed.next().await {
        all_ok &= result.success;
        if !ctx.send(result).await {
            return false;
        }
    }
    all_ok
}

fn container_result(
    container: &str,
    attempts: u32,
    response: ResponseDict,
    err: Option<&SwiftError>,
) -> OpResult {
    let data = ResultData::DeleteContainer {
        container: container.to_string(),
        object: None,
    };
    match err {
        None => OpResult::ok(Action::DeleteContainer, attempts, response, data),
        Some(err) => OpResult::failed(Action::DeleteContainer, attempts, response, data, err),
    }
}

/// Deletes one object, fanning out segment deletes for DLOs.
pub(crate) async fn delete_object_job(
    ctx: OpContext,
    container: String,
    object: String,
) -> OpResult {
    let result_data = |dlo_deleted: bool| ResultData::DeleteObject {
        container: container.clone(),
        object: object.clone(),
        dlo_segments_deleted: dlo_deleted,
    };

    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(
                Action::DeleteObject,
                0,
                ResponseDict::default(),
                result_data(false),
                &err,
            );
        }
    };

    let headers = match conn.head_object(&container, &object).await {
        Ok(reply) => reply.value,
        Err(err) if err.http_status() == Some(404) => {
            // Already absent; deleting twice is not an error, and no segment
            // enumeration happens.
            debug!(container, object, "object already gone");
            return OpResult::ok(
                Action::DeleteObject,
                conn.attempts(),
                err.response().cloned().unwrap_or_default(),
                result_data(false),
            );
        }
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            return OpResult::failed(
                Action::DeleteObject,
                attempts,
                response,
                result_data(false),
                &SwiftError::from(err),
            );
        }
    };

    let mut query_string = None;
    let mut dlo_deleted = false;
    if !ctx.options.leave_segments {
        match kind_from_headers(&headers) {
            Some(LargeObjectKind::Slo) => {
                // The server unlinks SLO segments itself.
                query_string = Some(SLO_DELETE);
            }
            Some(LargeObjectKind::Dlo { manifest }) => {
                match enumerate_dlo(&ctx, &container, &object, &manifest).await {
                    Ok(segments) => {
                        delete_segments(&ctx, segments).await;
                        dlo_deleted = true;
                    }
                    Err(err) => {
                        return OpResult::failed(
                            Action::DeleteObject,
                            conn.attempts(),
                            ResponseDict::default(),
                            result_data(false),
                            &err,
                        );
                    }
                }
            }
            None => {}
        }
    }

    let reply = conn.delete_object(&container, &object, query_string).await;
    let attempts = conn.attempts();
    match reply {
        Ok(reply) => OpResult::ok(
            Action::DeleteObject,
            attempts,
            reply.response,
            result_data(dlo_deleted),
        ),
        Err(err) if err.http_status() == Some(404) => OpResult::ok(
            Action::DeleteObject,
            attempts,
            err.response().cloned().unwrap_or_default(),
            result_data(dlo_deleted),
        ),
        Err(err) => {
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::DeleteObject,
                attempts,
                response,
                result_data(dlo_deleted),
                &SwiftError::from(err),
            )
        }
    }
}

async fn enumerate_dlo(
    ctx: &OpContext,
    container: &str,
    object: &str,
    manifest: &str,
) -> Result<Vec<SegmentRef>, SwiftError> {
    let Some((seg_container, prefix)) = manifest.split_once('/') else {
        return Err(SwiftError::for_object(
            container,
            object,
            "malformed x-object-manifest",
        ));
    };
    let mut conn = ctx.connection()?;
    dlo_segments(conn.as_mut(), seg_container, prefix).await
}

/// Fans out one delete job per segment and streams their results.
async fn delete_segments(ctx: &OpContext, segments: Vec<SegmentRef>) {
    let mut handles = Vec::with_capacity(segments.len());
    for segment in segments {
        if ctx.cancelled() {
            break;
        }
        let job_ctx = ctx.clone();
        handles.push(
            ctx.segment_executor
                .submit(async move {
                    delete_segment_job(job_ctx, segment.container, segment.name).await
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

async fn delete_segment_job(ctx: OpContext, container: String, segment: String) -> OpResult {
    let data = ResultData::DeleteSegment {
        container: container.clone(),
        object: segment.clone(),
    };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(Action::DeleteSegment, 0, ResponseDict::default(), data, &err);
        }
    };
    match conn.delete_object(&container, &segment, None).await {
        Ok(reply) => OpResult::ok(Action::DeleteSegment, conn.attempts(), reply.response, data),
        Err(err) if err.http_status() == Some(404) => OpResult::ok(
            Action::DeleteSegment,
            conn.attempts(),
            err.response().cloned().unwrap_or_default(),
            data,
        ),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::DeleteSegment,
                attempts,
                response,
                data,
                &SwiftError::from(err),
            )
        }
    }
}
