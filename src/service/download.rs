//! Download orchestrator: objects, containers, whole accounts.
//!
//! Container downloads page the listing and fan each page out to the object
//! pool; executor backpressure throttles paging. Each object job streams its
//! body through the verifying sink, records timing, and handles the
//! skip-identical probe (`If-None-Match` + manifest query) including the
//! large-object identity comparison.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use crate::clock::epoch_seconds;
use crate::connection::{BodyStream, Connection, GetParams, Headers, ListParams, ResponseDict};
use crate::error::SwiftError;
use crate::executor::AsCompleted;
use crate::large_object::{
    collect_body, dlo_segments, flatten_entries, kind_from_headers, parse_manifest,
    segments_identical, LargeObjectKind, MANIFEST_GET,
};
use crate::options::Options;
use crate::results::{Action, OpResult, ResultData};
use crate::segment::file_md5;
use crate::sink::BodyVerifier;

use super::{list, OpContext};

#[instrument(level = "debug", skip(ctx))]
pub(crate) async fn produce(
    ctx: OpContext,
    container: Option<String>,
    objects: Option<Vec<String>>,
) {
    match (container, objects) {
        (Some(container), Some(objects)) => {
            let mut handles = Vec::with_capacity(objects.len());
            for object in objects {
                if ctx.cancelled() {
                    break;
                }
                let job_ctx = ctx.clone();
                let job_container = container.clone();
                handles.push(
                    ctx.object_executor
                        .submit(async move {
                            download_object_job(job_ctx, job_container, object).await
                        })
                        .await,
                );
            }
            drain(&ctx, handles).await;
        }
        (Some(container), None) => {
            download_container(ctx, container).await;
        }
        (None, _) => {
            download_account(ctx).await;
        }
    }
}

async fn download_account(ctx: OpContext) {
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            warn!(error = %err, "cannot create listing connection");
            return;
        }
    };
    let mut marker = String::new();
    loop {
        if ctx.cancelled() {
            return;
        }
        let page = match conn
            .get_account(&ListParams {
                marker: marker.clone(),
                prefix: ctx.options.prefix.clone(),
                delimiter: None,
            })
            .await
        {
            Ok(reply) => reply.value,
            Err(err) => {
                let err = SwiftError::from(err);
                warn!(error = %err, "account listing failed during download");
                return;
            }
        };
        let Some(last) = page.last() else {
            return;
        };
        marker = last.name.clone();
        for entry in page {
            download_container(ctx.clone(), entry.name).await;
            if ctx.cancelled() {
                return;
            }
        }
    }
}

async fn download_container(ctx: OpContext, container: String) {
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            warn!(error = %err, "cannot create listing connection");
            return;
        }
    };
    // One page of jobs at a time; the executor's submit backpressure plus
    // this per-page drain keep paging throttled.
    let page_ctx = ctx.clone();
    let page_container = container.clone();
    let paged = list::each_page(
        conn.as_mut(),
        &container,
        ctx.options.prefix.clone(),
        async move |page| {
            let mut handles = Vec::with_capacity(page.len());
            for entry in page {
                if page_ctx.cancelled() {
                    return Err(SwiftError::new("operation cancelled"));
                }
                let object = if entry.name.is_empty() {
                    entry.subdir.unwrap_or_default()
                } else {
                    entry.name
                };
                let job_ctx = page_ctx.clone();
                let job_container = page_container.clone();
                handles.push(
                    page_ctx
                        .object_executor
                        .submit(async move {
                            download_object_job(job_ctx, job_container, object).await
                        })
                        .await,
                );
            }
            drain(&page_ctx, handles).await;
            Ok(())
        },
    )
    .await;
    if let Err(err) = paged {
        debug!(error = %err, container, "container download stopped");
    }
}

async fn drain(ctx: &OpContext, handles: Vec<crate::executor::JobHandle<OpResult>>) {
    let mut completed = AsCompleted::new(handles, ctx.cancel.clone());
    while let Some(result) = completed.next().await {
        if !ctx.send(result).await {
            return;
        }
    }
}

/// Local path an object lands at, honouring out_file/out_directory/prefix
/// options.
fn destination_path(object: &str, options: &Options) -> PathBuf {
    if let Some(out_file) = &options.out_file {
        return PathBuf::from(out_file);
    }
    let mut name = object.to_string();
    if options.remove_prefix {
        if let Some(prefix) = &options.prefix {
            if let Some(stripped) = name.strip_prefix(prefix.as_str()) {
                name = stripped.trim_start_matches('/').to_string();
            }
        }
    }
    match &options.out_directory {
        Some(dir) => Path::new(dir).join(name),
        None => PathBuf::from(name),
    }
}

/// Downloads one object.
pub(crate) async fn download_object_job(
    ctx: OpContext,
    container: String,
    object: String,
) -> OpResult {
    let options = &ctx.options;
    let path = destination_path(&object, options);
    let pseudodir = object.ends_with('/');

    let data = |read_length: Option<u64>, times: Option<(f64, f64, f64, f64)>| {
        let (start, receipt, finish, auth_end) = match times {
            Some(t) => (Some(t.0), Some(t.1), Some(t.2), Some(t.3)),
            None => (None, None, None, None),
        };
        ResultData::DownloadObject {
            container: container.clone(),
            object: object.clone(),
            path: Some(path.clone()),
            pseudodir,
            read_length,
            start_time: start,
            headers_receipt: receipt,
            finish_time: finish,
            auth_end_time: auth_end,
        }
    };

    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(
                Action::DownloadObject,
                0,
                ResponseDict::default(),
                data(None, None),
                &err,
            );
        }
    };

    // Probe headers for the skip-identical flow.
    let mut params = GetParams::default();
    if options.skip_identical && !pseudodir {
        if let Ok(local) = file_md5(&path).await {
            params
                .headers
                .insert("if-none-match".to_string(), local);
            params.query_string = Some(MANIFEST_GET.to_string());
        }
    }

    let start_time = epoch_seconds();
    let reply = match conn.get_object(&container, &object, &params).await {
        Ok(reply) => reply,
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            return OpResult::failed(
                Action::DownloadObject,
                attempts,
                response,
                data(None, None),
                &SwiftError::from(err),
            );
        }
    };
    let mut headers_receipt = epoch_seconds();
    let (mut headers, mut body) = reply.value;
    let mut response = reply.response;

    // With the manifest query string a large object answers with its
    // manifest, not its content: compare identities, then either report
    // "already identical" or fetch the real body.
    if params.query_string.is_some() && kind_from_headers(&headers).is_some() {
        let identical =
            large_object_identity(conn.as_mut(), &container, &object, &headers, body, &path)
                .await;
        match identical {
            Ok(true) => {
                let attempts = conn.attempts();
                let err = SwiftError::for_object(&container, &object, "Large object is identical")
                    .with_status(304);
                return OpResult::failed(
                    Action::DownloadObject,
                    attempts,
                    ResponseDict::default(),
                    data(None, None),
                    &err,
                );
            }
            Ok(false) => {
                // Differing large object: re-issue the real GET without the
                // manifest query string.
                params.query_string = None;
                match conn.get_object(&container, &object, &params).await {
                    Ok(reply) => {
                        (headers, body) = reply.value;
                        response = reply.response;
                    }
                    Err(err) => {
                        let attempts = conn.attempts();
                        let err_response = err.response().cloned().unwrap_or_default();
                        return OpResult::failed(
                            Action::DownloadObject,
                            attempts,
                            err_response,
                            data(None, None),
                            &SwiftError::from(err),
                        );
                    }
                }
                headers_receipt = epoch_seconds();
            }
            Err(err) => {
                return OpResult::failed(
                    Action::DownloadObject,
                    conn.attempts(),
                    ResponseDict::default(),
                    data(None, None),
                    &err,
                );
            }
        }
    }

    let attempts = conn.attempts();
    let auth_end_time = conn.auth_end_time();
    match write_body(&path, pseudodir, &headers, body, options).await {
        Ok(read_length) => {
            let finish_time = epoch_seconds();
            debug!(container, object, read_length, "download complete");
            OpResult::ok(
                Action::DownloadObject,
                attempts,
                response,
                data(
                    Some(read_length),
                    Some((start_time, headers_receipt, finish_time, auth_end_time)),
                ),
            )
        }
        Err(err) => OpResult::failed(
            Action::DownloadObject,
            attempts,
            response,
            data(None, None),
            &err,
        ),
    }
}

/// Identity check for the skip-identical probe of a large object. The probe
/// body is the manifest for SLOs and empty for DLOs; it is consumed here.
async fn large_object_identity(
    conn: &mut dyn Connection,
    container: &str,
    object: &str,
    headers: &Headers,
    body: BodyStream,
    path: &Path,
) -> Result<bool, SwiftError> {
    let segments = match kind_from_headers(headers) {
        None => return Ok(false),
        Some(LargeObjectKind::Dlo { manifest }) => {
            drop(body);
            let Some((seg_container, prefix)) = manifest.split_once('/') else {
                return Err(SwiftError::for_object(
                    container,
                    object,
                    "malformed x-object-manifest",
                ));
            };
            dlo_segments(conn, seg_container, prefix).await?
        }
        Some(LargeObjectKind::Slo) => {
            let raw = collect_body(body).await?;
            let entries = parse_manifest(container, object, &raw)?;
            flatten_entries(conn, container, object, entries, 0).await?
        }
    };
    segments_identical(&segments, path).await
}

/// Streams the body to its destination, verifying length and etag.
async fn write_body(
    path: &Path,
    pseudodir: bool,
    headers: &Headers,
    mut body: BodyStream,
    options: &Options,
) -> Result<u64, SwiftError> {
    let label = path.to_string_lossy().into_owned();
    let mut verifier = BodyVerifier::new(&label, headers)?;

    if pseudodir {
        // Directory marker: make the directory, never a file.
        tokio::fs::create_dir_all(path).await.map_err(|e| {
            SwiftError::new(format!("cannot create {}: {e}", path.display())).with_source(e)
        })?;
        while let Some(chunk) = body.next().await {
            verifier.update(&chunk.map_err(SwiftError::from)?);
        }
        return verifier.finish();
    }

    let mut file = if options.no_download {
        None
    } else {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SwiftError::new(format!("cannot create {}: {e}", parent.display()))
                        .with_source(e)
                })?;
            }
        }
        Some(tokio::fs::File::create(path).await.map_err(|e| {
            SwiftError::new(format!("cannot create {}: {e}", path.display())).with_source(e)
        })?)
    };

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(SwiftError::from)?;
        verifier.update(&chunk);
        if let Some(file) = file.as_mut() {
            use tokio::io::AsyncWriteExt;
            file.write_all(&chunk).await.map_err(|e| {
                SwiftError::new(format!("write error on {}: {e}", path.display())).with_source(e)
            })?;
        }
    }
    if let Some(mut file) = file {
        use tokio::io::AsyncWriteExt;
        file.flush().await.map_err(|e| {
            SwiftError::new(format!("flush error on {}: {e}", path.display())).with_source(e)
        })?;
    }
    verifier.finish()
}
