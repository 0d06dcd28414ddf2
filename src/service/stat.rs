//! Thin orchestrators over HEAD, POST and COPY.

use std::sync::Arc;

use tracing::instrument;

use crate::connection::{Connection, Headers, ResponseDict};
use crate::error::SwiftError;
use crate::executor::AsCompleted;
use crate::options::{split_headers, Options};
use crate::results::{Action, OpResult, ResultData};

use super::{OpContext, SwiftPostObject};

#[instrument(level = "debug", skip(ctx))]
pub(crate) async fn produce_stat(ctx: OpContext, container: Option<String>, objects: Vec<String>) {
    match (container, objects) {
        (None, _) => {
            let result = stat_account_job(&ctx).await;
            let _ = ctx.send(result).await;
        }
        (Some(container), objects) if objects.is_empty() => {
            let result = stat_container_job(&ctx, container).await;
            let _ = ctx.send(result).await;
        }
        (Some(container), objects) => {
            let mut handles = Vec::with_capacity(objects.len());
            for object in objects {
                if ctx.cancelled() {
                    break;
                }
                let job_ctx = ctx.clone();
                let job_container = container.clone();
                handles.push(
                    ctx.object_executor
                        .submit(async move { stat_object_job(job_ctx, job_container, object).await })
                        .await,
                );
            }
            drain(&ctx, handles).await;
        }
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

async fn stat_account_job(ctx: &OpContext) -> OpResult {
    let data = |headers: Headers| ResultData::StatAccount { headers };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(
                Action::StatAccount,
                0,
                ResponseDict::default(),
                data(Headers::new()),
                &err,
            );
        }
    };
    match conn.head_account().await {
        Ok(reply) => OpResult::ok(
            Action::StatAccount,
            conn.attempts(),
            reply.response,
            data(reply.value),
        ),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::StatAccount,
                attempts,
                response,
                data(Headers::new()),
                &SwiftError::from(err),
            )
        }
    }
}

async fn stat_container_job(ctx: &OpContext, container: String) -> OpResult {
    let data = |headers: Headers| ResultData::StatContainer {
        container: container.clone(),
        headers,
    };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(
                Action::StatContainer,
                0,
                ResponseDict::default(),
                data(Headers::new()),
                &err,
            );
        }
    };
    match conn.head_container(&container).await {
        Ok(reply) => OpResult::ok(
            Action::StatContainer,
            conn.attempts(),
            reply.response,
            data(reply.value),
        ),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::StatContainer,
                attempts,
                response,
                data(Headers::new()),
                &SwiftError::from(err),
            )
        }
    }
}

async fn stat_object_job(ctx: OpContext, container: String, object: String) -> OpResult {
    let data = |headers: Headers| ResultData::StatObject {
        container: container.clone(),
        object: object.clone(),
        headers,
    };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(
                Action::StatObject,
                0,
                ResponseDict::default(),
                data(Headers::new()),
                &err,
            );
        }
    };
    match conn.head_object(&container, &object).await {
        Ok(reply) => OpResult::ok(
            Action::StatObject,
            conn.attempts(),
            reply.response,
            data(reply.value),
        ),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::StatObject,
                attempts,
                response,
                data(Headers::new()),
                &SwiftError::from(err),
            )
        }
    }
}

/// Combined `header` + prefixed `meta` option headers for a post.
fn post_headers(options: &Options, meta_prefix: &str) -> Result<Headers, SwiftError> {
    let mut headers = split_headers(&options.meta, meta_prefix)?;
    headers.extend(split_headers(&options.header, "")?);
    Ok(headers)
}

#[instrument(level = "debug", skip(ctx, objects))]
pub(crate) async fn produce_post(
    ctx: OpContext,
    container: Option<String>,
    objects: Vec<SwiftPostObject>,
) {
    match (container, objects) {
        (None, _) => {
            let result = post_account_job(&ctx).await;
            let _ = ctx.send(result).await;
        }
        (Some(container), objects) if objects.is_empty() => {
            let result = post_container_job(&ctx, container).await;
            let _ = ctx.send(result).await;
        }
        (Some(container), objects) => {
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
                            post_object_job(job_ctx, job_container, object.object_name, options)
                                .await
                        })
                        .await,
                );
            }
            drain(&ctx, handles).await;
        }
    }
}

async fn post_account_job(ctx: &OpContext) -> OpResult {
    let headers = match post_headers(&ctx.options, "X-Account-Meta-") {
        Ok(headers) => headers,
        Err(err) => {
            return OpResult::failed(
                Action::PostAccount,
                0,
                ResponseDict::default(),
                ResultData::PostAccount {
                    headers: Headers::new(),
                },
                &err,
            );
        }
    };
    let data = ResultData::PostAccount {
        headers: headers.clone(),
    };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(Action::PostAccount, 0, ResponseDict::default(), data, &err);
        }
    };
    match conn.post_account(&headers).await {
        Ok(reply) => OpResult::ok(Action::PostAccount, conn.attempts(), reply.response, data),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::PostAccount,
                attempts,
                response,
                data,
                &SwiftError::from(err),
            )
        }
    }
}

async fn post_container_job(ctx: &OpContext, container: String) -> OpResult {
    let headers = match post_headers(&ctx.options, "X-Container-Meta-") {
        Ok(headers) => headers,
        Err(err) => {
            return OpResult::failed(
                Action::PostContainer,
                0,
                ResponseDict::default(),
                ResultData::PostContainer {
                    container,
                    headers: Headers::new(),
                },
                &err,
            );
        }
    };
    let data = ResultData::PostContainer {
        container: container.clone(),
        headers: headers.clone(),
    };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(
                Action::PostContainer,
                0,
                ResponseDict::default(),
                data,
                &err,
            );
        }
    };
    match conn.post_container(&container, &headers).await {
        Ok(reply) => OpResult::ok(Action::PostContainer, conn.attempts(), reply.response, data),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::PostContainer,
                attempts,
                response,
                data,
                &SwiftError::from(err),
            )
        }
    }
}

async fn post_object_job(
    ctx: OpContext,
    container: String,
    object: String,
    options: Arc<Options>,
) -> OpResult {
    let headers = match post_headers(&options, "X-Object-Meta-") {
        Ok(headers) => headers,
        Err(err) => {
            return OpResult::failed(
                Action::PostObject,
                0,
                ResponseDict::default(),
                ResultData::PostObject {
                    container,
                    object,
                    headers: Headers::new(),
                },
                &err,
            );
        }
    };
    let data = ResultData::PostObject {
        container: container.clone(),
        object: object.clone(),
        headers: headers.clone(),
    };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(Action::PostObject, 0, ResponseDict::default(), data, &err);
        }
    };
    match conn.post_object(&container, &object, &headers).await {
        Ok(reply) => OpResult::ok(Action::PostObject, conn.attempts(), reply.response, data),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::PostObject,
                attempts,
                response,
                data,
                &SwiftError::from(err),
            )
        }
    }
}

#[instrument(level = "debug", skip(ctx))]
pub(crate) async fn produce_copy(ctx: OpContext, container: String, objects: Vec<String>) {
    let mut handles = Vec::with_capacity(objects.len());
    for object in objects {
        if ctx.cancelled() {
            break;
        }
        let job_ctx = ctx.clone();
        let job_container = container.clone();
        handles.push(
            ctx.object_executor
                .submit(async move { copy_object_job(job_ctx, job_container, object).await })
                .await,
        );
    }
    drain(&ctx, handles).await;
}

/// Fills in the source object name when the destination names only a
/// container.
fn copy_destination(destination: Option<&str>, container: &str, object: &str) -> String {
    match destination {
        None => format!("/{container}/{object}"),
        Some(dest) => {
            let trimmed = dest.trim_end_matches('/');
            if trimmed.matches('/').count() >= 2 {
                dest.to_string()
            } else {
                format!("{trimmed}/{object}")
            }
        }
    }
}

async fn copy_object_job(ctx: OpContext, container: String, object: String) -> OpResult {
    let destination = copy_destination(ctx.options.destination.as_deref(), &container, &object);
    let data = ResultData::CopyObject {
        container: container.clone(),
        object: object.clone(),
        destination: Some(destination.clone()),
        fresh_metadata: ctx.options.fresh_metadata,
    };
    let headers = match split_headers(&ctx.options.header, "") {
        Ok(headers) => headers,
        Err(err) => {
            return OpResult::failed(Action::CopyObject, 0, ResponseDict::default(), data, &err);
        }
    };
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            return OpResult::failed(Action::CopyObject, 0, ResponseDict::default(), data, &err);
        }
    };
    match conn
        .copy_object(
            &container,
            &object,
            &destination,
            &headers,
            ctx.options.fresh_metadata,
        )
        .await
    {
        Ok(reply) => OpResult::ok(Action::CopyObject, conn.attempts(), reply.response, data),
        Err(err) => {
            let attempts = conn.attempts();
            let response = err.response().cloned().unwrap_or_default();
            OpResult::failed(
                Action::CopyObject,
                attempts,
                response,
                data,
                &SwiftError::from(err),
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_destination_forms() {
        assert_eq!(copy_destination(None, "c", "o"), "/c/o");
        assert_eq!(copy_destination(Some("/other"), "c", "o"), "/other/o");
        assert_eq!(copy_destination(Some("/other/"), "c", "o"), "/other/o");
        assert_eq!(
            copy_destination(Some("/other/renamed"), "c", "o"),
            "/other/renamed"
        );
    }

    #[test]
    fn test_post_headers_merges_meta_and_header() {
        let options = Options {
            meta: vec!["color:blue".to_string()],
            header: vec!["content-type:text/plain".to_string()],
            ..Options::default()
        };
        let headers = post_headers(&options, "X-Object-Meta-").unwrap();
        assert_eq!(
            headers.get("X-Object-Meta-Color").map(String::as_str),
            Some("blue")
        );
        assert_eq!(
            headers.get("Content-Type").map(String::as_str),
            Some("text/plain")
        );
    }
}
