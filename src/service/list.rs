//! Listing orchestrator: account and container paging.
//!
//! Pages are fetched sequentially (each `marker` depends on the previous
//! page) and pushed into the bounded result channel. The channel is the
//! backpressure: with W workers' worth of capacity, at most W pages buffer
//! ahead of the consumer plus one blocked in `send`.

use tracing::{debug, instrument};

use crate::connection::{Connection, ListParams, ResponseDict};
use crate::error::SwiftError;
use crate::results::{Action, OpResult, ResultData};

use super::OpContext;

#[instrument(level = "debug", skip(ctx))]
pub(crate) async fn produce(ctx: OpContext, container: Option<String>) {
    let mut conn = match ctx.connection() {
        Ok(conn) => conn,
        Err(err) => {
            let result = failed_page(&ctx, container.as_deref(), String::new(), 0, &err);
            let _ = ctx.send(result).await;
            return;
        }
    };

    let mut marker = ctx.options.marker.clone();
    loop {
        if ctx.cancelled() {
            debug!("listing cancelled");
            return;
        }
        let params = ListParams {
            marker: marker.clone(),
            prefix: ctx.options.prefix.clone(),
            delimiter: ctx.options.delimiter.clone(),
        };
        let reply = match &container {
            Some(c) => conn.get_container(c, &params).await,
            None => conn.get_account(&params).await,
        };
        let attempts = conn.attempts();
        match reply {
            Ok(mut reply) => {
                if reply.value.is_empty() {
                    // First empty page terminates the listing.
                    return;
                }
                let next_marker = reply
                    .value
                    .last()
                    .map(|e| {
                        if e.name.is_empty() {
                            e.subdir.clone().unwrap_or_default()
                        } else {
                            e.name.clone()
                        }
                    })
                    .unwrap_or_default();

                // Long account listings decorate each container with its
                // metadata headers.
                if container.is_none() && ctx.options.long {
                    for entry in &mut reply.value {
                        match conn.head_container(&entry.name).await {
                            Ok(head) => entry.meta = Some(head.value),
                            Err(err) => {
                                let err = SwiftError::from(err);
                                let result = failed_page(
                                    &ctx,
                                    None,
                                    marker.clone(),
                                    conn.attempts(),
                                    &err,
                                );
                                let _ = ctx.send(result).await;
                                return;
                            }
                        }
                    }
                }

                let data = match &container {
                    Some(c) => ResultData::ListContainerPart {
                        container: c.clone(),
                        listing: reply.value,
                        marker: marker.clone(),
                        prefix: ctx.options.prefix.clone(),
                    },
                    None => ResultData::ListAccountPart {
                        listing: reply.value,
                        marker: marker.clone(),
                        prefix: ctx.options.prefix.clone(),
                    },
                };
                let action = match &container {
                    Some(_) => Action::ListContainerPart,
                    None => Action::ListAccountPart,
                };
                if !ctx
                    .send(OpResult::ok(action, attempts, reply.response, data))
                    .await
                {
                    return; // consumer stopped iterating
                }
                marker = next_marker;
            }
            Err(err) => {
                let response = err.response().cloned().unwrap_or_default();
                let err = SwiftError::from(err);
                let mut result =
                    failed_page(&ctx, container.as_deref(), marker.clone(), attempts, &err);
                result.response = response;
                let _ = ctx.send(result).await;
                return;
            }
        }
    }
}

fn failed_page(
    ctx: &OpContext,
    container: Option<&str>,
    marker: String,
    attempts: u32,
    err: &SwiftError,
) -> OpResult {
    let (action, data) = match container {
        Some(c) => (
            Action::ListContainerPart,
            ResultData::ListContainerPart {
                container: c.to_string(),
                listing: Vec::new(),
                marker,
                prefix: ctx.options.prefix.clone(),
            },
        ),
        None => (
            Action::ListAccountPart,
            ResultData::ListAccountPart {
                listing: Vec::new(),
                marker,
                prefix: ctx.options.prefix.clone(),
            },
        ),
    };
    OpResult::failed(action, attempts, ResponseDict::default(), data, err)
}

/// Pages a container directly, invoking `on_page` for each non-empty page.
///
/// Shared by the delete and download orchestrators, which fan jobs out of
/// every page instead of forwarding the page itself.
pub(crate) async fn each_page<F>(
    conn: &mut dyn Connection,
    container: &str,
    prefix: Option<String>,
    mut on_page: F,
) -> Result<(), SwiftError>
where
    F: AsyncFnMut(Vec<crate::connection::ListEntry>) -> Result<(), SwiftError>,
{
    let mut marker = String::new();
    loop {
        let page = conn
            .get_container(
                container,
                &ListParams {
                    marker: marker.clone(),
                    prefix: prefix.clone(),
                    delimiter: None,
                },
            )
            .await?
            .value;
        let Some(last) = page.last() else {
            return Ok(());
        };
        marker = if last.name.is_empty() {
            last.subdir.clone().unwrap_or_default()
        } else {
            last.name.clone()
        };
        on_page(page).await?;
    }
}
