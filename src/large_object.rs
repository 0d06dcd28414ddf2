//! Large-object inspection: DLO/SLO detection, segment enumeration and
//! identity checks.
//!
//! A plain object is its own content. A DLO points at `<container>/<prefix>`
//! through `x-object-manifest`; its segments are whatever that prefix lists.
//! An SLO carries an explicit JSON manifest (`x-static-large-object`) whose
//! entries may themselves be manifests (`sub_slo`), flattened here up to a
//! fixed depth.

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::connection::{BodyStream, Connection, GetParams, Headers, ListParams};
use crate::error::SwiftError;

/// Maximum nesting of SLO submanifests before inspection fails.
pub const MAX_MANIFEST_DEPTH: usize = 10;

/// Query string selecting manifest bodies instead of object content.
pub const MANIFEST_GET: &str = "multipart-manifest=get";

/// One entry of an SLO manifest body.
///
/// `name` is a segment path of the form `/<container>/<name>`; the server
/// may omit it on leaf entries, where only `bytes` and `hash` matter.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub name: String,
    pub bytes: u64,
    pub hash: String,
    #[serde(default)]
    pub sub_slo: bool,
}

/// A resolved segment of a large object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub container: String,
    pub name: String,
    pub bytes: u64,
    pub hash: String,
}

/// How an object's content is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LargeObjectKind {
    /// Static large object (explicit manifest).
    Slo,
    /// Dynamic large object; value of `x-object-manifest`.
    Dlo { manifest: String },
}

/// Inspection outcome for a DLO or SLO.
#[derive(Debug)]
pub struct LargeObjectInfo {
    pub kind: LargeObjectKind,
    /// Flattened segments in content order.
    pub segments: Vec<SegmentRef>,
}

/// Classifies headers without any further requests.
#[must_use]
pub fn kind_from_headers(headers: &Headers) -> Option<LargeObjectKind> {
    if headers.contains_key("x-static-large-object") {
        return Some(LargeObjectKind::Slo);
    }
    headers
        .get("x-object-manifest")
        .map(|manifest| LargeObjectKind::Dlo {
            manifest: manifest.clone(),
        })
}

/// Whether headers mark the object as segmented at all.
#[must_use]
pub fn is_large_object(headers: &Headers) -> bool {
    kind_from_headers(headers).is_some()
}

/// Resolves an object's segments given its HEAD (or GET) headers.
///
/// Returns `None` for plain objects.
#[instrument(level = "debug", skip(conn, headers))]
pub async fn resolve(
    conn: &mut dyn Connection,
    container: &str,
    object: &str,
    headers: &Headers,
) -> Result<Option<LargeObjectInfo>, SwiftError> {
    match kind_from_headers(headers) {
        None => Ok(None),
        Some(LargeObjectKind::Slo) => {
            let segments = slo_segments(conn, container, object, 0).await?;
            Ok(Some(LargeObjectInfo {
                kind: LargeObjectKind::Slo,
                segments,
            }))
        }
        Some(LargeObjectKind::Dlo { manifest }) => {
            let (seg_container, prefix) = split_manifest(&manifest)
                .ok_or_else(|| {
                    SwiftError::for_object(container, object, "malformed x-object-manifest")
                })?;
            let segments = dlo_segments(conn, &seg_container, &prefix).await?;
            Ok(Some(LargeObjectInfo {
                kind: LargeObjectKind::Dlo { manifest },
                segments,
            }))
        }
    }
}

/// HEADs the object and resolves it; `None` for plain objects.
pub async fn inspect(
    conn: &mut dyn Connection,
    container: &str,
    object: &str,
) -> Result<Option<LargeObjectInfo>, SwiftError> {
    let headers = conn.head_object(container, object).await?.value;
    resolve(conn, container, object, &headers).await
}

/// Splits `<container>/<prefix>` from an `x-object-manifest` value.
fn split_manifest(manifest: &str) -> Option<(String, String)> {
    let (container, prefix) = manifest.split_once('/')?;
    if container.is_empty() {
        return None;
    }
    Some((container.to_string(), prefix.to_string()))
}

/// Fetches and flattens an SLO manifest, recursing into submanifests.
async fn slo_segments(
    conn: &mut dyn Connection,
    container: &str,
    object: &str,
    depth: usize,
) -> Result<Vec<SegmentRef>, SwiftError> {
    if depth >= MAX_MANIFEST_DEPTH {
        return Err(SwiftError::for_object(
            container,
            object,
            format!("manifest nesting deeper than {MAX_MANIFEST_DEPTH} levels"),
        ));
    }
    let reply = conn
        .get_object(
            container,
            object,
            &GetParams {
                query_string: Some(MANIFEST_GET.to_string()),
                headers: Headers::new(),
            },
        )
        .await?;
    let (_, body) = reply.value;
    let raw = collect_body(body).await?;
    let entries = parse_manifest(container, object, &raw)?;
    flatten_entries(conn, container, object, entries, depth).await
}

/// Parses an SLO manifest body.
pub(crate) fn parse_manifest(
    container: &str,
    object: &str,
    raw: &[u8],
) -> Result<Vec<ManifestEntry>, SwiftError> {
    serde_json::from_slice(raw).map_err(|e| {
        SwiftError::for_object(container, object, format!("invalid manifest body: {e}"))
            .with_source(e)
    })
}

/// Flattens parsed manifest entries, recursing into submanifests.
pub(crate) async fn flatten_entries(
    conn: &mut dyn Connection,
    container: &str,
    object: &str,
    entries: Vec<ManifestEntry>,
    depth: usize,
) -> Result<Vec<SegmentRef>, SwiftError> {
    let mut segments = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.sub_slo {
            let Some((seg_container, seg_name)) = parse_entry_name(&entry.name) else {
                return Err(SwiftError::for_object(
                    container,
                    object,
                    format!("malformed submanifest entry name {}", entry.name),
                ));
            };
            let nested =
                Box::pin(slo_segments(conn, &seg_container, &seg_name, depth + 1)).await?;
            segments.extend(nested);
        } else {
            let (seg_container, seg_name) = parse_entry_name(&entry.name).unwrap_or_default();
            segments.push(SegmentRef {
                container: seg_container,
                name: seg_name,
                bytes: entry.bytes,
                hash: entry.hash,
            });
        }
    }
    debug!(container, object, count = segments.len(), "flattened manifest");
    Ok(segments)
}

/// Parses `/<container>/<name>` from a manifest entry.
fn parse_entry_name(name: &str) -> Option<(String, String)> {
    let trimmed = name.strip_prefix('/').unwrap_or(name);
    let (container, object) = trimmed.split_once('/')?;
    if container.is_empty() || object.is_empty() {
        return None;
    }
    Some((container.to_string(), object.to_string()))
}

/// Pages through a DLO's segments container until the first empty page.
pub async fn dlo_segments(
    conn: &mut dyn Connection,
    seg_container: &str,
    prefix: &str,
) -> Result<Vec<SegmentRef>, SwiftError> {
    let mut segments = Vec::new();
    let mut marker = String::new();
    loop {
        let page = conn
            .get_container(
                seg_container,
                &ListParams {
                    marker: marker.clone(),
                    prefix: Some(prefix.to_string()),
                    delimiter: None,
                },
            )
            .await?
            .value;
        let Some(last) = page.last() else {
            break;
        };
        marker = last.name.clone();
        segments.extend(page.into_iter().map(|entry| SegmentRef {
            container: seg_container.to_string(),
            bytes: entry.bytes.unwrap_or(0),
            hash: entry.hash.unwrap_or_default(),
            name: entry.name,
        }));
    }
    Ok(segments)
}

/// Composite etag over child etags, the server rule for manifest identity.
#[must_use]
pub fn composite_etag<'a>(hashes: impl IntoIterator<Item = &'a str>) -> String {
    let mut ctx = md5::Context::new();
    for hash in hashes {
        ctx.consume(hash.as_bytes());
    }
    format!("{:x}", ctx.finalize())
}

/// Compares a local file against a segment list, region by region.
///
/// True when every segment's byte range hashes to the recorded etag and the
/// file has no trailing bytes.
pub async fn segments_identical(
    segments: &[SegmentRef],
    path: &std::path::Path,
) -> Result<bool, SwiftError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        SwiftError::new(format!("cannot read {}: {e}", path.display())).with_source(e)
    })?;
    for segment in segments {
        let mut remaining = segment.bytes;
        let mut ctx = md5::Context::new();
        let mut buf = vec![0u8; crate::segment::CHUNK_SIZE];
        while remaining > 0 {
            let want = buf.len().min(usize::try_from(remaining).unwrap_or(buf.len()));
            let n = file
                .read(&mut buf[..want])
                .await
                .map_err(|e| SwiftError::new(format!("read error: {e}")).with_source(e))?;
            if n == 0 {
                return Ok(false); // local file shorter than the manifest
            }
            ctx.consume(&buf[..n]);
            remaining -= n as u64;
        }
        if format!("{:x}", ctx.finalize()) != segment.hash {
            return Ok(false);
        }
    }
    // Any trailing local bytes mean the contents differ.
    let mut tail = [0u8; 1];
    let extra = file
        .read(&mut tail)
        .await
        .map_err(|e| SwiftError::new(format!("read error: {e}")).with_source(e))?;
    Ok(extra == 0)
}

/// Collects a body stream into one buffer (manifest-sized payloads only).
pub async fn collect_body(mut body: BodyStream) -> Result<Bytes, SwiftError> {
    let mut out = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(SwiftError::from)?;
        out.extend_from_slice(&chunk);
    }
    Ok(out.freeze())
}
