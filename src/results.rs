//! Result records flowing back to the caller.
//!
//! Every job produces exactly one [`OpResult`]: a common header (action,
//! success, attempts, transport record) plus an action-specific payload.
//! Failed results additionally carry an [`ErrorRecord`]. The tagged shape is
//! what the engine works with internally; serialization flattens it into the
//! free-form map callers of the CLI see.

use std::backtrace::Backtrace;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::clock::epoch_seconds;
use crate::connection::{Headers, ListEntry, ResponseDict};
use crate::error::SwiftError;

/// Job kind tag shared by every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ListAccountPart,
    ListContainerPart,
    DeleteObject,
    DeleteSegment,
    DeleteContainer,
    CreateContainer,
    UploadObject,
    UploadSegment,
    DownloadObject,
    StatAccount,
    StatContainer,
    StatObject,
    PostAccount,
    PostContainer,
    PostObject,
    CopyObject,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListAccountPart => "list_account_part",
            Self::ListContainerPart => "list_container_part",
            Self::DeleteObject => "delete_object",
            Self::DeleteSegment => "delete_segment",
            Self::DeleteContainer => "delete_container",
            Self::CreateContainer => "create_container",
            Self::UploadObject => "upload_object",
            Self::UploadSegment => "upload_segment",
            Self::DownloadObject => "download_object",
            Self::StatAccount => "stat_account",
            Self::StatContainer => "stat_container",
            Self::StatObject => "stat_object",
            Self::PostAccount => "post_account",
            Self::PostContainer => "post_container",
            Self::PostObject => "post_object",
            Self::CopyObject => "copy_object",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadStatus {
    #[serde(rename = "uploaded")]
    Uploaded,
    #[serde(rename = "skipped-identical")]
    SkippedIdentical,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uploaded => "uploaded",
            Self::SkippedIdentical => "skipped-identical",
        })
    }
}

/// Failure details attached to unsuccessful results.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Rendered error, context suffix included.
    #[serde(rename = "error")]
    pub message: String,
    /// HTTP status of the failing exchange, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Wall clock at the catch site.
    pub error_timestamp: f64,
    /// Captured stack rendering.
    pub traceback: String,
}

impl ErrorRecord {
    /// Captures the error, the current time, and the current stack.
    #[must_use]
    pub fn capture(err: &SwiftError) -> Self {
        Self {
            message: err.to_string(),
            http_status: err.http_status(),
            error_timestamp: epoch_seconds(),
            traceback: Backtrace::force_capture().to_string(),
        }
    }
}

/// Action-specific payload of a result.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResultData {
    ListAccountPart {
        listing: Vec<ListEntry>,
        marker: String,
        prefix: Option<String>,
    },
    ListContainerPart {
        container: String,
        listing: Vec<ListEntry>,
        marker: String,
        prefix: Option<String>,
    },
    DeleteObject {
        container: String,
        object: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        dlo_segments_deleted: bool,
    },
    DeleteSegment {
        container: String,
        object: String,
    },
    DeleteContainer {
        container: String,
        /// Always null; keeps delete records shape-compatible.
        object: Option<String>,
    },
    CreateContainer {
        container: String,
    },
    UploadObject {
        container: String,
        object: String,
        path: Option<PathBuf>,
        headers: Headers,
        large_object: bool,
        status: UploadStatus,
    },
    UploadSegment {
        for_object: String,
        segment_index: usize,
        segment_size: u64,
        segment_location: String,
        log_line: String,
        segment_etag: String,
    },
    DownloadObject {
        container: String,
        object: String,
        path: Option<PathBuf>,
        pseudodir: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        read_length: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        headers_receipt: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_time: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_end_time: Option<f64>,
    },
    StatAccount {
        headers: Headers,
    },
    StatContainer {
        container: String,
        headers: Headers,
    },
    StatObject {
        container: String,
        object: String,
        headers: Headers,
    },
    PostAccount {
        headers: Headers,
    },
    PostContainer {
        container: String,
        headers: Headers,
    },
    PostObject {
        container: String,
        object: String,
        headers: Headers,
    },
    CopyObject {
        container: String,
        object: String,
        destination: Option<String>,
        fresh_metadata: bool,
    },
}

/// One record per job, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct OpResult {
    pub action: Action,
    pub success: bool,
    pub attempts: u32,
    #[serde(rename = "response_dict")]
    pub response: ResponseDict,
    #[serde(flatten)]
    pub data: ResultData,
    #[serde(flatten)]
    pub error: Option<ErrorRecord>,
}

impl OpResult {
    /// A successful result.
    #[must_use]
    pub fn ok(action: Action, attempts: u32, response: ResponseDict, data: ResultData) -> Self {
        Self {
            action,
            success: true,
            attempts,
            response,
            data,
            error: None,
        }
    }

    /// A failed result capturing `err` at the current instant.
    #[must_use]
    pub fn failed(
        action: Action,
        attempts: u32,
        response: ResponseDict,
        data: ResultData,
        err: &SwiftError,
    ) -> Self {
        Self {
            action,
            success: false,
            attempts,
            response,
            data,
            error: Some(ErrorRecord::capture(err)),
        }
    }

    /// Serialises into the boundary map form.
    #[must_use]
    pub fn to_map(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_data() -> ResultData {
        ResultData::DeleteObject {
            container: "test_c".to_string(),
            object: "test_o".to_string(),
            dlo_segments_deleted: false,
        }
    }

    #[test]
    fn test_success_result_has_no_error_fields() {
        let r = OpResult::ok(
            Action::DeleteObject,
            2,
            ResponseDict::default(),
            sample_data(),
        );
        let map = r.to_map();
        assert_eq!(map["action"], "delete_object");
        assert_eq!(map["success"], true);
        assert_eq!(map["attempts"], 2);
        assert!(map.get("error").is_none());
        assert!(map.get("traceback").is_none());
        // dlo_segments_deleted=false stays hidden.
        assert!(map.get("dlo_segments_deleted").is_none());
    }

    #[test]
    fn test_failed_result_carries_error_record() {
        let err = SwiftError::for_object("test_c", "test_o", "boom").with_status(500);
        let before = epoch_seconds();
        let r = OpResult::failed(
            Action::DeleteObject,
            1,
            ResponseDict::default(),
            sample_data(),
            &err,
        );
        let after = epoch_seconds();

        let record = r.error.as_ref().unwrap();
        assert!(record.message.contains("boom"));
        assert_eq!(record.http_status, Some(500));
        assert!(record.error_timestamp >= before && record.error_timestamp <= after);
        assert!(!record.traceback.is_empty());

        let map = r.to_map();
        assert_eq!(map["success"], false);
        assert!(map["error"].as_str().unwrap().contains("container:test_c"));
    }

    #[test]
    fn test_dlo_segments_deleted_serialized_when_true() {
        let r = OpResult::ok(
            Action::DeleteObject,
            1,
            ResponseDict::default(),
            ResultData::DeleteObject {
                container: "c".to_string(),
                object: "o".to_string(),
                dlo_segments_deleted: true,
            },
        );
        assert_eq!(r.to_map()["dlo_segments_deleted"], true);
    }

    #[test]
    fn test_upload_status_rendering() {
        assert_eq!(UploadStatus::Uploaded.to_string(), "uploaded");
        assert_eq!(
            UploadStatus::SkippedIdentical.to_string(),
            "skipped-identical"
        );
        let json = serde_json::to_value(UploadStatus::SkippedIdentical).unwrap();
        assert_eq!(json, "skipped-identical");
    }

    #[test]
    fn test_action_names_match_wire_tags() {
        assert_eq!(Action::ListAccountPart.as_str(), "list_account_part");
        assert_eq!(Action::UploadSegment.as_str(), "upload_segment");
        let json = serde_json::to_value(Action::CreateContainer).unwrap();
        assert_eq!(json, "create_container");
    }
}
