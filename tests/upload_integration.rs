//! Integration tests for the upload orchestrator against a scripted
//! connection.

mod support;

use std::io::Write;

use rswift_core::{Action, Options, OptionsPatch, SwiftUploadObject, UploadStatus};
use support::{headers, md5_hex, mock_service, sized_entry, Call, MockState, PutReply};
use tempfile::NamedTempFile;

fn temp_file(content: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(content).unwrap();
    f.flush().unwrap();
    f
}

fn file_mtime_str(path: &std::path::Path) -> String {
    let mtime = std::fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    format!("{mtime:.6}")
}

fn fresh_destination(state: &std::sync::Arc<std::sync::Mutex<MockState>>) {
    state.lock().unwrap().head_object.push_back(Err(404));
}

#[tokio::test]
async fn test_upload_with_bad_segment_size() {
    let state = MockState::new();
    let service = mock_service(&state, Options::default());

    for bad in ["ten", "1234X", "100.3"] {
        let patch = OptionsPatch {
            segment_size: Some(bad.to_string()),
            ..OptionsPatch::default()
        };
        let err = service
            .upload(
                "c".to_string(),
                vec![SwiftUploadObject::from_path("o").unwrap()],
                Some(&patch),
            )
            .err()
            .unwrap_or_else(|| panic!("expected SwiftError when segment_size={bad}"));
        assert_eq!(err.message(), "Segment size should be an integer value");
    }
    // No jobs were scheduled for any of the bad values.
    assert!(state.lock().unwrap().calls.is_empty());
}

#[tokio::test]
async fn test_upload_object_from_file() {
    let f = temp_file(&[b'a'; 30]);
    let state = MockState::new();
    fresh_destination(&state);
    let service = mock_service(&state, Options::default());

    let upload =
        SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], None)
        .unwrap()
        .collect()
        .await;

    assert_eq!(results.len(), 2);
    let create = &results[0];
    assert_eq!(create.action, Action::CreateContainer);
    assert!(create.success);

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success, "{:?}", uploaded.error);
    assert_eq!(uploaded.attempts, 2);
    let map = uploaded.to_map();
    assert_eq!(map["status"], "uploaded");
    assert_eq!(map["large_object"], false);
    assert_eq!(map["object"], "test_o");
    assert_eq!(
        map["headers"]["x-object-meta-mtime"],
        file_mtime_str(f.path())
    );

    let state = state.lock().unwrap();
    let put = state
        .calls
        .iter()
        .find_map(|c| match c {
            Call::PutObject {
                container,
                object,
                content_length,
                body,
                ..
            } if container == "test_c" => Some((object.clone(), *content_length, body.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(put.0, "test_o");
    assert_eq!(put.1, Some(30));
    assert_eq!(md5_hex(&put.2), md5_hex(&[b'a'; 30]));
}

#[tokio::test]
async fn test_upload_object_from_stream_has_no_length() {
    let state = MockState::new();
    fresh_destination(&state);
    let service = mock_service(&state, Options::default());

    let stream: Box<dyn tokio::io::AsyncRead + Send + Unpin> = Box::new(&b"streamed bytes"[..]);
    let upload = SwiftUploadObject::from_stream(stream, "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], None)
        .unwrap()
        .collect()
        .await;

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success);
    assert!(uploaded.to_map()["path"].is_null());

    let state = state.lock().unwrap();
    let lengths: Vec<Option<u64>> = state
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::PutObject { content_length, .. } => Some(*content_length),
            _ => None,
        })
        .collect();
    assert_eq!(lengths, vec![None]);
}

#[tokio::test]
async fn test_upload_object_etag_mismatch() {
    let f = temp_file(&[b'a'; 30]);
    let state = MockState::new();
    fresh_destination(&state);
    state
        .lock()
        .unwrap()
        .put_object
        .push_back(PutReply::Etag("badresponseetag".to_string()));
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], None)
        .unwrap()
        .collect()
        .await;

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(!uploaded.success);
    let record = uploaded.error.as_ref().unwrap();
    assert!(
        record.message.contains("md5 mismatch"),
        "unexpected error: {}",
        record.message
    );
}

#[tokio::test]
async fn test_upload_etag_mismatch_ignored_without_checksum() {
    let f = temp_file(&[b'a'; 30]);
    let state = MockState::new();
    fresh_destination(&state);
    state
        .lock()
        .unwrap()
        .put_object
        .push_back(PutReply::Etag("badresponseetag".to_string()));
    let patch = OptionsPatch {
        checksum: Some(false),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success, "{:?}", uploaded.error);
}

#[tokio::test]
async fn test_upload_segmented_slo() {
    let mut content = Vec::new();
    content.extend_from_slice(&[b'a'; 10]);
    content.extend_from_slice(&[b'b'; 10]);
    content.extend_from_slice(&[b'c'; 10]);
    let f = temp_file(&content);
    let state = MockState::new();
    fresh_destination(&state);
    let patch = OptionsPatch {
        segment_size: Some("10".to_string()),
        use_slo: Some(true),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    // Both containers, three segments, one object.
    assert_eq!(
        results
            .iter()
            .filter(|r| r.action == Action::CreateContainer && r.success)
            .count(),
        2
    );
    let segment_successes: Vec<_> = results
        .iter()
        .filter(|r| r.action == Action::UploadSegment && r.success)
        .collect();
    assert_eq!(segment_successes.len(), 3);
    for r in &segment_successes {
        let map = r.to_map();
        assert_eq!(map["for_object"], "test_o");
        assert_eq!(map["segment_size"], 10);
        assert!(map["log_line"]
            .as_str()
            .unwrap()
            .starts_with("test_o segment "));
    }

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success, "{:?}", uploaded.error);
    assert_eq!(uploaded.to_map()["large_object"], true);

    let mtime = file_mtime_str(f.path());
    let prefix = format!("test_o/{mtime}/30/10/");

    let state = state.lock().unwrap();
    // Segment PUTs carry the planned names; the manifest PUT comes last.
    let puts: Vec<&Call> = state
        .calls
        .iter()
        .filter(|c| matches!(c, Call::PutObject { .. }))
        .collect();
    assert_eq!(puts.len(), 4);
    for (i, put) in puts[..3].iter().enumerate() {
        let Call::PutObject {
            container,
            object,
            content_length,
            query,
            ..
        } = put
        else {
            unreachable!()
        };
        assert_eq!(container, "test_c_segments");
        assert!(object.starts_with(&prefix), "bad segment name {object}");
        assert_eq!(*content_length, Some(10));
        assert!(query.is_none(), "segment {i} had a query string");
    }
    let Call::PutObject {
        container,
        object,
        query,
        body,
        ..
    } = puts[3]
    else {
        unreachable!()
    };
    assert_eq!(container, "test_c");
    assert_eq!(object, "test_o");
    assert_eq!(query.as_deref(), Some("multipart-manifest=put"));

    // Manifest entries are in planned index order regardless of completion.
    let manifest: Vec<serde_json::Value> = serde_json::from_slice(body).unwrap();
    assert_eq!(manifest.len(), 3);
    let expected_etags = [
        md5_hex(&[b'a'; 10]),
        md5_hex(&[b'b'; 10]),
        md5_hex(&[b'c'; 10]),
    ];
    for (i, entry) in manifest.iter().enumerate() {
        assert_eq!(
            entry["path"],
            format!("/test_c_segments/{prefix}{i:08}")
        );
        assert_eq!(entry["etag"], expected_etags[i]);
        assert_eq!(entry["size_bytes"], 10);
    }
}

#[tokio::test]
async fn test_upload_segmented_dlo_manifest_header() {
    let f = temp_file(&[b'a'; 25]);
    let state = MockState::new();
    fresh_destination(&state);
    let patch = OptionsPatch {
        segment_size: Some("10".to_string()),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    // 25 bytes at segment size 10: two full segments plus a short tail.
    assert_eq!(
        results
            .iter()
            .filter(|r| r.action == Action::UploadSegment && r.success)
            .count(),
        3
    );
    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success, "{:?}", uploaded.error);
    assert_eq!(uploaded.to_map()["large_object"], true);

    let mtime = file_mtime_str(f.path());
    let state = state.lock().unwrap();
    let manifest_put = state
        .calls
        .iter()
        .rev()
        .find_map(|c| match c {
            Call::PutObject {
                container,
                object,
                headers,
                body,
                content_length,
                ..
            } if container == "test_c" && object == "test_o" => {
                Some((headers.clone(), body.clone(), *content_length))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(
        manifest_put.0.get("x-object-manifest").map(String::as_str),
        Some(format!("test_c_segments/test_o/{mtime}/25/10/").as_str())
    );
    assert!(manifest_put.1.is_empty());
    assert_eq!(manifest_put.2, Some(0));
}

#[tokio::test]
async fn test_upload_segment_etag_mismatch_blocks_manifest() {
    let f = temp_file(&[b'b'; 30]);
    let state = MockState::new();
    fresh_destination(&state);
    {
        let mut s = state.lock().unwrap();
        for _ in 0..3 {
            s.put_object
                .push_back(PutReply::Etag("badresponseetag".to_string()));
        }
    }
    let patch = OptionsPatch {
        segment_size: Some("10".to_string()),
        use_slo: Some(true),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    let failed_segments: Vec<_> = results
        .iter()
        .filter(|r| r.action == Action::UploadSegment && !r.success)
        .collect();
    assert_eq!(failed_segments.len(), 3);
    for r in &failed_segments {
        assert!(r
            .error
            .as_ref()
            .unwrap()
            .message
            .contains("md5 mismatch"));
    }

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(!uploaded.success);

    // The manifest PUT never happened: only the three segment PUTs.
    let state = state.lock().unwrap();
    assert_eq!(state.count(|c| matches!(c, Call::PutObject { .. })), 3);
}

#[tokio::test]
async fn test_upload_skip_identical_plain() {
    let f = temp_file(&[b'a'; 30]);
    let state = MockState::new();
    state.lock().unwrap().head_object.push_back(Ok(headers(&[
        ("content-length", "30"),
        ("etag", &md5_hex(&[b'a'; 30])),
    ])));
    let patch = OptionsPatch {
        skip_identical: Some(true),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success);
    assert_eq!(uploaded.to_map()["status"], "skipped-identical");

    let state = state.lock().unwrap();
    assert_eq!(state.count(|c| matches!(c, Call::PutObject { .. })), 0);
    assert_eq!(state.count(|c| matches!(c, Call::HeadObject(..))), 1);
}

#[tokio::test]
async fn test_upload_skip_identical_nested_slo() {
    let f = temp_file(&[b'a'; 30]);
    let seg_etag = md5_hex(&[b'a'; 10]);
    let submanifest_etag = md5_hex(format!("{seg_etag}{seg_etag}").as_bytes());
    let composite = md5_hex(format!("{submanifest_etag}{seg_etag}").as_bytes());

    let manifest = format!(
        r#"[{{"sub_slo":true,"name":"/test_c_segments/test_sub_slo","bytes":20,"hash":"{submanifest_etag}"}},
            {{"bytes":10,"hash":"{seg_etag}"}}]"#
    );
    let submanifest = format!(
        r#"[{{"bytes":10,"hash":"{seg_etag}"}},{{"bytes":10,"hash":"{seg_etag}"}}]"#
    );

    let state = MockState::new();
    {
        let mut s = state.lock().unwrap();
        s.head_object.push_back(Ok(headers(&[
            ("x-static-large-object", "true"),
            ("content-length", "30"),
            ("etag", &composite),
        ])));
        s.get_object
            .push_back(Ok((Headers::new(), manifest.into_bytes())));
        s.get_object
            .push_back(Ok((Headers::new(), submanifest.into_bytes())));
    }
    let patch = OptionsPatch {
        skip_identical: Some(true),
        segment_size: Some("10".to_string()),
        leave_segments: Some(true),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success, "{:?}", uploaded.error);
    assert_eq!(uploaded.to_map()["status"], "skipped-identical");

    let state = state.lock().unwrap();
    assert_eq!(state.count(|c| matches!(c, Call::PutObject { .. })), 0);
    let gets: Vec<&Call> = state
        .calls
        .iter()
        .filter(|c| matches!(c, Call::GetObject { .. }))
        .collect();
    assert_eq!(
        gets,
        vec![
            &Call::GetObject {
                container: "test_c".to_string(),
                object: "test_o".to_string(),
                query: Some("multipart-manifest=get".to_string()),
                if_none_match: None,
            },
            &Call::GetObject {
                container: "test_c_segments".to_string(),
                object: "test_sub_slo".to_string(),
                query: Some("multipart-manifest=get".to_string()),
                if_none_match: None,
            },
        ]
    );
}

#[tokio::test]
async fn test_upload_skip_identical_dlo() {
    let f = temp_file(&[b'a'; 30]);
    let seg_etag = md5_hex(&[b'a'; 10]);

    let state = MockState::new();
    {
        let mut s = state.lock().unwrap();
        s.head_object.push_back(Ok(headers(&[
            ("x-object-manifest", "test_c_segments/test_o/prefix"),
            ("content-length", "30"),
            ("etag", &md5_hex(seg_etag.repeat(3).as_bytes())),
        ])));
        s.get_container.push_back(Ok(vec![
            sized_entry("test_o/prefix/00", 10, &seg_etag),
            sized_entry("test_o/prefix/01", 10, &seg_etag),
        ]));
        s.get_container
            .push_back(Ok(vec![sized_entry("test_o/prefix/02", 10, &seg_etag)]));
        s.get_container.push_back(Ok(vec![]));
    }
    let patch = OptionsPatch {
        skip_identical: Some(true),
        segment_size: Some("10".to_string()),
        leave_segments: Some(true),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success, "{:?}", uploaded.error);
    assert_eq!(uploaded.to_map()["status"], "skipped-identical");

    let state = state.lock().unwrap();
    assert_eq!(state.count(|c| matches!(c, Call::PutObject { .. })), 0);
    let markers: Vec<String> = state
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::GetContainer {
                container, marker, prefix,
            } if container == "test_c_segments" => {
                assert_eq!(prefix.as_deref(), Some("test_o/prefix"));
                Some(marker.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(markers, vec!["", "test_o/prefix/01", "test_o/prefix/02"]);
}

#[tokio::test]
async fn test_upload_changed_option_skips_unmodified() {
    let f = temp_file(&[b'a'; 30]);
    let mtime = file_mtime_str(f.path());
    let state = MockState::new();
    state.lock().unwrap().head_object.push_back(Ok(headers(&[
        ("content-length", "30"),
        ("x-object-meta-mtime", &mtime),
    ])));
    let patch = OptionsPatch {
        changed: Some(true),
        ..OptionsPatch::default()
    };
    let service = mock_service(&state, Options::default());

    let upload = SwiftUploadObject::from_path_named(f.path(), "test_o").unwrap();
    let results = service
        .upload("test_c".to_string(), vec![upload], Some(&patch))
        .unwrap()
        .collect()
        .await;

    let uploaded = results
        .iter()
        .find(|r| r.action == Action::UploadObject)
        .unwrap();
    assert!(uploaded.success);
    assert_eq!(uploaded.to_map()["status"], "skipped-identical");
    assert_eq!(
        state.lock().unwrap().count(|c| matches!(c, Call::PutObject { .. })),
        0
    );
}

#[tokio::test]
async fn test_upload_status_enum_rendering() {
    assert_eq!(UploadStatus::Uploaded.to_string(), "uploaded");
    assert_eq!(UploadStatus::SkippedIdentical.to_string(), "skipped-identical");
}
