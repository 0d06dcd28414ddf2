//! Scripted mock connection for orchestrator tests.
//!
//! Responses are queued per capability, popped in call order (with sensible
//! fallbacks once a queue is empty), and every call is recorded so tests can
//! assert the exact request sequence the engine produced.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rswift_core::connection::{
    BodyStream, ConnError, ConnResult, Connection, ConnectionFactory, GetParams, Headers,
    ListEntry, ListParams, PutParams, Reply, ResponseDict,
};
use rswift_core::error::SwiftError;
use rswift_core::options::Options;
use rswift_core::segment::SegmentSource;
use rswift_core::service::SwiftService;

/// Record of one call the engine made against the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetAccount {
        marker: String,
    },
    GetContainer {
        container: String,
        marker: String,
        prefix: Option<String>,
    },
    HeadAccount,
    HeadContainer(String),
    HeadObject(String, String),
    GetObject {
        container: String,
        object: String,
        query: Option<String>,
        if_none_match: Option<String>,
    },
    PutObject {
        container: String,
        object: String,
        query: Option<String>,
        content_length: Option<u64>,
        headers: Headers,
        body: Vec<u8>,
    },
    PostAccount,
    PostContainer(String),
    PostObject(String, String),
    CopyObject {
        container: String,
        object: String,
        destination: String,
    },
    DeleteObject {
        container: String,
        object: String,
        query: Option<String>,
    },
    PutContainer(String),
    DeleteContainer(String),
}

/// Scripted reply for `put_object`.
pub enum PutReply {
    /// Behave like the real server: etag = md5 of the received body.
    EchoMd5,
    /// Fixed etag string.
    Etag(String),
    /// HTTP failure.
    Err(u16),
}

#[derive(Default)]
pub struct MockState {
    pub calls: Vec<Call>,
    pub attempts: u32,
    pub get_account: VecDeque<Result<Vec<ListEntry>, u16>>,
    pub get_container: VecDeque<Result<Vec<ListEntry>, u16>>,
    pub head_account: VecDeque<Result<Headers, u16>>,
    pub head_container: VecDeque<Result<Headers, u16>>,
    pub head_object: VecDeque<Result<Headers, u16>>,
    pub get_object: VecDeque<Result<(Headers, Vec<u8>), u16>>,
    pub put_object: VecDeque<PutReply>,
    pub delete_object: VecDeque<Result<(), u16>>,
    pub plain: VecDeque<Result<(), u16>>,
}

impl MockState {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            attempts: 2,
            ..Self::default()
        }))
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

fn http_err(status: u16) -> ConnError {
    ConnError::Http {
        verb: "MOCK",
        path: String::new(),
        status,
        reason: "Mock Error".to_string(),
        response: ResponseDict {
            status,
            reason: "Mock Error".to_string(),
            headers: Headers::new(),
        },
    }
}

fn ok<T>(value: T) -> ConnResult<T> {
    Ok(Reply::new(value, ResponseDict::default()))
}

pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn get_account(&mut self, params: &ListParams) -> ConnResult<Vec<ListEntry>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetAccount {
            marker: params.marker.clone(),
        });
        match state.get_account.pop_front() {
            Some(Ok(entries)) => ok(entries),
            Some(Err(status)) => Err(http_err(status)),
            None => ok(Vec::new()),
        }
    }

    async fn get_container(
        &mut self,
        container: &str,
        params: &ListParams,
    ) -> ConnResult<Vec<ListEntry>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetContainer {
            container: container.to_string(),
            marker: params.marker.clone(),
            prefix: params.prefix.clone(),
        });
        match state.get_container.pop_front() {
            Some(Ok(entries)) => ok(entries),
            Some(Err(status)) => Err(http_err(status)),
            None => ok(Vec::new()),
        }
    }

    async fn head_account(&mut self) -> ConnResult<Headers> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::HeadAccount);
        match state.head_account.pop_front() {
            Some(Ok(headers)) => ok(headers),
            Some(Err(status)) => Err(http_err(status)),
            None => ok(Headers::new()),
        }
    }

    async fn head_container(&mut self, container: &str) -> ConnResult<Headers> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::HeadContainer(container.to_string()));
        match state.head_container.pop_front() {
            Some(Ok(headers)) => ok(headers),
            Some(Err(status)) => Err(http_err(status)),
            None => ok(Headers::new()),
        }
    }

    async fn head_object(&mut self, container: &str, object: &str) -> ConnResult<Headers> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::HeadObject(container.to_string(), object.to_string()));
        match state.head_object.pop_front() {
            Some(Ok(headers)) => ok(headers),
            Some(Err(status)) => Err(http_err(status)),
            None => ok(Headers::new()),
        }
    }

    async fn get_object(
        &mut self,
        container: &str,
        object: &str,
        params: &GetParams,
    ) -> ConnResult<(Headers, BodyStream)> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetObject {
            container: container.to_string(),
            object: object.to_string(),
            query: params.query_string.clone(),
            if_none_match: params.headers.get("if-none-match").cloned(),
        });
        match state.get_object.pop_front() {
            Some(Ok((headers, body))) => {
                let stream: BodyStream = Box::pin(futures_util::stream::iter(vec![Ok::<
                    _,
                    ConnError,
                >(
                    Bytes::from(body)
                )]));
                ok((headers, stream))
            }
            Some(Err(status)) => Err(http_err(status)),
            None => Err(http_err(404)),
        }
    }

    async fn put_object(
        &mut self,
        container: &str,
        object: &str,
        mut body: SegmentSource,
        params: PutParams,
    ) -> ConnResult<String> {
        // Consume the body before touching the shared state; this is what
        // drives the hashing wrapper, exactly like a real transport.
        let received = body
            .read_to_end()
            .await
            .map_err(|source| ConnError::Io { source })?;
        let received_md5 = format!("{:x}", md5::compute(&received));

        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::PutObject {
            container: container.to_string(),
            object: object.to_string(),
            query: params.query_string.clone(),
            content_length: params.content_length,
            headers: params.headers.clone(),
            body: received.to_vec(),
        });
        match state.put_object.pop_front() {
            Some(PutReply::EchoMd5) | None => ok(received_md5),
            Some(PutReply::Etag(etag)) => ok(etag),
            Some(PutReply::Err(status)) => Err(http_err(status)),
        }
    }

    async fn post_account(&mut self, _headers: &Headers) -> ConnResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::PostAccount);
        match state.plain.pop_front() {
            Some(Ok(())) | None => ok(()),
            Some(Err(status)) => Err(http_err(status)),
        }
    }

    async fn post_container(&mut self, container: &str, _headers: &Headers) -> ConnResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::PostContainer(container.to_string()));
        match state.plain.pop_front() {
            Some(Ok(())) | None => ok(()),
            Some(Err(status)) => Err(http_err(status)),
        }
    }

    async fn post_object(
        &mut self,
        container: &str,
        object: &str,
        _headers: &Headers,
    ) -> ConnResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::PostObject(container.to_string(), object.to_string()));
        match state.plain.pop_front() {
            Some(Ok(())) | None => ok(()),
            Some(Err(status)) => Err(http_err(status)),
        }
    }

    async fn copy_object(
        &mut self,
        container: &str,
        object: &str,
        destination: &str,
        _headers: &Headers,
        _fresh_metadata: bool,
    ) -> ConnResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CopyObject {
            container: container.to_string(),
            object: object.to_string(),
            destination: destination.to_string(),
        });
        match state.plain.pop_front() {
            Some(Ok(())) | None => ok(()),
            Some(Err(status)) => Err(http_err(status)),
        }
    }

    async fn delete_object(
        &mut self,
        container: &str,
        object: &str,
        query_string: Option<&str>,
    ) -> ConnResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::DeleteObject {
            container: container.to_string(),
            object: object.to_string(),
            query: query_string.map(str::to_string),
        });
        match state.delete_object.pop_front() {
            Some(Ok(())) | None => ok(()),
            Some(Err(status)) => Err(http_err(status)),
        }
    }

    async fn put_container(&mut self, container: &str, _headers: &Headers) -> ConnResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::PutContainer(container.to_string()));
        match state.plain.pop_front() {
            Some(Ok(())) | None => ok(()),
            Some(Err(status)) => Err(http_err(status)),
        }
    }

    async fn delete_container(&mut self, container: &str) -> ConnResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::DeleteContainer(container.to_string()));
        match state.plain.pop_front() {
            Some(Ok(())) | None => ok(()),
            Some(Err(status)) => Err(http_err(status)),
        }
    }

    fn attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts
    }

    fn auth_end_time(&self) -> f64 {
        4.0
    }
}

pub struct MockFactory {
    pub state: Arc<Mutex<MockState>>,
}

impl ConnectionFactory for MockFactory {
    fn create(&self) -> Result<Box<dyn Connection>, SwiftError> {
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Builds a service over the scripted state.
pub fn mock_service(state: &Arc<Mutex<MockState>>, options: Options) -> SwiftService {
    SwiftService::with_factory(
        Arc::new(MockFactory {
            state: Arc::clone(state),
        }),
        options,
    )
}

pub fn headers(pairs: &[(&str, &str)]) -> Headers {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn entry(name: &str) -> ListEntry {
    ListEntry::named(name)
}

pub fn sized_entry(name: &str, bytes: u64, hash: &str) -> ListEntry {
    ListEntry {
        bytes: Some(bytes),
        hash: Some(hash.to_string()),
        ..ListEntry::named(name)
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
