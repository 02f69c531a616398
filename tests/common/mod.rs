//! Scripted transport for driving a `Connection` without a server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use clickhouse_http::prelude::*;
use clickhouse_http::transport::{HttpRequest, HttpResponse};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Replays queued responses in order and records every request.
///
/// When the queue is empty, a stalling transport never answers; otherwise
/// the request fails with a transport error.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<ChResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    stall_when_empty: bool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stalling() -> Arc<Self> {
        Arc::new(Self {
            stall_when_empty: true,
            ..Self::default()
        })
    }

    pub fn respond(&self, status: u16, body: impl Into<Bytes>) {
        self.respond_with_headers(status, body, &[]);
    }

    pub fn respond_with_headers(
        &self,
        status: u16,
        body: impl Into<Bytes>,
        headers: &[(&'static str, &str)],
    ) {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_static(*name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: map,
            body: body.into(),
        }));
    }

    pub fn fail(&self, message: &'static str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(ChError::transport(message)));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request sent")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> ChResult<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None if self.stall_when_empty => std::future::pending().await,
            None => Err(ChError::transport("no response queued")),
        }
    }
}

pub fn settings(compression: bool) -> ConnectionSettings {
    ConnectionSettings::builder()
        .host("ch.test")
        .credentials("user", "pass")
        .compression(compression)
        .build()
}

/// A connection over `mock`, opened against a server of `version`.
pub async fn open(mock: &Arc<MockTransport>, version: &str, compression: bool) -> Connection {
    mock.respond(200, format!("{}\n", version));
    let conn = Connection::with_transport(settings(compression), mock.clone()).unwrap();
    conn.open().await.unwrap();
    conn
}

/// Value of query argument `name` in `request`'s URL.
pub fn query_arg(request: &HttpRequest, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
