//! The network collaborator: fetch a resource, get bytes or a failure.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::PageError;

#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    /// True for any 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, PageError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| PageError::fetch(&self.url, format!("invalid json: {err}")))
    }
}

/// A transport failure is an `Err`; a non-2xx answer is an `Ok` response whose
/// [`FetchResponse::ok`] is false.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, PageError>;
}

#[async_trait]
impl<F> Fetcher for Arc<F>
where
    F: Fetcher + ?Sized,
{
    async fn fetch(&self, url: &str) -> Result<FetchResponse, PageError> {
        (**self).fetch(url).await
    }
}

/// In-memory fetcher serving registered bodies and answering 404 otherwise.
/// Every requested URL is recorded.
#[derive(Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
}

#[derive(Clone)]
enum Route {
    Body(u16, Vec<u8>),
    Failure(String),
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.insert(url, 200, body);
        self
    }

    pub fn insert(&self, url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .insert(url.into(), Route::Body(status, body.into()));
    }

    pub fn fail(&self, url: impl Into<String>, reason: impl Into<String>) {
        self.routes
            .lock()
            .insert(url.into(), Route::Failure(reason.into()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, PageError> {
        self.requests.lock().push(url.to_string());
        let route = self.routes.lock().get(url).cloned();
        match route {
            Some(Route::Body(status, body)) => Ok(FetchResponse::new(url, status, body)),
            Some(Route::Failure(reason)) => Err(PageError::fetch(url, reason)),
            None => Ok(FetchResponse::new(url, 404, Vec::new())),
        }
    }
}
