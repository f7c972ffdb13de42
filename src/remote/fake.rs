use super::{Download, HttpTransport, RemoteMeta};
use crate::{Error, Result};
use reqwest::Url;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::SystemTime;

/// One recorded request against [`FakeTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Get(String),
    Head(String),
    Download(String),
}

#[derive(Debug, Clone)]
struct FakeRoute {
    status: u16,
    body: Vec<u8>,
    last_modified: Option<SystemTime>,
    /// Bytes written before the body "breaks" mid-transfer.
    break_after: Option<usize>,
}

/// Scripted HTTP transport used by tests. Routes are keyed by URL without the
/// query string; unknown URLs behave like a refused connection.
#[derive(Debug, Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, FakeRoute>>,
    head_fails: Mutex<bool>,
    calls: Mutex<Vec<FakeCall>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, status: u16, body: Vec<u8>) {
        self.insert(
            url,
            FakeRoute {
                status,
                body,
                last_modified: None,
                break_after: None,
            },
        );
    }

    pub fn route_file(&self, url: &str, body: Vec<u8>, last_modified: Option<SystemTime>) {
        self.insert(
            url,
            FakeRoute {
                status: 200,
                body,
                last_modified,
                break_after: None,
            },
        );
    }

    /// Route whose body fails after `after` bytes have been delivered.
    pub fn route_broken_file(&self, url: &str, body: Vec<u8>, after: usize) {
        self.insert(
            url,
            FakeRoute {
                status: 200,
                body,
                last_modified: None,
                break_after: Some(after),
            },
        );
    }

    pub fn set_head_fails(&self, fails: bool) {
        if let Ok(mut flag) = self.head_fails.lock() {
            *flag = fails;
        }
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn download_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, FakeCall::Download(_)))
            .count()
    }

    pub fn head_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, FakeCall::Head(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn insert(&self, url: &str, route: FakeRoute) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(route_key_str(url), route);
        }
    }

    fn record(&self, call: FakeCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn lookup(&self, url: &Url) -> Result<FakeRoute> {
        let route = self
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&route_key(url)).cloned());
        let route = route.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("no route for {url}"),
            ))
        })?;
        if !(200..300).contains(&route.status) {
            return Err(Error::HttpStatus(route.status));
        }
        Ok(route)
    }
}

impl HttpTransport for FakeTransport {
    fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        self.record(FakeCall::Get(url.to_string()));
        Ok(self.lookup(url)?.body)
    }

    fn head(&self, url: &Url) -> Result<RemoteMeta> {
        self.record(FakeCall::Head(url.to_string()));
        if self.head_fails.lock().map(|f| *f).unwrap_or(false) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "scripted HEAD timeout",
            )));
        }
        let route = self.lookup(url)?;
        Ok(RemoteMeta {
            content_length: Some(route.body.len() as u64),
            last_modified: route.last_modified,
        })
    }

    fn download(&self, url: &Url, sink: &mut dyn Write) -> Result<Download> {
        self.record(FakeCall::Download(url.to_string()));
        let route = self.lookup(url)?;
        if let Some(after) = route.break_after {
            let cut = after.min(route.body.len());
            sink.write_all(&route.body[..cut])?;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "scripted broken body",
            )));
        }
        let mut reader = route.body.as_slice();
        let bytes = super::copy_chunked(&mut reader, sink)?;
        Ok(Download {
            bytes,
            last_modified: route.last_modified,
        })
    }
}

fn route_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_query(None);
    key.to_string()
}

fn route_key_str(url: &str) -> String {
    Url::parse(url)
        .map(|u| route_key(&u))
        .unwrap_or_else(|_| url.to_string())
}
