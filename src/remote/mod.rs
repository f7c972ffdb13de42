//! HTTP side of the agent: base URLs, the transport seam, and the settings client.

use crate::{Error, Result};
use reqwest::{
    blocking::Client,
    header::{CONTENT_LENGTH, LAST_MODIFIED},
    Url,
};
use std::io::{Read, Write};
use std::time::{Duration, SystemTime};

pub mod fake;
pub mod settings;

pub use settings::{ImageName, Settings, SettingsClient};

/// Downloads are streamed through a buffer of this size.
pub const CHUNK_SIZE: usize = 8 * 1024;
/// Settings documents larger than this are rejected.
pub const MAX_SETTINGS_BYTES: u64 = 64 * 1024;

/// Validated http(s) root of the picture server (e.g. `http://192.168.86.167:3000`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrl(Url);

impl BaseUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| Error::InvalidArgs(format!("invalid base url '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidArgs(format!(
                "base url '{raw}' must use http or https"
            )));
        }
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(Error::InvalidArgs(format!("base url '{raw}' has no host")));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(Error::InvalidArgs(format!(
                "base url '{raw}' must not carry a query or fragment"
            )));
        }
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// `{base}/settings`
    pub fn settings_url(&self) -> Url {
        self.join(&["settings"])
    }

    /// `{base}/images/{name}`, optionally with `?nocache=<token>`.
    pub fn image_url(&self, name: &ImageName, nocache: Option<i64>) -> Url {
        let mut url = self.join(&["images", name.as_str()]);
        if let Some(token) = nocache {
            url.query_pairs_mut()
                .append_pair("nocache", &token.to_string());
        }
        url
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.0.clone();
        // parse() rejected cannot-be-a-base URLs, so path_segments_mut succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str().trim_end_matches('/'))
    }
}

/// Metadata returned by a HEAD probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteMeta {
    pub content_length: Option<u64>,
    pub last_modified: Option<SystemTime>,
}

/// Result of a completed streamed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Download {
    pub bytes: u64,
    pub last_modified: Option<SystemTime>,
}

/// The three HTTP calls the agent makes. Implemented by [`ReqwestTransport`]
/// and by [`fake::FakeTransport`] in tests.
pub trait HttpTransport {
    /// GET `url` and return the body of a 2xx response.
    fn get_bytes(&self, url: &Url) -> Result<Vec<u8>>;
    /// HEAD `url` and return its length/last-modified headers.
    fn head(&self, url: &Url) -> Result<RemoteMeta>;
    /// GET `url` and stream the body into `sink`.
    fn download(&self, url: &Url, sink: &mut dyn Write) -> Result<Download>;
}

/// Blocking reqwest client with separate timeouts for small calls and image bodies.
pub struct ReqwestTransport {
    client: Client,
    http_timeout: Duration,
    download_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(http_timeout: Duration, download_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(http_timeout)
            .user_agent(concat!("picframe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            http_timeout,
            download_timeout,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.http_timeout)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        let mut body = Vec::new();
        response
            .take(MAX_SETTINGS_BYTES + 1)
            .read_to_end(&mut body)?;
        if body.len() as u64 > MAX_SETTINGS_BYTES {
            return Err(Error::Parse(format!(
                "response body exceeds {MAX_SETTINGS_BYTES} bytes"
            )));
        }
        Ok(body)
    }

    fn head(&self, url: &Url) -> Result<RemoteMeta> {
        let response = self
            .client
            .head(url.clone())
            .timeout(self.http_timeout)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        let headers = response.headers();
        Ok(RemoteMeta {
            content_length: headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
            last_modified: headers
                .get(LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_http_date),
        })
    }

    fn download(&self, url: &Url, sink: &mut dyn Write) -> Result<Download> {
        let mut response = self
            .client
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        let expected = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let bytes = copy_chunked(&mut response, sink)?;
        if let Some(expected) = expected {
            if bytes != expected {
                return Err(Error::Parse(format!(
                    "download truncated: got {bytes} of {expected} bytes"
                )));
            }
        }
        Ok(Download {
            bytes,
            last_modified,
        })
    }
}

/// Copy `reader` into `sink` through a fixed [`CHUNK_SIZE`] buffer.
pub fn copy_chunked(reader: &mut dyn Read, sink: &mut dyn Write) -> Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        sink.write_all(&buf[..read])?;
        total += read as u64;
    }
    sink.flush()?;
    Ok(total)
}

/// Parse an HTTP-date (`Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn parse_http_date(raw: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| SystemTime::from(dt.with_timezone(&chrono::Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn builds_endpoint_urls() {
        let base = BaseUrl::parse("http://192.168.86.167:3000").unwrap();
        assert_eq!(
            base.settings_url().as_str(),
            "http://192.168.86.167:3000/settings"
        );
        let name = ImageName::parse("sunset.jpg").unwrap();
        assert_eq!(
            base.image_url(&name, Some(1_700_000_000)).as_str(),
            "http://192.168.86.167:3000/images/sunset.jpg?nocache=1700000000"
        );
        assert_eq!(
            base.image_url(&name, None).as_str(),
            "http://192.168.86.167:3000/images/sunset.jpg"
        );
    }

    #[test]
    fn keeps_base_path_prefix() {
        let base = BaseUrl::parse("https://frames.example.com/api/").unwrap();
        assert_eq!(
            base.settings_url().as_str(),
            "https://frames.example.com/api/settings"
        );
        assert_eq!(base.to_string(), "https://frames.example.com/api");
    }

    #[test]
    fn encodes_unusual_image_names() {
        let base = BaseUrl::parse("http://frame.local").unwrap();
        let name = ImageName::parse("beach day#2?.jpg").unwrap();
        assert_eq!(
            base.image_url(&name, None).as_str(),
            "http://frame.local/images/beach%20day%232%3F.jpg"
        );
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(BaseUrl::parse("ftp://frame.local").is_err());
        assert!(BaseUrl::parse("not a url").is_err());
        assert!(BaseUrl::parse("http://frame.local/?x=1").is_err());
    }

    #[test]
    fn parses_http_dates() {
        let parsed = parse_http_date("Tue, 14 Nov 2023 22:13:20 GMT").unwrap();
        assert_eq!(
            parsed.duration_since(UNIX_EPOCH).unwrap().as_secs(),
            1_700_000_000
        );
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn copies_in_chunks() {
        let payload = vec![7u8; CHUNK_SIZE * 3 + 11];
        let mut reader = std::io::Cursor::new(payload.clone());
        let mut sink = Vec::new();
        let copied = copy_chunked(&mut reader, &mut sink).unwrap();
        assert_eq!(copied, payload.len() as u64);
        assert_eq!(sink, payload);
    }
}
