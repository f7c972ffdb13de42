use super::{BaseUrl, HttpTransport};
use crate::{app::Logger, Error, Result};
use serde::Deserialize;
use serde_json::Value;

const MAX_IMAGE_NAME_BYTES: usize = 255;

/// A `currentPic` value that is safe to use as one path segment, both under the
/// local image directory and in the image URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageName(String);

impl ImageName {
    pub fn parse(raw: &str) -> Result<Self> {
        let reject = |reason: &'static str| Error::InvalidImageName {
            name: raw.to_string(),
            reason,
        };
        if raw.is_empty() {
            return Err(reject("empty"));
        }
        if raw == "." || raw == ".." {
            return Err(reject("directory reference"));
        }
        if raw.contains(&['/', '\\'][..]) {
            return Err(reject("contains a path separator"));
        }
        if raw.chars().any(char::is_control) {
            return Err(reject("contains a control character"));
        }
        if raw.len() > MAX_IMAGE_NAME_BYTES {
            return Err(reject("longer than 255 bytes"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The server's current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub current_pic: ImageName,
    /// Cache-busting token sent as `?nocache=`.
    pub set_date: Option<i64>,
    pub force_update: bool,
}

#[derive(Deserialize)]
struct RawSettings {
    #[serde(rename = "currentPic")]
    current_pic: Option<Value>,
    #[serde(rename = "setDate", default)]
    set_date: Option<Value>,
    #[serde(rename = "forceUpdate", default)]
    force_update: Option<Value>,
}

impl Settings {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let raw: RawSettings = serde_json::from_slice(body)
            .map_err(|e| Error::Parse(format!("settings body is not a JSON object: {e}")))?;
        let current_pic = match raw.current_pic {
            Some(Value::String(name)) => ImageName::parse(&name)?,
            Some(_) => return Err(Error::Parse("currentPic is not a string".into())),
            None => return Err(Error::Parse("currentPic missing".into())),
        };
        let set_date = match raw.set_date {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };
        let force_update = match raw.force_update {
            Some(Value::Bool(flag)) => flag,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        Ok(Self {
            current_pic,
            set_date,
            force_update,
        })
    }
}

/// Fetches settings and folds every failure into `None`.
pub struct SettingsClient<'a, T: HttpTransport + ?Sized> {
    transport: &'a T,
    logger: &'a Logger,
}

impl<'a, T: HttpTransport + ?Sized> SettingsClient<'a, T> {
    pub fn new(transport: &'a T, logger: &'a Logger) -> Self {
        Self { transport, logger }
    }

    pub fn fetch(&self, base: &BaseUrl) -> Option<Settings> {
        let url = base.settings_url();
        self.logger.debug(format!("Fetching settings from {url}"));
        let body = match self.transport.get_bytes(&url) {
            Ok(body) => body,
            Err(Error::HttpStatus(code)) => {
                self.logger.warn(format!(
                    "Failed to fetch settings from {base}. HTTP Status: {code}"
                ));
                return None;
            }
            Err(err) => {
                self.logger
                    .warn(format!("Error fetching settings from {base}: {err}"));
                return None;
            }
        };
        self.logger.trace(format!(
            "Settings body from {base}: {}",
            String::from_utf8_lossy(&body)
        ));
        match Settings::from_json(&body) {
            Ok(settings) => Some(settings),
            Err(err) => {
                self.logger
                    .warn(format!("Invalid or missing settings from {base}: {err}"));
                None
            }
        }
    }

    /// Try each base in order; the first valid document wins.
    pub fn fetch_first(&self, bases: &[BaseUrl]) -> Option<(BaseUrl, Settings)> {
        bases
            .iter()
            .find_map(|base| self.fetch(base).map(|settings| (base.clone(), settings)))
    }
}
