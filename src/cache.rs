//! Local image store: decides whether the file for the current selection is
//! fresh and replaces it when it is not.

use crate::{
    app::Logger,
    remote::{BaseUrl, Download, HttpTransport, ImageName, RemoteMeta, Settings},
    Error, Result,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A local file that is safe to hand to the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub name: ImageName,
    pub path: PathBuf,
    /// True when this call replaced the file.
    pub downloaded: bool,
}

/// Size and mtime of the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMeta {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl LocalMeta {
    pub fn read(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Both remote fields must be present and equal to the local ones; mtimes are
/// compared in whole seconds because HTTP dates carry no fraction.
pub fn is_fresh(local: &LocalMeta, remote: &RemoteMeta) -> bool {
    let (Some(remote_len), Some(remote_modified)) = (remote.content_length, remote.last_modified)
    else {
        return false;
    };
    let Some(local_modified) = local.modified else {
        return false;
    };
    local.len == remote_len && epoch_secs(local_modified) == epoch_secs(remote_modified)
}

fn epoch_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

pub struct ImageCache<'a, T: HttpTransport + ?Sized> {
    dir: &'a Path,
    transport: &'a T,
    logger: &'a Logger,
}

impl<'a, T: HttpTransport + ?Sized> ImageCache<'a, T> {
    pub fn new(dir: &'a Path, transport: &'a T, logger: &'a Logger) -> Self {
        Self {
            dir,
            transport,
            logger,
        }
    }

    pub fn local_path(&self, name: &ImageName) -> PathBuf {
        self.dir.join(name.as_str())
    }

    /// Return a valid local file for `settings.current_pic`, downloading only when
    /// the local copy is missing, stale, unverifiable, or a force update was asked for.
    pub fn ensure(&self, base: &BaseUrl, settings: &Settings) -> Option<CachedImage> {
        let name = &settings.current_pic;
        let path = self.local_path(name);

        if !settings.force_update && self.is_up_to_date(base, name, &path) {
            self.logger.info(format!("Local copy of {name} is up to date."));
            return Some(CachedImage {
                name: name.clone(),
                path,
                downloaded: false,
            });
        }
        if settings.force_update {
            self.logger.info(format!("Force update requested for {name}."));
        }

        let url = base.image_url(name, settings.set_date);
        self.logger.info(format!("Downloading from {url}..."));
        match self.download_to(&url, &path) {
            Ok(download) => {
                self.logger.info(format!(
                    "File {name} downloaded successfully ({} bytes).",
                    download.bytes
                ));
                Some(CachedImage {
                    name: name.clone(),
                    path,
                    downloaded: true,
                })
            }
            Err(Error::HttpStatus(code)) => {
                self.logger.warn(format!("Failed to download image. HTTP Status: {code}"));
                None
            }
            Err(err) => {
                self.logger.warn(format!("Error downloading image: {err}"));
                None
            }
        }
    }

    fn is_up_to_date(&self, base: &BaseUrl, name: &ImageName, path: &Path) -> bool {
        let Some(local) = LocalMeta::read(path) else {
            self.logger.debug(format!("No local copy of {name}; downloading."));
            return false;
        };
        match self.transport.head(&base.image_url(name, None)) {
            Ok(remote) => {
                let fresh = is_fresh(&local, &remote);
                if !fresh {
                    self.logger.info(format!(
                        "Local copy of {name} differs from server (local {} bytes, remote {:?} bytes); redownloading.",
                        local.len, remote.content_length
                    ));
                }
                fresh
            }
            Err(err) => {
                self.logger.warn(format!(
                    "Metadata probe for {name} failed: {err}; assuming stale."
                ));
                false
            }
        }
    }

    /// Stream into a temp file next to `target`, then rename over it so the
    /// viewer never sees a partial image.
    fn download_to(&self, url: &reqwest::Url, target: &Path) -> Result<Download> {
        fs::create_dir_all(self.dir)?;
        let mut part = tempfile::Builder::new()
            .prefix(".picframe-")
            .suffix(".part")
            .tempfile_in(self.dir)?;
        let download = self.transport.download(url, part.as_file_mut())?;
        if let Some(modified) = download.last_modified {
            part.as_file().set_modified(modified)?;
        }
        part.as_file().sync_all()?;
        part.persist(target).map_err(|e| e.error)?;
        Ok(download)
    }
}
