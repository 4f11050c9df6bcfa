//! Local content storage — where served files are read and fetched files land.
//!
//! Content is addressed by its tag. A tag is looked up first in the serve
//! directory, then among earlier downloads (`<prefix><tag>` in the download
//! directory), so anything this peer fetched it can also serve.

use std::io;
use std::path::PathBuf;

use tokio::fs::File;

#[derive(Debug, Clone)]
pub struct ContentStore {
    serve_dir: PathBuf,
    download_dir: PathBuf,
    download_prefix: String,
}

impl ContentStore {
    pub fn new(
        serve_dir: impl Into<PathBuf>,
        download_dir: impl Into<PathBuf>,
        download_prefix: impl Into<String>,
    ) -> Self {
        Self {
            serve_dir: serve_dir.into(),
            download_dir: download_dir.into(),
            download_prefix: download_prefix.into(),
        }
    }

    /// A tag names a plain file: no separators, no parent references. Blanks
    /// and control characters are refused too, since a download request ends
    /// the name at the first space or zero byte.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && !name.contains(['/', '\\'])
            && !name.contains(|c: char| c.is_whitespace() || c.is_control())
            && !name.contains("..")
            && name != "."
    }

    /// Path an incoming download of `name` is written to.
    pub fn download_path(&self, name: &str) -> PathBuf {
        self.download_dir
            .join(format!("{}{}", self.download_prefix, name))
    }

    /// Existing file backing `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if !Self::is_valid_name(name) {
            return None;
        }
        [self.serve_dir.join(name), self.download_path(name)]
            .into_iter()
            .find(|p| p.is_file())
    }

    /// Open `name` for reading. `Ok(None)` when there is no such content.
    pub async fn open(&self, name: &str) -> io::Result<Option<File>> {
        match self.resolve(name) {
            Some(path) => match File::open(&path).await {
                Ok(f) => Ok(Some(f)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            },
            None => Ok(None),
        }
    }

    /// Create (or truncate) the download file for `name`.
    pub async fn create(&self, name: &str) -> io::Result<(File, PathBuf)> {
        if !Self::is_valid_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid content name {name:?}"),
            ));
        }
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_path(name);
        let file = File::create(&path).await?;
        Ok((file, path))
    }
}
