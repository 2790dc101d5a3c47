//! Object storage adapters for published PDFs.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tokio::fs;
use tracing::{debug, warn};
use url::Url;

use crate::application::publish::{ObjectStorage, StorageError};

const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Stores artifacts under a local directory that the service itself serves.
#[derive(Debug)]
pub struct FilesystemObjectStorage {
    root: PathBuf,
    public_base_url: Url,
}

impl FilesystemObjectStorage {
    /// Root the storage at `root`, creating it if necessary. `public_base_url`
    /// must end with `/` so object paths join beneath it.
    pub fn new(root: PathBuf, public_base_url: Url) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url,
        })
    }

    pub async fn read(&self, remote: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(remote)?;
        Ok(Bytes::from(fs::read(absolute).await?))
    }

    fn resolve(&self, remote: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(remote);
        if remote.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(StorageError::InvalidPath(remote.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FilesystemObjectStorage {
    async fn upload(&self, local: &Path, remote: &str) -> Result<String, StorageError> {
        let target = self.resolve(remote)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = fs::copy(local, &target).await?;
        let url = self
            .public_base_url
            .join(remote)
            .map_err(|_| StorageError::InvalidPath(remote.to_string()))?;
        debug!(
            target = "infra::storage::filesystem",
            op = "upload",
            remote,
            bytes,
            "artifact stored"
        );
        Ok(url.to_string())
    }
}

/// Uploads artifacts with an authenticated `PUT {endpoint}/{bucket}/{object}`.
#[derive(Debug, Clone)]
pub struct HttpObjectStorage {
    client: reqwest::Client,
    bucket_url: Url,
    token: Option<String>,
    public_base_url: Option<Url>,
}

impl HttpObjectStorage {
    pub fn new(
        endpoint: &Url,
        bucket: &str,
        token: Option<String>,
        public_base_url: Option<Url>,
    ) -> Result<Self, StorageError> {
        let bucket_url = endpoint
            .join(&format!("{}/", bucket.trim_matches('/')))
            .map_err(|err| StorageError::InvalidPath(format!("{bucket}: {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            bucket_url,
            token,
            public_base_url,
        })
    }

    fn object_url(&self, remote: &str) -> Result<Url, StorageError> {
        if remote.starts_with('/') || remote.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidPath(remote.to_string()));
        }
        self.bucket_url
            .join(remote)
            .map_err(|_| StorageError::InvalidPath(remote.to_string()))
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(&self, local: &Path, remote: &str) -> Result<String, StorageError> {
        let target = self.object_url(remote)?;
        let body = fs::read(local).await?;

        let mut request = self
            .client
            .put(target.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static(PDF_CONTENT_TYPE))
            .body(body);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| StorageError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(
                target = "infra::storage::http",
                op = "upload",
                status = status.as_u16(),
                remote,
                detail = %detail,
                "object storage rejected upload"
            );
            return Err(StorageError::Rejected(format!("{status}: {detail}")));
        }

        let url = match &self.public_base_url {
            Some(base) => base
                .join(remote)
                .map_err(|_| StorageError::InvalidPath(remote.to_string()))?,
            None => target,
        };
        Ok(url.to_string())
    }
}
