use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use stashpack_core::{Credentials, Error, Protocol, Result, TransferResult};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Transport over HTTPS. `put` is an HTTP PUT with the archive as body,
/// `get` a streamed GET. Status codes map onto the error taxonomy: 2xx is
/// success, 404 the normal `NotFound`, 401/403 an auth failure, and 5xx
/// or connection errors a retryable transport failure.
pub struct HttpsTransport {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpsTransport {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    fn url(&self, remote_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), remote_name)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.credentials.token {
            request.bearer_auth(token)
        } else if let Some(username) = &self.credentials.username {
            request.basic_auth(username, self.credentials.password.as_deref())
        } else {
            request
        }
    }
}

fn classify_status(status: StatusCode, remote: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND => Err(Error::NotFound {
            remote: remote.to_string(),
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(Error::Auth(format!("{} answered {}", remote, status)))
        }
        _ => Err(Error::Transport(format!("{} answered {}", remote, status))),
    }
}

fn connection_error(err: reqwest::Error, remote: &str) -> Error {
    Error::Transport(format!("https {}: {}", remote, err))
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult> {
        let url = self.url(remote_name);
        let body = fs::read(local_path).await?;
        let response = self
            .authorize(self.client.put(&url).body(body))
            .send()
            .await
            .map_err(|e| connection_error(e, &url))?;
        classify_status(response.status(), &url)?;
        debug!(url = %url, "https upload complete");
        Ok(TransferResult { remote_locator: url })
    }

    async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult> {
        let url = self.url(remote_name);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| connection_error(e, &url))?;
        classify_status(response.status(), &url)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| connection_error(e, &url))?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(local_path, &body).await?;
        Ok(TransferResult { remote_locator: url })
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        let url = self.url(remote_name);
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .map_err(|e| connection_error(e, &url))?;
        match classify_status(response.status(), &url) {
            Ok(()) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    async fn remove(&self, remote_name: &str) -> Result<bool> {
        let url = self.url(remote_name);
        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| connection_error(e, &url))?;
        match classify_status(response.status(), &url) {
            Ok(()) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Https
    }
}
