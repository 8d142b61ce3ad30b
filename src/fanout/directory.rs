use crate::actor::ActorHost;
use crate::core::{ReproError, Result};
use crate::protocol::encode_envelope;
use async_trait::async_trait;

/// Endpoint on an actor's HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorPath {
    /// `POST /` with a JSON request body.
    Root,
    /// `POST /hang`.
    Hang,
}

impl ActorPath {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Root => "",
            Self::Hang => "/hang",
        }
    }
}

/// Resolves an actor name to a running instance and delivers a request.
///
/// Returns the raw response body; callers decide how to interpret it.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn fetch(&self, name: &str, path: ActorPath, body: String) -> Result<String>;
}

#[async_trait]
impl ActorDirectory for ActorHost {
    async fn fetch(&self, name: &str, path: ActorPath, body: String) -> Result<String> {
        match path {
            ActorPath::Root => {
                let envelope = self.call(name, body.into_bytes()).await?;
                encode_envelope(&envelope)
            }
            ActorPath::Hang => self.hang(name).await,
        }
    }
}

/// Reaches actors through another host's actor HTTP boundary,
/// `{base_url}/actors/{name}`.
pub struct RemoteActorDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteActorDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn url_for(&self, name: &str, path: ActorPath) -> String {
        format!("{}/actors/{}{}", self.base_url, name, path.suffix())
    }
}

#[async_trait]
impl ActorDirectory for RemoteActorDirectory {
    async fn fetch(&self, name: &str, path: ActorPath, body: String) -> Result<String> {
        let response = self
            .http
            .post(self.url_for(name, path))
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| ReproError::Transport(format!("request to actor '{}' failed: {}", name, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ReproError::Transport(format!("reading actor '{}' response: {}", name, e)))?;
        if !status.is_success() {
            return Err(ReproError::Transport(format!(
                "actor '{}' answered HTTP {}: {}",
                name, status, text
            )));
        }
        Ok(text)
    }
}
