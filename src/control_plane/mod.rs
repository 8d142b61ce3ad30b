//! Client for the hosting platform's account API: routing namespaces and
//! deployable actor scripts.

use reqwest::multipart::{Form, Part};
use reqwest::{Method, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub code: i64,
    pub message: String,
}

fn join_messages(errors: &[ApiMessage]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("{op} failed: errors={}", join_messages(.errors))]
    Api { op: String, errors: Vec<ApiMessage> },

    #[error("{op}: unexpected content-type '{content_type}', body={body}")]
    UnexpectedContentType {
        op: String,
        content_type: String,
        body: String,
    },

    #[error("{op}: transport error: {message}")]
    Transport { op: String, message: String },

    #[error("{op}: malformed response: {message}")]
    Decode { op: String, message: String },
}

impl ControlPlaneError {
    /// True when the API reported an error whose message contains `needle`
    /// (for example `script_not_found`).
    pub fn mentions(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
}

impl Namespace {
    /// Whether the namespace already points at a script and class.
    pub fn is_bound(&self) -> bool {
        self.script.is_some() && self.class.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub handlers: Vec<String>,
    #[serde(default)]
    pub modified_on: Option<String>,
    #[serde(default)]
    pub created_on: Option<String>,
    #[serde(default)]
    pub usage_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedScript {
    pub id: String,
}

/// Script binding that exposes a namespace to the script under `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Binding {
    DurableObjectNamespace { name: String, namespace_id: String },
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: Value,
}

pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    api_token: String,
}

impl fmt::Debug for ControlPlaneClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneClient")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl ControlPlaneClient {
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_API_BASE.to_string(),
            account_id: account_id.into(),
            api_token: api_token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn account_url(&self, path: &str) -> String {
        format!("{}/accounts/{}/workers/{}", self.base_url, self.account_id, path)
    }

    pub async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let url = self.account_url("durable_objects/namespaces");
        self.execute("listDurableObjectsNamespaces", Method::GET, &url, None)
            .await
    }

    pub async fn find_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self
            .list_namespaces()
            .await?
            .into_iter()
            .find(|namespace| namespace.name == name))
    }

    pub async fn create_namespace(
        &self,
        name: &str,
        script: Option<&str>,
        class: Option<&str>,
    ) -> Result<Namespace> {
        let url = self.account_url("durable_objects/namespaces");
        let mut payload = json!({ "name": name });
        if let Some(script) = script {
            payload["script"] = json!(script);
        }
        if let Some(class) = class {
            payload["class"] = json!(class);
        }
        self.execute("createDurableObjectsNamespace", Method::POST, &url, Some(payload))
            .await
    }

    pub async fn update_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let url = self.account_url(&format!("durable_objects/namespaces/{}", namespace.id));
        let payload = serde_json::to_value(namespace).map_err(|e| ControlPlaneError::Decode {
            op: "updateDurableObjectsNamespace".to_string(),
            message: e.to_string(),
        })?;
        self.execute("updateDurableObjectsNamespace", Method::PUT, &url, Some(payload))
            .await
    }

    pub async fn delete_namespace(&self, namespace_id: &str) -> Result<()> {
        let url = self.account_url(&format!("durable_objects/namespaces/{}", namespace_id));
        self.execute::<Value>("deleteDurableObjectsNamespace", Method::DELETE, &url, None)
            .await?;
        Ok(())
    }

    /// Upload a module script with its bindings.
    pub async fn put_script(
        &self,
        script_name: &str,
        contents: Vec<u8>,
        bindings: Vec<Binding>,
    ) -> Result<Script> {
        const OP: &str = "putScript";
        let part_error = |e: reqwest::Error| ControlPlaneError::Transport {
            op: OP.to_string(),
            message: e.to_string(),
        };
        let metadata = json!({
            "main_module": "main",
            "bindings": bindings,
            "usage_model": "bundled",
        });
        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata.to_string())
                    .mime_str("application/json")
                    .map_err(part_error)?,
            )
            .part(
                "script",
                Part::bytes(contents)
                    .file_name("main")
                    .mime_str("application/javascript+module")
                    .map_err(part_error)?,
            );

        let url = self.account_url(&format!("scripts/{}", script_name));
        let request = self
            .http
            .put(&url)
            .bearer_auth(&self.api_token)
            .multipart(form);
        self.send(OP, request).await
    }

    pub async fn delete_script(&self, script_name: &str) -> Result<DeletedScript> {
        let url = self.account_url(&format!("scripts/{}", script_name));
        self.execute("deleteScript", Method::DELETE, &url, None).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        op: &str,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_token);
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
                .body(body.to_string());
        }
        self.send(op, request).await
    }

    async fn send<T: DeserializeOwned>(&self, op: &str, request: reqwest::RequestBuilder) -> Result<T> {
        let transport = |e: reqwest::Error| ControlPlaneError::Transport {
            op: op.to_string(),
            message: e.to_string(),
        };
        let response = request.send().await.map_err(transport)?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(transport)?;
        debug!(op, content_type = %content_type, bytes = body.len(), "control-plane response");

        if !is_json(&content_type) {
            return Err(ControlPlaneError::UnexpectedContentType {
                op: op.to_string(),
                content_type,
                body,
            });
        }

        let decode = |e: serde_json::Error| ControlPlaneError::Decode {
            op: op.to_string(),
            message: e.to_string(),
        };
        let envelope: ApiEnvelope = serde_json::from_str(&body).map_err(decode)?;
        if !envelope.success {
            return Err(ControlPlaneError::Api {
                op: op.to_string(),
                errors: envelope.errors,
            });
        }
        serde_json::from_value(envelope.result).map_err(decode)
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}
