//! HTTP client for a running `sandpit serve` instance.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Result, SandpitError};
use crate::executor::{CommandTransport, ExecutionOutcome};
use crate::server::routes::{
    CommandResponse, CreateSandboxResponse, MessageResponse, SandboxStatusResponse,
};
use crate::server::ErrorResponse;

pub struct SandpitClient {
    http: reqwest::Client,
    base_url: String,
}

impl SandpitClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sandpit/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send and decode, turning error bodies into [`SandpitError::Backend`].
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(error) => error.error,
            Err(_) => body,
        };
        debug!(status = %status, error = %message, "Server returned an error");

        if status == StatusCode::BAD_REQUEST && message.starts_with("No active sandbox") {
            return Err(SandpitError::NoActiveSandbox);
        }
        Err(SandpitError::Backend {
            message,
            status: Some(status.as_u16()),
        })
    }

    pub async fn create_sandbox(&self) -> Result<CreateSandboxResponse> {
        self.send(self.request(Method::POST, "/api/sandbox")).await
    }

    pub async fn terminate(&self) -> Result<MessageResponse> {
        self.send(self.request(Method::DELETE, "/api/sandbox")).await
    }

    pub async fn run_command(&self, command: &str) -> Result<CommandResponse> {
        let request = self
            .request(Method::POST, "/api/run-command")
            .json(&json!({ "command": command }));
        self.send(request).await
    }

    pub async fn status(&self) -> Result<SandboxStatusResponse> {
        self.send(self.request(Method::GET, "/api/sandbox-status")).await
    }

    pub async fn dev_server_status(&self) -> Result<Value> {
        self.send(self.request(Method::GET, "/api/dev-server-status")).await
    }

    pub async fn restart_dev_server(&self) -> Result<Value> {
        self.send(self.request(Method::POST, "/api/dev-server/restart")).await
    }
}

#[async_trait]
impl CommandTransport for SandpitClient {
    async fn execute(&self, command: &str) -> ExecutionOutcome {
        match self.run_command(command).await {
            Ok(response) => ExecutionOutcome {
                success: response.success,
                output: Some(response.output),
                error: (!response.error.is_empty()).then_some(response.error),
                exit_code: Some(response.exit_code),
                needs_recreation: false,
            },
            Err(e) if e.indicates_expiry() => ExecutionOutcome::recreation_needed(e.to_string()),
            Err(e) => ExecutionOutcome::failed(e.to_string()),
        }
    }

    async fn recreate(&self) -> bool {
        match self.create_sandbox().await {
            Ok(response) => response.success,
            Err(e) => {
                warn!(error = %e, "Sandbox recreation request failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandExecutor;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn created(id: &str) -> Value {
        json!({
            "success": true,
            "sandboxId": id,
            "url": format!("https://{id}.vercel.run"),
            "provider": "vercel",
            "devServerReady": true,
            "message": "Sandbox created"
        })
    }

    fn gone() -> ResponseTemplate {
        ResponseTemplate::new(410).set_body_json(json!({
            "success": false,
            "error": "Sandbox has stopped. Please create a new sandbox.",
            "needsRecreation": true,
            "message": "The sandbox session has expired or stopped."
        }))
    }

    #[tokio::test]
    async fn test_run_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/run-command"))
            .and(body_json(json!({ "command": "ls" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "output": "src\n",
                "error": "",
                "exitCode": 0,
                "message": "Command executed successfully"
            })))
            .mount(&server)
            .await;

        let client = SandpitClient::new(server.uri()).unwrap();
        let outcome = client.execute("ls").await;
        assert!(outcome.success);
        assert_eq!(outcome.output.as_deref(), Some("src\n"));
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_gone_maps_to_recreation_needed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/run-command"))
            .respond_with(gone())
            .mount(&server)
            .await;

        let client = SandpitClient::new(server.uri()).unwrap();
        let outcome = client.execute("ls").await;
        assert!(!outcome.success);
        assert!(outcome.needs_recreation);
    }

    #[tokio::test]
    async fn test_no_active_sandbox() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sandbox-status"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": "No active sandbox. Please create a new sandbox first."
            })))
            .mount(&server)
            .await;

        let client = SandpitClient::new(format!("{}/", server.uri())).unwrap();
        assert!(matches!(
            client.status().await,
            Err(SandpitError::NoActiveSandbox)
        ));
    }

    #[tokio::test]
    async fn test_executor_recreates_through_create_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/run-command"))
            .respond_with(gone())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/run-command"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "output": "ok\n",
                "error": "",
                "exitCode": 0,
                "message": "Command executed successfully"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/sandbox"))
            .respond_with(ResponseTemplate::new(200).set_body_json(created("sbx_2")))
            .expect(1)
            .mount(&server)
            .await;

        let executor = CommandExecutor::new(SandpitClient::new(server.uri()).unwrap());
        let outcome = executor.execute_with_recreation("echo ok").await;
        assert!(outcome.success);
        assert_eq!(outcome.output.as_deref(), Some("ok\n"));
    }

    #[tokio::test]
    async fn test_failed_recreation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/run-command"))
            .respond_with(gone())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/sandbox"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false,
                "error": "Sandbox provisioning failed: quota exceeded"
            })))
            .mount(&server)
            .await;

        let executor = CommandExecutor::new(SandpitClient::new(server.uri()).unwrap());
        let outcome = executor.execute_with_recreation("ls").await;
        assert!(outcome.needs_recreation);
        assert_eq!(
            outcome.error.as_deref(),
            Some(crate::executor::RECREATION_FAILED)
        );
    }
}
