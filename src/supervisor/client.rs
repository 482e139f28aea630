//! XML-RPC client for the supervisor daemon's HTTP control interface.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::process::{
    GroupActionResult, ProcessInfo, ProcessSupervisor, SupervisorError, SupervisorState,
};
use super::xmlrpc::{self, Response, Value};
use crate::config::BackgroundJobsConfig;

/// Default HTTP timeout. Waiting start/stop calls can take as long as the
/// daemon's own start timeout, so this is generous.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for a supervisor daemon reachable over HTTP.
pub struct SupervisorClient {
    /// Full XML-RPC endpoint (e.g. "http://localhost:9001/RPC2").
    endpoint: String,
    /// Basic-auth credentials.
    credentials: Option<(String, String)>,
    http_client: Client,
}

impl SupervisorClient {
    /// Creates a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::ConnectionFailed` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SupervisorError> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SupervisorError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            credentials: None,
            http_client,
        })
    }

    /// Creates a client from the background jobs configuration.
    pub fn from_config(config: &BackgroundJobsConfig) -> Result<Self, SupervisorError> {
        let client = Self::new(config.supervisor_url())?;
        Ok(match config.supervisor_credentials() {
            Some((user, password)) => client.with_credentials(user, password),
            None => client,
        })
    }

    /// Sets basic-auth credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Get the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: &[Value]) -> Result<Value, SupervisorError> {
        debug!(method = method, endpoint = %self.endpoint, "Calling supervisor");

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml")
            .body(xmlrpc::encode_call(method, params));

        if let Some((ref user, ref password)) = self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SupervisorError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SupervisorError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(SupervisorError::Http {
                status: status.as_u16(),
                body,
            });
        }

        match xmlrpc::parse_response(&body)? {
            Response::Success(value) => Ok(value),
            Response::Fault { code, message } => Err(SupervisorError::Fault { code, message }),
        }
    }

    async fn call_bool(&self, method: &str, params: &[Value]) -> Result<bool, SupervisorError> {
        let value = self.call(method, params).await?;
        value.as_bool().ok_or_else(|| {
            SupervisorError::MalformedResponse(format!("{} did not return a boolean", method))
        })
    }

    async fn call_group(
        &self,
        method: &str,
        group: &str,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, SupervisorError> {
        let value = self
            .call(method, &[Value::from(group), Value::from(wait)])
            .await?;
        array(&value, method)?
            .iter()
            .map(GroupActionResult::from_xmlrpc)
            .collect()
    }
}

fn array<'a>(value: &'a Value, method: &str) -> Result<&'a [Value], SupervisorError> {
    value.as_array().ok_or_else(|| {
        SupervisorError::MalformedResponse(format!("{} did not return an array", method))
    })
}

#[async_trait]
impl ProcessSupervisor for SupervisorClient {
    async fn get_state(&self) -> Result<SupervisorState, SupervisorError> {
        let value = self.call("supervisor.getState", &[]).await?;
        SupervisorState::from_xmlrpc(&value)
    }

    async fn get_all_process_info(&self) -> Result<Vec<ProcessInfo>, SupervisorError> {
        let value = self.call("supervisor.getAllProcessInfo", &[]).await?;
        array(&value, "supervisor.getAllProcessInfo")?
            .iter()
            .map(ProcessInfo::from_xmlrpc)
            .collect()
    }

    async fn start_process(&self, name: &str, wait: bool) -> Result<bool, SupervisorError> {
        self.call_bool(
            "supervisor.startProcess",
            &[Value::from(name), Value::from(wait)],
        )
        .await
    }

    async fn stop_process(&self, name: &str, wait: bool) -> Result<bool, SupervisorError> {
        self.call_bool(
            "supervisor.stopProcess",
            &[Value::from(name), Value::from(wait)],
        )
        .await
    }

    async fn start_process_group(
        &self,
        group: &str,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, SupervisorError> {
        self.call_group("supervisor.startProcessGroup", group, wait)
            .await
    }

    async fn stop_process_group(
        &self,
        group: &str,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, SupervisorError> {
        self.call_group("supervisor.stopProcessGroup", group, wait)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_endpoint() {
        let config = BackgroundJobsConfig {
            supervisor_host: "supervisor.internal".to_string(),
            supervisor_port: 9101,
            ..Default::default()
        };
        let client = SupervisorClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), "http://supervisor.internal:9101/RPC2");
        assert!(client.credentials.is_none());
    }

    #[test]
    fn test_from_config_credentials() {
        let config = BackgroundJobsConfig {
            supervisor_user: Some("admin".to_string()),
            supervisor_password: Some("secret".to_string()),
            ..Default::default()
        };
        let client = SupervisorClient::from_config(&config).unwrap();
        assert_eq!(
            client.credentials,
            Some(("admin".to_string(), "secret".to_string()))
        );
    }

    #[tokio::test]
    #[ignore] // Run with: JOBVISOR_TEST_SUPERVISOR_URL=http://localhost:9001/RPC2 cargo test -- --ignored
    async fn test_live_get_state() {
        let url = std::env::var("JOBVISOR_TEST_SUPERVISOR_URL")
            .unwrap_or_else(|_| "http://localhost:9001/RPC2".to_string());
        let client = SupervisorClient::new(url).unwrap();
        let state = client.get_state().await.expect("supervisor should answer");
        assert!(state.is_running());
    }
}
