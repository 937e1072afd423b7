use std::time::Duration;

use crate::DecisionClient;

/// Configuration for [`DecisionClient`].
#[derive(Debug, Clone)]
pub struct DecisionClientConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) org_id: Option<String>,
    pub(crate) project_id: Option<String>,
    pub(crate) env: String,
    pub(crate) decide_timeout: Duration,
    pub(crate) resolve_timeout: Duration,
}

impl DecisionClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.rollout.dev";
    /// Default environment sent with requests.
    pub const DEFAULT_ENV: &'static str = "production";
    /// Default timeout of per-entity decide calls. These run on latency-sensitive paths.
    pub const DEFAULT_DECIDE_TIMEOUT: Duration = Duration::from_millis(150);
    /// Default timeout of full remote resolution.
    pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use rollout_core::DecisionClientConfig;
    /// let config = DecisionClientConfig::from_api_key("api-key")
    ///     .with_org_id("org_1")
    ///     .with_project_id("proj_1")
    ///     .with_env("staging");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> DecisionClientConfig {
        DecisionClientConfig {
            api_key: api_key.into(),
            base_url: DecisionClientConfig::DEFAULT_BASE_URL.to_owned(),
            org_id: None,
            project_id: None,
            env: DecisionClientConfig::DEFAULT_ENV.to_owned(),
            decide_timeout: DecisionClientConfig::DEFAULT_DECIDE_TIMEOUT,
            resolve_timeout: DecisionClientConfig::DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> DecisionClientConfig {
        self.base_url = base_url.into();
        self
    }

    /// Send `X-Org-Id` with every request.
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> DecisionClientConfig {
        self.org_id = Some(org_id.into());
        self
    }

    /// Send `X-Project-Id` with every request.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> DecisionClientConfig {
        self.project_id = Some(project_id.into());
        self
    }

    /// Override the environment sent as `X-Env` and in resolve bodies.
    pub fn with_env(mut self, env: impl Into<String>) -> DecisionClientConfig {
        self.env = env.into();
        self
    }

    /// Timeout applied to [`DecisionClient::decide_entity`] and
    /// [`DecisionClient::decide_entity_batch`] when the call does not pass its own.
    pub fn with_decide_timeout(mut self, timeout: Duration) -> DecisionClientConfig {
        self.decide_timeout = timeout;
        self
    }

    /// Timeout applied to [`DecisionClient::resolve`] when the call does not pass its own.
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> DecisionClientConfig {
        self.resolve_timeout = timeout;
        self
    }

    /// Create a new [`DecisionClient`] using this configuration.
    pub fn to_client(self) -> DecisionClient {
        DecisionClient::new(self)
    }

    /// Identification headers sent with every request.
    pub(crate) fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Content-Type", "application/json".to_owned()),
            ("Authorization", format!("Bearer {}", self.api_key)),
            ("X-Env", self.env.clone()),
        ];
        if let Some(org_id) = &self.org_id {
            headers.push(("X-Org-Id", org_id.clone()));
        }
        if let Some(project_id) = &self.project_id {
            headers.push(("X-Project-Id", project_id.clone()));
        }
        headers
    }
}
