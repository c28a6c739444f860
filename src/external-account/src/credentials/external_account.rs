// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::config::ExternalAccountConfig;
use super::fetch;
use crate::build_errors::Error as BuilderError;
use crate::errors;
use crate::headers_util::build_bearer_headers;
use crate::http::{HttpClient, MetadataResponse, ReqwestClient};
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use crate::{BuildResult, Result};
use http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Marks a token fetch as outstanding until dropped.
#[derive(Debug)]
struct FetchGuard(Arc<AtomicBool>);

impl FetchGuard {
    fn acquire(marker: &Arc<AtomicBool>) -> Result<Self> {
        marker
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| errors::fetch_in_progress())?;
        Ok(Self(marker.clone()))
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone, Debug)]
struct ExternalAccountTokenProvider {
    config: Arc<ExternalAccountConfig>,
    client: Arc<dyn HttpClient>,
    fetch_in_progress: Arc<AtomicBool>,
}

impl ExternalAccountTokenProvider {
    fn start(&self) -> Result<FetchGuard> {
        FetchGuard::acquire(&self.fetch_in_progress)
    }

    async fn fetch(&self, _guard: FetchGuard, deadline: Instant) -> Result<MetadataResponse> {
        fetch::run(&self.config, self.client.as_ref(), deadline).await
    }
}

#[async_trait::async_trait]
impl TokenProvider for ExternalAccountTokenProvider {
    async fn token(&self, deadline: Instant) -> Result<Token> {
        let guard = self.start()?;
        let response = self.fetch(guard, deadline).await?;
        Token::from_metadata_response(&response, Instant::now())
    }
}

/// Credentials that exchange a third-party subject token for a Google access
/// token.
///
/// Cloning is cheap, clones share the token cache and the outstanding fetch
/// marker. At most one fetch runs at a time across all clones.
#[derive(Clone)]
pub struct ExternalAccountCredentials {
    token_provider: TokenCache<ExternalAccountTokenProvider>,
    quota_project_id: Option<String>,
}

impl std::fmt::Debug for ExternalAccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAccountCredentials")
            .field("config", self.config())
            .field("quota_project_id", &self.quota_project_id)
            .finish()
    }
}

impl ExternalAccountCredentials {
    /// The validated configuration.
    pub fn config(&self) -> &ExternalAccountConfig {
        &self.token_provider.provider().config
    }

    pub fn quota_project_id(&self) -> Option<&str> {
        self.quota_project_id.as_deref()
    }

    /// Returns true while a token fetch is outstanding.
    pub fn is_fetch_in_progress(&self) -> bool {
        self.token_provider
            .provider()
            .fetch_in_progress
            .load(Ordering::Acquire)
    }

    /// Fetches a new access token, bypassing the token cache.
    ///
    /// The result is the body of the token endpoint response: the token
    /// exchange response verbatim, or a normalized
    /// `{"access_token","expires_in","token_type"}` object when a service
    /// account is impersonated.
    ///
    /// # Errors
    ///
    /// Fails immediately with [ErrorKind::FetchInProgress] if another fetch
    /// is outstanding on these credentials. Otherwise any error of the fetch
    /// steps is returned unchanged.
    ///
    /// [ErrorKind::FetchInProgress]: crate::errors::ErrorKind::FetchInProgress
    pub async fn fetch_token(&self, deadline: Instant) -> Result<MetadataResponse> {
        let provider = self.token_provider.provider();
        let guard = provider.start()?;
        provider.fetch(guard, deadline).await
    }

    /// Starts a token fetch on the current tokio runtime and calls
    /// `on_complete` exactly once with the result.
    ///
    /// The outstanding fetch marker is set before this function returns.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn fetch_token_with<F>(&self, deadline: Instant, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<MetadataResponse>) + Send + 'static,
    {
        let provider = self.token_provider.provider().clone();
        let guard = provider.start();
        tokio::spawn(async move {
            let result = match guard {
                Ok(guard) => provider.fetch(guard, deadline).await,
                Err(e) => Err(e),
            };
            on_complete(result);
        })
    }

    /// Returns a cached access token, fetching a new one if the cached token
    /// expires within a minute.
    pub async fn token(&self, deadline: Instant) -> Result<Token> {
        self.token_provider.token(deadline).await
    }

    /// Returns the headers to authenticate a request.
    ///
    /// The `authorization` header is marked as sensitive.
    pub async fn headers(&self, deadline: Instant) -> Result<HeaderMap> {
        let token = self.token(deadline).await?;
        build_bearer_headers(&token, &self.quota_project_id)
    }
}

/// A builder for [ExternalAccountCredentials].
///
/// # Example
/// ```
/// # use google_cloud_external_account::credentials::Builder;
/// let config = serde_json::json!({
///     "type": "external_account",
///     "audience": "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/my-pool/providers/my-provider",
///     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
///     "token_url": "https://sts.googleapis.com/v1/token",
///     "credential_source": {
///         "url": "http://169.254.169.254/metadata/identity/oauth2/token",
///         "headers": { "Metadata": "True" },
///         "format": { "type": "json", "subject_token_field_name": "access_token" }
///     }
/// });
/// let credentials = Builder::new(config)
///     .with_scopes(["https://www.googleapis.com/auth/pubsub"])
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Builder {
    external_account_config: Value,
    quota_project_id: Option<String>,
    scopes: Vec<String>,
    client: Option<Arc<dyn HttpClient>>,
}

impl Builder {
    /// Creates a new builder using an [external account configuration] JSON
    /// value.
    ///
    /// [external account configuration]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
    pub fn new(external_account_config: Value) -> Self {
        Self {
            external_account_config,
            quota_project_id: None,
            scopes: Vec::new(),
            client: None,
        }
    }

    /// Sets the [quota project] for these credentials, overriding any
    /// `quota_project_id` in the configuration.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Overrides the [scopes] for these credentials.
    ///
    /// Without scopes, the credentials request the cloud platform scope.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Uses `client` to send all HTTP requests.
    ///
    /// The default is a [ReqwestClient].
    pub fn with_http_client<C>(mut self, client: C) -> Self
    where
        C: HttpClient + 'static,
    {
        self.client = Some(Arc::new(client));
        self
    }

    /// Returns an [ExternalAccountCredentials] instance with the configured
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if the configuration is invalid, naming the
    /// offending field, or if the default HTTP client cannot be created.
    pub fn build(self) -> BuildResult<ExternalAccountCredentials> {
        let config = ExternalAccountConfig::from_json(&self.external_account_config, self.scopes)?;
        let client: Arc<dyn HttpClient> = match self.client {
            Some(client) => client,
            None => Arc::new(ReqwestClient::new()?),
        };
        let quota_project_id = self
            .quota_project_id
            .or_else(|| config.quota_project_id.clone());
        let token_provider = ExternalAccountTokenProvider {
            config: Arc::new(config),
            client,
            fetch_in_progress: Arc::new(AtomicBool::new(false)),
        };
        Ok(ExternalAccountCredentials {
            token_provider: TokenCache::new(token_provider),
            quota_project_id,
        })
    }
}

/// Creates [ExternalAccountCredentials] from a JSON configuration document
/// and a comma-separated list of scopes.
///
/// Empty scope segments are ignored. An empty list selects the cloud platform
/// scope.
///
/// # Example
/// ```
/// # use google_cloud_external_account::create_external_account_credentials;
/// let config = r#"{
///     "type": "external_account",
///     "audience": "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/pool/providers/provider",
///     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
///     "token_url": "https://sts.googleapis.com/v1/token",
///     "credential_source": { "file": "/var/run/secrets/token" }
/// }"#;
/// let credentials = create_external_account_credentials(config, "scope1,scope2")?;
/// assert_eq!(credentials.config().scopes(), ["scope1", "scope2"]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_external_account_credentials(
    json: &str,
    scopes: &str,
) -> BuildResult<ExternalAccountCredentials> {
    let result = serde_json::from_str::<Value>(json)
        .map_err(BuilderError::parsing)
        .and_then(|config| {
            Builder::new(config)
                .with_scopes(scopes.split(',').filter(|s| !s.is_empty()))
                .build()
        });
    if let Err(e) = &result {
        tracing::error!("cannot create external account credentials: {e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_SCOPE;
    use crate::errors::ErrorKind;
    use crate::http::tests::{MockClient, json_response};
    use http::header::AUTHORIZATION;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    type TestResult = anyhow::Result<()>;

    fn subject_token_file() -> anyhow::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"st-123")?;
        Ok(file)
    }

    fn config(file: &NamedTempFile) -> Value {
        json!({
            "type": "external_account",
            "audience": "test-audience",
            "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
            "token_url": "https://sts.example.com/v1/token",
            "credential_source": {"file": file.path().to_string_lossy()},
            "quota_project_id": "config-quota-project",
            "client_secret": "test-client-secret",
        })
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test_case("", &[DEFAULT_SCOPE]; "empty")]
    #[test_case("scope1", &["scope1"]; "single")]
    #[test_case("scope1,scope2", &["scope1", "scope2"]; "multiple")]
    #[test_case(",scope1,,scope2,", &["scope1", "scope2"]; "empty segments")]
    fn factory_scopes(scopes: &str, want: &[&str]) {
        let json = r#"{
            "type": "external_account",
            "audience": "test-audience",
            "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
            "token_url": "https://sts.example.com/v1/token",
            "credential_source": {"file": "/tmp/token"}
        }"#;
        let credentials = create_external_account_credentials(json, scopes).unwrap();
        assert_eq!(credentials.config().scopes(), want);
    }

    #[test]
    fn factory_parsing_error() {
        let err = create_external_account_credentials("{not json", "").unwrap_err();
        assert!(err.is_parsing(), "{err:?}");
    }

    #[test]
    fn factory_validation_error() {
        let err = create_external_account_credentials(r#"{"type":"external_account"}"#, "")
            .unwrap_err();
        assert!(err.is_missing_field(), "{err:?}");
        assert_eq!(err.field(), Some("audience"));
    }

    #[test]
    fn debug() -> TestResult {
        let file = subject_token_file()?;
        let credentials = Builder::new(config(&file))
            .with_http_client(MockClient::new())
            .build()?;
        let got = format!("{credentials:?}");
        assert!(got.contains("test-audience"), "{got}");
        assert!(!got.contains("test-client-secret"), "{got}");
        Ok(())
    }

    #[test]
    fn quota_project() -> TestResult {
        let file = subject_token_file()?;
        let credentials = Builder::new(config(&file))
            .with_http_client(MockClient::new())
            .build()?;
        assert_eq!(credentials.quota_project_id(), Some("config-quota-project"));

        let credentials = Builder::new(config(&file))
            .with_http_client(MockClient::new())
            .with_quota_project_id("override")
            .build()?;
        assert_eq!(credentials.quota_project_id(), Some("override"));
        Ok(())
    }

    #[tokio::test]
    async fn fetch_token_clears_marker() -> TestResult {
        let file = subject_token_file()?;
        let mut client = MockClient::new();
        client
            .expect_execute()
            .times(2)
            .returning(|_, _, _| Ok(json_response(r#"{"access_token":"at-1"}"#)));
        let credentials = Builder::new(config(&file))
            .with_http_client(client)
            .build()?;

        assert!(!credentials.is_fetch_in_progress());
        let first = credentials.fetch_token(deadline()).await?;
        assert!(!credentials.is_fetch_in_progress());
        let second = credentials.fetch_token(deadline()).await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn marker_cleared_after_error() -> TestResult {
        let file = subject_token_file()?;
        let mut client = MockClient::new();
        client.expect_execute().times(1).returning(|_, _, _| {
            Err(errors::CredentialsError::from_msg(
                ErrorKind::Transport,
                true,
                "connection refused",
            ))
        });
        let credentials = Builder::new(config(&file))
            .with_http_client(client)
            .build()?;

        let err = credentials.fetch_token(deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!credentials.is_fetch_in_progress());
        Ok(())
    }

    #[tokio::test]
    async fn fetch_in_progress() -> TestResult {
        let file = subject_token_file()?;
        let credentials = Builder::new(config(&file))
            .with_http_client(MockClient::new())
            .build()?;

        let guard = credentials.token_provider.provider().start()?;
        assert!(credentials.is_fetch_in_progress());
        let err = credentials.fetch_token(deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchInProgress);
        let err = credentials.token(deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchInProgress);
        // The running fetch is not disturbed.
        assert!(credentials.is_fetch_in_progress());

        drop(guard);
        assert!(!credentials.is_fetch_in_progress());
        Ok(())
    }

    #[tokio::test]
    async fn fetch_token_with() -> TestResult {
        let file = subject_token_file()?;
        let mut client = MockClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_, _, _| Ok(json_response(r#"{"access_token":"at-1"}"#)));
        let credentials = Builder::new(config(&file))
            .with_http_client(client)
            .build()?;

        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = credentials.fetch_token_with(deadline(), move |result| {
            let _ = tx.send(result);
        });
        assert!(credentials.is_fetch_in_progress());
        handle.await?;
        let response = rx.await??;
        assert_eq!(response, json_response(r#"{"access_token":"at-1"}"#));
        assert!(!credentials.is_fetch_in_progress());
        Ok(())
    }

    #[tokio::test]
    async fn fetch_token_with_in_progress() -> TestResult {
        let file = subject_token_file()?;
        let credentials = Builder::new(config(&file))
            .with_http_client(MockClient::new())
            .build()?;

        let _guard = credentials.token_provider.provider().start()?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        credentials
            .fetch_token_with(deadline(), move |result| {
                let _ = tx.send(result);
            })
            .await?;
        let err = rx.await?.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchInProgress);
        Ok(())
    }

    #[tokio::test]
    async fn token_is_cached() -> TestResult {
        let file = subject_token_file()?;
        let mut client = MockClient::new();
        client.expect_execute().times(1).returning(|_, _, _| {
            Ok(json_response(
                r#"{"access_token":"at-1","expires_in":3600,"token_type":"Bearer"}"#,
            ))
        });
        let credentials = Builder::new(config(&file))
            .with_http_client(client)
            .build()?;

        let first = credentials.token(deadline()).await?;
        let second = credentials.token(deadline()).await?;
        assert_eq!(first.token, "at-1");
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn headers() -> TestResult {
        let file = subject_token_file()?;
        let mut client = MockClient::new();
        client.expect_execute().times(1).returning(|_, _, _| {
            Ok(json_response(
                r#"{"access_token":"at-1","expires_in":3600,"token_type":"Bearer"}"#,
            ))
        });
        let credentials = Builder::new(config(&file))
            .with_http_client(client)
            .build()?;

        let headers = credentials.headers(deadline()).await?;
        let authorization = headers.get(AUTHORIZATION).map(|v| v.to_str()).transpose()?;
        assert_eq!(authorization, Some("Bearer at-1"));
        assert!(headers.get(AUTHORIZATION).is_some_and(|v| v.is_sensitive()));
        let quota = headers
            .get("x-goog-user-project")
            .map(|v| v.to_str())
            .transpose()?;
        assert_eq!(quota, Some("config-quota-project"));
        Ok(())
    }

    #[tokio::test]
    async fn headers_invalid_token_response() -> TestResult {
        let file = subject_token_file()?;
        let mut client = MockClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_, _, _| Ok(json_response(r#"{"token_type":"Bearer"}"#)));
        let credentials = Builder::new(config(&file))
            .with_http_client(client)
            .build()?;

        let err = credentials.headers(deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTokenResponse);
        Ok(())
    }
}
