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

//! Runs one token fetch: subject token, token exchange and, optionally,
//! service account impersonation.

use super::config::ExternalAccountConfig;
use super::internal::{impersonation, sts_exchange};
use crate::Result;
use crate::errors;
use crate::http::{HttpClient, HttpRequest, HttpResponse, MetadataResponse};
use time::OffsetDateTime;
use tokio::time::{Instant, timeout_at};

/// The states of a token fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FetchState {
    Idle,
    RetrievingSubjectToken,
    Exchanging,
    Impersonating,
    Completed,
}

/// The state of one token fetch.
///
/// All HTTP requests of a fetch go through [FetchContext::send], which
/// borrows the context mutably. At most one request is outstanding at a time.
#[derive(Debug)]
pub(crate) struct FetchContext<'a> {
    client: &'a dyn HttpClient,
    deadline: Instant,
    state: FetchState,
}

impl<'a> FetchContext<'a> {
    pub(crate) fn new(client: &'a dyn HttpClient, deadline: Instant) -> Self {
        Self {
            client,
            deadline,
            state: FetchState::Idle,
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> FetchState {
        self.state
    }

    fn transition(&mut self, next: FetchState) {
        tracing::debug!(from = ?self.state, to = ?next, "token fetch state transition");
        self.state = next;
    }

    /// Sends `request` and returns the response if its status is a success.
    ///
    /// The request fails with a transport error if the fetch deadline expires
    /// first.
    pub(crate) async fn send(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let transport = request.transport();
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            ?transport,
            "sending request"
        );
        let response = timeout_at(
            self.deadline,
            self.client.execute(transport, request, self.deadline),
        )
        .await
        .map_err(|_| errors::deadline_exceeded())??;
        tracing::debug!(status = %response.status, "received response");
        if !response.status.is_success() {
            return Err(errors::from_http_status(response.status, &response.body));
        }
        Ok(response)
    }
}

/// Runs a complete token fetch for `config`.
///
/// Errors are logged once and returned unchanged.
pub(crate) async fn run(
    config: &ExternalAccountConfig,
    client: &dyn HttpClient,
    deadline: Instant,
) -> Result<MetadataResponse> {
    let mut ctx = FetchContext::new(client, deadline);
    let result = run_steps(config, &mut ctx).await;
    ctx.transition(FetchState::Completed);
    if let Err(e) = &result {
        tracing::warn!("fetching external account access token failed: {e}");
    }
    result
}

async fn run_steps(
    config: &ExternalAccountConfig,
    ctx: &mut FetchContext<'_>,
) -> Result<MetadataResponse> {
    ctx.transition(FetchState::RetrievingSubjectToken);
    let source = config.credential_source();
    tracing::debug!(source = source.kind(), "retrieving subject token");
    let deadline = ctx.deadline();
    let subject_token = timeout_at(deadline, source.subject_token(config, ctx))
        .await
        .map_err(|_| errors::deadline_exceeded())
        .and_then(|r| r)
        .map_err(errors::subject_token)?;

    ctx.transition(FetchState::Exchanging);
    let request = sts_exchange::build_request(config, &subject_token)?;
    let response = ctx.send(request).await?;

    let Some(url) = config.service_account_impersonation_url() else {
        return Ok(response);
    };
    ctx.transition(FetchState::Impersonating);
    let request = impersonation::build_request(url, &response, config.scopes())?;
    let response = ctx.send(request).await?;
    impersonation::parse_response(response, OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::http::Transport;
    use crate::http::tests::{MockClient, json_response};
    use http::StatusCode;
    use serde_json::{Value, json};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    type TestResult = anyhow::Result<()>;

    const TOKEN_URL: &str = "https://sts.example.com/v1/token";
    const IMPERSONATION_URL: &str = "https://iamcredentials.example.com/v1/projects/-/serviceAccounts/sa@project.iam.gserviceaccount.com:generateAccessToken";

    fn subject_token_file() -> anyhow::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"st-123")?;
        Ok(file)
    }

    fn config(file: &NamedTempFile, extra: Value) -> anyhow::Result<ExternalAccountConfig> {
        let mut json = json!({
            "type": "external_account",
            "audience": "test-audience",
            "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
            "token_url": TOKEN_URL,
            "credential_source": {"file": file.path().to_string_lossy()},
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut json, extra) {
            base.extend(extra);
        }
        Ok(ExternalAccountConfig::from_json(&json, Vec::new())?)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn direct_exchange() -> TestResult {
        let file = subject_token_file()?;
        let config = config(&file, json!({}))?;
        let body = r#"{"access_token":"at-1","expires_in":3600,"token_type":"Bearer"}"#;

        let mut client = MockClient::new();
        client
            .expect_execute()
            .withf(|transport, request, _| {
                *transport == Transport::Tls
                    && request.url.as_str() == TOKEN_URL
                    && String::from_utf8_lossy(&request.body).contains("subject_token=st-123&")
            })
            .times(1)
            .returning(move |_, _, _| Ok(json_response(body)));

        let got = run(&config, &client, deadline()).await?;
        assert_eq!(got, json_response(body));
        Ok(())
    }

    #[tokio::test]
    async fn impersonation() -> TestResult {
        let file = subject_token_file()?;
        let config = config(
            &file,
            json!({"service_account_impersonation_url": IMPERSONATION_URL}),
        )?;

        let mut seq = mockall::Sequence::new();
        let mut client = MockClient::new();
        client
            .expect_execute()
            .withf(|_, request, _| request.url.as_str() == TOKEN_URL)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(json_response(r#"{"access_token":"intermediate-tok"}"#)));
        client
            .expect_execute()
            .withf(|_, request, _| {
                request.url.as_str() == IMPERSONATION_URL
                    && request.header("authorization") == Some("Bearer intermediate-tok")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(json_response(
                    r#"{"accessToken":"final-tok","expireTime":"2030-01-01T00:00:00Z"}"#,
                ))
            });

        let got = run(&config, &client, deadline()).await?;
        let body: Value = serde_json::from_slice(&got.body)?;
        assert_eq!(body["access_token"], "final-tok");
        assert_eq!(body["token_type"], "Bearer");
        assert!(body["expires_in"].as_i64().is_some_and(|s| s > 0), "{body}");
        Ok(())
    }

    #[tokio::test]
    async fn subject_token_error() -> TestResult {
        let dir = tempfile::tempdir()?;
        let json = json!({
            "type": "external_account",
            "audience": "test-audience",
            "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
            "token_url": TOKEN_URL,
            "credential_source": {"file": dir.path().join("missing").to_string_lossy()},
        });
        let config = ExternalAccountConfig::from_json(&json, Vec::new())?;

        // No requests are expected.
        let client = MockClient::new();
        let err = run(&config, &client, deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubjectToken);
        Ok(())
    }

    #[tokio::test]
    async fn exchange_error_status() -> TestResult {
        let file = subject_token_file()?;
        let config = config(
            &file,
            json!({"service_account_impersonation_url": IMPERSONATION_URL}),
        )?;

        let mut client = MockClient::new();
        client.expect_execute().times(1).returning(|_, _, _| {
            Ok(HttpResponse {
                status: StatusCode::BAD_REQUEST,
                headers: Vec::new(),
                body: r#"{"error":"invalid_grant"}"#.into(),
            })
        });

        let err = run(&config, &client, deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert!(err.to_string().contains("invalid_grant"), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn exchange_transport_error() -> TestResult {
        let file = subject_token_file()?;
        let config = config(
            &file,
            json!({"service_account_impersonation_url": IMPERSONATION_URL}),
        )?;

        let mut client = MockClient::new();
        client.expect_execute().times(1).returning(|_, _, _| {
            Err(errors::CredentialsError::from_msg(
                ErrorKind::Transport,
                true,
                "connection refused",
            ))
        });

        let err = run(&config, &client, deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_transient(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_exchange_response() -> TestResult {
        let file = subject_token_file()?;
        let config = config(
            &file,
            json!({"service_account_impersonation_url": IMPERSONATION_URL}),
        )?;

        let mut client = MockClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_, _, _| Ok(json_response("[]")));

        let err = run(&config, &client, deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidExchangeResponse);
        Ok(())
    }

    #[derive(Debug)]
    struct SlowClient;

    #[async_trait::async_trait]
    impl HttpClient for SlowClient {
        async fn execute(
            &self,
            _transport: Transport,
            _request: HttpRequest,
            _deadline: Instant,
        ) -> Result<HttpResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json_response("{}"))
        }
    }

    #[tokio::test]
    async fn deadline_is_enforced() -> TestResult {
        let file = subject_token_file()?;
        let config = config(&file, json!({}))?;
        let start = Instant::now();
        let deadline = start + Duration::from_millis(200);
        let err = run(&config, &SlowClient, deadline).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("deadline"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(60), "{:?}", start.elapsed());
        Ok(())
    }

    #[tokio::test]
    async fn context_states() -> TestResult {
        let client = MockClient::new();
        let mut ctx = FetchContext::new(&client, deadline());
        assert_eq!(ctx.state(), FetchState::Idle);
        ctx.transition(FetchState::RetrievingSubjectToken);
        assert_eq!(ctx.state(), FetchState::RetrievingSubjectToken);
        Ok(())
    }
}
