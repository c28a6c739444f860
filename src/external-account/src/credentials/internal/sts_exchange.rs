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

//! The [OAuth 2.0 Token Exchange] request.
//!
//! [OAuth 2.0 Token Exchange]: https://datatracker.ietf.org/doc/html/rfc8693

use crate::Result;
use crate::constants::{
    ACCESS_TOKEN_TYPE, DEFAULT_SCOPE, FORM_URLENCODED, TOKEN_EXCHANGE_GRANT_TYPE,
};
use crate::credentials::config::ExternalAccountConfig;
use crate::encoding::form_body;
use crate::errors::{CredentialsError, ErrorKind};
use crate::http::HttpRequest;
use base64::Engine;
use http::Method;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use url::Url;

/// The OAuth client used to authenticate the exchange, if any.
#[derive(Clone, Debug)]
pub(crate) struct ClientAuthentication<'a> {
    client_id: Option<&'a str>,
    client_secret: Option<&'a str>,
}

impl<'a> ClientAuthentication<'a> {
    pub(crate) fn new(client_id: Option<&'a str>, client_secret: Option<&'a str>) -> Self {
        let non_empty = |s: Option<&'a str>| s.filter(|s| !s.is_empty());
        Self {
            client_id: non_empty(client_id),
            client_secret: non_empty(client_secret),
        }
    }

    /// Returns the `Authorization` header value when both the client id and
    /// secret are set.
    pub(crate) fn basic_auth(&self) -> Option<String> {
        let (Some(id), Some(secret)) = (self.client_id, self.client_secret) else {
            return None;
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
        Some(format!("Basic {encoded}"))
    }

    /// The workforce pool `options` parameter is only sent without any client
    /// authentication.
    pub(crate) fn is_empty(&self) -> bool {
        self.client_id.is_none() && self.client_secret.is_none()
    }
}

/// Builds the token exchange request for `subject_token`.
pub(crate) fn build_request(
    config: &ExternalAccountConfig,
    subject_token: &str,
) -> Result<HttpRequest> {
    let url = Url::parse(config.token_url())
        .map_err(|e| CredentialsError::from_source(ErrorKind::InvalidUrl, false, e))?;

    let scope = if config.service_account_impersonation_url().is_some() {
        DEFAULT_SCOPE.to_string()
    } else {
        config.scopes().join(" ")
    };
    let auth = ClientAuthentication::new(config.client_id(), config.client_secret());
    let options = auth.is_empty().then(|| {
        serde_json::json!({
            "userProject": config.workforce_pool_user_project().unwrap_or_default(),
        })
        .to_string()
    });

    let mut params = vec![
        ("audience", config.audience()),
        ("grant_type", TOKEN_EXCHANGE_GRANT_TYPE),
        ("requested_token_type", ACCESS_TOKEN_TYPE),
        ("subject_token_type", config.subject_token_type()),
        ("subject_token", subject_token),
        ("scope", scope.as_str()),
    ];
    if let Some(options) = &options {
        params.push(("options", options.as_str()));
    }

    let request = HttpRequest::new(Method::POST, url)
        .with_header(CONTENT_TYPE.as_str(), FORM_URLENCODED)
        .with_body(form_body(params));
    Ok(match auth.basic_auth() {
        Some(value) => request.with_header(AUTHORIZATION.as_str(), value),
        None => request,
    })
}
