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

use super::subject_token::CredentialSource;
use crate::BuildResult;
use crate::build_errors::Error as BuilderError;
use crate::constants::{DEFAULT_SCOPE, EXTERNAL_ACCOUNT_TYPE};
use serde_json::{Map, Value};

const WORKFORCE_POOL_PREFIX: &str = "//iam.googleapis.com/locations/";

/// A parsed [external account configuration file].
///
/// The configuration is validated once, when the credentials are created, and
/// is immutable afterwards.
///
/// [external account configuration file]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
#[derive(Clone)]
pub struct ExternalAccountConfig {
    pub(crate) audience: String,
    pub(crate) subject_token_type: String,
    pub(crate) token_url: String,
    pub(crate) token_info_url: Option<String>,
    pub(crate) service_account_impersonation_url: Option<String>,
    pub(crate) credential_source: CredentialSource,
    pub(crate) quota_project_id: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) client_secret: Option<String>,
    pub(crate) workforce_pool_user_project: Option<String>,
    pub(crate) scopes: Vec<String>,
}

impl std::fmt::Debug for ExternalAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAccountConfig")
            .field("audience", &self.audience)
            .field("subject_token_type", &self.subject_token_type)
            .field("token_url", &self.token_url)
            .field("token_info_url", &self.token_info_url)
            .field(
                "service_account_impersonation_url",
                &self.service_account_impersonation_url,
            )
            .field("credential_source", &self.credential_source.kind())
            .field("quota_project_id", &self.quota_project_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[censored]"),
            )
            .field("workforce_pool_user_project", &self.workforce_pool_user_project)
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn required_string(map: &Map<String, Value>, field: &'static str) -> BuildResult<String> {
    match map.get(field) {
        None => Err(BuilderError::missing_field(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(BuilderError::invalid_field_type(field)),
    }
}

fn optional_string(map: &Map<String, Value>, field: &'static str) -> BuildResult<Option<String>> {
    match map.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(BuilderError::invalid_field_type(field)),
    }
}

/// Returns true if `audience` identifies a workforce pool provider, i.e.
/// `//iam.googleapis.com/locations/<location>/workforcePools/<pool>/providers/<provider>`.
pub(crate) fn is_workforce_pool_audience(audience: &str) -> bool {
    let Some(rest) = audience.strip_prefix(WORKFORCE_POOL_PREFIX) else {
        return false;
    };
    let Some((location, rest)) = rest.split_once("/workforcePools/") else {
        return false;
    };
    let Some((pool, provider)) = rest.split_once("/providers/") else {
        return false;
    };
    let segment = |s: &str| !s.is_empty() && !s.contains('/');
    segment(location) && segment(pool) && !provider.is_empty()
}

impl ExternalAccountConfig {
    /// Validates `json` and creates the configuration.
    ///
    /// If `scopes` is empty the credentials use the default cloud platform
    /// scope.
    pub fn from_json(json: &Value, scopes: Vec<String>) -> BuildResult<Self> {
        let map = json.as_object().ok_or_else(BuilderError::not_an_object)?;

        let credentials_type = required_string(map, "type")?;
        if credentials_type != EXTERNAL_ACCOUNT_TYPE {
            return Err(BuilderError::unknown_type(credentials_type));
        }
        let audience = required_string(map, "audience")?;
        let subject_token_type = required_string(map, "subject_token_type")?;
        let service_account_impersonation_url =
            optional_string(map, "service_account_impersonation_url")?.filter(|u| !u.is_empty());
        let token_url = required_string(map, "token_url")?;
        let token_info_url = optional_string(map, "token_info_url")?;
        let credential_source = match map.get("credential_source") {
            None => return Err(BuilderError::missing_field("credential_source")),
            Some(Value::Object(source)) => source,
            Some(_) => return Err(BuilderError::invalid_field_type("credential_source")),
        };
        let quota_project_id = optional_string(map, "quota_project_id")?;
        let client_id = optional_string(map, "client_id")?;
        let client_secret = optional_string(map, "client_secret")?;
        let workforce_pool_user_project =
            optional_string(map, "workforce_pool_user_project")?.filter(|p| !p.is_empty());
        if workforce_pool_user_project.is_some() && !is_workforce_pool_audience(&audience) {
            return Err(BuilderError::workforce_pool_audience_mismatch());
        }
        let credential_source = CredentialSource::from_json(credential_source)?;

        let scopes = if scopes.is_empty() {
            vec![DEFAULT_SCOPE.to_string()]
        } else {
            scopes
        };

        Ok(Self {
            audience,
            subject_token_type,
            token_url,
            token_info_url,
            service_account_impersonation_url,
            credential_source,
            quota_project_id,
            client_id,
            client_secret,
            workforce_pool_user_project,
            scopes,
        })
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn subject_token_type(&self) -> &str {
        &self.subject_token_type
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// The token introspection endpoint. Stored, but not used to fetch tokens.
    pub fn token_info_url(&self) -> Option<&str> {
        self.token_info_url.as_deref()
    }

    /// If set, the credentials impersonate a service account.
    pub fn service_account_impersonation_url(&self) -> Option<&str> {
        self.service_account_impersonation_url.as_deref()
    }

    pub fn quota_project_id(&self) -> Option<&str> {
        self.quota_project_id.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn workforce_pool_user_project(&self) -> Option<&str> {
        self.workforce_pool_user_project.as_deref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub(crate) fn credential_source(&self) -> &CredentialSource {
        &self.credential_source
    }
}
