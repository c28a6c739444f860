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

//! Subject tokens for workloads running on AWS.
//!
//! The subject token is a serialized, signed `GetCallerIdentity` request. The
//! token exchange service replays the request to verify the AWS identity.

use crate::credentials::fetch::FetchContext;
use crate::credentials::internal::aws_signer::{self, AwsSecurityCredentials, SignableRequest};
use crate::credentials::subject_token::invalid;
use crate::encoding::url_encode;
use crate::errors::{CredentialsError, ErrorKind};
use crate::http::HttpRequest;
use crate::{BuildResult, Result};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

const ENVIRONMENT_ID_PREFIX: &str = "aws";
const SUPPORTED_VERSION: u32 = 1;
const REGION_PLACEHOLDER: &str = "{region}";
const SERVICE: &str = "sts";
const TARGET_RESOURCE_HEADER: &str = "x-goog-cloud-target-resource";
const IMDSV2_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const IMDSV2_TTL_SECONDS: &str = "300";
const IMDSV2_TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";

const AWS_REGION: &str = "AWS_REGION";
const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AwsSourcedCredentials {
    pub region_url: Url,
    pub url: Option<Url>,
    pub regional_cred_verification_url: String,
    pub imdsv2_session_token_url: Option<Url>,
}

/// The JSON response of the EC2 metadata security credentials endpoint.
#[derive(Deserialize)]
struct RoleCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "Token")]
    token: Option<String>,
}

#[derive(Serialize)]
struct SignedHeader<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct SignedRequest<'a> {
    url: &'a str,
    method: &'a str,
    headers: Vec<SignedHeader<'a>>,
}

fn parse_url(source: &Map<String, Value>, name: &str) -> BuildResult<Option<Url>> {
    match source.get(name) {
        None => Ok(None),
        Some(Value::String(u)) if u.is_empty() => Ok(None),
        Some(Value::String(u)) => Url::parse(u)
            .map(Some)
            .map_err(|e| invalid(format!("invalid {name} `{u}`: {e}"))),
        Some(_) => Err(invalid(format!("{name} must be a string"))),
    }
}

impl AwsSourcedCredentials {
    pub(crate) fn from_json(source: &Map<String, Value>) -> BuildResult<Self> {
        let environment_id = match source.get("environment_id") {
            Some(Value::String(id)) => id.as_str(),
            _ => return Err(invalid("environment_id must be a string")),
        };
        let version = environment_id
            .strip_prefix(ENVIRONMENT_ID_PREFIX)
            .ok_or_else(|| invalid(format!("unsupported environment_id `{environment_id}`")))?;
        match version.parse::<u32>() {
            Ok(SUPPORTED_VERSION) => {}
            _ => {
                return Err(invalid(format!(
                    "unsupported AWS version `{version}`, only version {SUPPORTED_VERSION} is supported"
                )));
            }
        }

        let region_url =
            parse_url(source, "region_url")?.ok_or_else(|| invalid("region_url is required"))?;
        let regional_cred_verification_url = match source.get("regional_cred_verification_url") {
            Some(Value::String(u)) if !u.is_empty() => u.clone(),
            _ => {
                return Err(invalid(
                    "regional_cred_verification_url must be a non-empty string",
                ));
            }
        };
        Ok(Self {
            region_url,
            url: parse_url(source, "url")?,
            regional_cred_verification_url,
            imdsv2_session_token_url: parse_url(source, "imdsv2_session_token_url")?,
        })
    }

    pub(crate) async fn subject_token(
        &self,
        audience: &str,
        ctx: &mut FetchContext<'_>,
    ) -> Result<String> {
        let env_region = region_from_env();
        let env_credentials = credentials_from_env();

        let session_token = match &self.imdsv2_session_token_url {
            Some(url) if env_region.is_none() || env_credentials.is_none() => {
                Some(self.imdsv2_session_token(url, ctx).await?)
            }
            _ => None,
        };

        let region = match env_region {
            Some(region) => region,
            None => self.region(session_token.as_deref(), ctx).await?,
        };
        let credentials = match env_credentials {
            Some(credentials) => credentials,
            None => self.role_credentials(session_token.as_deref(), ctx).await?,
        };

        let url = self
            .regional_cred_verification_url
            .replace(REGION_PLACEHOLDER, &region);
        let url = Url::parse(&url)
            .map_err(|e| CredentialsError::from_source(ErrorKind::SubjectToken, false, e))?;
        let extra = vec![(TARGET_RESOURCE_HEADER.to_string(), audience.to_string())];
        let request = SignableRequest {
            method: &Method::POST,
            url: &url,
            headers: &extra,
            body: b"",
        };
        let signed = aws_signer::sign(
            &request,
            &credentials,
            &region,
            SERVICE,
            chrono::Utc::now(),
        )?;
        tracing::debug!(%region, "signed AWS GetCallerIdentity request");

        let token = SignedRequest {
            url: url.as_str(),
            method: Method::POST.as_str(),
            headers: signed
                .iter()
                .map(|(key, value)| SignedHeader { key, value })
                .collect(),
        };
        let token = serde_json::to_string(&token)
            .map_err(|e| CredentialsError::from_source(ErrorKind::SubjectToken, false, e))?;
        Ok(url_encode(token))
    }

    async fn imdsv2_session_token(
        &self,
        url: &Url,
        ctx: &mut FetchContext<'_>,
    ) -> Result<String> {
        let request = HttpRequest::new(Method::PUT, url.clone())
            .with_header(IMDSV2_TTL_HEADER, IMDSV2_TTL_SECONDS);
        let response = ctx.send(request).await?;
        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }

    async fn region(
        &self,
        session_token: Option<&str>,
        ctx: &mut FetchContext<'_>,
    ) -> Result<String> {
        let request = with_session_token(
            HttpRequest::new(Method::GET, self.region_url.clone()),
            session_token,
        );
        let response = ctx.send(request).await?;
        let zone = String::from_utf8_lossy(&response.body);
        let zone = zone.trim();
        // The endpoint returns the availability zone, e.g. `us-east-2b`.
        let mut chars = zone.chars();
        if chars.next_back().is_none() || chars.as_str().is_empty() {
            return Err(CredentialsError::from_msg(
                ErrorKind::SubjectToken,
                false,
                format!("invalid AWS availability zone <{zone}>"),
            ));
        }
        Ok(chars.as_str().to_string())
    }

    async fn role_credentials(
        &self,
        session_token: Option<&str>,
        ctx: &mut FetchContext<'_>,
    ) -> Result<AwsSecurityCredentials> {
        let Some(url) = &self.url else {
            return Err(CredentialsError::from_msg(
                ErrorKind::SubjectToken,
                false,
                "AWS security credentials are not in the environment and the credential_source url is not set",
            ));
        };
        let request =
            with_session_token(HttpRequest::new(Method::GET, url.clone()), session_token);
        let response = ctx.send(request).await?;
        let role = String::from_utf8_lossy(&response.body).trim().to_string();
        if role.is_empty() {
            return Err(CredentialsError::from_msg(
                ErrorKind::SubjectToken,
                false,
                "empty AWS role name",
            ));
        }

        let role_url = Url::parse(&format!("{}/{role}", url.as_str().trim_end_matches('/')))
            .map_err(|e| CredentialsError::from_source(ErrorKind::SubjectToken, false, e))?;
        let request = with_session_token(HttpRequest::new(Method::GET, role_url), session_token);
        let response = ctx.send(request).await?;
        let parsed: RoleCredentials = serde_json::from_slice(&response.body)
            .map_err(|e| CredentialsError::from_source(ErrorKind::SubjectToken, false, e))?;
        Ok(AwsSecurityCredentials {
            access_key_id: parsed.access_key_id,
            secret_access_key: parsed.secret_access_key,
            session_token: parsed.token.filter(|t| !t.is_empty()),
        })
    }
}

fn with_session_token(request: HttpRequest, session_token: Option<&str>) -> HttpRequest {
    match session_token {
        Some(token) => request.with_header(IMDSV2_TOKEN_HEADER, token),
        None => request,
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn region_from_env() -> Option<String> {
    env_var(AWS_REGION).or_else(|| env_var(AWS_DEFAULT_REGION))
}

fn credentials_from_env() -> Option<AwsSecurityCredentials> {
    Some(AwsSecurityCredentials {
        access_key_id: env_var(AWS_ACCESS_KEY_ID)?,
        secret_access_key: env_var(AWS_SECRET_ACCESS_KEY)?,
        session_token: env_var(AWS_SESSION_TOKEN),
    })
}
