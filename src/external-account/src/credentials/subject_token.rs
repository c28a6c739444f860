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

//! Subject token sources.
//!
//! The set of sources is closed: the `credential_source` object in the
//! configuration selects exactly one [CredentialSource] variant.

use super::config::ExternalAccountConfig;
use super::external_account_sources::aws_sourced::AwsSourcedCredentials;
use super::external_account_sources::file_sourced::FileSourcedCredentials;
use super::external_account_sources::url_sourced::UrlSourcedCredentials;
use super::fetch::FetchContext;
use crate::build_errors::Error as BuilderError;
use crate::errors::{CredentialsError, ErrorKind};
use crate::{BuildResult, Result};
use serde_json::{Map, Value};

const TEXT_FORMAT_TYPE: &str = "text";
const JSON_FORMAT_TYPE: &str = "json";

/// How the subject token is stored in the file or URL response.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum SubjectTokenFormat {
    /// The whole content is the subject token.
    #[default]
    Text,
    /// The content is a JSON object and the token is in the named field.
    Json { subject_token_field_name: String },
}

impl SubjectTokenFormat {
    /// Parses the optional `format` object of a `credential_source`.
    pub(crate) fn from_source(source: &Map<String, Value>) -> BuildResult<Self> {
        let format = match source.get("format") {
            None => return Ok(Self::Text),
            Some(Value::Object(f)) => f,
            Some(_) => return Err(invalid("format must be an object")),
        };
        let format_type = match format.get("type") {
            None => TEXT_FORMAT_TYPE,
            Some(Value::String(t)) => t.as_str(),
            Some(_) => return Err(invalid("format.type must be a string")),
        };
        match format_type {
            TEXT_FORMAT_TYPE => Ok(Self::Text),
            JSON_FORMAT_TYPE => match format.get("subject_token_field_name") {
                Some(Value::String(name)) if !name.is_empty() => Ok(Self::Json {
                    subject_token_field_name: name.clone(),
                }),
                _ => Err(invalid(
                    "format.subject_token_field_name must be a non-empty string for json format",
                )),
            },
            t => Err(invalid(format!(
                "unsupported format.type `{t}`, expected `text` or `json`"
            ))),
        }
    }

    /// Extracts the subject token from the source content.
    pub(crate) fn extract(&self, content: String) -> Result<String> {
        match self {
            Self::Text => Ok(content),
            Self::Json {
                subject_token_field_name,
            } => {
                let json: Value = serde_json::from_str(&content)
                    .map_err(|e| CredentialsError::from_source(ErrorKind::SubjectToken, false, e))?;
                match json.get(subject_token_field_name) {
                    Some(Value::String(token)) => Ok(token.clone()),
                    None | Some(_) => Err(CredentialsError::from_msg(
                        ErrorKind::SubjectToken,
                        false,
                        format!(
                            "failed to read subject token field `{subject_token_field_name}` as string"
                        ),
                    )),
                }
            }
        }
    }
}

/// The source of the subject token.
#[derive(Clone, Debug)]
pub(crate) enum CredentialSource {
    /// Signs an AWS `GetCallerIdentity` request with keys from the environment
    /// or the EC2 metadata server.
    Environment(AwsSourcedCredentials),
    /// Reads the token from a local file.
    File(FileSourcedCredentials),
    /// Fetches the token from a URL.
    Url(UrlSourcedCredentials),
}

impl CredentialSource {
    /// Selects the source variant from the keys of `credential_source`.
    pub(crate) fn from_json(source: &Map<String, Value>) -> BuildResult<Self> {
        if source.contains_key("environment_id") {
            return AwsSourcedCredentials::from_json(source).map(Self::Environment);
        }
        if source.contains_key("file") {
            return FileSourcedCredentials::from_json(source).map(Self::File);
        }
        if source.contains_key("url") {
            return UrlSourcedCredentials::from_json(source).map(Self::Url);
        }
        Err(BuilderError::unsupported_credential_source())
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Environment(_) => "environment",
            Self::File(_) => "file",
            Self::Url(_) => "url",
        }
    }

    /// Retrieves the subject token. Any HTTP requests use `ctx`.
    pub(crate) async fn subject_token(
        &self,
        config: &ExternalAccountConfig,
        ctx: &mut FetchContext<'_>,
    ) -> Result<String> {
        match self {
            Self::Environment(source) => source.subject_token(config.audience(), ctx).await,
            Self::File(source) => source.subject_token().await,
            Self::Url(source) => source.subject_token(ctx).await,
        }
    }
}

pub(crate) fn invalid<T: Into<String>>(msg: T) -> BuilderError {
    BuilderError::invalid_credential_source(msg.into())
}
