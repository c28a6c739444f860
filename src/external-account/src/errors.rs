// Copyright 2024 Google LLC
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

//! Errors created while fetching access tokens.

use http::StatusCode;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter, Result};
use std::sync::Arc;

/// Represents an error fetching an access token with external account
/// credentials.
///
/// Every error is terminal for the fetch that produced it. The library never
/// retries internally; [is_transient][CredentialsError::is_transient] is only a
/// hint for the caller's own retry loop.
///
/// # Example
/// ```
/// # use google_cloud_external_account::errors::{CredentialsError, ErrorKind};
/// let err = CredentialsError::from_msg(
///     ErrorKind::Transport, true, "simulated connection reset");
/// assert!(err.is_transient());
/// assert_eq!(err.kind(), ErrorKind::Transport);
/// assert!(format!("{err}").contains("simulated connection reset"));
/// ```
#[derive(Clone, Debug)]
pub struct CredentialsError {
    kind: ErrorKind,

    /// A boolean value indicating whether the error is transient.
    ///
    /// If `true`, the operation that resulted in this error might succeed upon
    /// retry.
    is_transient: bool,

    /// The underlying source of the error.
    source: CredentialsErrorImpl,
}

/// The category of a [CredentialsError].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The subject token could not be retrieved from its source.
    SubjectToken,
    /// The HTTP request failed before a response was received, including
    /// reaching the fetch deadline.
    Transport,
    /// The endpoint returned a non-success HTTP status.
    HttpStatus,
    /// The token or impersonation URL cannot be parsed.
    InvalidUrl,
    /// The token exchange response is not a JSON object.
    InvalidExchangeResponse,
    /// The impersonation response is not a JSON object.
    InvalidImpersonationResponse,
    /// The response is missing its access token, or it is not a string.
    MissingAccessToken,
    /// The impersonation response is missing `expireTime`, or it is not a
    /// string.
    MissingExpireTime,
    /// The impersonation response `expireTime` is not an RFC 3339 timestamp.
    InvalidExpireTime,
    /// The final token response cannot be converted into a token.
    InvalidTokenResponse,
    /// A fetch was started while another fetch on the same credentials is
    /// outstanding.
    FetchInProgress,
}

impl ErrorKind {
    fn description(&self) -> &'static str {
        match self {
            ErrorKind::SubjectToken => "cannot retrieve subject token",
            ErrorKind::Transport => "HTTP transport error",
            ErrorKind::HttpStatus => "HTTP request failed",
            ErrorKind::InvalidUrl => "invalid URL",
            ErrorKind::InvalidExchangeResponse => "invalid token exchange response",
            ErrorKind::InvalidImpersonationResponse => {
                "invalid service account impersonation response"
            }
            ErrorKind::MissingAccessToken => "missing or invalid access token",
            ErrorKind::MissingExpireTime => "missing or invalid expire time",
            ErrorKind::InvalidExpireTime => "invalid expire time",
            ErrorKind::InvalidTokenResponse => "invalid token response",
            ErrorKind::FetchInProgress => "a token fetch is already in progress",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.description())
    }
}

#[derive(Clone, Debug)]
enum CredentialsErrorImpl {
    SimpleMessage(String),
    Source(Arc<dyn Error + Send + Sync>),
}

impl CredentialsError {
    /// Creates a new `CredentialsError` wrapping `source`.
    ///
    /// Applications may use this in custom [HttpClient] implementations and in
    /// mocks.
    ///
    /// [HttpClient]: crate::http::HttpClient
    pub fn from_source<T: Error + Send + Sync + 'static>(
        kind: ErrorKind,
        is_transient: bool,
        source: T,
    ) -> Self {
        CredentialsError {
            kind,
            is_transient,
            source: CredentialsErrorImpl::Source(Arc::new(source)),
        }
    }

    /// Creates a new `CredentialsError` from a message.
    pub fn from_msg<T: Into<String>>(kind: ErrorKind, is_transient: bool, message: T) -> Self {
        CredentialsError {
            kind,
            is_transient,
            source: CredentialsErrorImpl::SimpleMessage(message.into()),
        }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns `true` if the error is transient; otherwise returns `false`.
    pub fn is_transient(&self) -> bool {
        self.is_transient
    }

    /// The error was found while parsing a response from a token endpoint.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidExchangeResponse
                | ErrorKind::InvalidImpersonationResponse
                | ErrorKind::MissingAccessToken
                | ErrorKind::MissingExpireTime
                | ErrorKind::InvalidExpireTime
                | ErrorKind::InvalidTokenResponse
        )
    }
}

impl std::error::Error for CredentialsErrorImpl {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            CredentialsErrorImpl::SimpleMessage(_) => None,
            CredentialsErrorImpl::Source(source) => Some(source.as_ref()),
        }
    }
}

impl Display for CredentialsErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match &self {
            CredentialsErrorImpl::SimpleMessage(message) => write!(f, "{message}"),
            CredentialsErrorImpl::Source(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for CredentialsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

const TRANSIENT_MSG: &str = "but future attempts may succeed";
const PERMANENT_MSG: &str = "and future attempts will not succeed";

impl Display for CredentialsError {
    /// Formats the error message to include the kind, transience and source.
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let msg = if self.is_transient {
            TRANSIENT_MSG
        } else {
            PERMANENT_MSG
        };
        write!(
            f,
            "cannot fetch access token: {}, {}, source: {}",
            self.kind, msg, self.source
        )
    }
}

/// A non-success HTTP response from a token endpoint.
#[derive(thiserror::Error, Debug)]
#[error("request failed with status {status}, body=<{body}>")]
pub(crate) struct HttpStatusError {
    pub(crate) status: StatusCode,
    pub(crate) body: String,
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

pub(crate) fn from_http_status(status: StatusCode, body: &[u8]) -> CredentialsError {
    let body = String::from_utf8_lossy(body).into_owned();
    CredentialsError::from_source(
        ErrorKind::HttpStatus,
        is_retryable(status),
        HttpStatusError { status, body },
    )
}

pub(crate) fn transport<T: Error + Send + Sync + 'static>(source: T) -> CredentialsError {
    CredentialsError::from_source(ErrorKind::Transport, true, source)
}

pub(crate) fn deadline_exceeded() -> CredentialsError {
    CredentialsError::from_msg(
        ErrorKind::Transport,
        true,
        "the deadline for the token fetch was exceeded",
    )
}

/// Reclassifies any error raised while retrieving the subject token.
pub(crate) fn subject_token(error: CredentialsError) -> CredentialsError {
    if error.kind == ErrorKind::SubjectToken {
        return error;
    }
    let is_transient = error.is_transient;
    CredentialsError::from_source(ErrorKind::SubjectToken, is_transient, error)
}

pub(crate) fn fetch_in_progress() -> CredentialsError {
    CredentialsError::from_msg(
        ErrorKind::FetchInProgress,
        false,
        "only one token fetch may be outstanding per credentials instance",
    )
}
