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

use crate::Result;
use crate::constants::BEARER_TOKEN_TYPE;
use crate::errors::{CredentialsError, ErrorKind};
use crate::http::MetadataResponse;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Represents an auth token.
#[derive(Clone, PartialEq)]
pub struct Token {
    /// The actual token string.
    ///
    /// This is the value used in `Authorization:` header.
    pub token: String,

    /// The type of the token.
    ///
    /// The most common type is `"Bearer"` but other types may appear in the
    /// future.
    pub token_type: String,

    /// The instant at which the token expires.
    ///
    /// If `None`, the token does not expire.
    ///
    /// Note that the `Instant` is not valid across processes. It is
    /// recommended to let the credentials refresh tokens within a process
    /// instead of handling expirations yourself.
    pub expires_at: Option<Instant>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token", &"[censored]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl Token {
    /// Parses the body of a completed token fetch.
    ///
    /// `now` is the instant the response was received. A negative
    /// `expires_in` produces a token that is already expired. An `expires_in`
    /// too large to represent produces a token that does not expire.
    pub fn from_metadata_response(response: &MetadataResponse, now: Instant) -> Result<Token> {
        let parsed: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| CredentialsError::from_source(ErrorKind::InvalidTokenResponse, false, e))?;
        let expires_at = parsed.expires_in.and_then(|secs| {
            let delta = Duration::from_secs(secs.unsigned_abs());
            if secs >= 0 {
                now.checked_add(delta)
            } else {
                Some(now.checked_sub(delta).unwrap_or(now))
            }
        });
        Ok(Token {
            token: parsed.access_token,
            token_type: parsed
                .token_type
                .unwrap_or_else(|| BEARER_TOKEN_TYPE.to_string()),
            expires_at,
        })
    }
}

#[async_trait::async_trait]
pub(crate) trait TokenProvider: std::fmt::Debug + Send + Sync {
    async fn token(&self, deadline: Instant) -> Result<Token>;
}
