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

use crate::Result;
use crate::token::{Token, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
// Using tokio's wrapper makes the cache testable without relying on clock times.
use tokio::time::Instant;

/// Tokens that expire within this window are refreshed before use.
pub(crate) const REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(crate) struct TokenCache<T>
where
    T: TokenProvider,
{
    // The cached token. The lock is held for the duration of a refresh, so
    // concurrent callers wait for that refresh instead of starting their own.
    token: Arc<Mutex<Option<Token>>>,

    // The token provider. This thing does the refreshing.
    inner: Arc<T>,
}

// Returns true if the token has no expiration or expires after the refresh
// threshold.
fn usable(token: &Token, now: Instant) -> bool {
    token
        .expires_at
        .is_none_or(|e| e.checked_duration_since(now).is_some_and(|d| d > REFRESH_THRESHOLD))
}

// Implemented by hand because the derive requires `T: Clone`, even though we
// only hold an `Arc<T>`.
impl<T: TokenProvider> Clone for TokenCache<T> {
    fn clone(&self) -> TokenCache<T> {
        TokenCache {
            token: self.token.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: TokenProvider> TokenCache<T> {
    pub(crate) fn new(inner: T) -> TokenCache<T> {
        TokenCache {
            token: Arc::new(Mutex::new(None)),
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn provider(&self) -> &T {
        &self.inner
    }

    /// Returns the cached token, refreshing it first if needed.
    ///
    /// Errors are returned to the caller and not cached.
    pub(crate) async fn token(&self, deadline: Instant) -> Result<Token> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| usable(t, Instant::now())) {
            return Ok(token.clone());
        }
        tracing::debug!("refreshing cached token");
        let token = self.inner.token(deadline).await?;
        *guard = Some(token.clone());
        Ok(token)
    }
}
