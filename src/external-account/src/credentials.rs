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

//! External account credentials.
//!
//! A token fetch runs these steps in order:
//!
//! 1. Retrieve the subject token from the configured source: a file, a URL,
//!    or a signed AWS `GetCallerIdentity` request.
//! 2. Exchange the subject token for a federated access token at the
//!    `token_url` endpoint.
//! 3. If `service_account_impersonation_url` is configured, use the federated
//!    token to obtain a service account access token.
//!
//! Every step shares the deadline of the fetch, and any error ends it.

pub mod external_account;

pub(crate) mod config;
pub(crate) mod fetch;
pub(crate) mod subject_token;

pub(crate) mod external_account_sources {
    pub(crate) mod aws_sourced;
    pub(crate) mod file_sourced;
    pub(crate) mod url_sourced;
}

pub(crate) mod internal {
    pub(crate) mod aws_signer;
    pub(crate) mod impersonation;
    pub(crate) mod sts_exchange;
}

pub use config::ExternalAccountConfig;
pub use external_account::{Builder, ExternalAccountCredentials};
