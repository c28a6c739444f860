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

//! Google Cloud Client Libraries for Rust - External Account Credentials
//!
//! This crate implements [external account] credentials, also known as
//! [Workload Identity Federation]. A workload running outside of Google Cloud
//! obtains a *subject token* from its own identity provider (a file, a local
//! metadata URL, or a signed AWS request), exchanges it for a Google Cloud
//! access token using the [OAuth 2.0 Token Exchange] protocol, and optionally
//! impersonates a service account with the resulting token.
//!
//! The RPC layer consumes [credentials::ExternalAccountCredentials] to obtain
//! the headers attached to each call.
//!
//! # Example
//! ```no_run
//! # use google_cloud_external_account::create_external_account_credentials;
//! # tokio_test::block_on(async {
//! let config = r#"{
//!     "type": "external_account",
//!     "audience": "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/pool/providers/provider",
//!     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
//!     "token_url": "https://sts.googleapis.com/v1/token",
//!     "credential_source": { "file": "/var/run/secrets/token" }
//! }"#;
//! let credentials = create_external_account_credentials(config, "")?;
//! let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(30);
//! let headers = credentials.headers(deadline).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```
//!
//! [external account]: https://google.aip.dev/auth/4117
//! [Workload Identity Federation]: https://cloud.google.com/iam/docs/workload-identity-federation
//! [OAuth 2.0 Token Exchange]: https://datatracker.ietf.org/doc/html/rfc8693

pub mod build_errors;
pub mod errors;

/// Types and functions to create and use external account credentials.
pub mod credentials;

/// The HTTP transport used to talk to token endpoints.
pub mod http;

/// Types and functions to work with auth [Tokens].
///
/// [Tokens]: https://cloud.google.com/docs/authentication#token
pub mod token;

pub(crate) mod constants;
pub(crate) mod encoding;
pub(crate) mod headers_util;
pub(crate) mod token_cache;

pub use credentials::external_account::create_external_account_credentials;

/// A `Result` alias where the `Err` case is
/// `google_cloud_external_account::errors::CredentialsError`.
pub(crate) type Result<T> = std::result::Result<T, crate::errors::CredentialsError>;

/// A `Result` alias where the `Err` case is
/// `google_cloud_external_account::build_errors::Error`.
pub(crate) type BuildResult<T> = std::result::Result<T, crate::build_errors::Error>;
