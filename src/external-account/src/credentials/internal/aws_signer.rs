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

//! AWS Signature Version 4 for the `GetCallerIdentity` subject token.

use crate::Result;
use crate::errors::{CredentialsError, ErrorKind};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::Method;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const X_AMZ_DATE: &str = "x-amz-date";
const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

const AWS_QUERY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const AWS_URI_ENCODE_SET: AsciiSet = AWS_QUERY_ENCODE_SET.remove(b'/');

/// The keys used to sign AWS requests.
#[derive(Clone, PartialEq)]
pub(crate) struct AwsSecurityCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsSecurityCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecurityCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[censored]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

/// The request to sign.
#[derive(Debug)]
pub(crate) struct SignableRequest<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub headers: &'a [(String, String)],
    pub body: &'a [u8],
}

/// Signs `request` and returns every header the signed request must carry,
/// including the `Authorization` header.
///
/// The result is keyed by header name, `Authorization` sorts first.
pub(crate) fn sign(
    request: &SignableRequest<'_>,
    credentials: &AwsSecurityCredentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, String>> {
    let host = host_port(request.url)?;
    let amz_date = format_iso8601(now);

    let mut canonical_headers = BTreeMap::new();
    for (name, value) in request.headers {
        canonical_headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
    }
    canonical_headers.insert("host".to_string(), host);
    canonical_headers.insert(X_AMZ_DATE.to_string(), amz_date.clone());
    if let Some(token) = &credentials.session_token {
        canonical_headers.insert(X_AMZ_SECURITY_TOKEN.to_string(), token.clone());
    }
    let signed_headers = canonical_headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";");

    let mut lines = vec![
        request.method.to_string(),
        canonical_uri(request.url),
        canonical_query(request.url),
    ];
    lines.extend(
        canonical_headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}")),
    );
    lines.push(String::new());
    lines.push(signed_headers.clone());
    lines.push(hex_sha256(request.body));
    let canonical_request = lines.join("\n");
    // The canonical request contains the session token, never log it.
    tracing::debug!(
        method = %request.method,
        uri = %canonical_uri(request.url),
        %signed_headers,
        "calculated canonical request"
    );

    // Scope: "20150830/<region>/<service>/aws4_request"
    let scope = format!("{}/{region}/{service}/aws4_request", format_date(now));
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = generate_signing_key(&credentials.secret_access_key, now, region, service)?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    );
    let mut headers = canonical_headers;
    // Preserve the caller's spelling of the extra headers.
    for (name, value) in request.headers {
        headers.remove(&name.to_ascii_lowercase());
        headers.insert(name.clone(), value.clone());
    }
    headers.insert("Authorization".to_string(), authorization);
    Ok(headers)
}

fn host_port(url: &Url) -> Result<String> {
    let host = url.host_str().ok_or_else(|| {
        CredentialsError::from_msg(
            ErrorKind::SubjectToken,
            false,
            format!("cannot sign a request without a host, url=<{url}>"),
        )
    })?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn canonical_uri(url: &Url) -> String {
    let path = percent_encoding::percent_decode_str(url.path()).decode_utf8_lossy();
    let path = if path.is_empty() { "/".into() } else { path };
    utf8_percent_encode(&path, &AWS_URI_ENCODE_SET).to_string()
}

fn canonical_query(url: &Url) -> String {
    let mut params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    params.sort();
    params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, &AWS_QUERY_ENCODE_SET),
                utf8_percent_encode(v, &AWS_QUERY_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn format_iso8601(t: DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

fn format_date(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d").to_string()
}

fn hex_sha256(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content).as_slice())
}

fn hmac_sha256(key: &[u8], content: &[u8]) -> Result<Vec<u8>> {
    let mut h = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| CredentialsError::from_msg(ErrorKind::SubjectToken, false, e.to_string()))?;
    h.update(content);
    Ok(h.finalize().into_bytes().to_vec())
}

fn generate_signing_key(
    secret: &str,
    time: DateTime<Utc>,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let secret = format!("AWS4{secret}");
    let sign_date = hmac_sha256(secret.as_bytes(), format_date(time).as_bytes())?;
    let sign_region = hmac_sha256(&sign_date, region.as_bytes())?;
    let sign_service = hmac_sha256(&sign_region, service.as_bytes())?;
    hmac_sha256(&sign_service, b"aws4_request")
}
