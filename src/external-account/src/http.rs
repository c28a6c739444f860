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
use crate::build_errors::Error as BuilderError;
use crate::errors;
use bytes::Bytes;
use http::{Method, StatusCode};
use tokio::time::Instant;
use url::Url;

/// An ordered list of `(name, value)` header pairs.
///
/// Header names are compared case-insensitively by the helpers in this module.
pub type HeaderList = Vec<(String, String)>;

/// The result of a token fetch.
///
/// On the direct exchange path this is the token exchange response, unchanged.
/// With service account impersonation the body is the normalized token JSON
/// and the headers are those of the impersonation response.
pub type MetadataResponse = HttpResponse;

/// An HTTP request to a token endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderList::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value for `name`, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The transport required by this request's URL.
    pub fn transport(&self) -> Transport {
        Transport::for_url(&self.url)
    }
}

/// An HTTP response from a token endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl HttpResponse {
    /// Returns the first value for `name`, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// The kind of connection used to reach an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Plain-text HTTP, only used for `http://` URLs.
    Insecure,
    /// HTTPS, the transport for any other scheme.
    Tls,
}

impl Transport {
    /// Selects the transport for `url` from its scheme.
    pub fn for_url(url: &Url) -> Self {
        if url.scheme() == "http" {
            Transport::Insecure
        } else {
            Transport::Tls
        }
    }
}

/// Sends HTTP requests on behalf of the credentials.
///
/// Implementations must complete (with a response or an error) no later than
/// `deadline`. The credentials also enforce the deadline, so implementations
/// that cannot honor it are merely less efficient.
///
/// Non-success statuses are returned as responses, not errors.
#[async_trait::async_trait]
pub trait HttpClient: std::fmt::Debug + Send + Sync {
    async fn execute(
        &self,
        transport: Transport,
        request: HttpRequest,
        deadline: Instant,
    ) -> Result<HttpResponse>;
}

/// The default [HttpClient], based on `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestClient {
    insecure: reqwest::Client,
    tls: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> std::result::Result<Self, BuilderError> {
        let insecure = reqwest::Client::builder()
            .build()
            .map_err(BuilderError::transport)?;
        let tls = reqwest::Client::builder()
            .https_only(true)
            .build()
            .map_err(BuilderError::transport)?;
        Ok(Self { insecure, tls })
    }

    fn client(&self, transport: Transport) -> &reqwest::Client {
        match transport {
            Transport::Insecure => &self.insecure,
            Transport::Tls => &self.tls,
        }
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(
        &self,
        transport: Transport,
        request: HttpRequest,
        deadline: Instant,
    ) -> Result<HttpResponse> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        if timeout.is_zero() {
            return Err(errors::deadline_exceeded());
        }
        let builder = request.headers.iter().fold(
            self.client(transport)
                .request(request.method.clone(), request.url.clone())
                .timeout(timeout),
            |b, (k, v)| b.header(k.as_str(), v.as_str()),
        );
        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(errors::transport)?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(errors::transport)?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
