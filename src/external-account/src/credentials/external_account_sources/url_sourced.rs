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

use crate::credentials::fetch::FetchContext;
use crate::credentials::subject_token::{SubjectTokenFormat, invalid};
use crate::http::{HeaderList, HttpRequest};
use crate::{BuildResult, Result};
use http::Method;
use serde_json::{Map, Value};
use url::Url;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct UrlSourcedCredentials {
    pub url: Url,
    pub headers: HeaderList,
    pub format: SubjectTokenFormat,
}

impl UrlSourcedCredentials {
    pub(crate) fn from_json(source: &Map<String, Value>) -> BuildResult<Self> {
        let url = match source.get("url") {
            Some(Value::String(u)) => {
                Url::parse(u).map_err(|e| invalid(format!("invalid url `{u}`: {e}")))?
            }
            _ => return Err(invalid("url must be a string")),
        };
        let headers = match source.get("headers") {
            None => HeaderList::new(),
            Some(Value::Object(h)) => h
                .iter()
                .map(|(k, v)| match v {
                    Value::String(v) => Ok((k.clone(), v.clone())),
                    _ => Err(invalid(format!("header `{k}` must be a string"))),
                })
                .collect::<BuildResult<HeaderList>>()?,
            Some(_) => return Err(invalid("headers must be an object")),
        };
        Ok(Self {
            url,
            headers,
            format: SubjectTokenFormat::from_source(source)?,
        })
    }

    pub(crate) async fn subject_token(&self, ctx: &mut FetchContext<'_>) -> Result<String> {
        let request = self
            .headers
            .iter()
            .fold(HttpRequest::new(Method::GET, self.url.clone()), |r, (k, v)| {
                r.with_header(k.as_str(), v.as_str())
            });
        let response = ctx.send(request).await?;
        let content = String::from_utf8_lossy(&response.body).into_owned();
        self.format.extract(content)
    }
}
