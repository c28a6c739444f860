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

use crate::credentials::subject_token::{SubjectTokenFormat, invalid};
use crate::errors::{CredentialsError, ErrorKind};
use crate::{BuildResult, Result};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FileSourcedCredentials {
    pub file: String,
    pub format: SubjectTokenFormat,
}

impl FileSourcedCredentials {
    pub(crate) fn from_json(source: &Map<String, Value>) -> BuildResult<Self> {
        let file = match source.get("file") {
            Some(Value::String(f)) => f.clone(),
            _ => return Err(invalid("file must be a string")),
        };
        Ok(Self {
            file,
            format: SubjectTokenFormat::from_source(source)?,
        })
    }

    pub(crate) async fn subject_token(&self) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.file)
            .await
            .map_err(|e| CredentialsError::from_source(ErrorKind::SubjectToken, false, e))?;
        self.format.extract(content)
    }
}
