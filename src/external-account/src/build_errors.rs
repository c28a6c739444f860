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

//! Errors created during credentials construction.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for external account [Credentials] builders.
///
/// Construction errors are fatal: no credentials are created. Each error
/// names the offending configuration field where there is one.
///
/// [Credentials]: crate::credentials::ExternalAccountCredentials
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// A problem parsing the credentials JSON document.
    pub fn is_parsing(&self) -> bool {
        matches!(self.0, ErrorKind::Parsing(_))
    }

    /// The root of the credentials JSON document is not an object.
    pub fn is_not_an_object(&self) -> bool {
        matches!(self.0, ErrorKind::NotAnObject)
    }

    /// A required field is missing.
    pub fn is_missing_field(&self) -> bool {
        matches!(self.0, ErrorKind::MissingField(_))
    }

    /// A field is present but has the wrong JSON type.
    pub fn is_invalid_field_type(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidFieldType(_))
    }

    /// The credentials type is not `external_account`.
    pub fn is_unknown_type(&self) -> bool {
        matches!(self.0, ErrorKind::UnknownType(_))
    }

    /// The `credential_source` does not select any supported source.
    pub fn is_unsupported_credential_source(&self) -> bool {
        matches!(self.0, ErrorKind::UnsupportedCredentialSource)
    }

    /// The `credential_source` selects a source but its parameters are
    /// invalid.
    pub fn is_invalid_credential_source(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidCredentialSource(_))
    }

    /// `workforce_pool_user_project` is set for a non-workforce pool audience.
    pub fn is_workforce_pool_audience_mismatch(&self) -> bool {
        matches!(self.0, ErrorKind::WorkforcePoolAudienceMismatch)
    }

    /// The HTTP transport could not be created.
    pub fn is_transport(&self) -> bool {
        matches!(self.0, ErrorKind::Transport(_))
    }

    /// The configuration field this error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match &self.0 {
            ErrorKind::MissingField(f) | ErrorKind::InvalidFieldType(f) => Some(*f),
            ErrorKind::UnknownType(_) => Some("type"),
            ErrorKind::UnsupportedCredentialSource | ErrorKind::InvalidCredentialSource(_) => {
                Some("credential_source")
            }
            ErrorKind::WorkforcePoolAudienceMismatch => Some("workforce_pool_user_project"),
            _ => None,
        }
    }

    pub(crate) fn parsing<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Parsing(source.into()))
    }

    pub(crate) fn not_an_object() -> Error {
        Error(ErrorKind::NotAnObject)
    }

    pub(crate) fn missing_field(field: &'static str) -> Error {
        Error(ErrorKind::MissingField(field))
    }

    pub(crate) fn invalid_field_type(field: &'static str) -> Error {
        Error(ErrorKind::InvalidFieldType(field))
    }

    pub(crate) fn unknown_type<T: Into<String>>(found: T) -> Error {
        Error(ErrorKind::UnknownType(found.into()))
    }

    pub(crate) fn unsupported_credential_source() -> Error {
        Error(ErrorKind::UnsupportedCredentialSource)
    }

    pub(crate) fn invalid_credential_source<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::InvalidCredentialSource(source.into()))
    }

    pub(crate) fn workforce_pool_audience_mismatch() -> Error {
        Error(ErrorKind::WorkforcePoolAudienceMismatch)
    }

    pub(crate) fn transport<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Transport(source.into()))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("cannot parse the credentials JSON {0}")]
    Parsing(#[source] BoxError),
    #[error("invalid JSON to construct credentials, the root must be an object")]
    NotAnObject,
    #[error("{0} field not present")]
    MissingField(&'static str),
    #[error("{0} field has an invalid type")]
    InvalidFieldType(&'static str),
    #[error("invalid credentials type `{0}`, expected `external_account`")]
    UnknownType(String),
    #[error("invalid credential_source, expected one of `environment_id`, `file` or `url`")]
    UnsupportedCredentialSource,
    #[error("invalid credential_source: {0}")]
    InvalidCredentialSource(#[source] BoxError),
    #[error("workforce_pool_user_project should not be set for non-workforce pool credentials")]
    WorkforcePoolAudienceMismatch,
    #[error("cannot create the HTTP transport {0}")]
    Transport(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn constructors() {
        let error = Error::parsing("test message");
        assert!(error.is_parsing(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("test message"), "{error}");
        assert_eq!(error.field(), None);

        let error = Error::not_an_object();
        assert!(error.is_not_an_object(), "{error:?}");
        assert!(error.source().is_none(), "{error:?}");

        let error = Error::missing_field("audience");
        assert!(error.is_missing_field(), "{error:?}");
        assert!(error.source().is_none(), "{error:?}");
        assert!(error.to_string().contains("audience"), "{error}");
        assert_eq!(error.field(), Some("audience"));

        let error = Error::invalid_field_type("token_url");
        assert!(error.is_invalid_field_type(), "{error:?}");
        assert_eq!(error.field(), Some("token_url"));

        let error = Error::unknown_type("service_account");
        assert!(error.is_unknown_type(), "{error:?}");
        assert!(error.to_string().contains("service_account"), "{error}");
        assert_eq!(error.field(), Some("type"));

        let error = Error::unsupported_credential_source();
        assert!(error.is_unsupported_credential_source(), "{error:?}");
        assert_eq!(error.field(), Some("credential_source"));

        let error = Error::invalid_credential_source("bad format");
        assert!(error.is_invalid_credential_source(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("bad format"), "{error}");

        let error = Error::workforce_pool_audience_mismatch();
        assert!(error.is_workforce_pool_audience_mismatch(), "{error:?}");
        assert_eq!(error.field(), Some("workforce_pool_user_project"));

        let error = Error::transport("no tls");
        assert!(error.is_transport(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
    }
}
