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

//! Service account impersonation with the token exchange result.

use crate::Result;
use crate::constants::{BEARER_TOKEN_TYPE, FORM_URLENCODED};
use crate::encoding::form_body;
use crate::errors::{CredentialsError, ErrorKind};
use crate::http::{HttpRequest, HttpResponse, MetadataResponse};
use http::Method;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

/// The token returned to callers after impersonation.
#[derive(Debug, PartialEq, Serialize)]
struct NormalizedToken {
    access_token: String,
    expires_in: i64,
    token_type: &'static str,
}

fn parse_object(body: &[u8], kind: ErrorKind) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CredentialsError::from_msg(
            kind,
            false,
            format!("expected a JSON object, got <{other}>"),
        )),
        Err(e) => Err(CredentialsError::from_source(kind, false, e)),
    }
}

fn string_field<'a>(map: &'a Map<String, Value>, name: &str, kind: ErrorKind) -> Result<&'a str> {
    match map.get(name) {
        Some(Value::String(s)) => Ok(s.as_str()),
        None => Err(CredentialsError::from_msg(
            kind,
            false,
            format!("missing `{name}` field in response"),
        )),
        Some(_) => Err(CredentialsError::from_msg(
            kind,
            false,
            format!("`{name}` field in response must be a string"),
        )),
    }
}

/// Builds the impersonation request from the token exchange response.
pub(crate) fn build_request(
    url: &str,
    exchange_response: &HttpResponse,
    scopes: &[String],
) -> Result<HttpRequest> {
    let exchange = parse_object(&exchange_response.body, ErrorKind::InvalidExchangeResponse)?;
    let access_token = string_field(&exchange, "access_token", ErrorKind::MissingAccessToken)?;
    let url = Url::parse(url)
        .map_err(|e| CredentialsError::from_source(ErrorKind::InvalidUrl, false, e))?;

    let scope = scopes.join(" ");
    Ok(HttpRequest::new(Method::POST, url)
        .with_header(CONTENT_TYPE.as_str(), FORM_URLENCODED)
        .with_header(
            AUTHORIZATION.as_str(),
            format!("{BEARER_TOKEN_TYPE} {access_token}"),
        )
        .with_body(form_body([("scope", scope.as_str())])))
}

/// Converts the impersonation response into the normalized token result.
///
/// `expires_in` is computed relative to `now` and is negative if the token is
/// already expired.
pub(crate) fn parse_response(
    response: HttpResponse,
    now: OffsetDateTime,
) -> Result<MetadataResponse> {
    let body = parse_object(&response.body, ErrorKind::InvalidImpersonationResponse)?;
    let access_token = string_field(&body, "accessToken", ErrorKind::MissingAccessToken)?;
    let expire_time = string_field(&body, "expireTime", ErrorKind::MissingExpireTime)?;
    let expire_time =
        OffsetDateTime::parse(expire_time, &time::format_description::well_known::Rfc3339)
            .map_err(|e| CredentialsError::from_source(ErrorKind::InvalidExpireTime, false, e))?;

    let token = NormalizedToken {
        access_token: access_token.to_string(),
        expires_in: (expire_time - now).whole_seconds(),
        token_type: BEARER_TOKEN_TYPE,
    };
    let body = serde_json::to_vec(&token).map_err(|e| {
        CredentialsError::from_source(ErrorKind::InvalidImpersonationResponse, false, e)
    })?;
    Ok(MetadataResponse {
        status: response.status,
        headers: response.headers,
        body: body.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::json_response;
    use http::StatusCode;
    use serde_json::json;
    use test_case::test_case;

    type TestResult = anyhow::Result<()>;

    fn datetime(s: &str) -> OffsetDateTime {
        OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339).unwrap()
    }

    const IMPERSONATION_URL: &str = "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/sa@project.iam.gserviceaccount.com:generateAccessToken";

    #[test]
    fn request() -> TestResult {
        let exchange = json_response(r#"{"access_token":"intermediate-tok","expires_in":3600}"#);
        let scopes = vec!["scope1".to_string(), "scope2".to_string()];
        let request = build_request(IMPERSONATION_URL, &exchange, &scopes)?;
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.as_str(), IMPERSONATION_URL);
        assert_eq!(request.header("content-type"), Some(FORM_URLENCODED));
        assert_eq!(
            request.header("authorization"),
            Some("Bearer intermediate-tok")
        );
        assert_eq!(request.body, "scope=scope1%20scope2");
        Ok(())
    }

    #[test_case("not json"; "not json")]
    #[test_case("[1, 2]"; "array")]
    #[test_case("\"token\""; "string")]
    fn request_invalid_exchange_response(body: &str) {
        let err = build_request(IMPERSONATION_URL, &json_response(body), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidExchangeResponse, "{err:?}");
    }

    #[test_case("{}"; "missing")]
    #[test_case(r#"{"access_token":42}"#; "not a string")]
    fn request_missing_access_token(body: &str) {
        let err = build_request(IMPERSONATION_URL, &json_response(body), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingAccessToken, "{err:?}");
    }

    #[test]
    fn request_invalid_url() {
        let exchange = json_response(r#"{"access_token":"intermediate-tok"}"#);
        let err = build_request("not a url", &exchange, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUrl, "{err:?}");
    }

    #[test]
    fn response() -> TestResult {
        let mut impersonation =
            json_response(r#"{"accessToken":"final-tok","expireTime":"2030-01-01T00:00:00Z"}"#);
        impersonation
            .headers
            .push(("x-test".to_string(), "test-value".to_string()));
        let now = datetime("2029-12-31T23:00:00Z");
        let got = parse_response(impersonation, now)?;
        assert_eq!(got.status, StatusCode::OK);
        assert_eq!(got.header("x-test"), Some("test-value"));
        assert_eq!(got.header("content-type"), Some("application/json"));
        let body: Value = serde_json::from_slice(&got.body)?;
        assert_eq!(
            body,
            json!({"access_token": "final-tok", "expires_in": 3600, "token_type": "Bearer"})
        );
        Ok(())
    }

    #[test]
    fn response_fractional_seconds() -> TestResult {
        let impersonation = json_response(
            r#"{"accessToken":"final-tok","expireTime":"2024-01-02T15:04:05.999Z"}"#,
        );
        let now = datetime("2024-01-02T15:04:00Z");
        let got = parse_response(impersonation, now)?;
        let body: Value = serde_json::from_slice(&got.body)?;
        assert_eq!(body["expires_in"], 5);
        Ok(())
    }

    #[test]
    fn response_already_expired() -> TestResult {
        let impersonation =
            json_response(r#"{"accessToken":"final-tok","expireTime":"2024-01-01T00:00:00Z"}"#);
        let now = datetime("2024-01-01T00:10:00Z");
        let got = parse_response(impersonation, now)?;
        let body: Value = serde_json::from_slice(&got.body)?;
        assert_eq!(body["expires_in"], -600);
        Ok(())
    }

    #[test_case("not json", ErrorKind::InvalidImpersonationResponse; "not json")]
    #[test_case("[]", ErrorKind::InvalidImpersonationResponse; "array")]
    #[test_case(r#"{"expireTime":"2030-01-01T00:00:00Z"}"#, ErrorKind::MissingAccessToken; "missing access token")]
    #[test_case(r#"{"accessToken":1,"expireTime":"2030-01-01T00:00:00Z"}"#, ErrorKind::MissingAccessToken; "access token not a string")]
    #[test_case(r#"{"accessToken":"final-tok"}"#, ErrorKind::MissingExpireTime; "missing expire time")]
    #[test_case(r#"{"accessToken":"final-tok","expireTime":1893456000}"#, ErrorKind::MissingExpireTime; "expire time not a string")]
    #[test_case(r#"{"accessToken":"final-tok","expireTime":"invalid-format"}"#, ErrorKind::InvalidExpireTime; "invalid expire time")]
    #[test_case(r#"{"accessToken":"final-tok","expireTime":"2030-01-01"}"#, ErrorKind::InvalidExpireTime; "date only")]
    fn response_errors(body: &str, want: ErrorKind) {
        let now = OffsetDateTime::now_utc();
        let err = parse_response(json_response(body), now).unwrap_err();
        assert_eq!(err.kind(), want, "{err:?}");
        assert!(err.is_protocol(), "{err:?}");
    }
}
