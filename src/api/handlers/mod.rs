pub mod health;
pub mod login;
pub mod rates;
pub mod recovery;
pub mod registration;

// common functions for the handlers
use axum::{
    http::Uri,
    response::{IntoResponse, Json},
};
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, FieldError};

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

/// Success payload shared by every endpoint that returns no data.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusBody {
    #[schema(example = "ok")]
    pub status: String,
}

impl StatusBody {
    pub fn ok() -> Json<Self> {
        Json(Self {
            status: "ok".to_string(),
        })
    }
}

/// Typed request bodies report every problem at once.
pub trait Validate {
    fn validate(&self) -> Vec<FieldError>;
}

/// Decode a JSON body captured by the boundary and validate it.
///
/// # Errors
/// `InvalidInput` for malformed JSON, unknown fields or failed validation.
pub fn parse_body<T>(body: &[u8]) -> Result<T, ApiError>
where
    T: DeserializeOwned + Validate,
{
    let request: T = serde_json::from_slice(body)
        .map_err(|err| ApiError::invalid_input(format!("invalid request body: {err}")))?;
    let fields = request.validate();
    if fields.is_empty() {
        Ok(request)
    } else {
        Err(ApiError::invalid_fields(fields))
    }
}

pub(crate) fn require_field(fields: &mut Vec<FieldError>, name: &str, value: &str) {
    if value.trim().is_empty() {
        fields.push(FieldError::new(
            name,
            format!("missing required field '{name}'"),
        ));
    }
}

/// Query string parameters with required-name and unknown-name checks.
#[derive(Debug, Default)]
pub struct Params {
    pairs: Vec<(String, String)>,
    known: Vec<String>,
    errors: Vec<FieldError>,
}

impl Params {
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        Self {
            pairs,
            ..Self::default()
        }
    }

    /// First value of `name`, recording an error when it is absent.
    pub fn required(&mut self, name: &str) -> String {
        self.known.push(name.to_string());
        if let Some((_, value)) = self.pairs.iter().find(|(key, _)| key == name) {
            value.clone()
        } else {
            self.errors.push(FieldError::new(
                name,
                format!("missing required parameter '{name}'"),
            ));
            String::new()
        }
    }

    /// # Errors
    /// `InvalidInput` listing missing and unknown parameters.
    pub fn finish(mut self) -> Result<(), ApiError> {
        for (key, _) in &self.pairs {
            let reported = self.errors.iter().any(|error| &error.field == key);
            if !self.known.contains(key) && !reported {
                self.errors.push(FieldError::new(
                    key.as_str(),
                    format!("unknown parameter '{key}'"),
                ));
            }
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid_fields(self.errors))
        }
    }
}

// axum fallback for unknown routes
pub async fn not_found(uri: Uri) -> impl IntoResponse {
    tracing::debug!("no route for {uri}");
    ApiError::NotFound("page not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn email_format() {
        assert!(valid_email("user@example.com"));
        assert!(valid_email("first.last+tag@mail.example.co.il"));
        assert!(!valid_email("user@localhost"));
        assert!(!valid_email("user example.com"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn params_collect_required_values() {
        let mut params = Params::parse(Some("Email=user%40example.com&Code=0417"));
        assert_eq!(params.required("Email"), "user@example.com");
        assert_eq!(params.required("Code"), "0417");
        assert!(params.finish().is_ok());
    }

    #[test]
    fn params_report_missing_and_unknown() {
        let mut params = Params::parse(Some("Code=0417&Foo=bar"));
        let _ = params.required("Email");
        let _ = params.required("Code");
        match params.finish() {
            Err(ApiError::InvalidInput { message, fields }) => {
                assert_eq!(
                    message,
                    "missing required parameter 'Email'; unknown parameter 'Foo'"
                );
                assert_eq!(fields.len(), 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn params_without_query() {
        let mut params = Params::parse(None);
        assert_eq!(params.required("Email"), "");
        assert!(params.finish().is_err());
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Login {
        #[serde(rename = "Email", alias = "email", default)]
        email: String,
    }

    impl Validate for Login {
        fn validate(&self) -> Vec<FieldError> {
            let mut fields = Vec::new();
            require_field(&mut fields, "Email", &self.email);
            fields
        }
    }

    #[test]
    fn body_accepts_original_and_lowercase_names() -> Result<(), ApiError> {
        let body: Login = parse_body(br#"{"Email":"a@b.co"}"#)?;
        assert_eq!(body.email, "a@b.co");
        let body: Login = parse_body(br#"{"email":"a@b.co"}"#)?;
        assert_eq!(body.email, "a@b.co");
        Ok(())
    }

    #[test]
    fn body_rejects_unknown_fields_and_garbage() {
        assert!(matches!(
            parse_body::<Login>(br#"{"Email":"a@b.co","Admin":true}"#),
            Err(ApiError::InvalidInput { .. })
        ));
        assert!(matches!(
            parse_body::<Login>(b"not json"),
            Err(ApiError::InvalidInput { .. })
        ));
    }

    #[test]
    fn body_reports_missing_fields() {
        match parse_body::<Login>(b"{}") {
            Err(ApiError::InvalidInput { fields, .. }) => {
                assert_eq!(fields, vec![FieldError::new("Email", "missing required field 'Email'")]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
