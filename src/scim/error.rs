//! SCIM 2.0 Error Types
//!
//! Every failure surfaced by the filter engine, the path resolver and the
//! resource model is a [`ScimError`], the error message structure of
//! RFC 7644 Section 3.12. Callers serialize it as-is into HTTP responses.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::schema::SCHEMA_ERROR;

/// SCIM error message per RFC 7644.
///
/// `status` is the HTTP status code rendered as a string, `scimType` is
/// omitted when the error has no SCIM-specific tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{status}: {detail}")]
pub struct ScimError {
    /// SCIM schema URIs (always contains the Error schema)
    pub schemas: Vec<String>,

    /// HTTP status code as a string (e.g., "400", "404")
    pub status: String,

    /// SCIM-specific error type (optional, per RFC 7644)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scim_type: Option<ScimErrorType>,

    /// Human-readable error detail
    pub detail: String,
}

impl ScimError {
    fn new(
        status: StatusCode,
        scim_type: Option<ScimErrorType>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            schemas: vec![SCHEMA_ERROR.to_string()],
            status: status.as_u16().to_string(),
            scim_type,
            detail: detail.into(),
        }
    }

    fn bad(scim_type: ScimErrorType, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, Some(scim_type), detail)
    }

    /// Invalid or unsupported filter (400)
    pub fn invalid_filter(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::InvalidFilter, detail)
    }

    /// PATCH path is malformed or names an unknown attribute (400)
    pub fn invalid_path(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::InvalidPath, detail)
    }

    /// Request body is not parsable or violates the schema (400)
    pub fn invalid_syntax(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::InvalidSyntax, detail)
    }

    /// Path selector matched nothing, or remove without a path (400)
    pub fn no_target(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::NoTarget, detail)
    }

    /// Attempt to modify immutable or read-only attribute (400)
    pub fn mutability(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::Mutability, detail)
    }

    /// Attribute value is incompatible with its declared type (400)
    pub fn invalid_value(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::InvalidValue, detail)
    }

    /// Unsupported protocol version (400)
    pub fn invalid_vers(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::InvalidVers, detail)
    }

    /// Generic bad request without specific scimType (400)
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, None, detail)
    }

    /// Sensitive data in a request URI (403)
    pub fn sensitive(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            Some(ScimErrorType::Sensitive),
            detail,
        )
    }

    /// Resource not found (404)
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, None, detail)
    }

    /// Uniqueness constraint violation (409)
    pub fn uniqueness(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            Some(ScimErrorType::Uniqueness),
            detail,
        )
    }

    /// Too many results or too large a payload (400)
    pub fn too_many(detail: impl Into<String>) -> Self {
        Self::bad(ScimErrorType::TooMany, detail)
    }

    /// Internal server error (500)
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, None, detail)
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status.parse().unwrap_or(500))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// SCIM error types per RFC 7644 Section 3.12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScimErrorType {
    /// Filter syntax is invalid or unsupported
    InvalidFilter,

    /// PATCH path is invalid or references an unknown attribute
    InvalidPath,

    /// Request body has invalid syntax
    InvalidSyntax,

    /// PATCH path did not yield a target
    NoTarget,

    /// Attempt to modify read-only or immutable attribute
    Mutability,

    /// Uniqueness constraint violated (e.g., duplicate userName)
    Uniqueness,

    /// Attribute value is invalid for its type
    InvalidValue,

    /// Version mismatch (ETag) or unsupported protocol version
    InvalidVers,

    /// Sensitive information in the request URI
    Sensitive,

    /// Too many resources or payload too large
    TooMany,
}

impl std::fmt::Display for ScimErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ScimErrorType::InvalidFilter => "invalidFilter",
            ScimErrorType::InvalidPath => "invalidPath",
            ScimErrorType::InvalidSyntax => "invalidSyntax",
            ScimErrorType::NoTarget => "noTarget",
            ScimErrorType::Mutability => "mutability",
            ScimErrorType::Uniqueness => "uniqueness",
            ScimErrorType::InvalidValue => "invalidValue",
            ScimErrorType::InvalidVers => "invalidVers",
            ScimErrorType::Sensitive => "sensitive",
            ScimErrorType::TooMany => "tooMany",
        };
        f.write_str(tag)
    }
}

/// Result type for SCIM operations
pub type ScimResult<T> = Result<T, ScimError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_scim_error_invalid_filter() {
        let err = ScimError::invalid_filter("The filter syntax is invalid");

        assert_eq!(err.status, "400");
        assert_eq!(err.scim_type, Some(ScimErrorType::InvalidFilter));

        let json = serde_json::to_string_pretty(&err).unwrap();
        assert!(json.contains("\"scimType\": \"invalidFilter\""));
        assert!(json.contains("\"status\": \"400\""));
        assert!(json.contains(SCHEMA_ERROR));
    }

    #[test]
    fn test_scim_error_without_type_omits_tag() {
        let err = ScimError::not_found("User with id '12345' not found");

        assert_eq!(err.status, "404");
        assert_eq!(err.scim_type, None);

        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("scimType"));
    }

    #[test]
    fn test_scim_error_round_trips_wire_shape() {
        let wire = r#"{"schemas":["urn:ietf:params:scim:api:messages:2.0:Error"],"status":"400","scimType":"invalidPath","detail":"bad path"}"#;
        let err: ScimError = serde_json::from_str(wire).unwrap();
        assert_eq!(err, ScimError::invalid_path("bad path"));
        assert_eq!(serde_json::to_string(&err).unwrap(), wire);
    }

    #[rstest]
    #[case(ScimError::bad_request("x"), StatusCode::BAD_REQUEST)]
    #[case(ScimError::invalid_vers("x"), StatusCode::BAD_REQUEST)]
    #[case(ScimError::sensitive("x"), StatusCode::FORBIDDEN)]
    #[case(ScimError::not_found("x"), StatusCode::NOT_FOUND)]
    #[case(ScimError::uniqueness("x"), StatusCode::CONFLICT)]
    #[case(ScimError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_scim_error_status_code(#[case] err: ScimError, #[case] expected: StatusCode) {
        assert_eq!(err.status_code(), expected);
    }

    #[rstest]
    #[case(ScimErrorType::InvalidFilter, "invalidFilter")]
    #[case(ScimErrorType::InvalidPath, "invalidPath")]
    #[case(ScimErrorType::NoTarget, "noTarget")]
    #[case(ScimErrorType::InvalidVers, "invalidVers")]
    #[case(ScimErrorType::TooMany, "tooMany")]
    fn test_scim_error_type_display(#[case] ty: ScimErrorType, #[case] tag: &str) {
        assert_eq!(ty.to_string(), tag);
        assert_eq!(serde_json::to_value(ty).unwrap(), tag);
    }

    #[test]
    fn test_scim_error_display() {
        let err = ScimError::invalid_value("age must be an integer");
        assert_eq!(err.to_string(), "400: age must be an integer");
    }
}
