use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Middleware, MiddlewareResult};
use crate::context::RequestContext;
use crate::dispatcher::HandlerResponse;

/// One validation failure reported in the `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: Some(property.into()),
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            property: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(p) => write!(f, "{p}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Field-level checks run after a body deserialized into `Self`.
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

/// The 400 response sent when validation fails.
#[must_use]
pub fn validation_failed(errors: &[FieldError]) -> HandlerResponse {
    HandlerResponse::json(400, json!({ "statusCode": 400, "errors": errors }))
}

enum Shape {
    Typed(fn(&Value) -> Result<(), Vec<FieldError>>),
    Schema(jsonschema::Validator),
}

/// Validates the request body against a shape and answers 400 on failure.
///
/// The handler never runs for an invalid body.
pub struct ValidateBody {
    name: String,
    shape: Shape,
}

fn check_typed<T: DeserializeOwned + Validate>(body: &Value) -> Result<(), Vec<FieldError>> {
    let parsed = T::deserialize(body).map_err(|e| vec![FieldError::message(e.to_string())])?;
    parsed.validate()
}

impl ValidateBody {
    /// Validate by deserializing into `T` and running its [`Validate`] checks.
    #[must_use]
    pub fn typed<T: DeserializeOwned + Validate + 'static>() -> Self {
        Self {
            name: format!("ValidateBody<{}>", std::any::type_name::<T>()),
            shape: Shape::Typed(check_typed::<T>),
        }
    }

    /// Validate against a JSON Schema. Fails when the schema itself does not compile.
    pub fn schema(schema: &Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        Ok(Self {
            name: "ValidateBody<schema>".to_string(),
            shape: Shape::Schema(validator),
        })
    }

    fn check(&self, body: &Value) -> Result<(), Vec<FieldError>> {
        match &self.shape {
            Shape::Typed(check) => check(body),
            Shape::Schema(validator) => {
                let errors: Vec<FieldError> = validator
                    .iter_errors(body)
                    .map(|e| FieldError::message(e.to_string()))
                    .collect();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(errors)
                }
            }
        }
    }
}

impl Middleware for ValidateBody {
    fn name(&self) -> &str {
        &self.name
    }

    fn before(&self, ctx: &RequestContext) -> MiddlewareResult {
        let request = ctx.request.lock();
        let empty = json!({});
        let body = if request.body.is_null() {
            &empty
        } else {
            &request.body
        };
        match self.check(body) {
            Ok(()) => Ok(None),
            Err(errors) => {
                debug!(
                    request_id = %request.request_id,
                    validator = %self.name,
                    error_count = errors.len(),
                    "Request body rejected"
                );
                Ok(Some(validation_failed(&errors)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HttpRequest;
    use http::Method;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct CreateUser {
        #[serde(default)]
        name: String,
    }

    impl Validate for CreateUser {
        fn validate(&self) -> Result<(), Vec<FieldError>> {
            if self.name.is_empty() {
                return Err(vec![FieldError::new("name", "name should not be empty")]);
            }
            Ok(())
        }
    }

    fn ctx(body: Value) -> RequestContext {
        RequestContext::new(HttpRequest::new(Method::POST, "/users").with_json(body))
    }

    #[test]
    fn test_typed_rejects_empty_name() {
        let mw = ValidateBody::typed::<CreateUser>();
        let resp = mw.before(&ctx(json!({}))).unwrap().unwrap();
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["statusCode"], 400);
        assert_eq!(resp.body["errors"][0]["property"], "name");
    }

    #[test]
    fn test_typed_accepts_valid_body() {
        let mw = ValidateBody::typed::<CreateUser>();
        assert!(mw.before(&ctx(json!({ "name": "a" }))).unwrap().is_none());
    }

    #[test]
    fn test_schema_validation() {
        let mw = ValidateBody::schema(&json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string", "minLength": 1 } }
        }))
        .unwrap();
        assert!(mw.before(&ctx(json!({ "name": "a" }))).unwrap().is_none());

        let resp = mw.before(&ctx(json!({ "name": "" }))).unwrap().unwrap();
        assert_eq!(resp.status, 400);
        assert!(!resp.body["errors"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_schema_is_reported() {
        assert!(ValidateBody::schema(&json!({ "type": 12 })).is_err());
    }
}
