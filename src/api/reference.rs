//! Related-record references in request payloads.

use super::{
    error::{ApiError, ApiResult},
    API_PREFIX,
};
use crate::model::Id;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Resource URI of a record, e.g. `/api/v1/categories/3/`.
#[must_use]
pub fn resource_uri(resource: &str, id: Id) -> String {
    format!("{API_PREFIX}/{resource}/{id}/")
}

/// A reference to a related record: a bare id, a numeric string, a resource
/// URI, or an object carrying `id` or `resource_uri`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    Id(Id),
    Text(String),
    Object(Map<String, Value>),
}

impl Reference {
    /// Resolves the referenced id, checking URIs point at `resource`.
    ///
    /// # Errors
    /// A validation error on `field` when the reference cannot be resolved.
    pub fn id(&self, resource: &str, field: &str) -> ApiResult<Id> {
        let invalid = || {
            ApiError::validation(
                field,
                format!("Could not resolve a {resource} reference from {self}."),
            )
        };

        match self {
            Self::Id(id) => Ok(*id),
            Self::Text(text) => {
                if let Ok(id) = text.trim().parse() {
                    return Ok(id);
                }
                let prefix = format!("{API_PREFIX}/{resource}/");
                text.strip_prefix(&prefix)
                    .map(|rest| rest.trim_end_matches('/'))
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(invalid)
            }
            Self::Object(object) => {
                let nested = object
                    .get("id")
                    .or_else(|| object.get("resource_uri"))
                    .ok_or_else(invalid)?;
                serde_json::from_value::<Self>(nested.clone())
                    .map_err(|_| invalid())?
                    .id(resource, field)
            }
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Text(text) => write!(f, "'{text}'"),
            Self::Object(object) => write!(f, "{}", Value::Object(object.clone())),
        }
    }
}

/// Resolves a list of references to ids.
///
/// # Errors
/// The first unresolvable reference.
pub fn ids(references: &[Reference], resource: &str, field: &str) -> ApiResult<Vec<Id>> {
    references
        .iter()
        .map(|reference| reference.id(resource, field))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(value: Value) -> Reference {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_ids_uris_and_objects() {
        assert_eq!(reference(json!(3)).id("categories", "category").unwrap(), 3);
        assert_eq!(reference(json!("3")).id("categories", "category").unwrap(), 3);
        assert_eq!(
            reference(json!("/api/v1/categories/3/"))
                .id("categories", "category")
                .unwrap(),
            3
        );
        assert_eq!(
            reference(json!({"resource_uri": "/api/v1/categories/3/"}))
                .id("categories", "category")
                .unwrap(),
            3
        );
        assert_eq!(
            reference(json!({"id": "3", "name": "OS"}))
                .id("categories", "category")
                .unwrap(),
            3
        );
    }

    #[test]
    fn rejects_uris_of_other_resources() {
        let err = reference(json!("/api/v1/profiles/3/"))
            .id("categories", "category")
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation { field, .. } if field == "category"));
        assert!(serde_json::from_value::<Reference>(json!(true)).is_err());
    }
}
