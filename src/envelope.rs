// 📦 Response Envelope - { hasErrors, errors, info: { count, ... }, result }
//
// On success info.count == result.len(). On error result is empty.

use crate::error::{CatalogError, CatalogResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub has_errors: bool,
    pub errors: Vec<Value>,
    pub info: Map<String, Value>,
    pub result: Vec<Value>,
}

impl Envelope {
    pub fn success(result: Vec<Value>) -> Self {
        let mut info = Map::new();
        info.insert("count".into(), result.len().into());
        Envelope {
            has_errors: false,
            errors: Vec::new(),
            info,
            result,
        }
    }

    pub fn from_items<T: Serialize>(items: &[T]) -> CatalogResult<Self> {
        let result = items
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::success(result))
    }

    pub fn from_item<T: Serialize>(item: &T) -> CatalogResult<Self> {
        Ok(Self::success(vec![serde_json::to_value(item)?]))
    }

    pub fn error(err: &CatalogError) -> Self {
        let mut info = Map::new();
        info.insert("count".into(), 0.into());
        Envelope {
            has_errors: true,
            errors: err.to_messages(),
            info,
            result: Vec::new(),
        }
    }

    /// Add an extra `info` field. `count` is owned by the envelope and cannot
    /// be overridden.
    pub fn with_info(mut self, key: &str, value: impl Serialize) -> Self {
        if key == "count" {
            return self;
        }
        if let Ok(value) = serde_json::to_value(value) {
            self.info.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_path(self, path: &str) -> Self {
        self.with_info("path", path)
    }

    pub fn count(&self) -> usize {
        self.info
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_count_matches_result() {
        let env = Envelope::success(vec![json!({"a": 1}), json!({"a": 2})])
            .with_info("count", 99)
            .with_info("updated", 1);
        assert!(!env.has_errors);
        assert_eq!(env.count(), 2);
        assert_eq!(env.info["updated"], 1);
    }

    #[test]
    fn test_error_envelope_is_empty() {
        let env = Envelope::error(&CatalogError::not_found("No locales found."))
            .with_path("/api/1/locales/single");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["hasErrors"], true);
        assert_eq!(json["result"], json!([]));
        assert_eq!(json["info"]["count"], 0);
        assert_eq!(json["info"]["path"], "/api/1/locales/single");
        assert_eq!(json["errors"][0]["message"], "No locales found.");
        assert_eq!(json["errors"][0]["code"], "not_found");
    }
}
