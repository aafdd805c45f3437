//! Field filters for search.
//!
//! A filter names a field with `k` and optionally constrains it with `eq`,
//! `gt` and `lt`. Constraints are ANDed. A filter without constraints only
//! requires the field to exist. Arrays anywhere along the path fan out, so
//! `{"k": "val.tags", "eq": "x"}` matches when any tag equals `"x"`.

use crate::error::{Result, StoreError};
use crate::types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::cmp::Ordering;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub k: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Json>,
}

/// Which part of a document a filter reads.
enum FieldRef<'a> {
    Id,
    Version,
    Val(Vec<&'a str>),
}

impl Filter {
    pub fn new(k: impl Into<String>) -> Self {
        Self {
            k: k.into(),
            ..Default::default()
        }
    }

    pub fn eq(mut self, value: Json) -> Self {
        self.eq = Some(value);
        self
    }

    pub fn gt(mut self, value: Json) -> Self {
        self.gt = Some(value);
        self
    }

    pub fn lt(mut self, value: Json) -> Self {
        self.lt = Some(value);
        self
    }

    /// Whether this filter needs the decoded document value.
    pub(crate) fn reads_val(&self) -> bool {
        matches!(self.field(), Ok(FieldRef::Val(_)))
    }

    pub fn validate(&self) -> Result<()> {
        self.field()?;
        for bound in [&self.gt, &self.lt].into_iter().flatten() {
            if !matches!(bound, Json::Number(_) | Json::String(_)) {
                return Err(StoreError::Validation(format!(
                    "filter on '{}': gt/lt need a number or string, got {}",
                    self.k, bound
                )));
            }
        }
        Ok(())
    }

    fn field(&self) -> Result<FieldRef<'_>> {
        match self.k.as_str() {
            "id" => Ok(FieldRef::Id),
            "version" => Ok(FieldRef::Version),
            "val" => Ok(FieldRef::Val(Vec::new())),
            k => match k.strip_prefix("val.") {
                Some(path) if path.split('.').all(|s| !s.is_empty()) => {
                    Ok(FieldRef::Val(path.split('.').collect()))
                }
                _ => Err(StoreError::Validation(format!("invalid filter key: '{}'", k))),
            },
        }
    }

    /// `val` is the decoded document value; required only if [`reads_val`].
    ///
    /// [`reads_val`]: Filter::reads_val
    pub fn matches(&self, document: &Document, val: Option<&Json>) -> bool {
        let candidates = match self.field() {
            Ok(FieldRef::Id) => vec![Json::String(document.id.clone())],
            Ok(FieldRef::Version) => vec![Json::from(document.version)],
            Ok(FieldRef::Val(path)) => match val {
                Some(val) => {
                    let mut out = Vec::new();
                    collect(val, &path, &mut out);
                    out.into_iter().cloned().collect()
                }
                None => return false,
            },
            Err(_) => return false,
        };

        candidates.iter().any(|c| self.accepts(c))
    }

    fn accepts(&self, candidate: &Json) -> bool {
        if let Some(eq) = &self.eq {
            if compare(candidate, eq) != Some(Ordering::Equal) && candidate != eq {
                return false;
            }
        }
        if let Some(gt) = &self.gt {
            if compare(candidate, gt) != Some(Ordering::Greater) {
                return false;
            }
        }
        if let Some(lt) = &self.lt {
            if compare(candidate, lt) != Some(Ordering::Less) {
                return false;
            }
        }
        true
    }
}

/// Leaf values at `path`, with arrays flattened at every level.
fn collect<'v>(value: &'v Json, path: &[&str], out: &mut Vec<&'v Json>) {
    match value {
        Json::Array(items) => {
            for item in items {
                collect(item, path, out);
            }
        }
        Json::Object(map) if !path.is_empty() => {
            if let Some(next) = map.get(path[0]) {
                collect(next, &path[1..], out);
            }
        }
        _ if path.is_empty() => out.push(value),
        _ => {}
    }
}

/// Numbers compare numerically, strings lexically. Anything else is
/// incomparable.
fn compare(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Timestamp, Value};
    use serde_json::json;

    fn doc(id: &str, val: Json) -> (Document, Json) {
        let document = Document {
            model: "SearchTest".into(),
            id: id.into(),
            version: 3,
            val: Value::json(&val).unwrap(),
            created: Timestamp(0),
            updated: Timestamp(0),
        };
        (document, val)
    }

    #[test]
    fn test_filter_wire_shape() {
        let filter: Filter = serde_json::from_value(json!({"k": "val.count", "gt": 10})).unwrap();
        assert_eq!(filter, Filter::new("val.count").gt(json!(10)));
        assert_eq!(
            serde_json::to_value(Filter::new("id").eq(json!("a"))).unwrap(),
            json!({"k": "id", "eq": "a"})
        );
    }

    #[test]
    fn test_nested_and_array_fields() {
        let (d, v) = doc("doc1", json!({"tags": ["tag1", "tag2"], "meta": {"owner": "ann"}, "items": [{"sku": "A"}, {"sku": "B"}]}));

        assert!(Filter::new("val.tags").eq(json!("tag2")).matches(&d, Some(&v)));
        assert!(!Filter::new("val.tags").eq(json!("tag3")).matches(&d, Some(&v)));
        assert!(Filter::new("val.meta.owner").eq(json!("ann")).matches(&d, Some(&v)));
        assert!(Filter::new("val.items.sku").eq(json!("B")).matches(&d, Some(&v)));
        assert!(Filter::new("val.meta").matches(&d, Some(&v)));
        assert!(!Filter::new("val.missing").matches(&d, Some(&v)));
    }

    #[test]
    fn test_range_constraints() {
        let (d, v) = doc("doc2", json!({"count": 20, "name": "Document 2"}));

        assert!(Filter::new("val.count").gt(json!(10)).lt(json!(30)).matches(&d, Some(&v)));
        assert!(!Filter::new("val.count").gt(json!(20)).matches(&d, Some(&v)));
        assert!(Filter::new("val.count").eq(json!(20.0)).matches(&d, Some(&v)));
        assert!(Filter::new("val.name").gt(json!("Document 1")).matches(&d, Some(&v)));
        assert!(!Filter::new("val.name").gt(json!(1)).matches(&d, Some(&v)));
    }

    #[test]
    fn test_metadata_fields() {
        let (d, _) = doc("doc3", json!({}));

        assert!(Filter::new("id").eq(json!("doc3")).matches(&d, None));
        assert!(Filter::new("version").gt(json!(2)).matches(&d, None));
        assert!(!Filter::new("version").lt(json!(3)).matches(&d, None));
    }

    #[test]
    fn test_invalid_filters() {
        assert!(Filter::new("name").validate().is_err());
        assert!(Filter::new("val.").validate().is_err());
        assert!(Filter::new("val.a..b").validate().is_err());
        assert!(Filter::new("val.a").gt(json!([1])).validate().is_err());
        assert!(Filter::new("val.a.b").eq(json!({"x": 1})).validate().is_ok());
    }
}
