//! The resource model the client operates on.
//!
//! A resource is a JSON-shaped document whose `metadata` carries its identity
//! and concurrency token. Typed resources implement [`Object`]; schema-less
//! callers use [`DynamicObject`].

use std::{collections::BTreeMap, fmt::Display};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifies a resource in the store. Immutable once an operation begins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        ObjectRef {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Whether `meta` names the same namespace and name as this reference.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.namespace == meta.namespace && self.name == meta.name
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    /// Opaque concurrency token assigned by the store on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Metadata members not modelled above, such as `uid` or `finalizers`.
    /// Kept so that writing a fetched snapshot back does not drop them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A resource snapshot that can be read from and written to the store.
///
/// Implementors serialize to a JSON object with a `metadata` field holding
/// [`ObjectMeta`], and optionally a `status` field, which the store versions
/// as an independent sub-resource.
pub trait Object: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }
}

/// A resource without a fixed schema: metadata plus arbitrary JSON fields.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DynamicObject {
    pub fn new(key: &ObjectRef) -> Self {
        let mut object = DynamicObject::default();
        object.metadata.namespace = key.namespace.clone();
        object.metadata.name = key.name.clone();
        object
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_owned(), value);
        self
    }

    pub fn status(&self) -> Option<&Value> {
        self.fields.get("status")
    }

    pub fn status_mut(&mut self) -> &mut Value {
        self.fields
            .entry("status")
            .or_insert_with(|| Value::Object(Map::new()))
    }
}

impl Object for DynamicObject {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// What a mutating operation ended up writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// Nothing differed; no write was issued.
    NoChange,
    Created,
    /// The body changed; the status did not (or was written together with it).
    Updated,
    /// Only the status sub-resource changed.
    StatusUpdated,
    UpdatedAndStatusUpdated,
}

impl Outcome {
    pub fn is_change(self) -> bool {
        self != Outcome::NoChange
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::NoChange => "unchanged",
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::StatusUpdated => "status updated",
            Outcome::UpdatedAndStatusUpdated => "updated, status updated",
        };
        f.write_str(s)
    }
}

/// The result of a mutating operation: what happened, and the snapshot as of
/// the last write (or as fetched, when nothing was written).
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<T> {
    pub outcome: Outcome,
    pub object: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dynamic_object_round_trips_unknown_fields() {
        let doc = json!({
            "metadata": {"namespace": "ns", "name": "a", "resourceVersion": "3"},
            "spec": {"replicas": 2},
            "status": {"phase": "Pending"}
        });
        let object: DynamicObject = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(object.resource_version(), Some("3"));
        assert_eq!(object.status(), Some(&json!({"phase": "Pending"})));
        assert_eq!(serde_json::to_value(&object).unwrap(), doc);
    }

    #[test]
    fn unmodelled_metadata_round_trips() {
        let doc = json!({
            "metadata": {
                "namespace": "ns",
                "name": "a",
                "uid": "u-1",
                "finalizers": ["x"],
                "labels": {"app": "w"}
            },
            "spec": {"size": 1}
        });
        let object: DynamicObject = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(object.metadata.labels["app"], "w");
        assert_eq!(object.metadata.extra["uid"], json!("u-1"));
        assert!(!object.metadata.extra.contains_key("name"));
        assert_eq!(serde_json::to_value(&object).unwrap(), doc);
    }

    #[test]
    fn metadata_omits_empty_fields() {
        let object = DynamicObject::new(&ObjectRef::new("Widget", "ns", "a"));
        assert_eq!(
            serde_json::to_value(&object).unwrap(),
            json!({"metadata": {"namespace": "ns", "name": "a"}})
        );
    }

    #[test]
    fn object_ref_matches_identity_only() {
        let key = ObjectRef::new("Widget", "ns", "a");
        let mut meta = ObjectMeta {
            namespace: "ns".to_owned(),
            name: "a".to_owned(),
            resource_version: Some("9".to_owned()),
            ..Default::default()
        };
        assert!(key.matches(&meta));
        meta.name = "b".to_owned();
        assert!(!key.matches(&meta));
        assert_eq!(key.to_string(), "Widget/ns/a");
    }
}
