//! Typed and dynamic resource representations
//!
//! Every stored object travels through the client facade as a [`DynamicObject`].
//! Typed kinds implement [`Resource`] and convert losslessly to and from it.

use crate::meta::{ObjectKey, ObjectMeta, OwnerReference};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// API group/version shared by all Keel custom kinds
pub const KEEL_API_VERSION: &str = "keel.dev/v1alpha1";

/// A typed resource kind
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind name as stored on the wire
    const KIND: &'static str;

    /// API group/version
    const API_VERSION: &'static str;

    /// Whether objects of this kind live in a namespace
    const NAMESPACED: bool = true;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    /// Controller owner reference pointing at this object.
    ///
    /// Returns `None` until the store has assigned a uid.
    fn controller_reference(&self) -> Option<OwnerReference> {
        let meta = self.meta();
        meta.uid.as_ref().map(|uid| OwnerReference {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            name: meta.name.clone(),
            uid: uid.clone(),
            controller: true,
            block_owner_deletion: true,
        })
    }

    fn to_dynamic(&self) -> Result<DynamicObject, serde_json::Error> {
        let Value::Object(mut data) = serde_json::to_value(self)? else {
            return Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "{} did not serialize to an object",
                Self::KIND
            )));
        };
        data.remove("metadata");
        Ok(DynamicObject {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            metadata: self.meta().clone(),
            data,
        })
    }

    fn from_dynamic(object: DynamicObject) -> Result<Self, serde_json::Error> {
        let mut data = object.data;
        data.insert("metadata".to_string(), serde_json::to_value(&object.metadata)?);
        serde_json::from_value(Value::Object(data))
    }
}

/// Untyped object: identity plus arbitrary top-level fields (`spec`, `status`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, metadata: ObjectMeta) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata,
            data: Map::new(),
        }
    }

    /// Builder-style top-level field insertion
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn status(&self) -> Option<&Value> {
        self.data.get("status")
    }

    /// Everything except `metadata` and `status`; the portion a writer owns.
    pub fn content(&self) -> Value {
        let mut content = self.data.clone();
        content.remove("status");
        content.insert("apiVersion".to_string(), Value::String(self.api_version.clone()));
        content.insert("kind".to_string(), Value::String(self.kind.clone()));
        Value::Object(content)
    }
}

/// Implements [`Resource`] for a struct with a `metadata: ObjectMeta` field.
#[macro_export]
macro_rules! impl_resource {
    ($ty:ty, $kind:expr, $api_version:expr) => {
        impl $crate::resource::Resource for $ty {
            const KIND: &'static str = $kind;
            const API_VERSION: &'static str = $api_version;

            fn meta(&self) -> &$crate::meta::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut $crate::meta::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Workflow, WorkflowSpec};
    use serde_json::json;

    #[test]
    fn test_dynamic_round_trip_keeps_type_meta() {
        let workflow = Workflow {
            metadata: ObjectMeta::new("default", "deploy"),
            spec: WorkflowSpec::default(),
        };

        let dynamic = workflow.to_dynamic().unwrap();
        assert_eq!(dynamic.kind, "Workflow");
        assert_eq!(dynamic.api_version, KEEL_API_VERSION);
        assert!(dynamic.data.get("metadata").is_none());

        let back = Workflow::from_dynamic(dynamic).unwrap();
        assert_eq!(back.metadata.name, "deploy");
    }

    #[test]
    fn test_dynamic_object_flattens_fields() {
        let object = DynamicObject::new("v1", "ConfigMap", ObjectMeta::new("default", "settings"))
            .with_field("data", json!({"mode": "fast"}));

        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["data"]["mode"], "fast");

        let parsed: DynamicObject = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, object);
    }

    #[test]
    fn test_controller_reference_requires_uid() {
        let mut workflow = Workflow {
            metadata: ObjectMeta::new("default", "deploy"),
            spec: WorkflowSpec::default(),
        };
        assert!(workflow.controller_reference().is_none());

        workflow.metadata.uid = Some("abc".to_string());
        let reference = workflow.controller_reference().unwrap();
        assert!(reference.controller);
        assert!(reference.block_owner_deletion);
        assert_eq!(reference.kind, "Workflow");
    }

    #[test]
    fn test_content_excludes_status() {
        let object = DynamicObject::new("v1", "ConfigMap", ObjectMeta::new("default", "settings"))
            .with_field("spec", json!({"a": 1}))
            .with_field("status", json!({"ready": true}));

        let content = object.content();
        assert!(content.get("status").is_none());
        assert_eq!(content["spec"]["a"], 1);
        assert_eq!(content["kind"], "ConfigMap");
    }
}
