//! Application and Component kinds
//!
//! An Application declares a set of named components; each declaration is
//! mirrored into a standalone Component object owned by the Application.

use crate::condition::Condition;
use crate::impl_resource;
use crate::meta::ObjectMeta;
use crate::resource::KEEL_API_VERSION;
use crate::values::ComponentValues;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Composite application declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ApplicationSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
}

impl_resource!(Application, "Application", KEEL_API_VERSION);

impl Application {
    /// Component names declared more than once, in declaration order
    pub fn duplicate_component_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for template in &self.spec.components {
            let name = &template.metadata.name;
            if !seen.insert(name.as_str()) && !duplicates.contains(name) {
                duplicates.push(name.clone());
            }
        }
        duplicates
    }

    pub fn component(&self, name: &str) -> Option<&ComponentTemplate> {
        self.spec.components.iter().find(|c| c.metadata.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    #[serde(default)]
    pub components: Vec<ComponentTemplate>,
}

/// One declared component inside an Application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTemplate {
    pub metadata: TemplateMeta,
    pub spec: ComponentSpec,
}

/// Metadata a template passes on to its Component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Deployable unit description shared by templates and Components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub component_type: String,

    /// Packaged-manifest template repository
    pub repo_ref: String,

    pub tag: String,

    #[serde(default)]
    pub values: ComponentValues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub components: Vec<ComponentStatusSummary>,

    #[serde(default)]
    pub ready_components: u32,

    #[serde(default)]
    pub total_components: u32,

    #[serde(default)]
    pub observed_generation: u64,
}

/// Per-component line in the Application status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatusSummary {
    pub name: String,

    #[serde(rename = "type")]
    pub component_type: String,

    pub reason: String,
}

/// Standalone mirror of one ComponentTemplate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub metadata: ObjectMeta,

    pub spec: ComponentSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ComponentStatus>,
}

impl_resource!(Component, "Component", KEEL_API_VERSION);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(name: &str) -> ComponentTemplate {
        ComponentTemplate {
            metadata: TemplateMeta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: ComponentSpec {
                component_type: "webservice".to_string(),
                repo_ref: "registry/web".to_string(),
                tag: "v1".to_string(),
                values: ComponentValues::default(),
            },
        }
    }

    #[test]
    fn test_duplicate_component_names() {
        let app = Application {
            metadata: ObjectMeta::new("default", "app1"),
            spec: ApplicationSpec {
                components: vec![template("web"), template("db"), template("web"), template("web")],
            },
            status: None,
        };

        assert_eq!(app.duplicate_component_names(), vec!["web".to_string()]);
        assert!(app.component("db").is_some());
        assert!(app.component("cache").is_none());
    }

    #[test]
    fn test_application_wire_format() {
        let app: Application = serde_json::from_value(json!({
            "metadata": {"name": "app1", "namespace": "default"},
            "spec": {"components": [{
                "metadata": {"name": "web", "labels": {"tier": "frontend"}},
                "spec": {"type": "webservice", "repoRef": "registry/web", "tag": "v1", "values": {}}
            }]}
        }))
        .unwrap();

        let web = &app.spec.components[0];
        assert_eq!(web.spec.component_type, "webservice");
        assert_eq!(web.spec.repo_ref, "registry/web");
        assert_eq!(web.metadata.labels["tier"], "frontend");
    }

    #[test]
    fn test_status_counts_serialize_camel_case() {
        let status = ApplicationStatus {
            ready_components: 1,
            total_components: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["readyComponents"], 1);
        assert_eq!(json["totalComponents"], 2);
    }
}
