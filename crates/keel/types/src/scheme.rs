//! Kind registration table
//!
//! The scheme maps kind names to their API version, scope and a validating
//! decoder. It is assembled once at startup through [`SchemeBuilder`] and is
//! read-only afterwards; share it as `Arc<Scheme>`.

use crate::application::{Application, Component};
use crate::error::{SchemeError, SchemeResult};
use crate::resource::{DynamicObject, Resource};
use crate::workflow::{ActionDefinition, Workflow, WorkflowRun};
use crate::workload::{Exposure, Workload};
use std::collections::BTreeMap;

type Validator = fn(&DynamicObject) -> Result<(), serde_json::Error>;

/// Registration entry for one kind
#[derive(Clone)]
pub struct KindInfo {
    pub kind: &'static str,
    pub api_version: &'static str,
    pub namespaced: bool,
    validator: Validator,
}

impl std::fmt::Debug for KindInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindInfo")
            .field("kind", &self.kind)
            .field("api_version", &self.api_version)
            .field("namespaced", &self.namespaced)
            .finish()
    }
}

fn validate_as<K: Resource>(object: &DynamicObject) -> Result<(), serde_json::Error> {
    K::from_dynamic(object.clone()).map(|_| ())
}

/// Builder for an immutable [`Scheme`]
#[derive(Debug, Default)]
pub struct SchemeBuilder {
    kinds: BTreeMap<&'static str, KindInfo>,
}

impl SchemeBuilder {
    pub fn register<K: Resource>(mut self) -> Self {
        self.kinds.insert(
            K::KIND,
            KindInfo {
                kind: K::KIND,
                api_version: K::API_VERSION,
                namespaced: K::NAMESPACED,
                validator: validate_as::<K>,
            },
        );
        self
    }

    pub fn build(self) -> Scheme {
        Scheme { kinds: self.kinds }
    }
}

/// Immutable kind registry
#[derive(Debug, Default)]
pub struct Scheme {
    kinds: BTreeMap<&'static str, KindInfo>,
}

impl Scheme {
    pub fn builder() -> SchemeBuilder {
        SchemeBuilder::default()
    }

    /// Every kind the control plane reads or writes
    pub fn platform() -> Self {
        Self::builder()
            .register::<Application>()
            .register::<Component>()
            .register::<Workflow>()
            .register::<WorkflowRun>()
            .register::<ActionDefinition>()
            .register::<Workload>()
            .register::<Exposure>()
            .build()
    }

    pub fn lookup(&self, kind: &str) -> Option<&KindInfo> {
        self.kinds.get(kind)
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &KindInfo> {
        self.kinds.values()
    }

    /// Check identity fields and, for registered kinds, that the object
    /// decodes into its typed form. Unregistered kinds only need a name.
    pub fn validate(&self, object: &DynamicObject) -> SchemeResult<()> {
        if object.metadata.name.is_empty() {
            return Err(SchemeError::MissingName {
                kind: object.kind.clone(),
            });
        }

        let Some(info) = self.lookup(&object.kind) else {
            return Ok(());
        };

        if object.api_version != info.api_version {
            return Err(SchemeError::ApiVersionMismatch {
                kind: object.kind.clone(),
                expected: info.api_version.to_string(),
                found: object.api_version.clone(),
            });
        }

        if info.namespaced && object.metadata.namespace.is_empty() {
            return Err(SchemeError::MissingNamespace {
                kind: object.kind.clone(),
                name: object.metadata.name.clone(),
            });
        }

        (info.validator)(object).map_err(|source| SchemeError::Decode {
            kind: object.kind.clone(),
            source,
        })
    }

    /// Decode a dynamic object into a registered typed kind
    pub fn decode<K: Resource>(&self, object: DynamicObject) -> SchemeResult<K> {
        if !self.is_registered(K::KIND) {
            return Err(SchemeError::UnknownKind(K::KIND.to_string()));
        }
        if object.kind != K::KIND {
            return Err(SchemeError::KindMismatch {
                expected: K::KIND.to_string(),
                found: object.kind,
            });
        }
        K::from_dynamic(object).map_err(|source| SchemeError::Decode {
            kind: K::KIND.to_string(),
            source,
        })
    }
}
