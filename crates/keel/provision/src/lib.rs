//! Keel Provision - module provisioning adapter
//!
//! Turns a template reference, tag and value map into concrete objects and
//! applies them to the cluster:
//!
//! - **ModuleProvisioner**: the `render` / `apply` capability the workflow
//!   engine consumes; any implementation honouring it is substitutable
//! - **ManifestCatalog**: static manifest store with `${path}` placeholders
//! - **CatalogProvisioner**: catalog rendering plus a fingerprint-gated
//!   upsert through a [`ResourceClient`](keel_client::ResourceClient)

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod catalog;
mod error;
pub mod provisioner;
mod traits;

pub use catalog::ManifestCatalog;
pub use error::{ProvisionError, ProvisionResult};
pub use provisioner::CatalogProvisioner;
pub use traits::{ApplyOutcome, ModuleProvisioner, RegistryCredentials, RenderRequest};
