//! Keel Client - cluster resource access
//!
//! This crate is the boundary between the controllers and the cluster API:
//!
//! - **ResourceClient**: object-safe get/list/watch/create/update/patch/delete
//!   over dynamic objects, with optimistic-concurrency conflicts surfaced as a
//!   distinct error kind
//! - **Api**: typed, namespace-scoped convenience wrapper
//! - **InMemoryCluster**: a complete in-process store implementing the same
//!   contract, including ownership-driven cascading deletion
//!
//! Production deployments plug a real cluster client in behind `ResourceClient`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod api;
mod error;
pub mod memory;
mod selector;
mod traits;

pub use api::Api;
pub use error::{ClientError, ClientResult};
pub use memory::{InMemoryCluster, WriteStats};
pub use selector::{LabelSelector, Requirement};
pub use traits::{ResourceClient, WatchEvent, WatchStream};
