//! Fingerprint-gated upsert shared by the reconcilers

use crate::error::ReconcileResult;
use keel_client::Api;
use keel_types::{fingerprint_label, set_fingerprint_label, Resource};

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Create `desired` if absent; replace it only when the live object's
/// fingerprint label differs from `fingerprint`.
///
/// Returns the live object after the call. A NotFound on the read selects
/// the create path; every other error propagates unchanged.
pub async fn upsert<K: Resource>(
    api: &Api<K>,
    mut desired: K,
    fingerprint: &str,
) -> ReconcileResult<(WriteOutcome, K)> {
    set_fingerprint_label(desired.meta_mut(), fingerprint);
    desired.meta_mut().resource_version = None;
    let name = desired.meta().name.clone();

    match api.get_opt(&name).await? {
        None => {
            let created = api.create(&desired).await?;
            tracing::info!(kind = K::KIND, namespace = api.namespace(), %name, "Created");
            Ok((WriteOutcome::Created, created))
        }
        Some(live) if fingerprint_label(live.meta()) == Some(fingerprint) => {
            Ok((WriteOutcome::Unchanged, live))
        }
        Some(live) => {
            desired.meta_mut().resource_version = live.meta().resource_version.clone();
            let updated = api.replace(&desired).await?;
            tracing::info!(kind = K::KIND, namespace = api.namespace(), %name, "Updated");
            Ok((WriteOutcome::Updated, updated))
        }
    }
}
