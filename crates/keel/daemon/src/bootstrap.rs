//! Seed objects loaded into the cluster at startup

use crate::error::{DaemonError, DaemonResult};
use keel_client::{ClientError, ResourceClient};
use keel_types::DynamicObject;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Read every `*.json` file directly under `dir`, in name order. A file
/// holds one object or an array of them.
pub fn load_objects(dir: &Path) -> DaemonResult<Vec<DynamicObject>> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DaemonError::Io { path, source }
    };

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .map(|entry| entry.map(|e| e.path()).map_err(io_err(dir)))
        .collect::<DaemonResult<Vec<_>>>()?
        .into_iter()
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();

    let mut objects = Vec::new();
    for file in files {
        let text = fs::read_to_string(&file).map_err(io_err(&file))?;
        let bootstrap_err = |source| DaemonError::Bootstrap {
            path: file.clone(),
            source,
        };
        match serde_json::from_str::<Value>(&text).map_err(bootstrap_err)? {
            Value::Array(items) => {
                for item in items {
                    objects.push(serde_json::from_value(item).map_err(bootstrap_err)?);
                }
            }
            other => objects.push(serde_json::from_value(other).map_err(bootstrap_err)?),
        }
    }
    Ok(objects)
}

/// Create each object; ones that already exist are left untouched
pub async fn seed(client: &dyn ResourceClient, objects: Vec<DynamicObject>) -> DaemonResult<usize> {
    let mut created = 0;
    for object in objects {
        let kind = object.kind.clone();
        let key = object.key();
        match client.create(object).await {
            Ok(_) => {
                tracing::debug!(%kind, %key, "Seeded object");
                created += 1;
            }
            Err(ClientError::AlreadyExists { .. }) => {
                tracing::debug!(%kind, %key, "Seed object already present");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_client::{InMemoryCluster, LabelSelector};

    #[test]
    fn test_load_single_and_array_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("10-workflow.json"),
            r#"{"apiVersion": "keel.dev/v1alpha1", "kind": "Workflow",
                "metadata": {"name": "release", "namespace": "default"},
                "spec": {"actions": []}}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("00-configs.json"),
            r#"[
                {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a", "namespace": "default"}},
                {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b", "namespace": "default"}}
            ]"#,
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let objects = load_objects(dir.path()).unwrap();
        let names: Vec<_> = objects.iter().map(|o| o.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "release"]);
    }

    #[test]
    fn test_malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let err = load_objects(dir.path()).unwrap_err();
        assert!(matches!(err, DaemonError::Bootstrap { ref path, .. } if path.ends_with("broken.json")));
    }

    #[tokio::test]
    async fn test_seed_skips_existing_objects() {
        let cluster = InMemoryCluster::default();
        let object = serde_json::from_value::<DynamicObject>(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "a", "namespace": "default"}
        }))
        .unwrap();

        assert_eq!(seed(&cluster, vec![object.clone()]).await.unwrap(), 1);
        assert_eq!(seed(&cluster, vec![object]).await.unwrap(), 0);
        let stored = cluster
            .list("ConfigMap", Some("default"), &LabelSelector::everything())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
