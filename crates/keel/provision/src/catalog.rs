//! Static manifest catalog
//!
//! Templates are plain JSON manifests keyed by `(repo_ref, tag)`. String
//! leaves may contain `${dotted.path}` placeholders resolved against the
//! render values. A string that is exactly one placeholder is replaced by
//! the value itself, keeping its JSON type; embedded placeholders are
//! spliced in as text.

use crate::error::{ProvisionError, ProvisionResult};
use crate::traits::RenderRequest;
use keel_types::DynamicObject;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// In-memory store of manifest templates
#[derive(Debug, Clone, Default)]
pub struct ManifestCatalog {
    templates: BTreeMap<(String, String), Vec<Value>>,
}

impl ManifestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the manifests of one template
    pub fn insert(&mut self, repo_ref: impl Into<String>, tag: impl Into<String>, manifests: Vec<Value>) {
        self.templates.insert((repo_ref.into(), tag.into()), manifests);
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with_template(
        mut self,
        repo_ref: impl Into<String>,
        tag: impl Into<String>,
        manifests: Vec<Value>,
    ) -> Self {
        self.insert(repo_ref, tag, manifests);
        self
    }

    pub fn contains(&self, repo_ref: &str, tag: &str) -> bool {
        self.templates
            .contains_key(&(repo_ref.to_string(), tag.to_string()))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load every `<root>/<repo_ref>/<tag>/*.json` file.
    ///
    /// `repo_ref` may span several directory levels (`registry/web`); the
    /// innermost directory holding JSON files is the tag. Each file holds
    /// either one manifest or an array of them; files are read in name order.
    pub fn load_dir(root: &Path) -> ProvisionResult<Self> {
        let mut catalog = Self::new();
        catalog.visit(root, root)?;
        tracing::info!(
            root = %root.display(),
            templates = catalog.len(),
            "Loaded manifest catalog"
        );
        Ok(catalog)
    }

    fn visit(&mut self, root: &Path, dir: &Path) -> ProvisionResult<()> {
        let io_err = |source| ProvisionError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_dir() {
                subdirs.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        subdirs.sort();

        if !files.is_empty() {
            match template_key(root, dir) {
                Some((repo_ref, tag)) => {
                    let mut manifests = Vec::new();
                    for file in &files {
                        manifests.extend(read_manifests(file)?);
                    }
                    tracing::debug!(%repo_ref, %tag, manifests = manifests.len(), "Registered template");
                    self.insert(repo_ref, tag, manifests);
                }
                None => {
                    tracing::warn!(dir = %dir.display(), "Ignoring manifests outside <repo>/<tag> layout");
                }
            }
        }

        for subdir in subdirs {
            self.visit(root, &subdir)?;
        }
        Ok(())
    }

    /// Render a template's manifests for one request
    pub fn render(&self, request: &RenderRequest) -> ProvisionResult<Vec<DynamicObject>> {
        let manifests = self
            .templates
            .get(&(request.repo_ref.clone(), request.tag.clone()))
            .ok_or_else(|| ProvisionError::TemplateNotFound {
                repo_ref: request.repo_ref.clone(),
                tag: request.tag.clone(),
            })?;

        let context = Value::Object(request.values.clone().into_iter().collect());

        manifests
            .iter()
            .map(|manifest| {
                let rendered = substitute(manifest, &context, &request.template_name)?;
                let mut object: DynamicObject =
                    serde_json::from_value(rendered).map_err(|e| ProvisionError::InvalidManifest {
                        template: request.template_name.clone(),
                        reason: e.to_string(),
                    })?;
                object.metadata.namespace = request.namespace.clone();
                Ok(object)
            })
            .collect()
    }
}

fn template_key(root: &Path, dir: &Path) -> Option<(String, String)> {
    let relative = dir.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let (tag, repo) = parts.split_last()?;
    if repo.is_empty() {
        return None;
    }
    Some((repo.join("/"), tag.clone()))
}

fn read_manifests(path: &Path) -> ProvisionResult<Vec<Value>> {
    let raw = fs::read_to_string(path).map_err(|source| ProvisionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|source| ProvisionError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match parsed {
        Value::Array(items) => items,
        single => vec![single],
    })
}

fn substitute(value: &Value, context: &Value, template: &str) -> ProvisionResult<Value> {
    match value {
        Value::String(s) => substitute_str(s, context, template),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, context, template))
            .collect::<ProvisionResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), substitute(item, context, template)?);
            }
            Ok(Value::Object(out))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn substitute_str(s: &str, context: &Value, template: &str) -> ProvisionResult<Value> {
    let missing = |placeholder: &str| ProvisionError::MissingValue {
        template: template.to_string(),
        placeholder: placeholder.to_string(),
    };

    if let Some(path) = whole_placeholder(s) {
        return lookup(context, path).cloned().ok_or_else(|| missing(path));
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated; keep verbatim
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let path = after[..end].trim();
        match lookup(context, path).ok_or_else(|| missing(path))? {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') || inner.contains("${") {
        return None;
    }
    Some(inner.trim())
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::Values;
    use serde_json::json;

    fn request(values: Values) -> RenderRequest {
        RenderRequest {
            template_name: "db-migrate".to_string(),
            repo_ref: "registry/migrations".to_string(),
            tag: "v1".to_string(),
            namespace: "team-a".to_string(),
            credentials: None,
            values,
        }
    }

    fn job_manifest() -> Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate-${nameSuffix}", "namespace": "ignored"},
            "spec": {
                "parallelism": "${parallelism}",
                "image": "${image.repository}:${image.tag}",
                "args": ["--target", "${componentName}"]
            }
        })
    }

    fn values(pairs: Value) -> Values {
        serde_json::from_value(pairs).unwrap()
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let catalog =
            ManifestCatalog::new().with_template("registry/migrations", "v1", vec![job_manifest()]);

        let objects = catalog
            .render(&request(values(json!({
                "nameSuffix": "ab12cd34",
                "parallelism": 2,
                "image": {"repository": "registry/migrate", "tag": "1.4"},
                "componentName": "web"
            }))))
            .unwrap();

        assert_eq!(objects.len(), 1);
        let job = &objects[0];
        assert_eq!(job.metadata.name, "migrate-ab12cd34");
        assert_eq!(job.metadata.namespace, "team-a");
        assert_eq!(job.data["spec"]["parallelism"], 2);
        assert_eq!(job.data["spec"]["image"], "registry/migrate:1.4");
        assert_eq!(job.data["spec"]["args"][1], "web");
    }

    #[test]
    fn test_missing_value_is_reported() {
        let catalog =
            ManifestCatalog::new().with_template("registry/migrations", "v1", vec![job_manifest()]);

        let err = catalog
            .render(&request(values(json!({
                "nameSuffix": "x",
                "image": {"repository": "registry/migrate", "tag": "1.4"},
                "componentName": "web"
            }))))
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::MissingValue { ref placeholder, .. } if placeholder == "parallelism"
        ));
    }

    #[test]
    fn test_unknown_template() {
        let catalog = ManifestCatalog::new();
        let err = catalog.render(&request(Values::new())).unwrap_err();
        assert!(matches!(err, ProvisionError::TemplateNotFound { .. }));
    }

    #[test]
    fn test_manifest_without_name_is_invalid() {
        let catalog = ManifestCatalog::new().with_template(
            "registry/migrations",
            "v1",
            vec![json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}})],
        );
        let err = catalog.render(&request(Values::new())).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidManifest { .. }));
    }

    #[test]
    fn test_array_index_lookup() {
        let context = json!({"ports": [{"port": 80}, {"port": 443}]});
        assert_eq!(lookup(&context, "ports.1.port"), Some(&json!(443)));
        assert_eq!(lookup(&context, "ports.7.port"), None);
    }

    #[test]
    fn test_load_dir_layout() {
        let root = tempfile::tempdir().unwrap();
        let tag_dir = root.path().join("registry").join("web").join("v1");
        fs::create_dir_all(&tag_dir).unwrap();
        fs::write(
            tag_dir.join("a-configmap.json"),
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg"}}).to_string(),
        )
        .unwrap();
        fs::write(
            tag_dir.join("b-many.json"),
            json!([
                {"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s1"}},
                {"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s2"}}
            ])
            .to_string(),
        )
        .unwrap();
        fs::write(root.path().join("stray.json"), "{}").unwrap();

        let catalog = ManifestCatalog::load_dir(root.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("registry/web", "v1"));

        let mut req = request(Values::new());
        req.repo_ref = "registry/web".to_string();
        let names: Vec<_> = catalog
            .render(&req)
            .unwrap()
            .into_iter()
            .map(|o| o.metadata.name)
            .collect();
        assert_eq!(names, vec!["cfg", "s1", "s2"]);
    }

    #[test]
    fn test_load_dir_reports_bad_json() {
        let root = tempfile::tempdir().unwrap();
        let tag_dir = root.path().join("repo").join("v1");
        fs::create_dir_all(&tag_dir).unwrap();
        fs::write(tag_dir.join("broken.json"), "{not json").unwrap();

        assert!(matches!(
            ManifestCatalog::load_dir(root.path()),
            Err(ProvisionError::Parse { .. })
        ));
    }
}
