use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};

use crate::{Error, Result};
use models::{Command, ResourceEntry};

/// Kubernetes namespace selection for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    Default,
    All,
    Named(String),
}

impl Namespace {
    /// The namespace as it appears in kubectl arguments and cache paths.
    pub fn label(&self) -> &str {
        match self {
            Namespace::Default => "default",
            Namespace::All => "__all",
            Namespace::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Data,
    File,
    Exec,
    Folder,
    Kubernetes,
}

/// A source of one JSON-shaped document, identified by (schema, name).
#[derive(Debug, Clone)]
pub enum Resource {
    Data(DataResource),
    File(FileResource),
    Exec(ExecResource),
    Folder(FolderResource),
    Kubernetes(KubernetesResource),
}

#[derive(Debug, Clone)]
pub struct DataResource {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct FileResource {
    pub name: String,
    /// A filesystem path, or the literal `stdin`.
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ExecResource {
    pub name: String,
    pub argv: Vec<String>,
    pub cacheable: bool,
    pub cache_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FolderResource {
    pub name: String,
    pub dir: String,
    pub glob: String,
    pub pattern: regex::Regex,
}

#[derive(Debug, Clone)]
pub struct KubernetesResource {
    pub name: String,
    pub namespaced: bool,
    pub cacheable: bool,
}

/// The seam to the concrete Kubernetes adapter, which lives outside the
/// engine. The CLI wires in a kubectl-backed implementation.
pub trait KubeFetcher: Send + Sync {
    fn fetch(&self, resource: &KubernetesResource, namespace: &Namespace) -> anyhow::Result<Value>;
}

/// Fetcher for engines with no Kubernetes adapter wired in.
pub struct NoKubernetes;

impl KubeFetcher for NoKubernetes {
    fn fetch(&self, resource: &KubernetesResource, _: &Namespace) -> anyhow::Result<Value> {
        anyhow::bail!(
            "no kubernetes fetcher is configured (resource '{}')",
            resource.name
        )
    }
}

impl Resource {
    /// Build a resource from its configuration entry, inferring the kind:
    /// a kind field if present, else `namespaced:` implies kubernetes,
    /// else the schema's default kind.
    pub fn from_entry(entry: &ResourceEntry, default_kind: Option<ResourceKind>) -> Result<Resource> {
        let mut kinds = Vec::new();
        if entry.data.is_some() {
            kinds.push(ResourceKind::Data);
        }
        if entry.file.is_some() {
            kinds.push(ResourceKind::File);
        }
        if entry.exec.is_some() {
            kinds.push(ResourceKind::Exec);
        }
        if entry.folder.is_some() {
            kinds.push(ResourceKind::Folder);
        }
        let kind = match kinds.as_slice() {
            [] if entry.namespaced.is_some() => ResourceKind::Kubernetes,
            [] => default_kind.ok_or_else(|| Error::UnknownKind(entry.name.clone()))?,
            [kind] => *kind,
            _ => return Err(Error::AmbiguousKind(entry.name.clone())),
        };

        // Only exec and kubernetes resources may be cached.
        if entry.cacheable == Some(true)
            && matches!(kind, ResourceKind::Data | ResourceKind::File | ResourceKind::Folder)
        {
            return Err(Error::NotCacheable(entry.name.clone()));
        }

        Ok(match kind {
            ResourceKind::Data => Resource::Data(DataResource {
                name: entry.name.clone(),
                value: entry.data.clone().unwrap_or(Value::Null),
            }),
            ResourceKind::File => Resource::File(FileResource {
                name: entry.name.clone(),
                path: entry.file.clone().unwrap_or_default(),
            }),
            ResourceKind::Exec => {
                let cacheable = entry.cacheable.unwrap_or(false);
                if cacheable {
                    let has_env_ref = entry
                        .cache_key
                        .as_deref()
                        .is_some_and(|key| ENV_REF_RE.is_match(key));
                    if !has_env_ref {
                        return Err(Error::MissingCacheKey(entry.name.clone()));
                    }
                }
                let argv = match entry.exec.clone() {
                    Some(Command::Shell(line)) => {
                        vec!["/bin/sh".to_string(), "-c".to_string(), line]
                    }
                    Some(Command::Argv(argv)) => argv,
                    None => Vec::new(),
                };
                Resource::Exec(ExecResource {
                    name: entry.name.clone(),
                    argv,
                    cacheable,
                    cache_key: entry.cache_key.clone(),
                })
            }
            ResourceKind::Folder => {
                let pattern = entry.r#match.as_deref().unwrap_or("^");
                let pattern =
                    regex::Regex::new(pattern).map_err(|err| models::Error::InvalidRegex {
                        pattern: pattern.to_string(),
                        err,
                    })?;
                Resource::Folder(FolderResource {
                    name: entry.name.clone(),
                    dir: entry.folder.clone().unwrap_or_default(),
                    glob: entry.glob.clone().unwrap_or_else(|| "**/*".to_string()),
                    pattern,
                })
            }
            ResourceKind::Kubernetes => Resource::Kubernetes(KubernetesResource {
                name: entry.name.clone(),
                namespaced: entry.namespaced.unwrap_or(true),
                cacheable: entry.cacheable.unwrap_or(true),
            }),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Data(r) => &r.name,
            Resource::File(r) => &r.name,
            Resource::Exec(r) => &r.name,
            Resource::Folder(r) => &r.name,
            Resource::Kubernetes(r) => &r.name,
        }
    }

    pub fn cacheable(&self) -> bool {
        match self {
            Resource::Data(_) | Resource::File(_) | Resource::Folder(_) => false,
            Resource::Exec(r) => r.cacheable,
            Resource::Kubernetes(r) => r.cacheable,
        }
    }

    /// The snapshot path relative to the schema's cache directory.
    /// Only meaningful for cacheable resources.
    pub fn cache_path(&self, namespace: &Namespace) -> anyhow::Result<PathBuf> {
        match self {
            Resource::Exec(exec) => {
                let key = exec.cache_key.as_deref().unwrap_or_default();
                let (expanded, any_nonempty) = expand_env(key);
                if !any_nonempty {
                    anyhow::bail!("cache_key '{key}' expands to no environment value");
                }
                Ok(PathBuf::from(expanded).join(format!("{}.exec.json", exec.name)))
            }
            Resource::Kubernetes(k8s) => Ok(PathBuf::from(format!(
                "{}.{}.json",
                namespace.label(),
                k8s.name
            ))),
            _ => anyhow::bail!("resource '{}' is not cacheable", self.name()),
        }
    }

    /// Fetch and parse the backing document.
    pub fn get_objects(
        &self,
        fetcher: &dyn KubeFetcher,
        namespace: &Namespace,
    ) -> anyhow::Result<Value> {
        match self {
            Resource::Data(data) => Ok(data.value.clone()),
            Resource::File(file) => file.get_objects(),
            Resource::Exec(exec) => exec.get_objects(),
            Resource::Folder(folder) => folder.get_objects(),
            Resource::Kubernetes(k8s) => fetcher.fetch(k8s, namespace),
        }
    }
}

impl FileResource {
    fn get_objects(&self) -> anyhow::Result<Value> {
        if self.path == "stdin" {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            return parse_text(&text);
        }
        let path = expand_path(&self.path);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", self.path))?;
        parse_text(&text)
    }
}

impl ExecResource {
    fn get_objects(&self) -> anyhow::Result<Value> {
        let display = self.argv.join(" ");
        let (program, args) = self
            .argv
            .split_first()
            .context("exec resource has an empty command")?;
        let output = std::process::Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to run [{display}]"))?;
        if !output.status.success() {
            anyhow::bail!(
                "[{display}] exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_text(&String::from_utf8_lossy(&output.stdout))
    }
}

impl FolderResource {
    fn get_objects(&self) -> anyhow::Result<Value> {
        let dir = expand_path(&self.dir);
        let pattern = format!("{}/{}", dir.trim_end_matches('/'), self.glob);
        let mut entries = Vec::new();

        for path in glob::glob(&pattern).with_context(|| format!("bad glob '{pattern}'"))? {
            let path = path?;
            if !path.is_file() {
                continue;
            }
            let relative = path.strip_prefix(&dir).unwrap_or(&path).to_string_lossy();
            let Some(captures) = self.pattern.captures(&relative) else {
                continue;
            };
            let mut groups = serde_json::Map::new();
            for group in self.pattern.capture_names().flatten() {
                if let Some(found) = captures.name(group) {
                    groups.insert(group.to_string(), Value::String(found.as_str().to_string()));
                }
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            entries.push(json!({
                "match": Value::Object(groups),
                "content": parse_text(&text)?,
            }));
        }
        if entries.is_empty() {
            anyhow::bail!(
                "no files under {dir} match glob '{}' and regex '{}'",
                self.glob,
                self.pattern.as_str()
            );
        }
        Ok(Value::Array(entries))
    }
}

/// A resource as used by one query, qualified by its owning schema.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub schema: String,
    pub resource: Arc<Resource>,
}

impl ResourceRef {
    pub fn new(schema: impl Into<String>, resource: Arc<Resource>) -> ResourceRef {
        ResourceRef {
            schema: schema.into(),
            resource,
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.resource.name())
    }

    fn sort_key(&self) -> (&str, &str) {
        (&self.schema, self.resource.name())
    }
}

impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}
impl Eq for ResourceRef {}

impl PartialOrd for ResourceRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ResourceRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Parse fetched text: JSON if it leads with `{` or `[`, else YAML.
/// Empty text is an empty mapping.
pub(crate) fn parse_text(text: &str) -> anyhow::Result<Value> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    if matches!(trimmed.as_bytes().first(), Some(b'{' | b'[')) {
        serde_json::from_str(text).context("invalid JSON")
    } else {
        serde_yaml::from_str(text).context("invalid YAML")
    }
}

lazy_static::lazy_static! {
    static ref ENV_REF_RE: regex::Regex =
        regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex");
}

/// Substitute `$VAR` references from the environment. Also reports whether
/// any reference produced a non-empty value, which cacheable exec resources
/// require of their cache keys.
fn expand_env(text: &str) -> (String, bool) {
    let mut any_nonempty = false;
    let expanded = ENV_REF_RE.replace_all(text, |caps: &regex::Captures| {
        let value = std::env::var(&caps[1]).unwrap_or_default();
        if !value.is_empty() {
            any_nonempty = true;
        }
        value
    });
    (expanded.into_owned(), any_nonempty)
}

/// Expand `~` and `$VAR` in a user-supplied path.
pub(crate) fn expand_path(text: &str) -> String {
    let (expanded, _) = expand_env(text);
    if expanded == "~" || expanded.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return expanded.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    expanded
}
