use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::fmt::Display;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use kube::config::Kubeconfig;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::config::get_home_dir;
use crate::switch::ContextNamespace;

/// Where the kubeconfig files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A single file given on the command line, which must exist.
    Explicit(PathBuf),
    /// Candidate files in precedence order; missing entries are skipped.
    Precedence(Vec<PathBuf>),
}

impl Location {
    const KUBECONFIG_ENV: &'static str = "KUBECONFIG";

    pub fn resolve(explicit: Option<PathBuf>) -> Result<Location> {
        if let Some(path) = explicit {
            return Ok(Location::Explicit(path));
        }
        let home = get_home_dir()?;
        Ok(Self::from_env(env::var_os(Self::KUBECONFIG_ENV), &home))
    }

    fn from_env(kubeconfig: Option<OsString>, home: &Path) -> Location {
        if let Some(value) = kubeconfig {
            let paths: Vec<PathBuf> = env::split_paths(&value)
                .filter(|path| !path.as_os_str().is_empty())
                .collect();
            if !paths.is_empty() {
                return Location::Precedence(paths);
            }
        }
        Location::Precedence(vec![home.join(".kube").join("config")])
    }

    fn paths(&self) -> &[PathBuf] {
        match self {
            Location::Explicit(path) => std::slice::from_ref(path),
            Location::Precedence(paths) => paths,
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<_> = self
            .paths()
            .iter()
            .map(|path| format!("{}", path.display()))
            .collect();
        write!(f, "{}", paths.join(":"))
    }
}

/// One kubeconfig file that took part in the merge.
#[derive(Debug)]
struct Source {
    path: PathBuf,
    contexts: Vec<String>,
    sets_current_context: bool,
}

impl Source {
    fn new(path: &Path, kubeconfig: &Kubeconfig) -> Source {
        Source {
            path: path.to_path_buf(),
            contexts: kubeconfig.contexts.iter().map(|c| c.name.clone()).collect(),
            sets_current_context: kubeconfig.current_context.is_some(),
        }
    }

    fn defines(&self, context: &str) -> bool {
        self.contexts.iter().any(|name| name == context)
    }
}

/// The merged view of every loaded kubeconfig file, plus enough bookkeeping
/// to write changes back to the file each value came from.
pub struct MergedConfig {
    pub kubeconfig: Kubeconfig,

    sources: Vec<Source>,
}

impl MergedConfig {
    pub fn load(location: &Location) -> Result<MergedConfig> {
        let mut merged: Option<Kubeconfig> = None;
        let mut sources = Vec::new();

        for path in location.paths() {
            match fs::metadata(path) {
                Ok(meta) if meta.is_dir() => {
                    bail!("kubeconfig path '{}' is a directory", path.display())
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    if let Location::Explicit(_) = location {
                        bail!("kubeconfig file '{}' not found", path.display());
                    }
                    debug!("skip missing kubeconfig '{}'", path.display());
                    continue;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("stat kubeconfig file '{}'", path.display()))
                }
            }

            let mut kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("parse kubeconfig file '{}'", path.display()))?;
            // An empty current-context (left by `kubectl config unset`) must
            // not shadow the value of a later file.
            if kubeconfig.current_context.as_deref() == Some("") {
                kubeconfig.current_context = None;
            }
            sources.push(Source::new(path, &kubeconfig));

            merged = Some(match merged {
                Some(prev) => prev
                    .merge(kubeconfig)
                    .with_context(|| format!("merge kubeconfig file '{}'", path.display()))?,
                None => kubeconfig,
            });
        }

        match merged {
            Some(kubeconfig) => Ok(MergedConfig {
                kubeconfig,
                sources,
            }),
            None => bail!("no kubeconfig file found in '{location}'"),
        }
    }

    pub fn current_context(&self) -> Option<&str> {
        self.kubeconfig
            .current_context
            .as_deref()
            .filter(|ctx| !ctx.is_empty())
    }

    /// Context names, sorted and deduplicated.
    pub fn context_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .kubeconfig
            .contexts
            .iter()
            .map(|ctx| ctx.name.as_str())
            .collect();
        names.into_iter().map(String::from).collect()
    }

    pub fn context_exists(&self, name: &str) -> bool {
        self.kubeconfig.contexts.iter().any(|ctx| ctx.name == name)
    }

    pub fn context_namespace(&self, name: &str) -> Option<&str> {
        let ctx = self.kubeconfig.contexts.iter().find(|ctx| ctx.name == name)?;
        ctx.context.as_ref()?.namespace.as_deref()
    }

    /// Point the merged config at `target` and write the change back to the
    /// originating files. Returns the files that were actually rewritten.
    pub fn switch(&mut self, target: &ContextNamespace) -> Result<Vec<PathBuf>> {
        let named = self
            .kubeconfig
            .contexts
            .iter_mut()
            .find(|ctx| ctx.name == target.context)
            .ok_or_else(|| anyhow!("context '{}' not found", target.context))?;
        let ctx = named.context.get_or_insert_with(Default::default);
        ctx.namespace = Some(target.namespace.clone());
        self.kubeconfig.current_context = Some(target.context.clone());

        self.persist(target)
    }

    fn persist(&self, target: &ContextNamespace) -> Result<Vec<PathBuf>> {
        // The first file that sets current-context is the one that wins the
        // merge, same for the first file defining the context.
        let current_idx = self
            .sources
            .iter()
            .position(|source| source.sets_current_context)
            .unwrap_or(0);
        let context_idx = self
            .sources
            .iter()
            .position(|source| source.defines(&target.context))
            .ok_or_else(|| anyhow!("context '{}' has no source file", target.context))?;

        let mut written = Vec::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let set_current = idx == current_idx;
            let set_namespace = idx == context_idx;
            if !set_current && !set_namespace {
                continue;
            }

            let mut doc = read_document(&source.path)?;
            let mut changed = false;
            if set_current {
                changed |= set_current_context(&mut doc, &target.context)
                    .with_context(|| format!("edit '{}'", source.path.display()))?;
            }
            if set_namespace {
                changed |= set_context_namespace(&mut doc, &target.context, &target.namespace)
                    .with_context(|| format!("edit '{}'", source.path.display()))?;
            }

            if !changed {
                debug!("kubeconfig '{}' unchanged, skip", source.path.display());
                continue;
            }
            write_document(&source.path, &doc)?;
            debug!("kubeconfig '{}' updated", source.path.display());
            written.push(source.path.clone());
        }

        Ok(written)
    }

    /// Write the whole merged config to a single file, readable by the owner
    /// only. An existing file is replaced.
    pub fn export(&self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let data = serde_yaml::to_string(&self.kubeconfig).context("encode merged kubeconfig")?;
        let path = if path.exists() {
            fs::canonicalize(path)
                .with_context(|| format!("resolve export path '{}'", path.display()))?
        } else {
            path.to_path_buf()
        };
        replace_file(&path, &data, fs::Permissions::from_mode(0o600))
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read kubeconfig file '{}'", path.display()))?;
    let doc: Value = serde_yaml::from_str(&data)
        .with_context(|| format!("parse kubeconfig file '{}'", path.display()))?;
    if doc.is_null() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    Ok(doc)
}

/// Rewrite a kubeconfig file in place, keeping its permissions. Symlinks are
/// resolved so the link target is replaced, not the link.
fn write_document(path: &Path, doc: &Value) -> Result<()> {
    let data = serde_yaml::to_string(doc).context("encode kubeconfig yaml")?;

    let path = fs::canonicalize(path)
        .with_context(|| format!("resolve kubeconfig path '{}'", path.display()))?;
    let perms = fs::metadata(&path)
        .with_context(|| format!("stat kubeconfig file '{}'", path.display()))?
        .permissions();
    replace_file(&path, &data, perms)
}

/// Replace the file in one step: write a sibling temp file with `perms`,
/// then rename it over `path`.
fn replace_file(path: &Path, data: &str, perms: fs::Permissions) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => bail!("path '{}' has no parent dir", path.display()),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in '{}'", dir.display()))?;
    tmp.write_all(data.as_bytes())
        .context("write kubeconfig to temp file")?;
    tmp.as_file().sync_all().context("sync temp kubeconfig")?;
    fs::set_permissions(tmp.path(), perms).context("set kubeconfig permissions")?;

    tmp.persist(path)
        .with_context(|| format!("replace file '{}'", path.display()))?;
    Ok(())
}

fn set_current_context(doc: &mut Value, context: &str) -> Result<bool> {
    let map = match doc.as_mapping_mut() {
        Some(map) => map,
        None => bail!("kubeconfig document is not a mapping"),
    };

    let value = Value::from(context);
    if map.get("current-context") == Some(&value) {
        return Ok(false);
    }
    map.insert(Value::from("current-context"), value);
    Ok(true)
}

fn set_context_namespace(doc: &mut Value, context: &str, namespace: &str) -> Result<bool> {
    let contexts = match doc.get_mut("contexts").and_then(Value::as_sequence_mut) {
        Some(contexts) => contexts,
        None => bail!("kubeconfig document has no contexts list"),
    };
    let entry = contexts
        .iter_mut()
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(context))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| anyhow!("context '{context}' not found in kubeconfig document"))?;

    let has_body = matches!(entry.get("context"), Some(body) if !body.is_null());
    if !has_body {
        entry.insert(Value::from("context"), Value::Mapping(Mapping::new()));
    }
    let body = match entry.get_mut("context").and_then(Value::as_mapping_mut) {
        Some(body) => body,
        None => bail!("context '{context}' body is not a mapping"),
    };

    let value = Value::from(namespace);
    if body.get("namespace") == Some(&value) {
        return Ok(false);
    }
    body.insert(Value::from("namespace"), value);
    Ok(true)
}
