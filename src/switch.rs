use std::fmt::Display;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::discovery::NamespaceLister;
use crate::kubeconfig::MergedConfig;

/// A context together with the namespace to activate in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextNamespace {
    pub context: String,
    pub namespace: String,
}

impl Display for ContextNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.context, self.namespace)
    }
}

/// Quick switch target as typed on the command line, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickTarget {
    /// A namespace within the current context.
    Namespace(String),
    Pair(ContextNamespace),
}

impl QuickTarget {
    const DEFAULT_NAMESPACE: &'static str = "default";

    /// Accepted forms: `<namespace>`, `<context>/<namespace>` and
    /// `<context> <namespace>`; a `.` namespace stands for `default`.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<QuickTarget> {
        match args {
            [arg] => {
                let arg = arg.as_ref();
                // Context names may contain '/' (EKS ARNs), namespaces never do.
                match arg.rsplit_once('/') {
                    Some((context, namespace)) => Self::pair(context, namespace),
                    None => Ok(QuickTarget::Namespace(Self::namespace(arg)?)),
                }
            }
            [context, namespace] => Self::pair(context.as_ref(), namespace.as_ref()),
            _ => bail!("expect 1 or 2 arguments, found {}", args.len()),
        }
    }

    fn pair(context: &str, namespace: &str) -> Result<QuickTarget> {
        if context.is_empty() {
            bail!("context name cannot be empty");
        }
        Ok(QuickTarget::Pair(ContextNamespace {
            context: context.to_string(),
            namespace: Self::namespace(namespace)?,
        }))
    }

    fn namespace(name: &str) -> Result<String> {
        if name.is_empty() {
            bail!("namespace name cannot be empty");
        }
        if name.contains('/') {
            bail!("invalid namespace name '{name}'");
        }
        if name == "." {
            return Ok(String::from(Self::DEFAULT_NAMESPACE));
        }
        Ok(name.to_string())
    }
}

/// Validate a quick switch target against the merged config and the live
/// cluster, then switch to it. Nothing is written unless both the context
/// and the namespace exist.
pub async fn quick_switch<L: NamespaceLister>(
    merged: &mut MergedConfig,
    lister: &L,
    target: QuickTarget,
) -> Result<ContextNamespace> {
    let target = match target {
        QuickTarget::Namespace(namespace) => match merged.current_context() {
            Some(context) => ContextNamespace {
                context: context.to_string(),
                namespace,
            },
            None => bail!("no current context in kubeconfig, use '<context> <namespace>'"),
        },
        QuickTarget::Pair(target) => target,
    };

    if !merged.context_exists(&target.context) {
        bail!("context '{}' not found", target.context);
    }

    let namespaces = lister
        .list_namespaces(&merged.kubeconfig, &target.context)
        .await
        .with_context(|| format!("list namespaces in context '{}'", target.context))?;
    if !namespaces.contains(&target.namespace) {
        bail!(
            "namespace '{}' not found in context '{}'",
            target.namespace,
            target.context
        );
    }

    apply(merged, &target)?;
    Ok(target)
}

/// Mutate and persist, shared by the quick switch and the tree.
pub fn apply(merged: &mut MergedConfig, target: &ContextNamespace) -> Result<()> {
    let written = merged
        .switch(target)
        .with_context(|| format!("switch to '{target}'"))?;
    if written.is_empty() {
        debug!("'{target}' is already active");
    }
    eprintln!("switched to {target}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;

    use kube::config::Kubeconfig;

    use super::*;
    use crate::discovery::DiscoveryError;
    use crate::kubeconfig::tests::{write_file, DEV_KUBECONFIG};
    use crate::kubeconfig::Location;

    /// Serves namespaces from memory instead of a cluster.
    struct FakeLister {
        namespaces: HashMap<String, Result<Vec<String>, DiscoveryError>>,
    }

    impl FakeLister {
        fn new() -> FakeLister {
            let mut namespaces = HashMap::new();
            namespaces.insert(
                String::from("dev"),
                Ok(vec![String::from("default"), String::from("staging")]),
            );
            namespaces.insert(String::from("prod"), Ok(vec![String::from("default")]));
            FakeLister { namespaces }
        }
    }

    impl NamespaceLister for FakeLister {
        async fn list_namespaces(
            &self,
            _kubeconfig: &Kubeconfig,
            context: &str,
        ) -> Result<Vec<String>, DiscoveryError> {
            match self.namespaces.get(context) {
                Some(result) => result.clone(),
                None => Err(DiscoveryError::Unreachable),
            }
        }
    }

    fn target(context: &str, namespace: &str) -> ContextNamespace {
        ContextNamespace {
            context: context.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn setup() -> (tempfile::TempDir, PathBuf, MergedConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "config", DEV_KUBECONFIG);
        let merged = MergedConfig::load(&Location::Explicit(path.clone())).unwrap();
        (dir, path, merged)
    }

    fn reload(path: &PathBuf) -> MergedConfig {
        MergedConfig::load(&Location::Explicit(path.clone())).unwrap()
    }

    #[test]
    fn parse_forms() {
        assert_eq!(
            QuickTarget::parse(&["staging"]).unwrap(),
            QuickTarget::Namespace(String::from("staging"))
        );
        assert_eq!(
            QuickTarget::parse(&["prod/web"]).unwrap(),
            QuickTarget::Pair(target("prod", "web"))
        );
        assert_eq!(
            QuickTarget::parse(&["prod", "web"]).unwrap(),
            QuickTarget::Pair(target("prod", "web"))
        );
        assert_eq!(
            QuickTarget::parse(&["prod", "."]).unwrap(),
            QuickTarget::Pair(target("prod", "default"))
        );
        assert_eq!(
            QuickTarget::parse(&["prod/."]).unwrap(),
            QuickTarget::Pair(target("prod", "default"))
        );
        assert_eq!(
            QuickTarget::parse(&["arn:aws:eks:eu-west-1:1234:cluster/demo/web"]).unwrap(),
            QuickTarget::Pair(target("arn:aws:eks:eu-west-1:1234:cluster/demo", "web"))
        );
    }

    #[test]
    fn parse_rejects_bad_forms() {
        let empty: [&str; 0] = [];
        assert!(QuickTarget::parse(&empty).is_err());
        assert!(QuickTarget::parse(&["a", "b", "c"]).is_err());
        assert!(QuickTarget::parse(&["prod/"]).is_err());
        assert!(QuickTarget::parse(&["/web"]).is_err());
        assert!(QuickTarget::parse(&["prod", "a/b"]).is_err());
        assert!(QuickTarget::parse(&["", "web"]).is_err());
    }

    #[tokio::test]
    async fn bare_namespace_uses_current_context() {
        let (_dir, path, mut merged) = setup();
        let quick = QuickTarget::parse(&["staging"]).unwrap();

        let done = quick_switch(&mut merged, &FakeLister::new(), quick)
            .await
            .unwrap();
        assert_eq!(done, target("dev", "staging"));

        let reloaded = reload(&path);
        assert_eq!(reloaded.current_context(), Some("dev"));
        assert_eq!(reloaded.context_namespace("dev"), Some("staging"));
    }

    #[tokio::test]
    async fn dot_switches_to_default_namespace() {
        let (_dir, path, mut merged) = setup();
        let quick = QuickTarget::parse(&["prod", "."]).unwrap();

        quick_switch(&mut merged, &FakeLister::new(), quick)
            .await
            .unwrap();

        let reloaded = reload(&path);
        assert_eq!(reloaded.current_context(), Some("prod"));
        assert_eq!(reloaded.context_namespace("prod"), Some("default"));
    }

    #[tokio::test]
    async fn unknown_targets_leave_file_untouched() {
        let (_dir, path, mut merged) = setup();
        let lister = FakeLister::new();

        for args in [
            vec!["unknown-ctx", "foo"],
            vec!["dev/nope"],
            vec!["prod", "staging"],
        ] {
            let quick = QuickTarget::parse(args.as_slice()).unwrap();
            let result = quick_switch(&mut merged, &lister, quick).await;
            assert!(result.is_err(), "{args:?} should fail");
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), DEV_KUBECONFIG);
    }

    #[tokio::test]
    async fn discovery_failure_aborts_switch() {
        let (_dir, path, mut merged) = setup();
        let mut lister = FakeLister::new();
        lister.namespaces.insert(
            String::from("prod"),
            Err(DiscoveryError::ApiRejected(String::from("forbidden"))),
        );

        let quick = QuickTarget::parse(&["prod/default"]).unwrap();
        let err = quick_switch(&mut merged, &lister, quick)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("error from api: forbidden"));
        assert_eq!(fs::read_to_string(&path).unwrap(), DEV_KUBECONFIG);
    }

    #[tokio::test]
    async fn switch_to_active_pair_is_idempotent() {
        let (_dir, path, mut merged) = setup();
        let quick = QuickTarget::parse(&["dev", "default"]).unwrap();

        quick_switch(&mut merged, &FakeLister::new(), quick)
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), DEV_KUBECONFIG);
    }
}
