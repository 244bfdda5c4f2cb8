use std::borrow::Cow;
use std::fmt::Display;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace as ApiCoreV1Namespace;
use kube::api::ListParams;
use kube::config::Config as ApiConfig;
use kube::config::KubeConfigOptions as ApiConfigOptions;
use kube::config::Kubeconfig as ApiKubeconfig;
use kube::Api;
use kube::Client as KubeClient;
use tracing::debug;

use crate::config::Config;
use crate::kubeconfig::MergedConfig;

/// Why a context's namespaces could not be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The cluster could not be reached: connect failure, TLS failure or
    /// timeout.
    Unreachable,
    /// The API server answered with a status error.
    ApiRejected(String),
    /// Anything else, e.g. the context cannot be turned into a client.
    Other(String),
}

impl Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::Unreachable => write!(f, "unreachable"),
            DiscoveryError::ApiRejected(msg) => write!(f, "error from api: {msg}"),
            DiscoveryError::Other(_) => write!(f, "error"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<kube::Error> for DiscoveryError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => DiscoveryError::ApiRejected(resp.message),
            kube::Error::HyperError(_) | kube::Error::Service(_) => DiscoveryError::Unreachable,
            err => DiscoveryError::Other(err.to_string()),
        }
    }
}

pub trait NamespaceLister {
    async fn list_namespaces(
        &self,
        kubeconfig: &ApiKubeconfig,
        context: &str,
    ) -> Result<Vec<String>, DiscoveryError>;
}

/// Lists namespaces from the live cluster behind a context, unless a
/// `ns_alias` rule provides them.
pub struct Discoverer<'a> {
    cfg: &'a Config,
}

impl<'a> Discoverer<'a> {
    pub fn new(cfg: &'a Config) -> Discoverer<'a> {
        Discoverer { cfg }
    }

    async fn list_remote(
        &self,
        kubeconfig: &ApiKubeconfig,
        context: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, DiscoveryError> {
        let opts = ApiConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let mut config = ApiConfig::from_custom_kubeconfig(kubeconfig.clone(), &opts)
            .await
            .map_err(|err| DiscoveryError::Other(format!("build kube api config: {err}")))?;
        config.connect_timeout = Some(timeout);
        config.read_timeout = Some(timeout);

        let client = KubeClient::try_from(config)?;
        let ns_api: Api<ApiCoreV1Namespace> = Api::all(client);
        let namespaces = ns_api.list(&ListParams::default()).await?;

        Ok(namespaces
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}

impl NamespaceLister for Discoverer<'_> {
    async fn list_namespaces(
        &self,
        kubeconfig: &ApiKubeconfig,
        context: &str,
    ) -> Result<Vec<String>, DiscoveryError> {
        let mut names: Vec<String> = match self.cfg.match_ns_alias(context) {
            Some(alias) => alias.into_iter().map(Cow::into_owned).collect(),
            None => {
                let timeout = self.cfg.timeout();
                let list = self.list_remote(kubeconfig, context, timeout);
                match tokio::time::timeout(timeout, list).await {
                    Ok(result) => result?,
                    Err(_) => return Err(DiscoveryError::Unreachable),
                }
            }
        };
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Discovery outcome of a single context.
#[derive(Debug)]
pub struct ContextNamespaces {
    pub name: String,
    pub namespaces: Result<Vec<String>, DiscoveryError>,
}

/// Discover every context, one after another, in sorted name order.
pub async fn discover_all<L: NamespaceLister>(
    lister: &L,
    merged: &MergedConfig,
) -> Vec<ContextNamespaces> {
    let mut results = Vec::new();
    for name in merged.context_names() {
        let namespaces = lister.list_namespaces(&merged.kubeconfig, &name).await;
        match namespaces.as_ref() {
            Ok(names) => debug!("context '{name}': {} namespaces", names.len()),
            Err(DiscoveryError::Other(msg)) => debug!("context '{name}': {msg}"),
            Err(err) => debug!("context '{name}': {err}"),
        }
        results.push(ContextNamespaces { name, namespaces });
    }
    results
}

#[cfg(test)]
mod tests {
    use std::io;

    use kube::core::ErrorResponse;

    use super::*;

    const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: closed
  cluster:
    server: http://127.0.0.1:1
contexts:
- name: closed
  context:
    cluster: closed
    user: someone
- name: dangling
  context:
    cluster: does-not-exist
    user: someone
- name: prod-eu
  context:
    cluster: does-not-exist
    user: someone
users:
- name: someone
  user:
    token: abc
current-context: closed
"#;

    fn kubeconfig() -> ApiKubeconfig {
        serde_yaml::from_str(KUBECONFIG).unwrap()
    }

    #[test]
    fn display_strings() {
        assert_eq!(DiscoveryError::Unreachable.to_string(), "unreachable");
        assert_eq!(
            DiscoveryError::ApiRejected(String::from("forbidden")).to_string(),
            "error from api: forbidden"
        );
        assert_eq!(
            DiscoveryError::Other(String::from("exec plugin failed")).to_string(),
            "error"
        );
    }

    #[test]
    fn classify_kube_errors() {
        let api = kube::Error::Api(ErrorResponse {
            status: String::from("Failure"),
            message: String::from("namespaces is forbidden"),
            reason: String::from("Forbidden"),
            code: 403,
        });
        assert_eq!(
            DiscoveryError::from(api),
            DiscoveryError::ApiRejected(String::from("namespaces is forbidden"))
        );

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let service = kube::Error::Service(Box::new(refused));
        assert_eq!(DiscoveryError::from(service), DiscoveryError::Unreachable);

        let bad_utf8 = String::from_utf8(vec![0xff]).unwrap_err();
        let other = kube::Error::FromUtf8(bad_utf8);
        assert!(matches!(
            DiscoveryError::from(other),
            DiscoveryError::Other(_)
        ));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let cfg = Config::default();
        let discoverer = Discoverer::new(&cfg);
        let result = discoverer.list_namespaces(&kubeconfig(), "closed").await;
        assert_eq!(result, Err(DiscoveryError::Unreachable));
    }

    #[tokio::test]
    async fn dangling_cluster_is_generic_error() {
        let cfg = Config::default();
        let discoverer = Discoverer::new(&cfg);
        let result = discoverer.list_namespaces(&kubeconfig(), "dangling").await;
        assert!(matches!(result, Err(DiscoveryError::Other(_))));
    }

    #[tokio::test]
    async fn alias_skips_cluster() {
        let mut cfg = Config::parse(
            r#"
            [[ns_alias]]
            regex = "^prod-"
            alias = ["web", "default", "web"]
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();

        let discoverer = Discoverer::new(&cfg);
        let result = discoverer.list_namespaces(&kubeconfig(), "prod-eu").await;
        assert_eq!(result, Ok(vec![String::from("default"), String::from("web")]));
    }
}
