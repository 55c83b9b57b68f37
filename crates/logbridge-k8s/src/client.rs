use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use kube::api::{Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde_json::{Value, json};
use tracing::debug;

/// Namespaced name of a ConfigMap
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigMapRef {
    pub namespace: String,
    pub name: String,
}

impl ConfigMapRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ConfigMapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read and patch access to ConfigMap data
pub trait ConfigStore: Send + Sync {
    /// Fetch the data section of a ConfigMap
    fn get_data(
        &self,
        map: &ConfigMapRef,
    ) -> impl Future<Output = Result<BTreeMap<String, String>>> + Send;

    /// Set a single data key of a ConfigMap, leaving the other keys untouched
    fn patch_data(
        &self,
        map: &ConfigMapRef,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// ConfigMap store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeConfigStore {
    client: kube::Client,
}

impl KubeConfigStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the given kubeconfig context, or the in-cluster/default configuration
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let client = match context {
            Some(context_name) => {
                let kubeconfig = Kubeconfig::read()
                    .context("Failed to read kubeconfig. Is kubectl configured?")?;
                let config = kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: Some(context_name.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .context(format!(
                    "Failed to create config for context: {}",
                    context_name
                ))?;
                kube::Client::try_from(config).context(format!(
                    "Failed to create client for context: {}",
                    context_name
                ))?
            }
            None => kube::Client::try_default()
                .await
                .context("Failed to create Kubernetes client")?,
        };

        Ok(Self::new(client))
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl ConfigStore for KubeConfigStore {
    async fn get_data(&self, map: &ConfigMapRef) -> Result<BTreeMap<String, String>> {
        let config_map = self
            .api(&map.namespace)
            .get(&map.name)
            .await
            .context(format!("Failed to get ConfigMap {}", map))?;

        Ok(config_map.data.unwrap_or_default())
    }

    async fn patch_data(&self, map: &ConfigMapRef, key: &str, value: &str) -> Result<()> {
        let mut data = serde_json::Map::new();
        data.insert(key.to_string(), Value::String(value.to_string()));
        let patch = json!({ "data": data });
        self.api(&map.namespace)
            .patch(&map.name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .context(format!("Failed to patch key {} of ConfigMap {}", key, map))?;

        debug!(config_map = %map, key, "Patched ConfigMap");
        Ok(())
    }
}
