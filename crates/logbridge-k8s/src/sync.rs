//! Synchronization of cluster log forwarders into the log store forwarder config
//!
//! The cluster keeps one YAML forwarder entry per key of a ConfigMap. The log
//! store reads a JSON document with a worker list from another ConfigMap. Each
//! cycle rebuilds that worker list from the cluster entries.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logbridge_types::{ClusterForwarder, ForwarderConfig, ForwarderDocument, WorkerConfig};

use crate::client::{ConfigMapRef, ConfigStore};

/// Data key holding the forwarder document
pub const FORWARDER_KEY: &str = "forward.json";

/// Read the worker template from a JSON file
pub async fn load_worker_template(path: &Path) -> Result<WorkerConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .context(format!("Failed to read worker template {}", path.display()))?;
    serde_json::from_str(&raw)
        .context(format!("Failed to parse worker template {}", path.display()))
}

/// Drop entries without a name or an address
pub fn filter_invalid(entries: Vec<ClusterForwarder>) -> Vec<ClusterForwarder> {
    entries
        .into_iter()
        .filter(|entry| {
            if entry.metadata.name.is_empty() {
                warn!(address = %entry.spec.address, "Forwarder has no name, skipping");
                return false;
            }
            if entry.spec.address.is_empty() {
                warn!(name = %entry.metadata.name, "Forwarder has no address, skipping");
                return false;
            }
            true
        })
        .collect()
}

/// Replace the worker list with one templated worker per entry
pub fn merge_forwarders(
    config: &ForwarderConfig,
    entries: &[ClusterForwarder],
    template: &WorkerConfig,
) -> ForwarderConfig {
    let mut merged = config.clone();
    merged.workers = entries
        .iter()
        .map(|entry| {
            let mut worker = template.clone();
            worker.name = entry.metadata.name.clone();
            worker.sink.params.insert(
                "RemoteAddr".to_string(),
                Value::String(entry.spec.address.clone()),
            );
            if let Some(protocol) = entry.spec.protocol.as_deref().filter(|p| !p.is_empty()) {
                worker
                    .sink
                    .params
                    .insert("Protocol".to_string(), Value::String(protocol.to_string()));
            }
            worker
        })
        .collect();
    merged
}

/// Keeps the log store forwarder config in line with the cluster forwarders
pub struct ForwarderSync<C> {
    store: C,
    cluster: ConfigMapRef,
    target: ConfigMapRef,
    key: String,
    template: WorkerConfig,
}

impl<C: ConfigStore> ForwarderSync<C> {
    /// `cluster` holds the forwarder entries, `target` the forwarder document
    pub fn new(
        store: C,
        cluster: ConfigMapRef,
        target: ConfigMapRef,
        template: WorkerConfig,
    ) -> Self {
        Self {
            store,
            cluster,
            target,
            key: FORWARDER_KEY.to_string(),
            template,
        }
    }

    /// Use a different data key for the forwarder document
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Run one sync cycle, returning the number of workers written
    pub async fn sync_once(&self) -> Result<usize> {
        debug!(config_map = %self.target, "Reading forwarder document");
        let mut document = self.read_document().await?;

        debug!(config_map = %self.cluster, "Reading cluster forwarders");
        let entries = filter_invalid(self.read_cluster_forwarders().await?);

        let merged = merge_forwarders(&document.forwarder, &entries, &self.template);
        let count = merged.workers.len();
        info!(
            from = document.forwarder.workers.len(),
            to = count,
            config_map = %self.target,
            "Updating forwarder workers"
        );
        document.forwarder = merged;

        let value = serde_json::to_string(&document).context("Failed to encode forwarder document")?;
        self.store.patch_data(&self.target, &self.key, &value).await?;
        Ok(count)
    }

    /// Sync every `interval` until `cancel` fires
    ///
    /// A failed cycle is logged and skipped; the next attempt happens on the next tick.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.sync_once().await {
                        error!(error = %format!("{:#}", err), "Forwarder sync failed");
                    }
                }
            }
        }
        info!("Forwarder sync stopped");
    }

    async fn read_document(&self) -> Result<ForwarderDocument> {
        let data = self.store.get_data(&self.target).await?;
        let raw = data
            .get(&self.key)
            .ok_or_else(|| anyhow!("No key {} in ConfigMap {}", self.key, self.target))?;
        serde_json::from_str(raw).context(format!(
            "Failed to parse key {} of ConfigMap {}",
            self.key, self.target
        ))
    }

    async fn read_cluster_forwarders(&self) -> Result<Vec<ClusterForwarder>> {
        let data = self.store.get_data(&self.cluster).await?;
        let mut entries = Vec::with_capacity(data.len());
        for (key, raw) in &data {
            match serde_yaml::from_str::<ClusterForwarder>(raw) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(
                    key = %key,
                    config_map = %self.cluster,
                    error = %err,
                    "Failed to parse forwarder entry, skipping"
                ),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};

    const TEMPLATE: &str = r#"{"Name":"template","Pipe":{"Name":"lr"},"Sink":{"Type":"syslog","Params":{"Protocol":"tcp","RemoteAddr":""}}}"#;

    const DOCUMENT: &str = r#"{"Forwarder":{"Workers":[{"Name":"old","Sink":{"Type":"syslog","Params":{}}}],"SyncWorkersIntervalSec":20},"Transport":{"ListenAddr":"lr:9966"}}"#;

    #[derive(Default)]
    struct FakeStore {
        maps: Mutex<HashMap<ConfigMapRef, BTreeMap<String, String>>>,
        patches: Mutex<Vec<(ConfigMapRef, String, String)>>,
    }

    impl FakeStore {
        fn with(self, map: &ConfigMapRef, data: &[(&str, &str)]) -> Self {
            self.maps.lock().insert(
                map.clone(),
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            self
        }
    }

    impl ConfigStore for FakeStore {
        async fn get_data(&self, map: &ConfigMapRef) -> Result<BTreeMap<String, String>> {
            self.maps
                .lock()
                .get(map)
                .cloned()
                .ok_or_else(|| anyhow!("ConfigMap {} not found", map))
        }

        async fn patch_data(&self, map: &ConfigMapRef, key: &str, value: &str) -> Result<()> {
            self.patches
                .lock()
                .push((map.clone(), key.to_string(), value.to_string()));
            Ok(())
        }
    }

    fn cluster() -> ConfigMapRef {
        ConfigMapRef::new("kube-system", "log-forwarders")
    }

    fn target() -> ConfigMapRef {
        ConfigMapRef::new("kube-system", "lr-forwarder")
    }

    fn template() -> WorkerConfig {
        serde_json::from_str(TEMPLATE).unwrap()
    }

    fn entry(name: &str, address: &str, protocol: Option<&str>) -> ClusterForwarder {
        let mut entry = ClusterForwarder::default();
        entry.metadata.name = name.to_string();
        entry.spec.address = address.to_string();
        entry.spec.protocol = protocol.map(str::to_string);
        entry
    }

    #[test]
    fn test_filter_invalid() {
        let entries = filter_invalid(vec![
            entry("a", "10.0.0.1:514", None),
            entry("", "10.0.0.2:514", None),
            entry("c", "", None),
        ]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata.name, "a");
    }

    #[test]
    fn test_merge_overlays_template() {
        let config: ForwarderDocument = serde_json::from_str(DOCUMENT).unwrap();
        let merged = merge_forwarders(
            &config.forwarder,
            &[
                entry("a", "10.0.0.1:514", Some("udp")),
                entry("b", "10.0.0.2:514", None),
            ],
            &template(),
        );

        assert_eq!(merged.workers.len(), 2);
        assert_eq!(merged.workers[0].name, "a");
        assert_eq!(merged.workers[0].sink.params["RemoteAddr"], "10.0.0.1:514");
        assert_eq!(merged.workers[0].sink.params["Protocol"], "udp");
        assert_eq!(merged.workers[1].sink.params["Protocol"], "tcp");
        assert_eq!(merged.workers[1].extra["Pipe"]["Name"], "lr");
        assert_eq!(merged.extra["SyncWorkersIntervalSec"], 20);
    }

    #[tokio::test]
    async fn test_sync_once_patches_document() {
        let store = FakeStore::default()
            .with(&target(), &[(FORWARDER_KEY, DOCUMENT)])
            .with(
                &cluster(),
                &[
                    (
                        "fwd1",
                        "kind: logforwarder\nmetadata:\n  name: fwd1\nspec:\n  address: 10.0.0.1:514\n  protocol: udp\n",
                    ),
                    ("broken", "metadata: [unclosed"),
                    ("noaddr", "metadata:\n  name: noaddr\nspec: {}\n"),
                ],
            );
        let sync = ForwarderSync::new(store, cluster(), target(), template());

        assert_eq!(sync.sync_once().await.unwrap(), 1);

        let patches = sync.store.patches.lock();
        assert_eq!(patches.len(), 1);
        let (map, key, value) = &patches[0];
        assert_eq!(map, &target());
        assert_eq!(key, FORWARDER_KEY);

        let written: Value = serde_json::from_str(value).unwrap();
        assert_eq!(written["Forwarder"]["Workers"][0]["Name"], "fwd1");
        assert_eq!(
            written["Forwarder"]["Workers"][0]["Sink"]["Params"]["RemoteAddr"],
            "10.0.0.1:514"
        );
        assert_eq!(written["Forwarder"]["SyncWorkersIntervalSec"], 20);
        assert_eq!(written["Transport"]["ListenAddr"], "lr:9966");
    }

    #[tokio::test]
    async fn test_sync_once_fails_without_document_key() {
        let store = FakeStore::default()
            .with(&target(), &[("other.json", "{}")])
            .with(&cluster(), &[]);
        let sync = ForwarderSync::new(store, cluster(), target(), template());

        assert!(sync.sync_once().await.is_err());
        assert!(sync.store.patches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let store = FakeStore::default()
            .with(&target(), &[(FORWARDER_KEY, DOCUMENT)])
            .with(&cluster(), &[]);
        let sync = ForwarderSync::new(store, cluster(), target(), template());
        let cancel = CancellationToken::new();

        let run = sync.run(Duration::from_secs(3600), cancel.clone());
        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };
        tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(run, stop) })
            .await
            .unwrap();

        // first tick fires immediately
        assert_eq!(sync.store.patches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_load_worker_template_missing_file() {
        let result = load_worker_template(Path::new("/nonexistent/forward-tmpl.json")).await;
        assert!(result.is_err());
    }
}
