//! Context Enricher (spec §4.5).
//!
//! Prefers data already present on the signal (a termination message) over a
//! network round-trip; when it must fetch, bounds total concurrency with two
//! `tokio::sync::Semaphore`s — per-cluster and global — the same layered
//! back-pressure idea the Manager applies to subscription counts (spec §4.8
//! limits), just expressed as permits instead of a registry check.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;

use crate::detectors::{looks_like_panic, FaultSignal, Severity};
use crate::transport::LogFetcher;

/// One container worth of log-fetch intent, supplied by the caller (the
/// Resource Watcher, which already holds the Pod's container list from the
/// informer cache).
#[derive(Debug, Clone)]
pub struct ContainerSample {
    pub name: String,
    /// Whether this container has restarted — when true, also fetch the
    /// `previous` instance's log (spec §4.5 step 3).
    pub restarted: bool,
}

pub struct ContextEnricher {
    fetcher: Arc<dyn LogFetcher>,
    global: Arc<Semaphore>,
    per_cluster: DashMap<String, Arc<Semaphore>>,
    per_cluster_permits: usize,
    max_containers: usize,
    max_bytes_per_container: usize,
    fetch_timeout: Duration,
}

impl ContextEnricher {
    pub fn new(
        fetcher: Arc<dyn LogFetcher>,
        per_cluster_permits: usize,
        global_permits: usize,
        max_containers: usize,
        max_bytes_per_container: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            global: Arc::new(Semaphore::new(global_permits)),
            per_cluster: DashMap::new(),
            per_cluster_permits,
            max_containers,
            max_bytes_per_container,
            fetch_timeout,
        }
    }

    fn cluster_semaphore(&self, cluster: &str) -> Arc<Semaphore> {
        self.per_cluster
            .entry(cluster.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_cluster_permits)))
            .clone()
    }

    /// Fill in `signal.context` if the enricher policy allows a fetch
    /// (spec §4.5, §8 "Enricher policy").
    pub async fn enrich(&self, cluster: &str, mut signal: FaultSignal, containers: &[ContainerSample]) -> FaultSignal {
        if !signal.context.is_empty() {
            return signal;
        }
        if signal.kind != "Pod" || signal.severity != Severity::Critical {
            return signal;
        }
        if signal.namespace.is_empty() || signal.name.is_empty() {
            return signal;
        }

        let ordered = self.order_containers(&signal, containers);
        let mut segments = Vec::new();
        for container in ordered.iter().take(self.max_containers) {
            segments.push(self.fetch_segment(cluster, &signal, container, false).await);
            if container.restarted {
                segments.push(self.fetch_segment(cluster, &signal, container, true).await);
            }
        }
        signal.context = segments.join("\n");
        signal
    }

    /// The signal's own container goes first so it's never dropped by the
    /// `max_containers` cap; remaining siblings follow in caller order.
    fn order_containers(&self, signal: &FaultSignal, containers: &[ContainerSample]) -> Vec<ContainerSample> {
        let mut ordered = Vec::with_capacity(containers.len());
        if let Some(primary) = containers.iter().find(|c| c.name == signal.container_name) {
            ordered.push(primary.clone());
        }
        for container in containers {
            if container.name != signal.container_name {
                ordered.push(container.clone());
            }
        }
        ordered
    }

    async fn fetch_segment(
        &self,
        cluster: &str,
        signal: &FaultSignal,
        container: &ContainerSample,
        previous: bool,
    ) -> String {
        let label = if previous {
            format!("{}[previous]", container.name)
        } else {
            container.name.clone()
        };

        let global_permit = match self.global.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return format!("[{label}] error=throttled"),
        };
        let cluster_permit = match self.cluster_semaphore(cluster).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return format!("[{label}] error=throttled"),
        };

        let result = self
            .fetcher
            .fetch(
                cluster,
                &signal.namespace,
                &signal.name,
                &container.name,
                previous,
                self.max_bytes_per_container,
                self.fetch_timeout,
            )
            .await;
        drop(global_permit);
        drop(cluster_permit);

        match result {
            Ok(text) => {
                let has_panic = looks_like_panic(&text);
                format!("[{label} hasPanic={has_panic}] {text}")
            }
            Err(err) => format!("[{label}] error={err}"),
        }
    }
}
