//! Discovery feed
//!
//! A background task watches the process-inventory service for the set of
//! running database-server processes and pushes every distinct live
//! endpoint set into the coordinator's discovery channel. The watch
//! reconnects forever with a fixed cooldown; the task itself is cancellable
//! through the shutdown channel, and the watcher is a trait so tests can
//! drive a bounded number of updates through the same pump.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mysentry_core::{Endpoint, MonitorError};

/// One process instance as the inventory service reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessInstance {
    #[serde(rename = "InstanceNo")]
    pub instance_no: u32,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "ProcName")]
    pub proc_name: String,
}

/// One application's processes in an inventory update.
#[derive(Debug, Clone, Deserialize)]
pub struct AppProcs {
    #[serde(rename = "proc", default)]
    pub procs: Vec<ProcessInstance>,
}

/// A subscription source yielding full inventory updates.
#[async_trait]
pub trait InventoryWatcher: Send + Sync {
    /// Open one watch. The stream ends or errors when the connection does;
    /// the pump reconnects after a cooldown.
    async fn watch(
        &self,
    ) -> Result<BoxStream<'static, Result<Vec<AppProcs>, MonitorError>>, MonitorError>;
}

/// Watches the inventory HTTP service, one JSON document per line.
pub struct HttpInventoryWatcher {
    client: reqwest::Client,
    url: String,
}

impl HttpInventoryWatcher {
    pub fn new(base_url: &str, app_name: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{base_url}/v2/procwatcher?appname={app_name}"),
        }
    }
}

#[async_trait]
impl InventoryWatcher for HttpInventoryWatcher {
    async fn watch(
        &self,
    ) -> Result<BoxStream<'static, Result<Vec<AppProcs>, MonitorError>>, MonitorError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MonitorError::Unavailable(e.to_string()))?;
        info!(url = %self.url, "inventory watch connected");

        let stream = futures::stream::unfold(
            (response.bytes_stream(), String::new()),
            |(mut chunks, mut buffer)| async move {
                loop {
                    if let Some(pos) = buffer.find('\n') {
                        let line: String = buffer.drain(..=pos).collect();
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let parsed = serde_json::from_str::<Vec<AppProcs>>(line).map_err(|e| {
                            MonitorError::Unavailable(format!("bad inventory payload: {e}"))
                        });
                        return Some((parsed, (chunks, buffer)));
                    }
                    match chunks.next().await {
                        Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                        Some(Err(e)) => {
                            return Some((
                                Err(MonitorError::Unavailable(e.to_string())),
                                (chunks, buffer),
                            ))
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }
}

/// Extract the live database endpoints from one inventory update. The
/// endpoint name is `<proc_name>-<instance_no>:<port>`, matching how the
/// platform names container instances.
pub fn live_endpoints(update: &[AppProcs], proc_name: &str) -> BTreeSet<Endpoint> {
    update
        .iter()
        .flat_map(|app| &app.procs)
        .filter(|p| p.proc_name == proc_name)
        .map(|p| Endpoint::new(format!("{}-{}", p.proc_name, p.instance_no), p.port))
        .collect()
}

/// Spawn the discovery pump feeding the coordinator.
pub fn spawn(
    watcher: Arc<dyn InventoryWatcher>,
    proc_name: String,
    cooldown: Duration,
    tx: mpsc::Sender<BTreeSet<Endpoint>>,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run(watcher, proc_name, cooldown, tx, shutdown))
}

/// The watch-reconnect loop. Consecutive identical endpoint sets are
/// de-duplicated here so the coordinator only reconciles real changes.
pub async fn run(
    watcher: Arc<dyn InventoryWatcher>,
    proc_name: String,
    cooldown: Duration,
    tx: mpsc::Sender<BTreeSet<Endpoint>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut last: Option<BTreeSet<Endpoint>> = None;
    loop {
        let stream = tokio::select! {
            _ = shutdown.recv() => return,
            watched = watcher.watch() => watched,
        };
        match stream {
            Ok(mut stream) => loop {
                let item = tokio::select! {
                    _ = shutdown.recv() => return,
                    item = stream.next() => item,
                };
                match item {
                    Some(Ok(update)) => {
                        let endpoints = live_endpoints(&update, &proc_name);
                        if last.as_ref() == Some(&endpoints) {
                            continue;
                        }
                        debug!(count = endpoints.len(), "live endpoint set changed");
                        last = Some(endpoints.clone());
                        if tx.send(endpoints).await.is_err() {
                            // coordinator is gone, so are we
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "inventory watch error");
                        break;
                    }
                    None => {
                        debug!("inventory watch ended");
                        break;
                    }
                }
            },
            Err(e) => {
                warn!(error = %e, "inventory watch connect failed");
            }
        }
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(cooldown) => {}
        }
    }
}
