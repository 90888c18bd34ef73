//! The coordinator actor
//!
//! One task owns the topology. Read queries, administrative commands,
//! discovery updates, and the two timers all funnel into a single
//! `select!` loop, so processing one event is atomic with respect to the
//! topology — the switchover needs no locks because nothing else can see
//! intermediate state.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mysentry_core::{
    Endpoint, MonitorConfig, MonitorError, ReplicationDriver, Secrets, Topology, TopologyFiles,
    TopologySnapshot,
};

use crate::actions::{self, Action};
use crate::report::GraphiteReporter;
use crate::snapshot::{self, SnapshotPublisher};
use crate::view::{self, InstanceView};

type Responder<T> = oneshot::Sender<Result<T, MonitorError>>;

/// Requests the coordinator serializes.
enum Command {
    Overview {
        reply: Responder<Vec<InstanceView>>,
    },
    Detail {
        endpoint: Endpoint,
        reply: Responder<InstanceView>,
    },
    Apply {
        endpoint: Endpoint,
        action: Action,
        reply: Responder<()>,
    },
    Subscribe {
        reply: oneshot::Sender<Subscription>,
    },
}

/// A snapshot-feed membership: the current snapshot (delivered immediately)
/// plus the update stream.
pub struct Subscription {
    pub current: TopologySnapshot,
    pub updates: broadcast::Receiver<TopologySnapshot>,
}

/// Cheap cloneable front door to the coordinator. Every call blocks until
/// the coordinator answers; a closed channel maps to `ChannelClosed`.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
}

impl MonitorHandle {
    pub async fn overview(&self) -> Result<Vec<InstanceView>, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Overview { reply }).await?;
        rx.await?
    }

    pub async fn detail(&self, endpoint: Endpoint) -> Result<InstanceView, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Detail { endpoint, reply })
            .await?;
        rx.await?
    }

    pub async fn apply(&self, endpoint: Endpoint, action: Action) -> Result<(), MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Apply {
                endpoint,
                action,
                reply,
            })
            .await?;
        rx.await?
    }

    /// Join the snapshot feed: the reply carries the current snapshot, so a
    /// new subscriber never starts from a torn or stale view.
    pub async fn subscribe(&self) -> Result<Subscription, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Subscribe { reply }).await?;
        Ok(rx.await?)
    }
}

/// The actor. Construct with [`Coordinator::new`], restore state with
/// [`Coordinator::load`], then hand it to [`Coordinator::run`] on its own
/// task.
pub struct Coordinator {
    config: MonitorConfig,
    driver: Arc<dyn ReplicationDriver>,
    topology: Topology,
    files: TopologyFiles,
    publisher: SnapshotPublisher,
    reporter: Option<GraphiteReporter>,
    commands: mpsc::Receiver<Command>,
    discovery: mpsc::Receiver<BTreeSet<Endpoint>>,
}

impl Coordinator {
    /// Returns the actor plus its two inbound channels: the handle for
    /// queries/commands and the sender the discovery feed pushes live
    /// endpoint sets into.
    pub fn new(
        config: MonitorConfig,
        driver: Arc<dyn ReplicationDriver>,
    ) -> (Self, MonitorHandle, mpsc::Sender<BTreeSet<Endpoint>>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (discovery_tx, discovery_rx) = mpsc::channel(16);
        let files = TopologyFiles::new(&config.state_dir);
        let reporter = config
            .graphite_address
            .as_ref()
            .map(|addr| GraphiteReporter::new(addr, &config.domain, &config.app_name));
        let coordinator = Self {
            config,
            driver,
            topology: Topology::new(),
            files,
            publisher: SnapshotPublisher::new(64),
            reporter,
            commands: command_rx,
            discovery: discovery_rx,
        };
        (
            coordinator,
            MonitorHandle {
                commands: command_tx,
            },
            discovery_tx,
        )
    }

    /// Restore the persisted topology and re-register every restored
    /// endpoint with the driver. Registration failures are logged, not
    /// fatal: the instance may simply be down right now.
    pub async fn load(&mut self) -> Result<(), MonitorError> {
        self.topology = self.files.load()?;
        let secrets = Secrets::load(&self.config.secret_file).unwrap_or_else(|e| {
            warn!(file = %self.config.secret_file.display(), error = %e, "secret file unreadable");
            Secrets::default()
        });
        let credentials = secrets.credentials();
        let endpoints: Vec<Endpoint> = self.topology.iter().map(|(ep, _)| ep.clone()).collect();
        for endpoint in endpoints {
            if let Err(e) = self.driver.register(&endpoint, &credentials).await {
                warn!(endpoint = %endpoint, error = %e, "restoring registration failed");
            }
        }
        info!(
            master = ?self.topology.master(),
            standby = ?self.topology.standby(),
            slaves = self.topology.slaves().len(),
            "topology restored"
        );
        Ok(())
    }

    /// The serialized event loop. Runs until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut inspect = tokio::time::interval(self.config.inspect_interval);
        inspect.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report = tokio::time::interval(self.config.report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // intervals fire once immediately; consume so the first inspection
        // and report land one period in
        inspect.tick().await;
        report.tick().await;

        // Seed the publisher so the first subscriber sees reality, not an
        // empty default.
        self.refresh_snapshot().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("coordinator stopping");
                    return;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }
                Some(live) = self.discovery.recv() => {
                    self.reconcile(&live).await;
                }
                _ = inspect.tick() => {}
                _ = report.tick() => {
                    self.report().await;
                }
            }
            self.refresh_snapshot().await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Overview { reply } => {
                let result = view::overview(&self.topology, self.driver.as_ref()).await;
                let _ = reply.send(result);
            }
            Command::Detail { endpoint, reply } => {
                let result = view::detail(&self.topology, self.driver.as_ref(), &endpoint).await;
                let _ = reply.send(result);
            }
            Command::Apply {
                endpoint,
                action,
                reply,
            } => {
                let result = self.handle_action(&endpoint, action).await;
                let _ = reply.send(result);
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(Subscription {
                    current: self.publisher.current(),
                    updates: self.publisher.subscribe(),
                });
            }
        }
    }

    async fn handle_action(
        &mut self,
        endpoint: &Endpoint,
        action: Action,
    ) -> Result<(), MonitorError> {
        if !self.topology.contains(endpoint) {
            return Err(MonitorError::NotFound(endpoint.clone()));
        }
        let changed = actions::apply(
            &mut self.topology,
            self.driver.as_ref(),
            &self.config,
            endpoint,
            action,
        )
        .await?;
        if changed {
            self.persist();
        }
        Ok(())
    }

    /// Merge a freshly discovered set of live endpoints into the role
    /// partitions. Tracked endpoints missing from the live set are lost
    /// (the driver forgets registered ones); live endpoints we have never
    /// seen land in `unregistered`. Applying the same set twice is a no-op.
    async fn reconcile(&mut self, live: &BTreeSet<Endpoint>) {
        let mut changed = false;

        if let Some(master) = self.topology.master().cloned() {
            if !live.contains(&master) {
                error!(endpoint = %master, "master endpoint lost, unregistering");
                self.driver.unregister(&master).await;
                self.topology.remove(&master);
                changed = true;
            }
        }
        if let Some(standby) = self.topology.standby().cloned() {
            if !live.contains(&standby) {
                info!(endpoint = %standby, "standby endpoint lost, unregistering");
                self.driver.unregister(&standby).await;
                self.topology.remove(&standby);
                changed = true;
            }
        }
        for slave in self.topology.slaves().clone() {
            if !live.contains(&slave) {
                info!(endpoint = %slave, "slave endpoint lost, unregistering");
                self.driver.unregister(&slave).await;
                self.topology.remove(&slave);
                changed = true;
            }
        }
        for unregistered in self.topology.unregistered().clone() {
            if !live.contains(&unregistered) {
                debug!(endpoint = %unregistered, "unregistered endpoint gone");
                self.topology.remove(&unregistered);
                changed = true;
            }
        }
        for endpoint in live {
            if self.topology.insert_unregistered(endpoint.clone()) {
                debug!(endpoint = %endpoint, "new endpoint discovered");
                changed = true;
            }
        }

        if changed {
            self.persist();
        }
    }

    async fn refresh_snapshot(&mut self) {
        let next = snapshot::compute(&self.topology, self.driver.as_ref()).await;
        if self.publisher.publish_if_changed(next) {
            debug!("topology snapshot updated");
        }
    }

    async fn report(&self) {
        if let Some(reporter) = &self.reporter {
            reporter.report(&self.topology, self.driver.as_ref()).await;
        }
    }

    fn persist(&self) {
        if let Err(e) = self.files.save(&self.topology) {
            error!(error = %e, "persisting topology failed");
        }
    }
}
