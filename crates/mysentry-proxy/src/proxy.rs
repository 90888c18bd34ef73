//! Target selection and byte relay
//!
//! The target list is shared between the feed-refresh task (writer) and
//! every accepted connection (readers). A refresh replaces the whole list
//! and resets the round-robin cursor to the head of the new list; readers
//! only hold the lock long enough to copy out the chosen endpoint.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use mysentry_core::Endpoint;

/// The current target list plus the strictly incrementing round-robin
/// cursor.
#[derive(Default)]
pub struct TargetPool {
    targets: RwLock<Vec<Endpoint>>,
    next: AtomicUsize,
}

impl TargetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list. The cursor restarts at the head of the new list.
    pub fn replace(&self, targets: Vec<Endpoint>) {
        let mut guard = self.targets.write();
        *guard = targets;
        self.next.store(0, Ordering::SeqCst);
    }

    /// Next target in strict round-robin order, `None` while the list is
    /// empty.
    pub fn pick(&self) -> Option<Endpoint> {
        let guard = self.targets.read();
        if guard.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % guard.len();
        Some(guard[index].clone())
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }
}

/// Accept loop. While the target list is empty the listener does not
/// accept; it polls with the cooldown until targets appear again.
pub async fn run_listener(
    pool: Arc<TargetPool>,
    port: u16,
    cooldown: Duration,
    shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "proxy listening");
    serve(listener, pool, cooldown, shutdown).await
}

/// Accept loop over an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    pool: Arc<TargetPool>,
    cooldown: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    loop {
        if pool.is_empty() {
            debug!("no targets yet, rechecking in {:?}", cooldown);
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                _ = tokio::time::sleep(cooldown) => continue,
            }
        }
        let accepted = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((client, peer)) => {
                let pool = pool.clone();
                tokio::spawn(async move {
                    debug!(%peer, "accepted");
                    handle_connection(client, &pool).await;
                });
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                tokio::time::sleep(cooldown).await;
            }
        }
    }
}

async fn handle_connection(client: TcpStream, pool: &TargetPool) {
    // The list may have emptied between the accept and now.
    let Some(target) = pool.pick() else {
        warn!("no suitable targets");
        return;
    };
    let server = match TcpStream::connect(target.as_str()).await {
        Ok(server) => server,
        Err(e) => {
            error!(target = %target, error = %e, "dial failed");
            return;
        }
    };
    relay(client, server, &target).await;
}

/// Copy bytes both ways until either direction finishes, then tear both
/// sides down (half-close is not preserved).
async fn relay(client: TcpStream, server: TcpStream, target: &Endpoint) {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut server_read, mut server_write) = server.into_split();
    tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut server_write) => {
            debug!(target = %target, ?result, "client -> server done");
        }
        result = tokio::io::copy(&mut server_read, &mut client_write) => {
            debug!(target = %target, ?result, "server -> client done");
        }
    }
    // both halves drop here, closing both sockets
}
