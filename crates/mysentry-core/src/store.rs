//! Durable topology mirror
//!
//! The topology is mirrored to three text files under the state directory:
//! `master` and `standby` hold zero or one endpoint, `slave` holds one
//! endpoint per line. All three are rewritten completely after every
//! mutating event, so a restart reloads exactly the last committed roles.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::endpoint::Endpoint;
use crate::status::Role;
use crate::topology::Topology;

/// The three role files backing a [`Topology`].
#[derive(Debug, Clone)]
pub struct TopologyFiles {
    master: PathBuf,
    standby: PathBuf,
    slave: PathBuf,
}

impl TopologyFiles {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let dir = state_dir.as_ref();
        Self {
            master: dir.join("master"),
            standby: dir.join("standby"),
            slave: dir.join("slave"),
        }
    }

    /// Load the persisted partitions. Missing files mean an empty partition;
    /// unparseable lines are skipped with a warning so one corrupt entry
    /// does not take the whole topology down.
    pub fn load(&self) -> io::Result<Topology> {
        let mut topology = Topology::new();
        if let Some(ep) = read_single(&self.master)? {
            topology.insert_unregistered(ep.clone());
            let _ = topology.register(&ep, Role::Master);
        }
        if let Some(ep) = read_single(&self.standby)? {
            topology.insert_unregistered(ep.clone());
            let _ = topology.register(&ep, Role::Standby);
        }
        for ep in read_lines(&self.slave)? {
            topology.insert_unregistered(ep.clone());
            let _ = topology.register(&ep, Role::Slave);
        }
        Ok(topology)
    }

    /// Rewrite all three files from the current partitions.
    pub fn save(&self, topology: &Topology) -> io::Result<()> {
        if let Some(dir) = self.master.parent() {
            fs::create_dir_all(dir)?;
        }
        write_optional(&self.master, topology.master())?;
        write_optional(&self.standby, topology.standby())?;
        let slaves: Vec<String> = topology
            .slaves()
            .iter()
            .map(|ep| ep.as_str().to_string())
            .collect();
        fs::write(&self.slave, join_lines(&slaves))?;
        Ok(())
    }
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("{}\n", lines.join("\n"))
    }
}

fn write_optional(path: &Path, endpoint: Option<&Endpoint>) -> io::Result<()> {
    match endpoint {
        Some(ep) => fs::write(path, format!("{ep}\n")),
        None => fs::write(path, ""),
    }
}

fn read_single(path: &Path) -> io::Result<Option<Endpoint>> {
    let mut endpoints = read_lines(path)?;
    if endpoints.len() > 1 {
        warn!(file = %path.display(), "expected at most one endpoint, using the first");
    }
    Ok(if endpoints.is_empty() {
        None
    } else {
        Some(endpoints.remove(0))
    })
}

fn read_lines(path: &Path) -> io::Result<Vec<Endpoint>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut endpoints = Vec::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<Endpoint>() {
            Ok(ep) => endpoints.push(ep),
            Err(_) => warn!(file = %path.display(), line, "skipping unparseable endpoint"),
        }
    }
    Ok(endpoints)
}
