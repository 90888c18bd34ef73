//! Snapshot feed subscription
//!
//! Long-lived SSE subscription to the monitor's `/servers` feed. Every
//! `init` or `update` event carries the full routing snapshot; the list for
//! this proxy's service mode replaces the target pool (resetting round
//! robin). The subscription reconnects forever with a fixed cooldown and
//! stops only on shutdown.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use mysentry_core::{ProxyConfig, ServiceMode, TopologySnapshot};

use crate::proxy::TargetPool;

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Pop every complete frame (terminated by a blank line) off the buffer,
/// leaving any partial frame in place.
fn drain_frames(buffer: &mut String) -> Vec<SseEvent> {
    let mut frames = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let frame: String = buffer.drain(..pos + 2).collect();
        let mut event = String::new();
        let mut data_lines = Vec::new();
        for line in frame.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.trim().to_string());
            }
        }
        if !data_lines.is_empty() {
            frames.push(SseEvent {
                event,
                data: data_lines.join("\n"),
            });
        }
    }
    frames
}

/// Replace the pool from one snapshot payload.
fn apply_snapshot(
    pool: &TargetPool,
    mode: ServiceMode,
    data: &str,
) -> Result<usize, serde_json::Error> {
    let snapshot: TopologySnapshot = serde_json::from_str(data)?;
    let targets = match mode {
        ServiceMode::Master => snapshot.master,
        ServiceMode::Slave => snapshot.slave,
    };
    let count = targets.len();
    pool.replace(targets);
    Ok(count)
}

/// The subscribe-reconnect loop feeding the target pool.
pub async fn run_feed(
    config: ProxyConfig,
    pool: Arc<TargetPool>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let client = reqwest::Client::new();
    let url = format!("{}/servers", config.monitor_url.trim_end_matches('/'));
    loop {
        let response = tokio::select! {
            _ = shutdown.recv() => return,
            response = client.get(&url).send() => response,
        };
        match response.and_then(|r| r.error_for_status()) {
            Ok(response) => {
                info!(url = %url, "snapshot feed connected");
                let mut chunks = response.bytes_stream();
                let mut buffer = String::new();
                loop {
                    let chunk = tokio::select! {
                        _ = shutdown.recv() => return,
                        chunk = chunks.next() => chunk,
                    };
                    match chunk {
                        Some(Ok(bytes)) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));
                            for frame in drain_frames(&mut buffer) {
                                if frame.event != "init" && frame.event != "update" {
                                    continue;
                                }
                                match apply_snapshot(&pool, config.service_mode, &frame.data) {
                                    Ok(count) => info!(
                                        event = %frame.event,
                                        mode = %config.service_mode,
                                        targets = count,
                                        "target list refreshed"
                                    ),
                                    Err(e) => {
                                        warn!(error = %e, "bad snapshot payload")
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "snapshot feed read failed");
                            break;
                        }
                        None => {
                            warn!("snapshot feed closed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "snapshot feed connect failed");
            }
        }
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(config.cooldown) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysentry_core::Endpoint;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[test]
    fn test_drain_single_frame() {
        let mut buffer =
            "id: 1\nevent: init\ndata: {\"master\":[],\"slave\":[]}\n\n".to_string();
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "init");
        assert_eq!(frames[0].data, "{\"master\":[],\"slave\":[]}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_keeps_partial_frame() {
        let mut buffer = "event: update\ndata: {\"master\"".to_string();
        assert!(drain_frames(&mut buffer).is_empty());
        buffer.push_str(":[],\"slave\":[]}\n\nevent: upd");
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "update");
        assert_eq!(buffer, "event: upd");
    }

    #[test]
    fn test_drain_multiple_frames() {
        let mut buffer = "event: init\ndata: a\n\nevent: update\ndata: b\n\n".to_string();
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].event, "update");
    }

    #[test]
    fn test_apply_snapshot_by_mode() {
        let data = r#"{"master":["mysql-0:3306"],"slave":["mysql-1:3306","mysql-2:3306"]}"#;

        let pool = TargetPool::new();
        apply_snapshot(&pool, ServiceMode::Slave, data).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.pick(), Some(ep("mysql-1:3306")));

        let pool = TargetPool::new();
        apply_snapshot(&pool, ServiceMode::Master, data).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pick(), Some(ep("mysql-0:3306")));
    }

    #[test]
    fn test_apply_snapshot_rejects_garbage() {
        let pool = TargetPool::new();
        assert!(apply_snapshot(&pool, ServiceMode::Slave, "not json").is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_refresh_resets_round_robin() {
        let data_a = r#"{"master":[],"slave":["a:1","b:1","c:1"]}"#;
        let data_b = r#"{"master":[],"slave":["x:1","y:1"]}"#;
        let pool = TargetPool::new();
        apply_snapshot(&pool, ServiceMode::Slave, data_a).unwrap();
        assert_eq!(pool.pick(), Some(ep("a:1")));
        assert_eq!(pool.pick(), Some(ep("b:1")));
        apply_snapshot(&pool, ServiceMode::Slave, data_b).unwrap();
        assert_eq!(pool.pick(), Some(ep("x:1")));
    }
}
