//! In-memory connector for exercising the collection pipeline, and stand-in
//! executables for the `ssh` and `aws` binaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::sampler::{CPU_COMMAND, DISK_COMMAND, MEMORY_COMMAND};
use super::tunnel::{CommandOutput, Connector, RemoteShell};
use crate::error::ConnectFailure;

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Connect after `delay_ms`, report this idle percentage.
    Healthy { idle: f64, delay_ms: u64 },
    RefuseConnect,
    GarbledOutput,
    Hang,
}

#[derive(Default)]
pub struct Stats {
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
}

struct InFlight(Arc<Stats>);

impl InFlight {
    fn enter(stats: &Arc<Stats>) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(stats.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Behaves per target address. Unknown addresses refuse the connection.
pub struct FakeConnector {
    behaviours: HashMap<String, Behaviour>,
    pub stats: Arc<Stats>,
}

impl FakeConnector {
    pub fn new(behaviours: &[(&str, Behaviour)]) -> Arc<Self> {
        Arc::new(Self {
            behaviours: behaviours
                .iter()
                .map(|(a, b)| (a.to_string(), *b))
                .collect(),
            stats: Arc::new(Stats::default()),
        })
    }
}

pub struct FakeSession {
    behaviour: Behaviour,
    in_flight: InFlight,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.in_flight.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self, target_address: &str) -> Result<FakeSession, ConnectFailure> {
        let guard = InFlight::enter(&self.stats);
        let behaviour = self
            .behaviours
            .get(target_address)
            .copied()
            .unwrap_or(Behaviour::RefuseConnect);

        match behaviour {
            Behaviour::Healthy { delay_ms, .. } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Behaviour::RefuseConnect => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                return Err(ConnectFailure::Rejected {
                    address: target_address.to_string(),
                    stderr: "Permission denied (publickey)".into(),
                });
            }
            Behaviour::GarbledOutput => {}
            Behaviour::Hang => tokio::time::sleep(Duration::from_secs(30)).await,
        }

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            behaviour,
            in_flight: guard,
        })
    }
}

impl RemoteShell for FakeSession {
    async fn exec(&self, command: &str) -> std::io::Result<CommandOutput> {
        let stdout = match (self.behaviour, command) {
            (Behaviour::Healthy { idle, .. }, CPU_COMMAND) => {
                format!("Average: all 1.00 0.00 1.00 2.50 0.00 {idle:.2}")
            }
            (Behaviour::Healthy { .. }, MEMORY_COMMAND) => "Average: 100 200 42.00 300".into(),
            (Behaviour::Healthy { .. }, DISK_COMMAND) => "/dev/xvda1 8.6G 3.1G 5.5G 36% /".into(),
            _ => "garbage".into(),
        };
        Ok(CommandOutput {
            status: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    async fn close(self) {}
}

/// Write an executable `sh` script named `name` into `dir`.
#[cfg(unix)]
pub fn stub_binary(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
