//! Instance records and the health samples merged onto them.

use serde::{Deserialize, Serialize};

/// A discovered compute instance plus the outcome of sampling it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    /// `None` when the instance reports no private address.
    pub private_address: Option<String>,
    pub name: String,
    pub instance_type: String,
    /// Empty until the collector merges a result.
    #[serde(default)]
    pub outcome: Option<TaskOutcome>,
}

impl InstanceRecord {
    pub fn new(
        id: impl Into<String>,
        private_address: Option<String>,
        name: impl Into<String>,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            private_address,
            name: name.into(),
            instance_type: instance_type.into(),
            outcome: None,
        }
    }

    pub fn sample(&self) -> Option<&MetricSample> {
        match &self.outcome {
            Some(TaskOutcome::Sampled(sample)) => Some(sample),
            _ => None,
        }
    }

    pub fn cpu_busy(&self) -> Option<f64> {
        self.sample().map(|s| s.cpu_busy_percent)
    }

    pub fn io_wait(&self) -> Option<f64> {
        self.sample().map(|s| s.io_wait_percent)
    }

    pub fn memory_used(&self) -> Option<f64> {
        self.sample().map(|s| s.memory_used_percent)
    }

    pub fn filesystems(&self) -> &[FilesystemUsage] {
        self.sample().map(|s| s.filesystems.as_slice()).unwrap_or(&[])
    }
}

/// One point-in-time reading for an instance. Numeric fields are all present
/// or the whole sample is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub cpu_busy_percent: f64,
    pub io_wait_percent: f64,
    pub memory_used_percent: f64,
    pub filesystems: Vec<FilesystemUsage>,
}

/// A `df -H` row. Values are kept as display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemUsage {
    pub filesystem: String,
    pub size: String,
    pub used: String,
    pub available: String,
    pub use_percent: String,
    pub mountpoint: String,
}

/// Result of one collection task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Sampled(MetricSample),
    Unavailable { reason: String },
}

impl TaskOutcome {
    pub fn unavailable(reason: impl ToString) -> Self {
        TaskOutcome::Unavailable {
            reason: reason.to_string(),
        }
    }
}
