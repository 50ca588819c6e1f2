//! One-shot diagnostics over an established session.
//!
//! - CPU: `sar -u 1 1` Average row, `%iowait` is column 6, `%idle` column 8
//! - Memory: `sar -r 1 1` Average row, `%memused` is column 4
//! - Disks: `df -H` rows for `/dev` devices

use super::instance::{FilesystemUsage, MetricSample};
use super::tunnel::{CommandOutput, RemoteShell};
use crate::error::SampleFailure;

pub const CPU_COMMAND: &str = "sar -u 1 1 | grep Average";
pub const MEMORY_COMMAND: &str = "sar -r 1 1 | grep Average";
pub const DISK_COMMAND: &str = "df -H | grep '^/dev'";

const IOWAIT_COLUMN: usize = 5;
const IDLE_COLUMN: usize = 7;
const MEMUSED_COLUMN: usize = 3;
const DF_FIELDS: usize = 6;

/// Take one sample. CPU and memory figures are all-or-nothing.
pub async fn sample<S: RemoteShell>(session: &S) -> Result<MetricSample, SampleFailure> {
    let (cpu, memory, disks) = tokio::join!(
        run(session, CPU_COMMAND),
        run(session, MEMORY_COMMAND),
        session.exec(DISK_COMMAND),
    );

    let (cpu_busy_percent, io_wait_percent) = parse_cpu(&cpu?.stdout)?;
    let memory_used_percent = parse_memory(&memory?.stdout)?;

    // grep exits 1 on no match, so the listing is read whatever the status.
    let disks = disks.map_err(|source| SampleFailure::Transport {
        command: DISK_COMMAND.to_string(),
        source,
    })?;

    Ok(MetricSample {
        cpu_busy_percent,
        io_wait_percent,
        memory_used_percent,
        filesystems: parse_filesystems(&disks.stdout),
    })
}

async fn run<S: RemoteShell>(session: &S, command: &str) -> Result<CommandOutput, SampleFailure> {
    let output = session
        .exec(command)
        .await
        .map_err(|source| SampleFailure::Transport {
            command: command.to_string(),
            source,
        })?;

    if !output.success() {
        return Err(SampleFailure::Command {
            command: command.to_string(),
            status: output.status.unwrap_or(-1),
            stderr: output.stderr,
        });
    }
    Ok(output)
}

/// Returns `(cpu_busy, io_wait)` where `cpu_busy = 100 - idle`.
pub fn parse_cpu(output: &str) -> Result<(f64, f64), SampleFailure> {
    let idle = numeric_column("cpu", output, IDLE_COLUMN)?;
    let iowait = numeric_column("cpu", output, IOWAIT_COLUMN)?;
    Ok((100.0 - idle, iowait))
}

pub fn parse_memory(output: &str) -> Result<f64, SampleFailure> {
    numeric_column("memory", output, MEMUSED_COLUMN)
}

/// Only `/dev` rows are kept. Rows with fewer than six fields are skipped.
pub fn parse_filesystems(output: &str) -> Vec<FilesystemUsage> {
    output
        .lines()
        .filter(|line| line.starts_with("/dev"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < DF_FIELDS {
                return None;
            }
            Some(FilesystemUsage {
                filesystem: parts[0].to_string(),
                size: parts[1].to_string(),
                used: parts[2].to_string(),
                available: parts[3].to_string(),
                use_percent: parts[4].to_string(),
                mountpoint: parts[5].to_string(),
            })
        })
        .collect()
}

fn numeric_column(what: &'static str, output: &str, column: usize) -> Result<f64, SampleFailure> {
    let value = output
        .split_whitespace()
        .nth(column)
        .ok_or_else(|| SampleFailure::MissingColumn {
            what,
            column: column + 1,
            line: output.trim().to_string(),
        })?;

    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SampleFailure::NotNumeric {
            what,
            column: column + 1,
            value: value.to_string(),
        })
}
