//! Table, JSON and terminal chart output for ranked records.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::domain::instance::InstanceRecord;

const NOT_AVAILABLE: &str = "N/A";
const HEADERS: [&str; 8] = [
    "S.No",
    "Private IP",
    "Name",
    "Instance Type",
    "CPU (%)",
    "IO Wait (%)",
    "RAM Usage (%)",
    "Disk Details",
];
const CHART_WIDTH: usize = 40;

#[derive(Debug, Serialize)]
pub struct HealthReport<'a> {
    pub collected_at: DateTime<Utc>,
    pub profile: &'a str,
    pub instances: &'a [InstanceRecord],
}

pub fn json(profile: &str, records: &[InstanceRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&HealthReport {
        collected_at: Utc::now(),
        profile,
        instances: records,
    })
}

fn fmt_metric(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| NOT_AVAILABLE.into())
}

fn fmt_ram(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2} %", v))
        .unwrap_or_else(|| NOT_AVAILABLE.into())
}

fn disk_details(record: &InstanceRecord) -> String {
    record
        .filesystems()
        .iter()
        .map(|fs| {
            format!(
                "{}: {} used of {} ({})",
                fs.mountpoint, fs.used, fs.size, fs.use_percent
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cell text for each record, numbered in the given order.
pub fn rows(records: &[InstanceRecord]) -> Vec<Vec<String>> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            vec![
                (i + 1).to_string(),
                r.private_address
                    .clone()
                    .unwrap_or_else(|| NOT_AVAILABLE.into()),
                r.name.clone(),
                r.instance_type.clone(),
                fmt_metric(r.cpu_busy()),
                fmt_metric(r.io_wait()),
                fmt_ram(r.memory_used()),
                disk_details(r),
            ]
        })
        .collect()
}

/// Bordered grid. Cells may span several lines.
pub fn table(records: &[InstanceRecord]) -> String {
    let rows = rows(records);

    let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (col, cell) in row.iter().enumerate() {
            let w = cell.lines().map(|l| l.chars().count()).max().unwrap_or(0);
            widths[col] = widths[col].max(w);
        }
    }

    let border = |fill: char| {
        let mut line = String::from("+");
        for w in &widths {
            line.push_str(&fill.to_string().repeat(w + 2));
            line.push('+');
        }
        line
    };

    let mut out = Vec::new();
    out.push(border('-'));
    let header: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
    push_row(&mut out, &header, &widths);
    out.push(border('='));
    for row in &rows {
        push_row(&mut out, row, &widths);
        out.push(border('-'));
    }
    if rows.is_empty() {
        out.push(border('-'));
    }
    out.join("\n")
}

fn push_row(out: &mut Vec<String>, row: &[String], widths: &[usize]) {
    let height = row.iter().map(|c| c.lines().count().max(1)).max().unwrap_or(1);
    for line_no in 0..height {
        let mut line = String::from("|");
        for (cell, w) in row.iter().zip(widths) {
            let text = cell.lines().nth(line_no).unwrap_or("");
            let pad = w - text.chars().count();
            line.push(' ');
            line.push_str(text);
            line.push_str(&" ".repeat(pad + 1));
            line.push('|');
        }
        out.push(line);
    }
}

/// CPU and RAM bars per instance id.
pub fn chart(records: &[InstanceRecord]) -> String {
    let label_width = records
        .iter()
        .map(|r| r.id.chars().count())
        .max()
        .unwrap_or(0);

    let mut out = vec![format!("{}", "CPU and RAM Usage by Instance".bold())];
    for r in records {
        out.push(format!(
            "{:<label_width$}  CPU {}",
            r.id,
            bar(r.cpu_busy(), |s| s.green().to_string())
        ));
        out.push(format!(
            "{:<label_width$}  RAM {}",
            "",
            bar(r.memory_used(), |s| s.blue().to_string())
        ));
    }
    out.join("\n")
}

fn bar(value: Option<f64>, paint: impl Fn(&str) -> String) -> String {
    match value {
        Some(v) => {
            let filled = ((v.clamp(0.0, 100.0) / 100.0) * CHART_WIDTH as f64).round() as usize;
            format!(
                "{}{} {:>6.2}%",
                paint(&"█".repeat(filled)),
                "░".repeat(CHART_WIDTH - filled),
                v
            )
        }
        None => format!("{} {:>7}", "░".repeat(CHART_WIDTH), NOT_AVAILABLE.dimmed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::{FilesystemUsage, MetricSample, TaskOutcome};

    fn sampled() -> InstanceRecord {
        let mut r = InstanceRecord::new("i-0abc", Some("10.0.0.9".into()), "api-1", "m5.large");
        r.outcome = Some(TaskOutcome::Sampled(MetricSample {
            cpu_busy_percent: 26.799999999999997,
            io_wait_percent: 1.25,
            memory_used_percent: 61.37,
            filesystems: vec![
                FilesystemUsage {
                    filesystem: "/dev/xvda1".into(),
                    size: "8.6G".into(),
                    used: "3.1G".into(),
                    available: "5.5G".into(),
                    use_percent: "36%".into(),
                    mountpoint: "/".into(),
                },
                FilesystemUsage {
                    filesystem: "/dev/xvdf".into(),
                    size: "107G".into(),
                    used: "12G".into(),
                    available: "90G".into(),
                    use_percent: "12%".into(),
                    mountpoint: "/data".into(),
                },
            ],
        }));
        r
    }

    fn unreachable() -> InstanceRecord {
        let mut r = InstanceRecord::new("i-0def", None, "N/A", "t3.micro");
        r.outcome = Some(TaskOutcome::unavailable("connection refused"));
        r
    }

    #[test]
    fn rows_format_metrics_and_sentinels() {
        let rows = rows(&[sampled(), unreachable()]);
        assert_eq!(rows[0][0], "1");
        assert_eq!(rows[0][4], "26.80");
        assert_eq!(rows[0][5], "1.25");
        assert_eq!(rows[0][6], "61.37 %");
        assert_eq!(rows[0][7], "/: 3.1G used of 8.6G (36%)\n/data: 12G used of 107G (12%)");
        assert_eq!(rows[1][0], "2");
        assert_eq!(rows[1][1], "N/A");
        assert_eq!(&rows[1][4..7], ["N/A", "N/A", "N/A"]);
        assert_eq!(rows[1][7], "");
    }

    #[test]
    fn table_lines_have_equal_width() {
        let out = table(&[sampled(), unreachable()]);
        let widths: Vec<usize> = out.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
        assert!(out.contains("| S.No "));
        assert!(out.contains("/data: 12G used of 107G (12%)"));
        // header + two-line row + one-line row, plus four borders
        assert_eq!(out.lines().count(), 1 + 2 + 1 + 4);
    }

    #[test]
    fn json_report_lists_instances() {
        let out = json("prod", &[sampled(), unreachable()]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["profile"], "prod");
        assert_eq!(value["instances"].as_array().unwrap().len(), 2);
        assert_eq!(value["instances"][1]["outcome"]["status"], "unavailable");
    }

    #[test]
    fn chart_marks_missing_values() {
        let out = chart(&[sampled(), unreachable()]);
        assert!(out.contains("i-0abc"));
        assert_eq!(out.matches("N/A").count(), 2);
    }
}
