//! Presentation order: busiest first, unavailable last.

use std::cmp::Ordering;

use super::instance::InstanceRecord;

/// Sort descending by CPU busy, then RAM used. Absent values rank below any
/// number. Ties keep their input order.
pub fn rank(records: &mut [InstanceRecord]) {
    records.sort_by(|a, b| {
        descending(a.cpu_busy(), b.cpu_busy())
            .then_with(|| descending(a.memory_used(), b.memory_used()))
    });
}

fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
