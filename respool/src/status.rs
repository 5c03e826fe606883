//!
//! Pool-status reporting
//!
//! A human-readable tabular snapshot over every pool, derived once per
//! named pool from the Coordinator's [`Registry`], plus a `Total` row
//! summing every column.
//!
use crate::registry::Registry;
use std::fmt;

/// One row of the status table: `Id | Capacity | Created | CheckedOut |
/// Free | Available`.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub name: String,
    pub capacity: usize,
    pub created: usize,
    pub checked_out: usize,
    pub free: usize,
    pub available: usize,
}

/// A snapshot of every pool's population, derived from one Coordinator
/// reply.
#[derive(Debug, Clone)]
pub struct Report {
    pub pools: Vec<PoolStats>,
}

impl Report {
    pub(crate) fn new<W>(registry: &Registry<W>) -> Self {
        let pools = registry
            .selector
            .iter()
            .filter_map(|name| registry.pool(name).map(|pool| PoolStats {
                name: name.clone(),
                capacity: pool.config.max_count,
                created: pool.total(),
                checked_out: pool.in_use_count,
                free: pool.free_count,
                available: pool.available(),
            }))
            .collect();
        Self { pools }
    }

    fn total(&self) -> PoolStats {
        self.pools.iter().fold(
            PoolStats {
                name: "Total".to_string(),
                capacity: 0,
                created: 0,
                checked_out: 0,
                free: 0,
                available: 0,
            },
            |mut acc, row| {
                acc.capacity += row.capacity;
                acc.created += row.created;
                acc.checked_out += row.checked_out;
                acc.free += row.free;
                acc.available += row.available;
                acc
            },
        )
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>10} {:>10} {:>12} {:>8} {:>10}",
            "Id", "Capacity", "Created", "CheckedOut", "Free", "Available"
        )?;
        for row in &self.pools {
            writeln!(
                f,
                "{:<16} {:>10} {:>10} {:>12} {:>8} {:>10}",
                row.name, row.capacity, row.created, row.checked_out, row.free, row.available
            )?;
        }
        let total = self.total();
        write!(
            f,
            "{:<16} {:>10} {:>10} {:>12} {:>8} {:>10}",
            total.name, total.capacity, total.created, total.checked_out, total.free, total.available
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::registry::Pool;

    #[test]
    fn test_report_totals() {
        let mut registry: Registry<()> = Registry::default();
        let mut a = Pool::new(PoolConfig::new("a", serde_json::json!(null)).max_count(3));
        a.in_use_count = 1;
        a.free_count = 1;
        let mut b = Pool::new(PoolConfig::new("b", serde_json::json!(null)).max_count(2));
        b.in_use_count = 0;
        b.free_count = 2;
        registry.selector.push("a".to_string());
        registry.selector.push("b".to_string());
        registry.pools.insert("a".to_string(), a);
        registry.pools.insert("b".to_string(), b);

        let report = Report::new(&registry);
        let total = report.total();
        assert_eq!(total.capacity, 5);
        assert_eq!(total.created, 4);
        assert_eq!(total.checked_out, 1);
        assert_eq!(total.free, 3);
        assert_eq!(total.available, 4);
    }
}
