//! Pool listing via `zpool list`.

use crate::error::ZfsResult;
use crate::exec;
use serde::Serialize;
use std::str::FromStr;
use tracing::warn;

const LIST_COLUMNS: &str = "name,size,alloc,free,frag,cap,health,guid";

/// Health of a zpool as reported by `zpool list`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Degraded,
    Faulted,
    Offline,
    Online,
    Removed,
    Unavailable,
}

impl FromStr for PoolHealth {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEGRADED" => Ok(Self::Degraded),
            "FAULTED" => Ok(Self::Faulted),
            "OFFLINE" => Ok(Self::Offline),
            "ONLINE" => Ok(Self::Online),
            "REMOVED" => Ok(Self::Removed),
            "UNAVAIL" => Ok(Self::Unavailable),
            _ => Err(()),
        }
    }
}

/// One imported pool.
#[derive(Clone, Debug, Serialize)]
pub struct Pool {
    pub name: String,
    pub guid: String,
    /// Total size in bytes
    pub size: u64,
    /// Allocated bytes
    pub allocated: u64,
    /// Free bytes
    pub free: u64,
    /// Fragmentation as a fraction (0.12 for 12%)
    pub fragmentation: f64,
    /// Capacity used as a fraction
    pub capacity: f64,
    pub health: PoolHealth,
}

impl Pool {
    /// Parse one tab-separated `zpool list -p -H` line.
    fn parse_line(line: &str) -> Option<Self> {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != 8 {
            warn!(columns = columns.len(), line, "unexpected zpool list column count");
            return None;
        }

        let size = columns[1].parse().ok()?;
        let allocated = columns[2].parse().ok()?;
        let free = columns[3].parse().ok()?;
        let fragmentation = parse_percentage(columns[4])?;
        let capacity = parse_percentage(columns[5])?;
        let health = match columns[6].parse() {
            Ok(health) => health,
            Err(()) => {
                warn!(line, "unrecognized pool health");
                return None;
            }
        };

        Some(Self {
            name: columns[0].to_owned(),
            guid: columns[7].to_owned(),
            size,
            allocated,
            free,
            fragmentation,
            capacity,
            health,
        })
    }
}

/// List every imported pool.
pub fn pools() -> ZfsResult<Vec<Pool>> {
    let stdout = exec::run("zpool", &["list", "-p", "-H", "-o", LIST_COLUMNS])?;
    Ok(stdout
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(Pool::parse_line)
        .collect())
}

fn parse_percentage(raw: &str) -> Option<f64> {
    raw.trim_end_matches('%').parse::<f64>().ok().map(|v| v / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pool_line() {
        let raw = "tank\t1000000000\t250000000\t750000000\t4\t25\tONLINE\t42424242";
        let pool = Pool::parse_line(raw).unwrap();
        assert_eq!(pool.name, "tank");
        assert_eq!(pool.size, 1_000_000_000);
        assert_eq!(pool.health, PoolHealth::Online);
        assert_eq!(pool.fragmentation, 0.04);
        assert_eq!(pool.capacity, 0.25);
        assert_eq!(pool.guid, "42424242");
    }

    #[test]
    fn test_parse_pool_rejects_bad_health() {
        let raw = "tank\t1\t1\t1\t0\t0\tWEIRD\t42";
        assert!(Pool::parse_line(raw).is_none());
    }
}
