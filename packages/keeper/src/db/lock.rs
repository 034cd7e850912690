//! Single-instance lock rules
//!
//! The lock row names the process that owns the store. A holder is stale,
//! and may be reclaimed, when it lives on a foreign host or when its PID
//! is no longer alive on this host.

use std::path::Path;

use super::models::KeeperLock;

/// This machine's hostname, best effort.
pub fn local_hostname() -> String {
    if let Ok(name) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Whether a PID refers to a living process on this host.
pub fn process_alive(pid: i64) -> bool {
    pid > 0 && Path::new(&format!("/proc/{}", pid)).exists()
}

/// A lock is stale when its holder is on another host or its local
/// process is dead.
pub fn is_stale(lock: &KeeperLock, our_hostname: &str) -> bool {
    lock.hostname != our_hostname || !process_alive(lock.pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lock(pid: i64, hostname: &str) -> KeeperLock {
        KeeperLock {
            id: 1,
            acquired_at: Utc::now(),
            pid,
            hostname: hostname.to_string(),
        }
    }

    #[test]
    fn test_foreign_host_is_stale() {
        let ours = local_hostname();
        let held = lock(std::process::id() as i64, "some-other-host");
        assert_ne!(ours, "some-other-host");
        assert!(is_stale(&held, &ours));
    }

    #[test]
    fn test_dead_local_process_is_stale() {
        let ours = local_hostname();
        // PID 0 never names a reclaimable process
        assert!(is_stale(&lock(0, &ours), &ours));
    }

    #[test]
    fn test_living_local_process_is_not_stale() {
        let ours = local_hostname();
        let held = lock(std::process::id() as i64, &ours);
        assert!(!is_stale(&held, &ours));
    }
}
