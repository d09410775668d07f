use anyhow::Result;
use hms_backup_core::RetentionPolicy;
use tracing::{info, warn};

use crate::repository::SnapshotRepository;

/// Deletes the oldest snapshots beyond the policy's limit.
pub struct RetentionManager<'a> {
    repo: &'a SnapshotRepository,
}

impl<'a> RetentionManager<'a> {
    pub fn new(repo: &'a SnapshotRepository) -> Self {
        Self { repo }
    }

    /// Returns the ids actually removed, oldest first.
    ///
    /// Failing to list the root is an error. A snapshot that cannot be
    /// removed is logged and skipped; the rest are still attempted.
    pub fn enforce_retention(&self, policy: &RetentionPolicy) -> Result<Vec<String>> {
        let ids = self.repo.list_snapshots()?;
        if ids.len() <= policy.max_snapshots {
            return Ok(Vec::new());
        }

        let expired = &ids[policy.max_snapshots..];
        let mut removed = Vec::with_capacity(expired.len());
        for id in expired.iter().rev() {
            match self.repo.remove_snapshot(id) {
                Ok(()) => removed.push(id.clone()),
                Err(e) => warn!(snapshot = %id, error = %e, "could not remove expired snapshot"),
            }
        }

        info!(
            removed = removed.len(),
            kept = ids.len() - removed.len(),
            max_snapshots = policy.max_snapshots,
            "retention enforced"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn seed(repo: &SnapshotRepository, count: usize) -> Vec<String> {
        let base: DateTime<Utc> = "2025-01-01T02:00:00Z".parse().expect("base");
        (0..count)
            .map(|day| {
                repo.write_snapshot_at(&[], "daily", "memory", base + Duration::days(day as i64))
                    .expect("write")
                    .id
            })
            .collect()
    }

    #[test]
    fn keeps_exactly_the_most_recent_snapshots() {
        for (k, m) in [(5usize, 2usize), (3, 1), (10, 7)] {
            let tmp = tempfile::tempdir().expect("tempdir");
            let repo = SnapshotRepository::new(tmp.path()).expect("repo");
            let created = seed(&repo, k);

            let removed = RetentionManager::new(&repo)
                .enforce_retention(&RetentionPolicy::new(m))
                .expect("retention");

            assert_eq!(removed, created[..k - m].to_vec(), "k = {k}, m = {m}");
            let mut expected_kept = created[k - m..].to_vec();
            expected_kept.reverse();
            assert_eq!(repo.list_snapshots().expect("list"), expected_kept);
        }
    }

    #[test]
    fn second_run_is_a_no_op() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        seed(&repo, 4);
        let manager = RetentionManager::new(&repo);
        let policy = RetentionPolicy::new(2);

        assert_eq!(manager.enforce_retention(&policy).expect("first").len(), 2);
        assert!(manager.enforce_retention(&policy).expect("second").is_empty());
        assert_eq!(repo.list_snapshots().expect("list").len(), 2);
    }

    #[test]
    fn under_limit_removes_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path()).expect("repo");
        seed(&repo, 3);
        let removed = RetentionManager::new(&repo)
            .enforce_retention(&RetentionPolicy::new(3))
            .expect("retention");
        assert!(removed.is_empty());
        assert_eq!(repo.list_snapshots().expect("list").len(), 3);
    }

    #[test]
    fn unlistable_root_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = SnapshotRepository::new(tmp.path().join("snapshots")).expect("repo");
        std::fs::remove_dir(tmp.path().join("snapshots")).expect("remove root");
        assert!(RetentionManager::new(&repo)
            .enforce_retention(&RetentionPolicy::new(1))
            .is_err());
    }
}
