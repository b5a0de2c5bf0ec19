//! Retention: deciding which versions a set of cleanup policies keep.
//!
//! Distinct from the teacher's `prune.rs`, which keeps the last/hourly/daily
//! backups of a single group by a handful of fixed buckets. This engine
//! instead applies an arbitrary set of `(minInterval, timeFrame,
//! maxVersions)` windows per file path, unioning what each policy keeps
//! (`spec.md` §4.5). The windowed math is kept as a pure function
//! ([`kept_version_ids`]) so it can be tested without a database.

use std::collections::HashSet;

use anyhow::Error;
use rusqlite::params;
use uuid::Uuid;

use reversion_api_types::CleanupPolicy;

use crate::repository::Repository;
use crate::snapshot;
use crate::timeline;

/// The minimal facts `kept_version_ids` needs about a version to decide
/// whether retention keeps it: its row id, the creation time of the
/// snapshot that owns it, and whether that snapshot is pinned.
#[derive(Debug, Clone, Copy)]
pub struct RetentionCandidate {
    pub version_id: i64,
    pub revision: i64,
    pub created_at: i64,
    pub pinned: bool,
}

/// Given every (non-deleted) version of a single path and the policies
/// attached to its timeline, return the ids of versions retention keeps.
/// Pinned versions are always kept but are excluded from the windowed
/// accounting (a policy never "spends" a slot on a version nothing can
/// delete anyway).
pub fn kept_version_ids(candidates: &[RetentionCandidate], policies: &[CleanupPolicy]) -> HashSet<i64> {
    let mut kept: HashSet<i64> = candidates.iter().filter(|c| c.pinned).map(|c| c.version_id).collect();

    if policies.is_empty() {
        // "If no policies are attached, no deletions occur."
        return candidates.iter().map(|c| c.version_id).collect();
    }

    let mut unpinned: Vec<&RetentionCandidate> = candidates.iter().filter(|c| !c.pinned).collect();
    if unpinned.is_empty() {
        return kept;
    }
    // Tiebreak by revision: `created_at` is millisecond-resolution and the
    // spec only guarantees it's non-decreasing across snapshots, so rapid
    // commits (exactly what the watch daemon produces) can share a
    // timestamp. Revision is the timeline's canonical strictly-increasing
    // order and always breaks the tie correctly.
    unpinned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.revision.cmp(&a.revision)));
    let t0 = unpinned[0].created_at;

    for policy in policies {
        let min_interval = policy.min_interval.as_millis() as i64;
        let time_frame = policy.time_frame.as_millis() as i64;
        if min_interval <= 0 {
            continue;
        }
        let window_count = time_frame / min_interval;

        // Windows are indexed by age-from-newest rather than literal
        // wall-clock position: window k covers ages [k*minInterval,
        // (k+1)*minInterval), so k=0 is nearest to t0 and includes age 0
        // (the newest version itself). Indexing from a literal `t0 -
        // timeFrame + k*minInterval` origin instead would, whenever
        // minInterval evenly divides timeFrame, put t0 exactly on the
        // outer edge of the newest window and exclude it — age-from-newest
        // is equivalent for every other version and avoids that edge case.
        for k in 0..window_count {
            let age_lo = k * min_interval;
            let age_hi = age_lo + min_interval;
            let mut taken = 0u32;
            for candidate in &unpinned {
                if taken >= policy.max_versions {
                    break;
                }
                let age = t0 - candidate.created_at;
                if age >= age_lo && age < age_hi {
                    kept.insert(candidate.version_id);
                    taken += 1;
                }
            }
        }
    }

    kept
}

/// Apply retention to `paths_to_clean` (or every path in the timeline),
/// deleting versions not kept, then deleting any snapshot left with no
/// versions, then sweeping the block store.
pub fn clean(repo: &mut Repository, timeline_id: Uuid, paths_to_clean: Option<&[String]>) -> Result<(), Error> {
    let policies = timeline::cleanup_policies(repo, timeline_id)?;

    let targets: Vec<String> = match paths_to_clean {
        Some(paths) => paths.to_vec(),
        None => timeline::paths(repo, timeline_id)?,
    };

    let mut touched_snapshots = HashSet::new();

    for path in &targets {
        let candidates: Vec<RetentionCandidate> = {
            let mut stmt = repo.db().conn().prepare(
                "SELECT v.id, v.snapshot_id, s.revision, s.created_at, s.pinned
                 FROM version v
                 JOIN snapshot s ON s.id = v.snapshot_id
                 WHERE s.timeline_id = ?1 AND v.path = ?2
                 ORDER BY s.revision DESC",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![timeline_id.to_string(), path],
                |row| {
                    let version_id: i64 = row.get(0)?;
                    let snapshot_id: i64 = row.get(1)?;
                    let revision: i64 = row.get(2)?;
                    let created_at: i64 = row.get(3)?;
                    let pinned: i64 = row.get(4)?;
                    Ok((
                        RetentionCandidate {
                            version_id,
                            revision,
                            created_at,
                            pinned: pinned != 0,
                        },
                        snapshot_id,
                    ))
                },
            )?;
            let mut out = Vec::new();
            for row in rows {
                let (candidate, snapshot_id) = row?;
                touched_snapshots.insert(snapshot_id);
                out.push(candidate);
            }
            out
        };

        let kept = kept_version_ids(&candidates, &policies);
        let to_delete: Vec<i64> = candidates
            .iter()
            .map(|c| c.version_id)
            .filter(|id| !kept.contains(id))
            .collect();

        if !to_delete.is_empty() {
            repo.db_mut().transaction(|tx| {
                for version_id in &to_delete {
                    tx.execute("DELETE FROM version WHERE id = ?1", params![version_id])?;
                }
                Ok(())
            })?;
        }
    }

    for snapshot_id in touched_snapshots {
        snapshot::delete_if_empty(repo, snapshot_id)?;
    }

    repo.sweep()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use reversion_api_types::RepositoryConfig;
    use std::fs;
    use std::path::PathBuf;

    fn candidate(id: i64, revision: i64, created_at: i64, pinned: bool) -> RetentionCandidate {
        RetentionCandidate { version_id: id, revision, created_at, pinned }
    }

    #[test]
    fn no_policies_keeps_everything() {
        let candidates = vec![candidate(1, 1, 0, false), candidate(2, 2, 1000, false)];
        let kept = kept_version_ids(&candidates, &[]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn pinned_versions_are_always_kept() {
        let candidates = vec![candidate(1, 1, 0, true)];
        let policy = CleanupPolicy::of_versions(0);
        let kept = kept_version_ids(&candidates, &[policy]);
        assert!(kept.contains(&1));
    }

    #[test]
    fn max_versions_zero_deletes_every_non_pinned_version() {
        let candidates = vec![candidate(1, 1, 0, false), candidate(2, 2, 1000, false)];
        let policy = CleanupPolicy::of_versions(0);
        let kept = kept_version_ids(&candidates, &[policy]);
        assert!(kept.is_empty());
    }

    #[test]
    fn of_versions_n_keeps_the_newest_n() {
        let candidates: Vec<_> = (0..5).map(|i| candidate(i, i, i * 1000, false)).collect();
        let policy = CleanupPolicy::of_versions(2);
        let kept = kept_version_ids(&candidates, &[policy]);
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&4));
        assert!(kept.contains(&3));
    }

    #[test]
    fn ties_in_created_at_break_by_revision() {
        // Same millisecond, as rapid commits from the watch daemon would
        // produce. Revision order must still determine "newest".
        let candidates = vec![
            candidate(1, 1, 500, false),
            candidate(2, 2, 500, false),
            candidate(3, 3, 500, false),
        ];
        let policy = CleanupPolicy::of_versions(1);
        let kept = kept_version_ids(&candidates, &[policy]);
        assert_eq!(kept, HashSet::from([3]));
    }

    #[test]
    fn end_to_end_cleanup_keeps_pinned_and_versions_policies() {
        // Five sequential snapshots of the same path, pinning the second.
        // ofVersions(1) unioned with ofVersions(2) should keep {newest,
        // 2nd-newest} plus the pinned one: matches spec.md scenario #3.
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::create(dir.path().join("repo"), RepositoryConfig::default()).unwrap();
        let timeline_id = crate::timeline::create_timeline(&mut repo).unwrap();
        crate::timeline::add_cleanup_policy(&mut repo, timeline_id, &CleanupPolicy::of_versions(1)).unwrap();
        crate::timeline::add_cleanup_policy(&mut repo, timeline_id, &CleanupPolicy::of_versions(2)).unwrap();

        let mut revisions = Vec::new();
        for i in 0..5 {
            fs::write(dir.path().join("a.txt"), format!("version {i}")).unwrap();
            let revision = crate::timeline::create_snapshot(
                &mut repo, timeline_id, dir.path(), &[PathBuf::from("a.txt")], None, "", false,
            ).unwrap();
            revisions.push(revision);
        }

        // Pin the second snapshot.
        repo.db_mut()
            .transaction(|tx| {
                tx.execute(
                    "UPDATE snapshot SET pinned = 1 WHERE timeline_id = ?1 AND revision = ?2",
                    params![timeline_id.to_string(), revisions[1]],
                )?;
                Ok(())
            })
            .unwrap();

        clean(&mut repo, timeline_id, None).unwrap();

        let remaining = crate::timeline::snapshots(&repo, timeline_id).unwrap();
        let remaining_revisions: Vec<i64> = remaining.iter().map(|s| s.revision).collect();
        assert_eq!(remaining_revisions, vec![revisions[1], revisions[3], revisions[4]]);
    }
}
