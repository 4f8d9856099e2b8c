//! Three-way merge of divergent vault replicas.
//!
//! Entries are compared as sealed ciphertext: an entry that was not
//! locally re-sealed is byte-identical to the common ancestor, which is
//! exactly the "unchanged" signal the classification needs. Every
//! conflict keeps the local side provisionally so the caller always holds
//! a usable vault while conflicts await resolution.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::entry::StoredEntry;
use crate::vault::{Folder, Vault};

/// Minimum wall-clock duration of a merge. Padding the response time
/// hides how much the replicas diverged from anyone timing the sync.
pub const MERGE_TIME_FLOOR: Duration = Duration::from_millis(500);

/// One entry the merge could not reconcile. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub entry_id: String,
    pub local: Option<StoredEntry>,
    pub remote: Option<StoredEntry>,
    pub base: Option<StoredEntry>,
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub vault: Vault,
    pub conflicts: Vec<Conflict>,
}

/// Merges `local` and `remote` against their common ancestor `base`.
///
/// Classification per entry ID:
/// - present on neither side: stays deleted, whatever base says
/// - added on exactly one side: kept
/// - equal on both sides: kept
/// - edited on exactly one side (other side matches base): edit wins
/// - anything else, including a deletion racing an edit: a [`Conflict`]
///   is recorded and the local state is kept provisionally, which for a
///   local deletion means the entry stays deleted
pub fn three_way_merge(local: &Vault, remote: &Vault, base: &Vault) -> MergeOutcome {
    let mut conflicts = Vec::new();
    let mut entries = Vec::new();

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for entry in local
        .entries
        .iter()
        .chain(&remote.entries)
        .chain(&base.entries)
    {
        if seen.insert(entry.id.as_str()) {
            ids.push(entry.id.as_str());
        }
    }

    for id in ids {
        match (local.entry(id), remote.entry(id), base.entry(id)) {
            (None, None, _) => {}
            (Some(le), None, None) => entries.push(le.clone()),
            (None, Some(re), None) => entries.push(re.clone()),
            (Some(le), Some(re), _) if le == re => entries.push(le.clone()),
            (Some(le), Some(re), Some(be)) => {
                if le == be {
                    entries.push(re.clone());
                } else if re == be {
                    entries.push(le.clone());
                } else {
                    conflicts.push(Conflict {
                        entry_id: id.to_string(),
                        local: Some(le.clone()),
                        remote: Some(re.clone()),
                        base: Some(be.clone()),
                    });
                    entries.push(le.clone());
                }
            }
            (Some(le), Some(re), None) => {
                conflicts.push(Conflict {
                    entry_id: id.to_string(),
                    local: Some(le.clone()),
                    remote: Some(re.clone()),
                    base: None,
                });
                entries.push(le.clone());
            }
            (Some(le), None, Some(be)) => {
                conflicts.push(Conflict {
                    entry_id: id.to_string(),
                    local: Some(le.clone()),
                    remote: None,
                    base: Some(be.clone()),
                });
                entries.push(le.clone());
            }
            (None, Some(re), Some(be)) => {
                conflicts.push(Conflict {
                    entry_id: id.to_string(),
                    local: None,
                    remote: Some(re.clone()),
                    base: Some(be.clone()),
                });
            }
        }
    }

    let folders = merge_folders(&local.folders, &remote.folders);

    let mut vault = Vault {
        schema_version: local.schema_version.max(remote.schema_version),
        entries,
        folders,
        last_sync_at: Some(Utc::now().timestamp_millis()),
        sync_version: local.sync_version.max(remote.sync_version) + 1,
        content_hash: None,
    };
    vault.content_hash = Some(vault.compute_content_hash());

    tracing::debug!(
        entries = vault.entries.len(),
        conflicts = conflicts.len(),
        sync_version = vault.sync_version,
        "three-way merge finished"
    );
    MergeOutcome { vault, conflicts }
}

/// ID union; remote wins on same-ID differences. Folder names carry no
/// secrets, so there is no conflict machinery for them.
fn merge_folders(local: &[Folder], remote: &[Folder]) -> Vec<Folder> {
    let mut folders = Vec::new();
    for folder in local {
        match remote.iter().find(|f| f.id == folder.id) {
            Some(remote_copy) => folders.push(remote_copy.clone()),
            None => folders.push(folder.clone()),
        }
    }
    for folder in remote {
        if !local.iter().any(|f| f.id == folder.id) {
            folders.push(folder.clone());
        }
    }
    folders
}

/// Runs the merge, then waits out the remainder of `floor` so response
/// time does not correlate with the amount of divergence.
pub async fn merge_with_floor(
    local: &Vault,
    remote: &Vault,
    base: &Vault,
    floor: Duration,
) -> MergeOutcome {
    let started = Instant::now();
    let outcome = three_way_merge(local, remote, base);
    let elapsed = started.elapsed();
    if elapsed < floor {
        tokio::time::sleep(floor - elapsed).await;
    }
    outcome
}
