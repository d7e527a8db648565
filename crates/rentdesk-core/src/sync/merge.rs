//! Last-writer-wins merge of a local and a remote snapshot
//!
//! Collections merge per entity id: the result is seeded from the remote
//! snapshot in remote order, then each local entity is overlaid. A local
//! entity replaces its remote counterpart only when its `last_updated` is
//! strictly greater. Ties favor the remote copy, and so does a missing
//! timestamp on either side. Entities present on one side only always survive.

use std::collections::HashMap;

use crate::models::{Entity, Payload};

/// Result of a merge, plus what the remote is missing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Merged payload (`None` when both sides were absent)
    pub payload: Option<Payload>,
    /// Entities the remote lacks or holds an older copy of
    pub to_push: Vec<Entity>,
    pub local_wins: usize,
    pub remote_wins: usize,
    pub local_only: usize,
    pub remote_only: usize,
}

impl MergeReport {
    /// Whether the merged result differs from the remote snapshot
    pub fn remote_is_stale(&self) -> bool {
        !self.to_push.is_empty()
    }
}

/// Merge two snapshots of the same dataset.
pub fn merge(local: Option<&Payload>, remote: Option<&Payload>) -> MergeReport {
    match (local, remote) {
        (None, None) => MergeReport::default(),
        (Some(local), None) => MergeReport {
            payload: Some(local.clone()),
            to_push: local.entities().to_vec(),
            local_only: local.len(),
            ..MergeReport::default()
        },
        (None, Some(remote)) => MergeReport {
            payload: Some(remote.clone()),
            remote_only: remote.len(),
            ..MergeReport::default()
        },
        (Some(Payload::Collection(local)), Some(Payload::Collection(remote))) => {
            merge_collections(local, remote)
        }
        (Some(Payload::Single(local)), Some(Payload::Single(remote))) => {
            if local_is_newer(local, remote) {
                // Keep pointing at the remote row so the push updates it
                let winner = match (local.id(), remote.id()) {
                    (None, Some(id)) => local.clone().with_id(id),
                    _ => local.clone(),
                };
                MergeReport {
                    payload: Some(Payload::Single(winner.clone())),
                    to_push: vec![winner],
                    local_wins: 1,
                    ..MergeReport::default()
                }
            } else {
                MergeReport {
                    payload: Some(Payload::Single(remote.clone())),
                    remote_wins: 1,
                    ..MergeReport::default()
                }
            }
        }
        (Some(_), Some(remote)) => {
            tracing::warn!("Local and remote snapshots differ in shape; keeping remote");
            MergeReport {
                payload: Some(remote.clone()),
                remote_only: remote.len(),
                ..MergeReport::default()
            }
        }
    }
}

fn merge_collections(local: &[Entity], remote: &[Entity]) -> MergeReport {
    let mut merged: Vec<Entity> = remote.to_vec();
    let mut index: HashMap<String, usize> = HashMap::with_capacity(remote.len());
    for (position, entity) in merged.iter().enumerate() {
        if let Some(id) = entity.id() {
            index.entry(id).or_insert(position);
        }
    }

    let mut report = MergeReport::default();
    let mut matched = vec![false; merged.len()];

    for entity in local {
        let existing = match entity.id() {
            Some(id) => index.get(&id).copied(),
            // Id-less records can only be matched by content
            None => merged
                .iter()
                .take(remote.len())
                .position(|candidate| candidate.id().is_none() && candidate == entity),
        };

        match existing {
            Some(position) => {
                if position < matched.len() {
                    matched[position] = true;
                }
                if local_is_newer(entity, &merged[position]) {
                    merged[position] = entity.clone();
                    report.to_push.push(entity.clone());
                    report.local_wins += 1;
                } else {
                    report.remote_wins += 1;
                }
            }
            None => {
                if let Some(id) = entity.id() {
                    index.insert(id, merged.len());
                }
                merged.push(entity.clone());
                report.to_push.push(entity.clone());
                report.local_only += 1;
            }
        }
    }

    report.remote_only = matched.iter().filter(|seen| !**seen).count();
    report.payload = Some(Payload::Collection(merged));
    report
}

fn local_is_newer(local: &Entity, remote: &Entity) -> bool {
    matches!(
        (local.last_updated(), remote.last_updated()),
        (Some(local), Some(remote)) if local > remote
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entity(id: &str, last_updated: i64) -> Entity {
        Entity::new().with_id(id).with_last_updated(last_updated)
    }

    fn collection(entities: Vec<Entity>) -> Payload {
        Payload::Collection(entities)
    }

    fn ids(payload: &Payload) -> Vec<String> {
        payload
            .entities()
            .iter()
            .filter_map(Entity::id)
            .collect()
    }

    #[test]
    fn remote_newer_wins_and_remote_only_survives() {
        let local = collection(vec![entity("r1", 100)]);
        let remote = collection(vec![entity("r1", 200), entity("r2", 50)]);

        let report = merge(Some(&local), Some(&remote));

        assert_eq!(report.payload, Some(remote));
        assert!(report.to_push.is_empty());
        assert_eq!(report.remote_wins, 1);
        assert_eq!(report.remote_only, 1);
    }

    #[test]
    fn local_strictly_newer_wins() {
        let local = collection(vec![entity("r1", 300).with_field("guest", "Ana")]);
        let remote = collection(vec![entity("r1", 200), entity("r2", 50)]);

        let report = merge(Some(&local), Some(&remote));

        let merged = report.payload.unwrap();
        assert_eq!(merged.entities()[0], local.entities()[0]);
        assert_eq!(report.to_push, local.entities().to_vec());
        assert_eq!(report.local_wins, 1);
    }

    #[test]
    fn ties_and_missing_timestamps_favor_remote() {
        let local = collection(vec![
            entity("r1", 200).with_field("side", "local"),
            Entity::new().with_id("r2").with_field("side", "local"),
        ]);
        let remote = collection(vec![
            entity("r1", 200).with_field("side", "remote"),
            entity("r2", 10).with_field("side", "remote"),
        ]);

        let report = merge(Some(&local), Some(&remote));

        assert_eq!(report.payload, Some(remote));
        assert_eq!(report.remote_wins, 2);
    }

    #[test]
    fn remote_without_timestamp_keeps_its_copy() {
        let local = collection(vec![entity("r1", 100).with_field("side", "local")]);
        let remote = collection(vec![Entity::new().with_id("r1").with_field("side", "remote")]);

        let report = merge(Some(&local), Some(&remote));

        assert_eq!(report.payload, Some(remote));
        assert!(report.to_push.is_empty());
        assert_eq!(report.local_wins, 0);
        assert_eq!(report.remote_wins, 1);

        let local = Payload::Single(entity("prices", 100).with_field("night", 120));
        let remote = Payload::Single(Entity::new().with_id("prices").with_field("night", 90));
        let report = merge(Some(&local), Some(&remote));
        assert_eq!(report.payload, Some(remote));
        assert_eq!(report.remote_wins, 1);
    }

    #[test]
    fn disjoint_sets_merge_to_their_union() {
        let local = collection(vec![entity("l1", 1), entity("l2", 2)]);
        let remote = collection(vec![entity("r1", 1), entity("r2", 2), entity("r3", 3)]);

        let report = merge(Some(&local), Some(&remote));
        let merged = report.payload.unwrap();

        let mut merged_ids = ids(&merged);
        merged_ids.sort();
        assert_eq!(merged_ids, vec!["l1", "l2", "r1", "r2", "r3"]);
        assert_eq!(report.local_only, 2);
        assert_eq!(report.remote_only, 3);
        assert_eq!(report.to_push.len(), 2);
    }

    #[test]
    fn merge_is_deterministic_and_idempotent() {
        let local = collection(vec![entity("a", 5), entity("b", 1), entity("c", 9)]);
        let remote = collection(vec![entity("a", 4), entity("b", 2), entity("d", 1)]);

        let first = merge(Some(&local), Some(&remote));
        let second = merge(Some(&local), Some(&remote));
        assert_eq!(first, second);

        let merged = first.payload.unwrap();
        let again = merge(Some(&merged), Some(&merged));
        assert_eq!(again.payload, Some(merged));
        assert!(again.to_push.is_empty());
    }

    #[test]
    fn one_side_absent_returns_other_unchanged() {
        let snapshot = collection(vec![entity("r1", 1)]);

        let local_only = merge(Some(&snapshot), None);
        assert_eq!(local_only.payload.as_ref(), Some(&snapshot));
        assert_eq!(local_only.to_push.len(), 1);

        let remote_only = merge(None, Some(&snapshot));
        assert_eq!(remote_only.payload.as_ref(), Some(&snapshot));
        assert!(remote_only.to_push.is_empty());

        assert_eq!(merge(None, None), MergeReport::default());
    }

    #[test]
    fn id_less_entities_are_kept_once() {
        let note = Entity::new().with_field("note", "call plumber");
        let local = collection(vec![note.clone(), Entity::new().with_field("note", "new")]);
        let remote = collection(vec![note]);

        let report = merge(Some(&local), Some(&remote));

        assert_eq!(report.payload.unwrap().len(), 2);
        assert_eq!(report.local_only, 1);
    }

    #[test]
    fn singleton_uses_last_writer_wins() {
        let local = Payload::Single(entity("prices", 20).with_field("night", 120));
        let remote = Payload::Single(entity("prices", 10).with_field("night", 100));

        let report = merge(Some(&local), Some(&remote));
        assert_eq!(report.payload, Some(local.clone()));
        assert_eq!(report.to_push.len(), 1);

        let report = merge(Some(&remote), Some(&local));
        assert_eq!(report.payload, Some(local));
        assert!(report.to_push.is_empty());
    }

    #[test]
    fn newer_singleton_without_id_takes_remote_row_id() {
        let local = Payload::Single(Entity::new().with_last_updated(20).with_field("night", 120));
        let remote = Payload::Single(entity("p1", 10).with_field("night", 100));

        let report = merge(Some(&local), Some(&remote));

        let expected = Entity::new()
            .with_last_updated(20)
            .with_field("night", 120)
            .with_id("p1");
        assert_eq!(report.payload, Some(Payload::Single(expected.clone())));
        assert_eq!(report.to_push, vec![expected]);
        assert_eq!(report.local_wins, 1);
    }

    #[test]
    fn mismatched_shapes_keep_remote() {
        let local = Payload::Single(entity("x", 99));
        let remote = collection(vec![entity("r1", 1)]);
        let report = merge(Some(&local), Some(&remote));
        assert_eq!(report.payload, Some(remote));
    }
}
