use std::collections::{BTreeMap, HashMap};

use crate::models::{LaunchId, OperationCategory, OperationKey, OperationSnapshot, SubjectKey};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The key is owned by a different launch; nothing was written.
    Rejected,
}

/// In-memory operation snapshots, one partition per category. Pure state, no I/O.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    partitions: HashMap<OperationCategory, BTreeMap<SubjectKey, OperationSnapshot>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, snapshot: OperationSnapshot) -> UpsertOutcome {
        let partition = self.partitions.entry(snapshot.key.category).or_default();
        match partition.get_mut(&snapshot.key.subject) {
            Some(existing) if existing.launch != snapshot.launch => UpsertOutcome::Rejected,
            Some(existing) => {
                *existing = snapshot;
                UpsertOutcome::Updated
            }
            None => {
                partition.insert(snapshot.key.subject.clone(), snapshot);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Mutates an existing entry owned by `launch`. Never inserts.
    pub fn update(
        &mut self,
        key: &OperationKey,
        launch: LaunchId,
        mutate: impl FnOnce(&mut OperationSnapshot),
    ) -> Option<&OperationSnapshot> {
        let snapshot = self
            .partitions
            .get_mut(&key.category)?
            .get_mut(&key.subject)?;
        if snapshot.launch != launch {
            return None;
        }
        mutate(snapshot);
        Some(&*snapshot)
    }

    pub fn remove(&mut self, key: &OperationKey) -> Option<OperationSnapshot> {
        let partition = self.partitions.get_mut(&key.category)?;
        let removed = partition.remove(&key.subject);
        if partition.is_empty() {
            self.partitions.remove(&key.category);
        }
        removed
    }

    pub fn get(&self, key: &OperationKey) -> Option<&OperationSnapshot> {
        self.partitions.get(&key.category)?.get(&key.subject)
    }

    pub fn owner(&self, key: &OperationKey) -> Option<LaunchId> {
        self.get(key).map(|snapshot| snapshot.launch)
    }

    pub fn list_active(&self, category: OperationCategory) -> Vec<&OperationSnapshot> {
        self.partitions
            .get(&category)
            .map(|partition| {
                partition
                    .values()
                    .filter(|snapshot| !snapshot.is_terminal())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All entries ordered by category, then subject.
    pub fn iter(&self) -> impl Iterator<Item = &OperationSnapshot> {
        OperationCategory::ALL
            .into_iter()
            .filter_map(|category| self.partitions.get(&category))
            .flat_map(|partition| partition.values())
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }
}
