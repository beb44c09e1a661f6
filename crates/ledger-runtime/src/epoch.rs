//! Epoch Manager - periodic reshuffling of participants into groups

use crate::error::EpochError;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// Partition of participants for one epoch
pub type Groups = Vec<Vec<String>>;

/// Tracks membership epochs and their groupings
///
/// Every epoch is a fresh shuffle of the full participant set, chunked into
/// groups of the requested size (the last group may be smaller). Earlier
/// epochs stay queryable.
#[derive(Debug, Clone)]
pub struct EpochManager {
    participants: Vec<String>,
    current_epoch: u64,
    groups_by_epoch: BTreeMap<u64, Groups>,
}

impl EpochManager {
    pub fn new<P: Into<String>>(participants: impl IntoIterator<Item = P>) -> Self {
        Self {
            participants: participants.into_iter().map(Into::into).collect(),
            current_epoch: 0,
            groups_by_epoch: BTreeMap::new(),
        }
    }

    /// Start a new epoch using the thread-local RNG
    pub fn start_new_epoch(&mut self, group_size: usize) -> Result<u64, EpochError> {
        self.start_new_epoch_with_rng(group_size, &mut rand::thread_rng())
    }

    /// Start a new epoch with a caller-supplied RNG
    pub fn start_new_epoch_with_rng<R: Rng + ?Sized>(
        &mut self,
        group_size: usize,
        rng: &mut R,
    ) -> Result<u64, EpochError> {
        if group_size == 0 {
            return Err(EpochError::InvalidGroupSize);
        }
        if self.participants.is_empty() {
            return Err(EpochError::NoParticipants);
        }

        let mut shuffled = self.participants.clone();
        shuffled.shuffle(rng);

        let groups: Groups = shuffled
            .chunks(group_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        self.current_epoch += 1;
        tracing::info!(
            "Starting epoch {} with {} groups: {:?}",
            self.current_epoch,
            groups.len(),
            groups
        );
        self.groups_by_epoch.insert(self.current_epoch, groups);

        Ok(self.current_epoch)
    }

    /// Latest epoch number (0 before the first epoch starts)
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    /// Groups of the latest epoch (empty before the first epoch starts)
    pub fn current_groups(&self) -> Groups {
        self.groups_for(self.current_epoch)
            .cloned()
            .unwrap_or_default()
    }

    /// Groups of a given epoch
    pub fn groups_for(&self, epoch: u64) -> Option<&Groups> {
        self.groups_by_epoch.get(&epoch)
    }

    /// Index of the group a participant belongs to in the latest epoch
    pub fn group_of(&self, participant: &str) -> Option<usize> {
        self.groups_for(self.current_epoch)?
            .iter()
            .position(|group| group.iter().any(|p| p == participant))
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }
}
