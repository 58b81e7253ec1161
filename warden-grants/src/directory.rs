//! In-memory group directory
//!
//! Membership is owned by the caller's user system; this directory is the
//! seeded stand-in used by the CLI and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use warden_core::{GroupDirectory, GroupId, UserId, WardenResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryGroupDirectory {
    memberships: Arc<RwLock<HashMap<UserId, BTreeSet<GroupId>>>>,
}

impl MemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `group id -> member user ids` table
    pub fn from_groups(groups: &BTreeMap<String, Vec<String>>) -> Self {
        let mut memberships: HashMap<UserId, BTreeSet<GroupId>> = HashMap::new();
        for (group, members) in groups {
            for member in members {
                memberships
                    .entry(UserId::new(member.as_str()))
                    .or_default()
                    .insert(GroupId::new(group.as_str()));
            }
        }
        Self {
            memberships: Arc::new(RwLock::new(memberships)),
        }
    }

    pub async fn add_member(&self, user: &UserId, group: &GroupId) {
        let mut memberships = self.memberships.write().await;
        memberships
            .entry(user.clone())
            .or_default()
            .insert(group.clone());
        debug!("Added {} to group {}", user, group);
    }

    /// Returns whether the user was a member
    pub async fn remove_member(&self, user: &UserId, group: &GroupId) -> bool {
        let mut memberships = self.memberships.write().await;
        let Some(groups) = memberships.get_mut(user) else {
            return false;
        };
        let removed = groups.remove(group);
        if groups.is_empty() {
            memberships.remove(user);
        }
        if removed {
            debug!("Removed {} from group {}", user, group);
        }
        removed
    }

    /// Members of one group, sorted
    pub async fn members_of(&self, group: &GroupId) -> Vec<UserId> {
        let memberships = self.memberships.read().await;
        let mut members: Vec<UserId> = memberships
            .iter()
            .filter(|(_, groups)| groups.contains(group))
            .map(|(user, _)| user.clone())
            .collect();
        members.sort();
        members
    }
}

#[async_trait]
impl GroupDirectory for MemoryGroupDirectory {
    async fn groups_of(&self, user: &UserId) -> WardenResult<Vec<GroupId>> {
        let memberships = self.memberships.read().await;
        Ok(memberships
            .get(user)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default())
    }
}
