//! Completion tracking for "send to all" requests.
//!
//! A [`BroadcastGroup`] collects the correlation ids issued by one tracked
//! broadcast. The dispatcher reports every successful per-recipient
//! resolution through [`BroadcastAggregator::notify_resolved`]; the group
//! fires its callback with [`CallbackStatus::Success`] once every member has
//! answered, or with [`CallbackStatus::Timeout`] from
//! [`BroadcastAggregator::sweep`] once its own deadline passes. Whichever
//! comes first wins and the group is removed, so it fires exactly once.

use crate::callbacks::CallbackStatus;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

/// Completion callback for a whole broadcast.
pub type GroupCallback = Box<dyn FnOnce(CallbackStatus) + Send>;

/// Wraps a closure as a [`GroupCallback`].
pub fn group_callback<F>(handler: F) -> GroupCallback
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    Box::new(handler)
}

/// Identifier of a tracked broadcast, unique per aggregator.
pub type GroupId = u64;

pub struct BroadcastGroup {
    pub group_id: GroupId,
    pub deadline: Instant,
    required: HashSet<i32>,
    responded: HashSet<i32>,
    callback: GroupCallback,
}

impl std::fmt::Debug for BroadcastGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastGroup")
            .field("group_id", &self.group_id)
            .field("deadline", &self.deadline)
            .field("required", &self.required.len())
            .field("received", &self.responded.len())
            .finish()
    }
}

impl BroadcastGroup {
    pub fn required_count(&self) -> usize {
        self.required.len()
    }

    pub fn received_count(&self) -> usize {
        self.responded.len()
    }

    pub fn is_member(&self, correlation_id: i32) -> bool {
        self.required.contains(&correlation_id)
    }

    pub fn is_complete(&self) -> bool {
        self.responded.len() >= self.required.len()
    }
}

/// Active broadcast groups of one server session.
#[derive(Debug, Default)]
pub struct BroadcastAggregator {
    last_group_id: GroupId,
    groups: Vec<BroadcastGroup>,
}

impl BroadcastAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a broadcast over `required` correlation ids.
    ///
    /// An empty member set completes immediately with
    /// [`CallbackStatus::Success`] and nothing is stored; `None` is returned
    /// in that case.
    pub fn track(
        &mut self,
        required: HashSet<i32>,
        callback: GroupCallback,
        deadline: Instant,
    ) -> Option<GroupId> {
        if required.is_empty() {
            debug!("📭 Broadcast had no recipients, completing immediately");
            callback(CallbackStatus::Success);
            return None;
        }

        self.last_group_id += 1;
        let group_id = self.last_group_id;
        debug!(
            "📡 Tracking broadcast group {} over {} recipient(s)",
            group_id,
            required.len()
        );
        self.groups.push(BroadcastGroup {
            group_id,
            deadline,
            required,
            responded: HashSet::new(),
            callback,
        });
        Some(group_id)
    }

    /// Records a successful response for `correlation_id`.
    ///
    /// Returns the id of the group that completed as a result, if any.
    pub fn notify_resolved(&mut self, correlation_id: i32) -> Option<GroupId> {
        let index = self
            .groups
            .iter()
            .position(|group| group.is_member(correlation_id))?;

        let group = &mut self.groups[index];
        if !group.responded.insert(correlation_id) {
            return None;
        }
        if !group.is_complete() {
            return None;
        }

        let group = self.groups.remove(index);
        info!(
            "✅ Broadcast group {} complete ({} response(s))",
            group.group_id,
            group.received_count()
        );
        (group.callback)(CallbackStatus::Success);
        Some(group.group_id)
    }

    /// Fires [`CallbackStatus::Timeout`] for every group whose deadline is
    /// before `now` and removes them.
    ///
    /// Returns the ids of the expired groups.
    pub fn sweep(&mut self, now: Instant) -> Vec<GroupId> {
        let (expired, active): (Vec<BroadcastGroup>, Vec<BroadcastGroup>) = std::mem::take(&mut self.groups)
            .into_iter()
            .partition(|group| group.deadline < now);
        self.groups = active;

        expired
            .into_iter()
            .map(|group| {
                info!(
                    "⌛ Broadcast group {} timed out with {}/{} response(s)",
                    group.group_id,
                    group.received_count(),
                    group.required_count()
                );
                let group_id = group.group_id;
                (group.callback)(CallbackStatus::Timeout);
                group_id
            })
            .collect()
    }

    pub fn get(&self, group_id: GroupId) -> Option<&BroadcastGroup> {
        self.groups.iter().find(|group| group.group_id == group_id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drops every group without invoking its callback.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.groups.len();
        self.groups.clear();
        abandoned
    }
}
