//! Transfer queue - deferred, batched inventory mutations
//!
//! Stage changes of inventory-resident items become `remove(old) + add(new)`
//! tasks queued per owner. Before a batch runs, chains are contracted:
//! `A -> B` followed by `B -> C` with matching counts becomes `A -> C`, so an
//! item that crossed several stages between drains is swapped once.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::host::Host;
use crate::ids::{ItemId, LocationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStack {
    pub item: ItemId,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTask {
    pub remove: Option<ItemStack>,
    pub add: Option<ItemStack>,
}

impl TransferTask {
    pub fn swap(from: ItemId, to: ItemId, count: u32) -> Self {
        Self {
            remove: Some(ItemStack { item: from, count }),
            add: Some(ItemStack { item: to, count }),
        }
    }

    /// Both sides present with the same count: a graph edge
    fn edge(&self) -> Option<(ItemId, ItemId, u32)> {
        match (self.remove, self.add) {
            (Some(r), Some(a)) if r.count == a.count => Some((r.item, a.item, r.count)),
            _ => None,
        }
    }

    fn normalized(mut self) -> Option<Self> {
        self.remove = self.remove.filter(|s| s.count > 0);
        self.add = self.add.filter(|s| s.count > 0);
        if let Some((from, to, _)) = self.edge() {
            if from == to {
                return None;
            }
        }
        if self.remove.is_none() && self.add.is_none() {
            return None;
        }
        Some(self)
    }
}

/// Contract degree-(1,1) intermediate items and drop no-op tasks
pub fn prune_chains(tasks: impl IntoIterator<Item = TransferTask>) -> Vec<TransferTask> {
    let mut tasks: Vec<TransferTask> = tasks.into_iter().filter_map(TransferTask::normalized).collect();

    loop {
        let mut contracted = false;
        'search: for i in 0..tasks.len() {
            let Some((a, b, n)) = tasks[i].edge() else { continue };
            let incoming = tasks.iter().filter(|t| t.add.map(|s| s.item) == Some(b)).count();
            let outgoing = tasks.iter().filter(|t| t.remove.map(|s| s.item) == Some(b)).count();
            if incoming != 1 || outgoing != 1 {
                continue;
            }
            for j in (i + 1)..tasks.len() {
                match tasks[j].edge() {
                    Some((from, c, m)) if from == b && m == n => {
                        tasks.remove(j);
                        match TransferTask::swap(a, c, n).normalized() {
                            Some(merged) => tasks[i] = merged,
                            None => {
                                tasks.remove(i);
                            }
                        }
                        contracted = true;
                        break 'search;
                    }
                    _ => {}
                }
            }
        }
        if !contracted {
            return tasks;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub dropped: usize,
    pub remaining: usize,
}

pub struct TransferQueue {
    queues: Mutex<HashMap<LocationId, VecDeque<TransferTask>>>,
    max_per_tick: usize,
}

impl TransferQueue {
    pub fn new(max_per_tick: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            max_per_tick: max_per_tick.max(1),
        }
    }

    pub fn enqueue(&self, owner: LocationId, task: TransferTask) {
        self.queues.lock().entry(owner).or_default().push_back(task);
    }

    pub fn pending(&self, owner: LocationId) -> usize {
        self.queues.lock().get(&owner).map(VecDeque::len).unwrap_or(0)
    }

    pub fn total_pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    pub fn clear(&self) {
        self.queues.lock().clear();
    }

    /// Take the next pruned batch for `owner`, leaving the rest queued
    fn next_batch(&self, owner: LocationId) -> Vec<TransferTask> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&owner) else {
            return Vec::new();
        };
        let mut pruned = prune_chains(queue.drain(..));
        let rest = if pruned.len() > self.max_per_tick {
            pruned.split_off(self.max_per_tick)
        } else {
            Vec::new()
        };
        if rest.is_empty() {
            queues.remove(&owner);
        } else {
            queue.extend(rest);
        }
        pruned
    }

    /// Apply one bounded batch per owner against the host inventory
    pub fn drain(&self, host: &dyn Host) -> DrainReport {
        let owners: Vec<LocationId> = self.queues.lock().keys().copied().collect();
        let mut report = DrainReport::default();

        for owner in owners {
            let batch = self.next_batch(owner);
            if batch.is_empty() {
                continue;
            }
            let mut inventory = host.inventory(owner);
            let mut ran = 0;
            for task in batch {
                if let Some(rm) = task.remove {
                    let entry = inventory.get(&rm.item).copied().unwrap_or_default();
                    if entry.quest || entry.count < rm.count {
                        debug!(owner = %owner, item = %rm.item, quest = entry.quest, "dropping transfer task");
                        report.dropped += 1;
                        continue;
                    }
                    host.remove_item(owner, rm.item, rm.count);
                    if let Some(e) = inventory.get_mut(&rm.item) {
                        e.count -= rm.count;
                    }
                }
                if let Some(add) = task.add {
                    host.add_item(owner, add.item, add.count);
                    let e = inventory.entry(add.item).or_default();
                    e.count = e.count.saturating_add(add.count);
                }
                ran += 1;
            }
            if ran > 0 {
                host.refresh_inventory(owner);
            }
            report.applied += ran;
        }
        report.remaining = self.total_pending();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;

    const OWNER: LocationId = LocationId(5);

    #[test]
    fn test_chain_collapses() {
        let pruned = prune_chains(vec![
            TransferTask::swap(ItemId(1), ItemId(2), 3),
            TransferTask::swap(ItemId(2), ItemId(3), 3),
        ]);
        assert_eq!(pruned, vec![TransferTask::swap(ItemId(1), ItemId(3), 3)]);
    }

    #[test]
    fn test_long_chain_collapses() {
        let pruned = prune_chains(vec![
            TransferTask::swap(ItemId(1), ItemId(2), 1),
            TransferTask::swap(ItemId(2), ItemId(3), 1),
            TransferTask::swap(ItemId(3), ItemId(4), 1),
        ]);
        assert_eq!(pruned, vec![TransferTask::swap(ItemId(1), ItemId(4), 1)]);
    }

    #[test]
    fn test_mismatched_counts_kept() {
        let tasks = vec![
            TransferTask::swap(ItemId(1), ItemId(2), 3),
            TransferTask::swap(ItemId(2), ItemId(3), 2),
        ];
        assert_eq!(prune_chains(tasks.clone()), tasks);
    }

    #[test]
    fn test_round_trip_and_noops_dropped() {
        let pruned = prune_chains(vec![
            TransferTask::swap(ItemId(1), ItemId(2), 1),
            TransferTask::swap(ItemId(2), ItemId(1), 1),
            TransferTask::swap(ItemId(7), ItemId(7), 4),
            TransferTask::swap(ItemId(8), ItemId(9), 0),
        ]);
        assert!(pruned.is_empty());
    }

    #[test]
    fn test_branching_node_not_contracted() {
        let tasks = vec![
            TransferTask::swap(ItemId(1), ItemId(2), 1),
            TransferTask::swap(ItemId(5), ItemId(2), 1),
            TransferTask::swap(ItemId(2), ItemId(3), 1),
        ];
        assert_eq!(prune_chains(tasks.clone()), tasks);
    }

    #[test]
    fn test_drain_applies_and_refreshes() {
        let host = MemoryHost::new();
        host.put(OWNER, ItemId(1), 3, false);
        let queue = TransferQueue::new(10);
        queue.enqueue(OWNER, TransferTask::swap(ItemId(1), ItemId(2), 3));
        queue.enqueue(OWNER, TransferTask::swap(ItemId(2), ItemId(3), 3));

        let report = queue.drain(&host);
        assert_eq!(report.applied, 1);
        assert_eq!(host.count_of(OWNER, ItemId(1)), 0);
        assert_eq!(host.count_of(OWNER, ItemId(2)), 0);
        assert_eq!(host.count_of(OWNER, ItemId(3)), 3);
        assert_eq!(host.refreshes(), vec![OWNER]);
    }

    #[test]
    fn test_quest_items_locked() {
        let host = MemoryHost::new();
        host.put(OWNER, ItemId(1), 1, true);
        let queue = TransferQueue::new(10);
        queue.enqueue(OWNER, TransferTask::swap(ItemId(1), ItemId(2), 1));
        let report = queue.drain(&host);
        assert_eq!(report.applied, 0);
        assert_eq!(report.dropped, 1);
        assert_eq!(host.count_of(OWNER, ItemId(1)), 1);
        assert!(host.refreshes().is_empty());
    }

    #[test]
    fn test_backpressure_limits_batch() {
        let host = MemoryHost::new();
        for i in 0..5 {
            host.put(OWNER, ItemId(100 + i), 1, false);
        }
        let queue = TransferQueue::new(2);
        for i in 0..5 {
            queue.enqueue(OWNER, TransferTask::swap(ItemId(100 + i), ItemId(200 + i), 1));
        }
        let report = queue.drain(&host);
        assert_eq!(report.applied, 2);
        assert_eq!(report.remaining, 3);
        queue.drain(&host);
        queue.drain(&host);
        assert_eq!(queue.total_pending(), 0);
        assert_eq!(host.count_of(OWNER, ItemId(204)), 1);
    }
}
