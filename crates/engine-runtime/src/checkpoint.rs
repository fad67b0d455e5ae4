//! Which checkpoint a run may persist, given chunks that commit in any order.
//!
//! While the run is going only the contiguous committed prefix is persisted,
//! so a crash never leaves a checkpoint past an uncommitted chunk. Once the
//! run settles the checkpoint is the furthest position of any committed chunk,
//! and every chunk below it that did not commit is kept as a pending range.

use model::{
    chunk::{
        result::ChunkResult,
        task::{ChunkBound, ChunkTask},
    },
    execution::load::CheckpointStrategy,
    pagination::{checkpoint::PendingRange, cursor::Cursor},
};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct CheckpointTracker {
    strategy: CheckpointStrategy,
    key_column: Option<String>,
    /// Position the run resumed from.
    base: Cursor,
    base_rows: u64,
    committed: BTreeMap<usize, Cursor>,
    ranges: BTreeMap<usize, PendingRange>,
    /// Leading tasks that re-read ranges an earlier run left pending.
    replanned: usize,
    frontier_index: usize,
    frontier: Cursor,
    rows_done: u64,
}

impl CheckpointTracker {
    /// `strategy` must already be resolved: `Key`, `RowSkip` or `Disabled`.
    pub fn new(
        strategy: CheckpointStrategy,
        key_column: Option<String>,
        base: Cursor,
        base_rows: u64,
    ) -> Self {
        CheckpointTracker {
            strategy,
            key_column,
            frontier: base.clone(),
            base,
            base_rows,
            committed: BTreeMap::new(),
            ranges: BTreeMap::new(),
            replanned: 0,
            frontier_index: 0,
            rows_done: 0,
        }
    }

    /// Registers the run's tasks; the first `replanned` re-read pending ranges.
    pub fn with_tasks(mut self, tasks: &[ChunkTask], replanned: usize) -> Self {
        self.ranges = tasks
            .iter()
            .map(|task| (task.chunk_index, PendingRange::from(task)))
            .collect();
        self.replanned = replanned;
        self
    }

    pub fn strategy(&self) -> CheckpointStrategy {
        self.strategy
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.strategy, CheckpointStrategy::Key | CheckpointStrategy::RowSkip)
    }

    /// Rows committed so far, including those of earlier runs.
    pub fn rows_done(&self) -> u64 {
        self.base_rows + self.rows_done
    }

    fn chunk_cursor(&self, task: &ChunkTask, result: &ChunkResult) -> Cursor {
        match self.strategy {
            CheckpointStrategy::Key => {
                let Some(column) = &self.key_column else {
                    return Cursor::None;
                };
                let value = result.max_checkpoint_value_seen.clone().or(match &task.upper_bound {
                    ChunkBound::Key(bound) => Some(bound.clone()),
                    _ => None,
                });
                match value {
                    Some(value) => Cursor::Key {
                        column: column.clone(),
                        value,
                    },
                    None => Cursor::None,
                }
            }
            CheckpointStrategy::RowSkip => match task.lower_bound {
                ChunkBound::Row(start) => Cursor::RowOffset {
                    offset: start + result.rows_extracted,
                },
                _ => Cursor::None,
            },
            CheckpointStrategy::Auto | CheckpointStrategy::Disabled => Cursor::None,
        }
    }

    /// Records a finished chunk. Returns the new frontier when it moved.
    pub fn record(&mut self, task: &ChunkTask, result: &ChunkResult) -> Option<Cursor> {
        if !result.is_committed() || !self.is_enabled() {
            return None;
        }
        self.rows_done += result.rows_extracted;
        let cursor = self.chunk_cursor(task, result);
        self.committed.insert(task.chunk_index, cursor);

        let before = self.frontier.clone();
        while let Some(cursor) = self.committed.get(&self.frontier_index) {
            self.frontier = self.frontier.clone().advance(cursor.clone());
            self.frontier_index += 1;
        }
        self.frontier.is_ahead_of(&before).then(|| self.frontier.clone())
    }

    /// Highest position among all committed chunks, never behind the start.
    pub fn settle(&self) -> Cursor {
        self.committed
            .values()
            .cloned()
            .fold(self.base.clone(), Cursor::advance)
    }

    /// Persistable position while the run is in progress.
    pub fn frontier(&self) -> &Cursor {
        &self.frontier
    }

    fn uncommitted(&self, owed: impl Fn(usize) -> bool) -> Vec<PendingRange> {
        self.ranges
            .iter()
            .filter(|(idx, _)| !self.committed.contains_key(idx) && owed(**idx))
            .map(|(_, range)| range.clone())
            .collect()
    }

    /// Ranges still owed below [`Self::frontier`].
    pub fn frontier_pending(&self) -> Vec<PendingRange> {
        self.uncommitted(|idx| idx < self.replanned)
    }

    /// Ranges still owed below [`Self::settle`]. Chunks past the furthest
    /// committed one are not owed: a resume plans them again anyway.
    pub fn pending_ranges(&self) -> Vec<PendingRange> {
        let reach = self
            .committed
            .keys()
            .filter(|idx| **idx >= self.replanned)
            .max()
            .copied();
        self.uncommitted(|idx| idx < self.replanned || reach.is_some_and(|reach| idx < reach))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{chunk::result::RowCounts, core::value::Value};

    fn key(v: i64) -> Cursor {
        Cursor::Key {
            column: "txn_id".into(),
            value: Value::Int(v),
        }
    }

    fn key_task(index: usize, upper: Option<i64>) -> ChunkTask {
        let upper = upper.map(|v| ChunkBound::Key(Value::Int(v))).unwrap_or(ChunkBound::Unbounded);
        ChunkTask::new(index, ChunkBound::Unbounded, upper, String::new())
    }

    fn committed(index: usize, rows: u64, max: Option<i64>) -> ChunkResult {
        let counts = RowCounts {
            new: rows,
            ..Default::default()
        };
        ChunkResult::committed(index, counts, max.map(Value::Int), 1, 1)
    }

    fn tracker() -> CheckpointTracker {
        CheckpointTracker::new(CheckpointStrategy::Key, Some("txn_id".into()), Cursor::None, 0)
    }

    #[test]
    fn test_frontier_waits_for_lower_chunks() {
        let mut t = tracker();
        assert_eq!(t.record(&key_task(2, None), &committed(2, 10, Some(30))), None);
        assert_eq!(t.record(&key_task(1, Some(20)), &committed(1, 10, Some(20))), None);
        assert_eq!(
            t.record(&key_task(0, Some(10)), &committed(0, 10, Some(10))),
            Some(key(30))
        );
        assert_eq!(t.rows_done(), 30);
    }

    #[test]
    fn test_failed_chunk_holds_the_frontier_but_not_the_settle() {
        let mut t = tracker();
        t.record(&key_task(0, Some(10)), &committed(0, 10, Some(10)));
        t.record(
            &key_task(1, Some(20)),
            &ChunkResult::failed(1, 10, "boom".into(), 1, 1),
        );
        t.record(&key_task(2, None), &committed(2, 5, Some(25)));

        assert_eq!(t.frontier(), &key(10));
        assert_eq!(t.settle(), key(25));
    }

    #[test]
    fn test_failed_middle_chunk_stays_pending() {
        let tasks = [key_task(0, Some(10)), key_task(1, Some(20)), key_task(2, None)];
        let mut t = tracker().with_tasks(&tasks, 0);
        t.record(&tasks[0], &committed(0, 10, Some(10)));
        t.record(&tasks[1], &ChunkResult::failed(1, 10, "boom".into(), 1, 1));
        t.record(&tasks[2], &committed(2, 10, Some(30)));

        assert_eq!(t.settle(), key(30));
        assert_eq!(t.pending_ranges(), vec![PendingRange::from(&tasks[1])]);
        assert!(t.frontier_pending().is_empty());
    }

    #[test]
    fn test_chunks_past_the_furthest_commit_are_not_pending() {
        let tasks = [key_task(0, Some(10)), key_task(1, Some(20)), key_task(2, None)];
        let mut t = tracker().with_tasks(&tasks, 0);
        t.record(&tasks[0], &committed(0, 10, Some(10)));
        t.record(&tasks[1], &ChunkResult::failed(1, 10, "boom".into(), 1, 1));

        assert_eq!(t.settle(), key(10));
        assert!(t.pending_ranges().is_empty());
    }

    #[test]
    fn test_replanned_range_stays_pending_until_it_commits() {
        let hole = ChunkTask::new(
            0,
            ChunkBound::Key(Value::Int(10)),
            ChunkBound::Key(Value::Int(20)),
            String::new(),
        );
        let tasks = [hole.clone(), key_task(1, None)];
        let mut t = CheckpointTracker::new(CheckpointStrategy::Key, Some("txn_id".into()), key(30), 20)
            .with_tasks(&tasks, 1);
        assert_eq!(t.frontier_pending(), vec![PendingRange::from(&hole)]);

        t.record(&tasks[1], &committed(1, 0, None));
        assert_eq!(t.pending_ranges(), vec![PendingRange::from(&hole)]);

        t.record(&hole, &committed(0, 10, Some(20)));
        assert!(t.pending_ranges().is_empty());
        assert_eq!(t.settle(), key(30));
        assert_eq!(t.rows_done(), 30);
    }

    #[test]
    fn test_settle_is_order_independent() {
        let results = [(0, 10), (1, 20), (2, 30)];
        let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 0, 1], [1, 2, 0]];
        for order in orders {
            let mut t = tracker();
            for idx in order {
                let (i, max) = results[idx];
                t.record(&key_task(i, Some(max)), &committed(i, 1, Some(max as i64)));
            }
            assert_eq!(t.settle(), key(30));
        }
    }

    #[test]
    fn test_never_behind_the_resume_point() {
        let t = CheckpointTracker::new(CheckpointStrategy::Key, Some("txn_id".into()), key(60000), 60000);
        assert_eq!(t.settle(), key(60000));
        assert_eq!(t.rows_done(), 60000);
    }

    #[test]
    fn test_empty_chunk_advances_to_its_upper_bound() {
        let mut t = tracker();
        assert_eq!(t.record(&key_task(0, Some(100)), &committed(0, 0, None)), Some(key(100)));
    }

    #[test]
    fn test_row_skip_counts_positions() {
        let mut t = CheckpointTracker::new(CheckpointStrategy::RowSkip, None, Cursor::RowOffset { offset: 100 }, 100);
        let task = ChunkTask::new(0, ChunkBound::Row(100), ChunkBound::Row(150), String::new());
        assert_eq!(
            t.record(&task, &committed(0, 50, None)),
            Some(Cursor::RowOffset { offset: 150 })
        );
    }

    #[test]
    fn test_disabled_records_nothing() {
        let mut t = CheckpointTracker::new(CheckpointStrategy::Disabled, None, Cursor::None, 0);
        assert_eq!(t.record(&key_task(0, None), &committed(0, 5, Some(5))), None);
        assert_eq!(t.settle(), Cursor::None);
    }
}
