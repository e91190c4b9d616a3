//! Weighted progress aggregation.
//!
//! Progress is computed bottom-up: a task contributes its weight scaled by
//! its self-reported percentage (or its full weight once finished), a group
//! sums its tasks, and a workflow sums its non-skipped groups.

use std::ops::Add;

use super::group::Group;
use super::task::Task;

/// Completed weight over total weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub current: f64,
    pub total: f64,
}

impl Progress {
    pub fn new(current: f64, total: f64) -> Self {
        Self { current, total }
    }

    /// Contribution of a single task.
    pub fn of_task(task: &Task) -> Self {
        let weight = f64::from(task.weight);
        let current = if task.finished {
            weight
        } else {
            weight * task.percent.clamp(0.0, 1.0)
        };
        Self::new(current, weight)
    }

    /// Sum over the tasks of a group, and whether all of them are finished.
    pub fn of_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> (Self, bool) {
        tasks
            .into_iter()
            .fold((Self::default(), true), |(sum, finished), task| {
                (sum + Self::of_task(task), finished && task.finished)
            })
    }

    /// Sum over the groups of a workflow. Skipped groups are left out.
    pub fn of_groups<'a>(groups: impl IntoIterator<Item = &'a Group>) -> Self {
        groups
            .into_iter()
            .filter(|group| !group.skip)
            .map(|group| Self::of_tasks(&group.tasks).0)
            .sum()
    }

    /// Percentage between 0 and 100. Zero when there is no weight at all.
    pub fn percent(&self) -> f64 {
        if self.total > 0.0 {
            self.current / self.total * 100.0
        } else {
            0.0
        }
    }

    /// Percentage truncated to an integer, as reported for a whole workflow.
    pub fn whole_percent(&self) -> u8 {
        // Truncation towards zero is intended; the value is within 0..=100.
        self.percent().clamp(0.0, 100.0) as u8
    }
}

impl Add for Progress {
    type Output = Progress;

    fn add(self, rhs: Progress) -> Progress {
        Progress::new(self.current + rhs.current, self.total + rhs.total)
    }
}

impl std::iter::Sum for Progress {
    fn sum<I: Iterator<Item = Progress>>(iter: I) -> Progress {
        iter.fold(Progress::default(), Add::add)
    }
}
