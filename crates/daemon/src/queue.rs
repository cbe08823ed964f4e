//! Pending jobs plus the single current job.
//!
//! The current job lives outside the reorderable list, so reordering and removal
//! only ever touch jobs still in the Queued state.

use crate::job::{JobId, JobRecord, JobState};
use serde::Deserialize;
use std::collections::VecDeque;
use thiserror::Error;

/// Error type for queue operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// A job for the same source is already queued or running
    #[error("A job for '{0}' is already queued or running")]
    Duplicate(String),

    /// No job with this id
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// Operation not allowed in the job's current state
    #[error("Job {id} is {state} and cannot be {action}")]
    InvalidState {
        id: JobId,
        state: String,
        action: &'static str,
    },
}

/// Direction for [`JobQueue::move_job`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// FIFO queue with reordering, keyed by job id
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: VecDeque<JobRecord>,
    current: Option<JobRecord>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a queued job.
    ///
    /// Fails with [`QueueError::Duplicate`] if the same source is already queued,
    /// running or paused.
    pub fn enqueue(&mut self, job: JobRecord) -> Result<JobId, QueueError> {
        let key = job.source.key();
        let clash = self
            .pending
            .iter()
            .chain(self.current.iter().filter(|c| c.state.is_active()))
            .any(|existing| existing.source.key() == key);
        if clash {
            return Err(QueueError::Duplicate(key.display().to_string()));
        }

        let id = job.id;
        self.pending.push_back(job);
        Ok(id)
    }

    /// Remove and return the earliest-inserted queued job
    pub fn dequeue_next(&mut self) -> Option<JobRecord> {
        self.pending.pop_front()
    }

    /// Dequeue the next job and make it the current, Running job.
    ///
    /// Returns `None` when a job is already current or nothing is queued.
    pub fn begin_next(&mut self) -> Option<&mut JobRecord> {
        if self.current.is_some() {
            return None;
        }
        let mut job = self.dequeue_next()?;
        job.mark_running();
        self.current = Some(job);
        self.current.as_mut()
    }

    /// Detach the current job, returning it to the caller
    pub fn take_current(&mut self) -> Option<JobRecord> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&JobRecord> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut JobRecord> {
        self.current.as_mut()
    }

    /// Current job, only if it has the given id
    pub fn current_with_id(&mut self, id: JobId) -> Option<&mut JobRecord> {
        self.current.as_mut().filter(|job| job.id == id)
    }

    /// Queued jobs in run order
    pub fn pending(&self) -> impl Iterator<Item = &JobRecord> {
        self.pending.iter()
    }

    pub fn pending_ids(&self) -> Vec<JobId> {
        self.pending.iter().map(|job| job.id).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove a queued job.
    ///
    /// The current job cannot be removed; stop or cancel it instead.
    pub fn remove(&mut self, id: JobId) -> Result<JobRecord, QueueError> {
        if let Some(current) = self.current.as_ref().filter(|job| job.id == id) {
            return Err(QueueError::InvalidState {
                id,
                state: current.state.to_string(),
                action: "removed",
            });
        }

        let index = self
            .pending
            .iter()
            .position(|job| job.id == id)
            .ok_or(QueueError::NotFound(id))?;

        // Every pending job is Queued; the check keeps that true if it ever changes.
        if self.pending[index].state != JobState::Queued {
            return Err(QueueError::InvalidState {
                id,
                state: self.pending[index].state.to_string(),
                action: "removed",
            });
        }

        self.pending
            .remove(index)
            .ok_or(QueueError::NotFound(id))
    }

    /// Swap a queued job with its neighbour.
    ///
    /// No-op at the boundary or when the id is not queued. Returns whether the
    /// order changed.
    pub fn move_job(&mut self, id: JobId, direction: Direction) -> bool {
        let Some(index) = self.pending.iter().position(|job| job.id == id) else {
            return false;
        };

        let neighbour = match direction {
            Direction::Up if index > 0 => index - 1,
            Direction::Down if index + 1 < self.pending.len() => index + 1,
            _ => return false,
        };

        self.pending.swap(index, neighbour);
        true
    }

    /// Drop every queued job, leaving the current job untouched
    pub fn clear(&mut self) -> usize {
        let removed = self.pending.len();
        self.pending.clear();
        removed
    }
}
