//! In-memory append-only job log store.

use bytes::Bytes;
use conveyor_core::{JobId, StepId};
use std::collections::HashMap;

use crate::shard::ShardedMap;

/// A slice of a job's log and the offset to continue reading from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub data: Bytes,
    pub next_offset: usize,
}

#[derive(Default)]
struct JobLogs {
    /// Every chunk for the job, step-scoped or not, in arrival order.
    combined: Vec<u8>,
    steps: HashMap<StepId, Vec<u8>>,
}

/// Byte logs keyed by job id and, optionally, step id.
#[derive(Default)]
pub struct LogStore {
    logs: ShardedMap<JobId, JobLogs>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `content` to the job's log, and to the step's log if one is given.
    pub fn append(&self, job_id: JobId, step_id: Option<StepId>, content: &[u8]) {
        if content.is_empty() {
            return;
        }
        self.logs.upsert(job_id, |logs| {
            logs.combined.extend_from_slice(content);
            if let Some(step_id) = step_id {
                logs.steps.entry(step_id).or_default().extend_from_slice(content);
            }
        });
    }

    /// Read up to `limit` bytes starting at `offset`.
    ///
    /// Returns `None` when nothing was ever logged for the job (or step).
    /// Reading at or past the end yields an empty chunk.
    pub fn read(
        &self,
        job_id: JobId,
        step_id: Option<StepId>,
        offset: usize,
        limit: Option<usize>,
    ) -> Option<LogChunk> {
        self.logs
            .with(&job_id, |logs| {
                let bytes = match step_id {
                    Some(step_id) => logs.steps.get(&step_id)?,
                    None => &logs.combined,
                };
                let start = offset.min(bytes.len());
                let end = limit
                    .map(|limit| start.saturating_add(limit).min(bytes.len()))
                    .unwrap_or(bytes.len());
                Some(LogChunk {
                    data: Bytes::copy_from_slice(&bytes[start..end]),
                    next_offset: end,
                })
            })
            .flatten()
    }

    /// Drop the logs of every job `keep` rejects, returning their ids.
    pub fn retain_jobs(&self, mut keep: impl FnMut(JobId) -> bool) -> Vec<JobId> {
        self.logs.retain(|job_id, _| keep(*job_id))
    }

    pub fn remove(&self, job_id: JobId) -> bool {
        self.logs.remove(&job_id).is_some()
    }

    pub fn job_count(&self) -> usize {
        self.logs.len()
    }
}
