//! Job bookkeeping: id allocation, lookup by id and by member pid.
//!
//! The registry performs no I/O. Callers mutate it only while child notifications are
//! masked (see [`crate::reaper::NotificationMask`]).

use crate::job::{Job, JobId, JobStatus};
use crate::pipeline::Pipeline;
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, error};

/// Default size of the job-id pool. Ids are drawn from `1..DEFAULT_CAPACITY`.
pub const DEFAULT_CAPACITY: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("maximum number of jobs exceeded ({0})")]
    Exhausted(usize),
}

pub struct Registry {
    capacity: usize,
    jobs: BTreeMap<JobId, Job>,
    /// Unreaped member pid -> owning job.
    owners: HashMap<Pid, JobId>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Registry {
    /// Registry handing out ids from `1..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            jobs: BTreeMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Creates a job for `pipeline` under the smallest free id.
    pub fn try_allocate(&mut self, pipeline: Pipeline) -> Result<JobId, RegistryError> {
        let mut id = 1;
        for &taken in self.jobs.keys() {
            if taken != id {
                break;
            }
            id += 1;
        }
        if id >= self.capacity {
            return Err(RegistryError::Exhausted(self.capacity - 1));
        }
        debug!(id, %pipeline, "job allocated");
        self.jobs.insert(id, Job::new(id, pipeline));
        Ok(id)
    }

    /// Like [`Registry::try_allocate`], but aborts the process when the pool is exhausted.
    pub fn allocate(&mut self, pipeline: Pipeline) -> JobId {
        match self.try_allocate(pipeline) {
            Ok(id) => id,
            Err(err) => {
                error!("{err}");
                eprintln!("{err}");
                std::process::abort();
            }
        }
    }

    pub fn lookup(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn lookup_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Drops the job and frees its id. Returns `false` if the id was not registered or the
    /// job still has live members.
    pub fn release(&mut self, id: JobId) -> bool {
        match self.jobs.get(&id) {
            Some(job) if job.alive == 0 => {}
            Some(job) => {
                debug!(id, alive = job.alive, "refusing to release job with live members");
                return false;
            }
            None => return false,
        }
        if let Some(job) = self.jobs.remove(&id) {
            for pid in &job.members {
                if self.owners.get(pid) == Some(&id) {
                    self.owners.remove(pid);
                }
            }
            debug!(id, "job released");
        }
        true
    }

    /// Releases every job whose members have all terminated.
    pub fn release_finished(&mut self) -> Vec<JobId> {
        let finished: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.alive == 0)
            .map(|job| job.id)
            .collect();
        for &id in &finished {
            self.release(id);
        }
        finished
    }

    /// Jobs shown by `jobs`, in id order.
    pub fn for_each_listable(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values().filter(|job| job.status.is_listable())
    }

    /// Job a live member pid belongs to.
    pub fn find_owner(&self, pid: Pid) -> Option<&Job> {
        self.owners.get(&pid).and_then(|id| self.jobs.get(id))
    }

    pub fn find_owner_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        let id = *self.owners.get(&pid)?;
        self.jobs.get_mut(&id)
    }

    /// Records a freshly spawned member. The first member's pid becomes the job's process
    /// group.
    pub fn add_member(&mut self, id: JobId, pid: Pid) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        debug_assert!(job.members.len() < job.pipeline.len());
        job.pgid.get_or_insert(pid);
        job.members.push(pid);
        job.alive += 1;
        self.owners.insert(pid, id);
    }

    /// Marks `pid` as terminated. Returns the owning job, or `None` for a pid no job owns.
    pub fn member_exited(&mut self, pid: Pid) -> Option<JobId> {
        let id = self.owners.remove(&pid)?;
        let job = self.jobs.get_mut(&id)?;
        job.alive = job.alive.saturating_sub(1);
        Some(id)
    }

    /// The job currently holding the foreground, if any.
    pub fn foreground(&self) -> Option<&Job> {
        self.jobs
            .values()
            .find(|job| job.status == JobStatus::Foreground)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
