//! Hardware batch scheduler
//!
//! Coalesces the jobs queued by every hardware voice into one coprocessor
//! batch. At most one batch is in flight. A batch is only fired when some
//! participating instance is close to starving (its ring holds at most
//! `low_water_mark` readable slots); otherwise submission is deferred so
//! more voices can join the next batch.
//!
//! Instances live in a generational arena. Destroying an instance that takes
//! part in the in-flight batch only marks it; the slot is freed when that
//! batch resolves.

use super::context::{BatchCompletion, BatchId, DecodeContext, JobDescriptor, JobResult, ERR_DISCONNECTED};
use super::instance::{BatchStatus, DecoderInstance, InstanceId, JobFlags, Lifecycle};
use super::ring::OutputRing;
use crate::error::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;
use svd_common::config::HardwareConfig;
use tracing::{debug, info, trace, warn};

/// Scheduler handle shared by the engine and every hardware codec
pub type SharedScheduler = Rc<RefCell<HwBatchScheduler>>;

/// Outcome of [`HwBatchScheduler::submit_jobs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Fired(BatchId),
    /// Jobs are pending but every participant still has enough output
    Deferred,
    /// The previous batch is still running after the bounded wait
    InFlight,
    /// No jobs pending
    Idle,
}

/// What an instance owner finds when it checks its batch state
#[derive(Debug, Clone, PartialEq)]
pub enum InstancePoll {
    Idle,
    /// A job is queued for the next batch
    Pending,
    InProgress,
    Completed(Vec<JobResult>),
    /// Sticky until the instance is destroyed
    Failed(i32),
    Cancelled,
}

/// Summary of a resolved batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub id: BatchId,
    pub status: BatchStatus,
    pub participants: usize,
}

impl BatchReport {
    pub fn status_label(&self) -> &'static str {
        match self.status {
            BatchStatus::Success => "success",
            BatchStatus::Failure => "failure",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Invalid => "invalid",
        }
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub batches_fired: u64,
    pub batches_deferred: u64,
    pub batches_failed: u64,
    pub batches_cancelled: u64,
    pub instances_created: u64,
    pub instances_freed: u64,
}

struct ArenaSlot {
    generation: u32,
    instance: Option<DecoderInstance>,
}

struct InFlight {
    id: BatchId,
    participants: Vec<InstanceId>,
}

pub struct HwBatchScheduler {
    context: Box<dyn DecodeContext>,
    config: HardwareConfig,
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    /// Shared job buffer reused by every batch
    batch_buffer: Vec<JobDescriptor>,
    in_flight: Option<InFlight>,
    stats: SchedulerStats,
}

impl HwBatchScheduler {
    pub fn new(context: Box<dyn DecodeContext>, config: HardwareConfig) -> Result<Self> {
        let mut batch_buffer = Vec::new();
        batch_buffer
            .try_reserve(config.initial_batch_capacity)
            .map_err(|e| Error::ResourceExhausted(format!("batch buffer: {}", e)))?;
        info!(
            "Batch scheduler ready on {} context (low water mark {})",
            context.name(),
            config.low_water_mark
        );
        Ok(Self {
            context,
            config,
            slots: Vec::new(),
            free: Vec::new(),
            batch_buffer,
            in_flight: None,
            stats: SchedulerStats::default(),
        })
    }

    pub fn into_shared(self) -> SharedScheduler {
        Rc::new(RefCell::new(self))
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Register a decoder instance with a fresh output ring
    pub fn create_instance(&mut self, channels: u16) -> Result<InstanceId> {
        let ring = OutputRing::new(
            self.config.ring_slots,
            self.config.slot_frames,
            channels as usize,
        );
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                let id = InstanceId {
                    index,
                    generation: slot.generation,
                };
                slot.instance = Some(DecoderInstance::new(id, ring));
                id
            }
            None => {
                self.slots.try_reserve(1).map_err(|e| {
                    Error::ResourceExhausted(format!("decoder instance arena: {}", e))
                })?;
                let id = InstanceId {
                    index: self.slots.len() as u32,
                    generation: 0,
                };
                self.slots.push(ArenaSlot {
                    generation: 0,
                    instance: Some(DecoderInstance::new(id, ring)),
                });
                id
            }
        };
        self.stats.instances_created += 1;
        debug!("Decoder instance {} created", id);
        Ok(id)
    }

    /// Destroy an instance; deferred while its batch is in flight
    pub fn destroy_instance(&mut self, id: InstanceId) -> Result<()> {
        let in_flight = self.participates_in_flight(id);
        let instance = self.instance_mut(id)?;
        instance.pending = None;
        if in_flight {
            instance.lifecycle = Lifecycle::PendingFree;
            debug!("Decoder instance {} marked for deferred free", id);
        } else {
            self.free_instance(id);
        }
        Ok(())
    }

    fn free_instance(&mut self, id: InstanceId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.instance.take().is_some() {
                self.free.push(id.index);
                self.context.release_instance(id);
                self.stats.instances_freed += 1;
                debug!("Decoder instance {} freed", id);
            }
        }
    }

    fn participates_in_flight(&self, id: InstanceId) -> bool {
        self.in_flight
            .as_ref()
            .map(|f| f.participants.contains(&id))
            .unwrap_or(false)
    }

    /// Live instance behind `id` (stale handles resolve to `None`)
    pub fn instance(&self, id: InstanceId) -> Option<&DecoderInstance> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.instance.as_ref())
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut DecoderInstance> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.instance.as_mut())
            .ok_or_else(|| Error::InvalidState(format!("unknown decoder instance {}", id)))
    }

    pub fn ring_mut(&mut self, id: InstanceId) -> Result<&mut OutputRing> {
        Ok(&mut self.instance_mut(id)?.ring)
    }

    /// Instances currently allocated (including pending-free ones)
    pub fn live_instances(&self) -> usize {
        self.slots.iter().filter(|s| s.instance.is_some()).count()
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Queue a job for the next batch
    pub fn enqueue_job(&mut self, job: JobDescriptor) -> Result<()> {
        let id = job.instance;
        let flags = JobFlags::of(&job);
        if flags.is_empty() {
            return Err(Error::InvalidState(format!(
                "empty job for decoder instance {}",
                id
            )));
        }
        let instance = self.instance_mut(id)?;
        if instance.lifecycle != Lifecycle::Active {
            return Err(Error::InvalidState(format!(
                "decoder instance {} is being destroyed",
                id
            )));
        }
        if instance.has_pending() {
            return Err(Error::InvalidState(format!(
                "decoder instance {} already has a queued job",
                id
            )));
        }
        if instance.status == BatchStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "decoder instance {} is part of the running batch",
                id
            )));
        }
        instance.pending = Some(job);
        trace!("Job queued for instance {} ({:?})", id, flags);
        Ok(())
    }

    /// Drop a queued job that has not been submitted yet
    pub fn clear_pending(&mut self, id: InstanceId) -> Result<()> {
        self.instance_mut(id)?.pending = None;
        Ok(())
    }

    /// Batch state of one instance, handing over results once
    pub fn poll_instance(&mut self, id: InstanceId) -> Result<InstancePoll> {
        let instance = self.instance_mut(id)?;
        Ok(match instance.status {
            BatchStatus::InProgress => InstancePoll::InProgress,
            BatchStatus::Success => {
                instance.status = BatchStatus::Invalid;
                InstancePoll::Completed(std::mem::take(&mut instance.results))
            }
            BatchStatus::Failure => InstancePoll::Failed(instance.error_code.unwrap_or(ERR_DISCONNECTED)),
            BatchStatus::Cancelled => {
                instance.status = BatchStatus::Invalid;
                InstancePoll::Cancelled
            }
            BatchStatus::Invalid if instance.has_pending() => InstancePoll::Pending,
            BatchStatus::Invalid => InstancePoll::Idle,
        })
    }

    /// Submit every queued job as one batch
    ///
    /// Waits (bounded) for an in-flight batch first. Fires only when some
    /// participant has at most `low_water_mark` readable slots.
    pub fn submit_jobs(&mut self) -> Result<SubmitOutcome> {
        if self.in_flight.is_some() {
            self.wait_for_jobs()?;
            if self.in_flight.is_some() {
                return Ok(SubmitOutcome::InFlight);
            }
        }

        let mut participants = Vec::new();
        let mut min_readable = usize::MAX;
        for slot in &self.slots {
            if let Some(instance) = slot.instance.as_ref() {
                if instance.lifecycle == Lifecycle::Active && instance.has_pending() {
                    participants.push(instance.id);
                    min_readable = min_readable.min(instance.ring.read_count());
                }
            }
        }

        if participants.is_empty() {
            return Ok(SubmitOutcome::Idle);
        }
        if min_readable > self.config.low_water_mark {
            self.stats.batches_deferred += 1;
            trace!(
                "Batch deferred: {} jobs, lowest ring holds {} slots",
                participants.len(),
                min_readable
            );
            return Ok(SubmitOutcome::Deferred);
        }

        self.batch_buffer.clear();
        if self.batch_buffer.capacity() < participants.len() {
            let additional = participants.len() - self.batch_buffer.len();
            self.batch_buffer
                .try_reserve(additional)
                .map_err(|e| Error::ResourceExhausted(format!("batch buffer: {}", e)))?;
        }

        for &id in &participants {
            let instance = self.instance_mut(id)?;
            if let Some(job) = instance.pending.take() {
                instance.status = BatchStatus::InProgress;
                instance.error_code = None;
                instance.results.clear();
                self.batch_buffer.push(job);
            }
        }

        match self.context.submit(&self.batch_buffer) {
            Ok(batch) => {
                debug!("Batch {} fired with {} jobs", batch, participants.len());
                self.stats.batches_fired += 1;
                self.in_flight = Some(InFlight {
                    id: batch,
                    participants,
                });
                Ok(SubmitOutcome::Fired(batch))
            }
            Err(e) => {
                warn!("Batch submission failed: {}", e);
                let jobs: Vec<JobDescriptor> = self.batch_buffer.drain(..).collect();
                for job in jobs {
                    if let Ok(instance) = self.instance_mut(job.instance) {
                        instance.status = BatchStatus::Invalid;
                        instance.pending = Some(job);
                    }
                }
                Err(e)
            }
        }
    }

    /// Bounded wait for the in-flight batch
    ///
    /// Returns `None` when nothing is in flight or the wait timed out.
    pub fn wait_for_jobs(&mut self) -> Result<Option<BatchReport>> {
        let Some(batch) = self.in_flight.as_ref().map(|f| f.id) else {
            return Ok(None);
        };
        let timeout = self.config.wait_timeout();
        match self.context.wait(batch, timeout)? {
            Some(completion) => Ok(Some(self.resolve(completion))),
            None => {
                trace!("Batch {} still running after {:?}", batch, timeout);
                Ok(None)
            }
        }
    }

    /// Non-blocking check of the in-flight batch
    pub fn poll_jobs(&mut self) -> Result<Option<BatchReport>> {
        let Some(batch) = self.in_flight.as_ref().map(|f| f.id) else {
            return Ok(None);
        };
        match self.context.poll(batch)? {
            Some(completion) => Ok(Some(self.resolve(completion))),
            None => Ok(None),
        }
    }

    /// Cancel the in-flight batch and block until acknowledged
    pub fn cancel_jobs(&mut self) -> Result<Option<BatchReport>> {
        let Some(batch) = self.in_flight.as_ref().map(|f| f.id) else {
            return Ok(None);
        };
        let completion = self.context.cancel(batch)?;
        Ok(Some(self.resolve(completion)))
    }

    /// Fan a batch outcome out to its participants
    fn resolve(&mut self, completion: BatchCompletion) -> BatchReport {
        let Some(flight) = self.in_flight.take() else {
            return BatchReport {
                id: BatchId(0),
                status: BatchStatus::Invalid,
                participants: 0,
            };
        };

        let status = match completion {
            BatchCompletion::Resolved(results) => {
                let mut status = BatchStatus::Success;
                let mut results = results.into_iter();
                for &id in &flight.participants {
                    let Ok(instance) = self.instance_mut(id) else {
                        continue;
                    };
                    match results.next() {
                        Some(result) if result.error.is_none() => {
                            instance.status = BatchStatus::Success;
                            instance.results.push(result);
                        }
                        Some(result) => {
                            instance.status = BatchStatus::Failure;
                            instance.error_code = result.error;
                            status = BatchStatus::Failure;
                        }
                        None => {
                            instance.status = BatchStatus::Failure;
                            instance.error_code = Some(ERR_DISCONNECTED);
                            status = BatchStatus::Failure;
                        }
                    }
                }
                status
            }
            BatchCompletion::Failed { code } => {
                for &id in &flight.participants {
                    if let Ok(instance) = self.instance_mut(id) {
                        instance.status = BatchStatus::Failure;
                        instance.error_code = Some(code);
                    }
                }
                warn!("Batch {} failed with code {}", flight.id, code);
                BatchStatus::Failure
            }
            BatchCompletion::Cancelled => {
                for &id in &flight.participants {
                    if let Ok(instance) = self.instance_mut(id) {
                        instance.status = BatchStatus::Cancelled;
                    }
                }
                BatchStatus::Cancelled
            }
        };

        match status {
            BatchStatus::Failure => self.stats.batches_failed += 1,
            BatchStatus::Cancelled => self.stats.batches_cancelled += 1,
            _ => {}
        }

        for &id in &flight.participants {
            let pending_free = self
                .instance(id)
                .map(|i| i.lifecycle == Lifecycle::PendingFree)
                .unwrap_or(false);
            if pending_free {
                self.free_instance(id);
            }
        }

        debug!(
            "Batch {} resolved ({:?}, {} participants)",
            flight.id,
            status,
            flight.participants.len()
        );
        BatchReport {
            id: flight.id,
            status,
            participants: flight.participants.len(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn in_flight(&self) -> Option<BatchId> {
        self.in_flight.as_ref().map(|f| f.id)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    pub fn context(&self) -> &(dyn DecodeContext + 'static) {
        self.context.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::context::DecodeJob;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Context that records submissions and resolves on demand
    #[derive(Default)]
    struct ScriptedContext {
        submitted: Rc<RefCell<Vec<usize>>>,
        released: Rc<RefCell<Vec<InstanceId>>>,
        outcomes: VecDeque<BatchCompletion>,
        ready: Rc<RefCell<bool>>,
        next: u64,
    }

    impl DecodeContext for ScriptedContext {
        fn submit(&mut self, jobs: &[JobDescriptor]) -> Result<BatchId> {
            self.submitted.borrow_mut().push(jobs.len());
            self.next += 1;
            Ok(BatchId(self.next))
        }
        fn wait(&mut self, batch: BatchId, _timeout: Duration) -> Result<Option<BatchCompletion>> {
            self.poll(batch)
        }
        fn poll(&mut self, _batch: BatchId) -> Result<Option<BatchCompletion>> {
            if !*self.ready.borrow() {
                return Ok(None);
            }
            Ok(Some(
                self.outcomes
                    .pop_front()
                    .unwrap_or_else(|| BatchCompletion::Resolved(vec![JobResult::default(); 8])),
            ))
        }
        fn cancel(&mut self, _batch: BatchId) -> Result<BatchCompletion> {
            Ok(BatchCompletion::Cancelled)
        }
        fn release_instance(&mut self, instance: InstanceId) {
            self.released.borrow_mut().push(instance);
        }
        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Harness {
        scheduler: HwBatchScheduler,
        submitted: Rc<RefCell<Vec<usize>>>,
        released: Rc<RefCell<Vec<InstanceId>>>,
        ready: Rc<RefCell<bool>>,
    }

    fn harness(outcomes: Vec<BatchCompletion>) -> Harness {
        let context = ScriptedContext {
            outcomes: outcomes.into(),
            ..ScriptedContext::default()
        };
        let submitted = context.submitted.clone();
        let released = context.released.clone();
        let ready = context.ready.clone();
        *ready.borrow_mut() = true;
        Harness {
            scheduler: HwBatchScheduler::new(Box::new(context), HardwareConfig::default()).unwrap(),
            submitted,
            released,
            ready,
        }
    }

    fn job(id: InstanceId) -> JobDescriptor {
        let mut job = JobDescriptor::new(id);
        job.decode = Some(DecodeJob {
            inputs: Vec::new(),
            blocks: 0,
            end_of_stream: false,
        });
        job
    }

    #[test]
    fn test_jobs_coalesce_into_one_batch() {
        let mut h = harness(Vec::new());
        let a = h.scheduler.create_instance(1).unwrap();
        let b = h.scheduler.create_instance(2).unwrap();
        h.scheduler.enqueue_job(job(a)).unwrap();
        h.scheduler.enqueue_job(job(b)).unwrap();

        assert!(matches!(h.scheduler.submit_jobs().unwrap(), SubmitOutcome::Fired(_)));
        assert_eq!(*h.submitted.borrow(), vec![2]);
        assert_eq!(h.scheduler.poll_instance(a).unwrap(), InstancePoll::InProgress);

        let report = h.scheduler.wait_for_jobs().unwrap().unwrap();
        assert_eq!(report.status, BatchStatus::Success);
        assert_eq!(report.participants, 2);
        assert!(matches!(h.scheduler.poll_instance(a).unwrap(), InstancePoll::Completed(r) if r.len() == 1));
        assert_eq!(h.scheduler.poll_instance(a).unwrap(), InstancePoll::Idle);
    }

    #[test]
    fn test_queued_job_sections_are_tracked() {
        let mut h = harness(Vec::new());
        let a = h.scheduler.create_instance(1).unwrap();
        assert!(h.scheduler.enqueue_job(JobDescriptor::new(a)).is_err());
        assert!(!h.scheduler.instance(a).unwrap().has_pending());

        h.scheduler.enqueue_job(job(a)).unwrap();
        let instance = h.scheduler.instance(a).unwrap();
        assert!(instance.has_pending());
        assert_eq!(
            instance.job_flags(),
            JobFlags {
                decode: true,
                ..JobFlags::default()
            }
        );
        assert_eq!(h.scheduler.poll_instance(a).unwrap(), InstancePoll::Pending);

        h.scheduler.submit_jobs().unwrap();
        assert!(h.scheduler.instance(a).unwrap().job_flags().is_empty());
    }

    #[test]
    fn test_at_most_one_batch_in_flight() {
        let mut h = harness(Vec::new());
        *h.ready.borrow_mut() = false;
        let a = h.scheduler.create_instance(1).unwrap();
        h.scheduler.enqueue_job(job(a)).unwrap();
        assert!(matches!(h.scheduler.submit_jobs().unwrap(), SubmitOutcome::Fired(_)));

        // Still running: a second submit does not fire
        assert!(h.scheduler.enqueue_job(job(a)).is_err());
        let b = h.scheduler.create_instance(1).unwrap();
        h.scheduler.enqueue_job(job(b)).unwrap();
        assert_eq!(h.scheduler.submit_jobs().unwrap(), SubmitOutcome::InFlight);
        assert_eq!(h.submitted.borrow().len(), 1);

        // Implicit wait resolves the first batch before firing the second
        *h.ready.borrow_mut() = true;
        assert!(matches!(h.scheduler.submit_jobs().unwrap(), SubmitOutcome::Fired(_)));
        assert_eq!(*h.submitted.borrow(), vec![1, 1]);
    }

    #[test]
    fn test_submission_deferred_above_low_water_mark() {
        let mut h = harness(Vec::new());
        let a = h.scheduler.create_instance(1).unwrap();
        let slot = h.scheduler.config().slot_frames;
        h.scheduler.ring_mut(a).unwrap().write(&vec![0i16; slot * 3], (slot * 3) as u64);
        h.scheduler.enqueue_job(job(a)).unwrap();

        assert_eq!(h.scheduler.submit_jobs().unwrap(), SubmitOutcome::Deferred);
        assert_eq!(h.scheduler.stats().batches_deferred, 1);
        assert!(h.submitted.borrow().is_empty());

        // Once a second voice is starving, everyone goes
        let b = h.scheduler.create_instance(1).unwrap();
        h.scheduler.enqueue_job(job(b)).unwrap();
        assert!(matches!(h.scheduler.submit_jobs().unwrap(), SubmitOutcome::Fired(_)));
        assert_eq!(*h.submitted.borrow(), vec![2]);
    }

    #[test]
    fn test_destroy_during_flight_frees_once_after_resolve() {
        let mut h = harness(Vec::new());
        *h.ready.borrow_mut() = false;
        let a = h.scheduler.create_instance(1).unwrap();
        h.scheduler.enqueue_job(job(a)).unwrap();
        h.scheduler.submit_jobs().unwrap();

        h.scheduler.destroy_instance(a).unwrap();
        assert_eq!(h.scheduler.instance(a).unwrap().lifecycle(), Lifecycle::PendingFree);
        assert!(h.released.borrow().is_empty());

        *h.ready.borrow_mut() = true;
        h.scheduler.wait_for_jobs().unwrap();
        assert!(h.scheduler.instance(a).is_none());
        assert_eq!(*h.released.borrow(), vec![a]);
        assert_eq!(h.scheduler.stats().instances_freed, 1);

        // Nothing left to free on later batches
        h.scheduler.wait_for_jobs().unwrap();
        assert_eq!(h.scheduler.stats().instances_freed, 1);
    }

    #[test]
    fn test_destroy_idle_instance_frees_immediately_and_bumps_generation() {
        let mut h = harness(Vec::new());
        let a = h.scheduler.create_instance(1).unwrap();
        h.scheduler.destroy_instance(a).unwrap();
        assert_eq!(h.scheduler.live_instances(), 0);

        let b = h.scheduler.create_instance(1).unwrap();
        assert_eq!(b.index, a.index);
        assert_ne!(b, a);
        assert!(h.scheduler.instance(a).is_none());
        assert!(h.scheduler.enqueue_job(job(a)).is_err());
    }

    #[test]
    fn test_batch_failure_reaches_every_participant() {
        let mut h = harness(vec![BatchCompletion::Failed { code: -7 }]);
        let a = h.scheduler.create_instance(1).unwrap();
        let b = h.scheduler.create_instance(1).unwrap();
        h.scheduler.enqueue_job(job(a)).unwrap();
        h.scheduler.enqueue_job(job(b)).unwrap();
        h.scheduler.submit_jobs().unwrap();

        let report = h.scheduler.wait_for_jobs().unwrap().unwrap();
        assert_eq!(report.status, BatchStatus::Failure);
        assert_eq!(h.scheduler.poll_instance(a).unwrap(), InstancePoll::Failed(-7));
        assert_eq!(h.scheduler.poll_instance(b).unwrap(), InstancePoll::Failed(-7));
        // Failure is sticky
        assert_eq!(h.scheduler.poll_instance(a).unwrap(), InstancePoll::Failed(-7));
        assert_eq!(h.scheduler.stats().batches_failed, 1);
    }

    #[test]
    fn test_cancel_marks_participants() {
        let mut h = harness(Vec::new());
        *h.ready.borrow_mut() = false;
        let a = h.scheduler.create_instance(1).unwrap();
        h.scheduler.enqueue_job(job(a)).unwrap();
        h.scheduler.submit_jobs().unwrap();

        let report = h.scheduler.cancel_jobs().unwrap().unwrap();
        assert_eq!(report.status, BatchStatus::Cancelled);
        assert_eq!(h.scheduler.in_flight(), None);
        assert_eq!(h.scheduler.poll_instance(a).unwrap(), InstancePoll::Cancelled);
    }
}
