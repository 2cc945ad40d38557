//! Discrete-event engine
//!
//! Min-heap of timed events driving the scheduler's callbacks against the
//! simulated cluster. Delivery order is (time, insertion order); the
//! scheduler sees exactly the callback sequence a real simulator would
//! produce, including the deferred migration and state-change
//! completions.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::{info, warn};

use stratus_core::{Result, SchedulerConfig, SimTime, MICROS_PER_SEC};
use stratus_scheduler::{FinalReport, Scheduler};

use crate::cluster::{SimCluster, SimEvent};

/// Timed event wrapper for priority queue ordering
#[derive(Debug, Clone)]
struct TimedEvent {
    time: SimTime,
    seq: u64,
    event: SimEvent,
}

// Priority queue orders by time (earliest first), then insertion order.
impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for min-heap (BinaryHeap is max-heap by default)
        other
            .time
            .cmp(&self.time)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for TimedEvent {}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

/// Simulation run outcome: the scheduler's terminal report plus engine
/// counters.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: FinalReport,
    pub events_processed: u64,
    pub tasks_total: usize,
    pub tasks_completed: usize,
}

/// Event loop owning the cluster and the scheduler under test.
pub struct Engine {
    cluster: SimCluster,
    scheduler: Scheduler,
    queue: BinaryHeap<TimedEvent>,
    seq: u64,
    periodic_interval: SimTime,
}

impl Engine {
    /// Initialize the scheduler against the cluster and queue every task
    /// arrival.
    pub fn new(
        mut cluster: SimCluster,
        cfg: SchedulerConfig,
        periodic_interval: SimTime,
    ) -> Result<Self> {
        let scheduler = Scheduler::init(&mut cluster, cfg)?;
        let mut engine = Self {
            cluster,
            scheduler,
            queue: BinaryHeap::new(),
            seq: 0,
            periodic_interval,
        };
        for (time, task) in engine.cluster.arrivals() {
            engine.push(time, SimEvent::TaskArrival(task));
        }
        engine.collect_deferred();
        if engine.periodic_interval > 0 {
            let first = engine.periodic_interval;
            engine.push(first, SimEvent::PeriodicCheck);
        }
        Ok(engine)
    }

    pub fn cluster(&self) -> &SimCluster {
        &self.cluster
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run until the queue is empty or the horizon passes, then deliver
    /// `SimulationComplete` and return the report.
    pub fn run(&mut self, horizon: SimTime) -> Result<RunSummary> {
        let mut events_processed = 0u64;
        while let Some(next) = self.queue.pop() {
            if next.time > horizon {
                break;
            }
            self.cluster.advance_to(next.time);
            self.dispatch(next.time, next.event)?;
            events_processed += 1;
            // Model corruption is a scheduler bug; fail loudly while
            // developing, skip the sweep in release.
            #[cfg(debug_assertions)]
            self.scheduler
                .fleet()
                .check_invariants()
                .expect("fleet invariants violated after event");
            self.collect_deferred();

            // Keep ticking only while work remains.
            if matches!(next.event, SimEvent::PeriodicCheck)
                && self.periodic_interval > 0
                && !self.queue.is_empty()
            {
                self.push(next.time + self.periodic_interval, SimEvent::PeriodicCheck);
            }
        }

        let end = self.cluster.now().max(1);
        let report = self.scheduler.on_simulation_complete(&mut self.cluster, end)?;
        info!(
            events = events_processed,
            seconds = end / MICROS_PER_SEC,
            "simulation finished"
        );
        Ok(RunSummary {
            report,
            events_processed,
            tasks_total: self.cluster.task_count(),
            tasks_completed: self.cluster.completed_count(),
        })
    }

    fn dispatch(&mut self, now: SimTime, event: SimEvent) -> Result<()> {
        match event {
            SimEvent::TaskArrival(task) => {
                self.scheduler.on_new_task(&mut self.cluster, now, task)
            }
            SimEvent::TaskCompletion(task) => {
                if !self.cluster.complete_task(task) {
                    warn!(%task, "stale completion event dropped");
                    return Ok(());
                }
                self.scheduler.on_task_complete(&mut self.cluster, now, task)
            }
            SimEvent::MigrationDone(vm) => {
                self.scheduler.on_migration_done(&mut self.cluster, now, vm)
            }
            SimEvent::StateChangeComplete(machine) => {
                if !self.cluster.complete_state_change(machine) {
                    warn!(%machine, "stale state-change event dropped");
                    return Ok(());
                }
                self.scheduler
                    .on_state_change_complete(&mut self.cluster, now, machine)
            }
            SimEvent::MemoryWarning(machine) => {
                self.scheduler.on_memory_warning(&mut self.cluster, now, machine)
            }
            SimEvent::SlaWarning(task) => {
                self.scheduler.on_sla_warning(&mut self.cluster, now, task)
            }
            SimEvent::PeriodicCheck => {
                for task in self.cluster.collect_sla_warnings() {
                    self.push(now, SimEvent::SlaWarning(task));
                }
                self.scheduler.on_periodic_check(&mut self.cluster, now)
            }
        }
    }

    fn collect_deferred(&mut self) {
        for (time, event) in self.cluster.drain_pending() {
            self.push(time, event);
        }
    }

    fn push(&mut self, time: SimTime, event: SimEvent) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(TimedEvent { time, seq, event });
    }
}
