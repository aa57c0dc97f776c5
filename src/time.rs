use crate::behavior::BehaviorContext;
use crate::value::VarRef;
use std::rc::Rc;

/// Virtual engine clock, advanced only by `Game::tick`. Keeping the clock
/// virtual makes timers, sequence animation and on-demand spawn throttling
/// deterministic under test.
pub struct EngineTime {
    elapsed: f64,
    delta: f32,
}

impl EngineTime {
    pub fn new() -> EngineTime {
        EngineTime { elapsed: 0.0, delta: 0.0 }
    }

    pub fn tick(&mut self, dt: f32) {
        self.delta = dt;
        self.elapsed += dt as f64;
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
        self.delta = 0.0;
    }
}

impl Default for EngineTime {
    fn default() -> Self {
        EngineTime::new()
    }
}

/// A tree invocation scheduled by `StartTimer`. The dotted reference is
/// resolved at fire time so instancer fan-out sees the pairs alive then.
pub struct TimerTask {
    pub fire_at: f64,
    pub interval: f64,
    pub once: bool,
    pub origin: Rc<BehaviorContext>,
    pub tree_ref: String,
    pub parameters: Vec<VarRef>,
}

/// Explicit task queue owned by the runtime; there are no process-wide
/// timers. Stopping play clears the queue between ticks.
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<TimerTask>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    pub fn schedule(&mut self, task: TimerTask) {
        self.tasks.push(task);
    }

    /// Removes and returns every task due at `now`; repeating tasks are
    /// re-queued one interval later.
    pub fn take_due(&mut self, now: f64) -> Vec<TimerTask> {
        let mut due = Vec::new();
        let mut index = 0;
        while index < self.tasks.len() {
            if self.tasks[index].fire_at <= now {
                let task = self.tasks.remove(index);
                // A non-positive interval can only fire once, or the queue
                // would never drain.
                if !task.once && task.interval > 0.0 {
                    self.tasks.push(TimerTask {
                        fire_at: now + task.interval,
                        interval: task.interval,
                        once: false,
                        origin: task.origin.clone(),
                        tree_ref: task.tree_ref.clone(),
                        parameters: task.parameters.clone(),
                    });
                }
                due.push(task);
            } else {
                index += 1;
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
