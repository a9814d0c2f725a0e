//! Call Duration Timer
//!
//! Counts seconds while a call is established. Stopping is synchronous:
//! once `stop()` returns no tick of the old run can change the counter.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

/// `M:SS` below one hour, `H:MM:SS` from one hour on
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[derive(Debug, Default)]
struct Counter {
    generation: u64,
    seconds: u64,
}

#[derive(Debug, Default)]
pub struct DurationTimer {
    counter: Arc<Mutex<Counter>>,
    task: Option<JoinHandle<()>>,
}

impl DurationTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seconds(&self) -> u64 {
        self.counter.lock().seconds
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Starts counting from zero; `on_tick` receives the new total
    pub fn start(&mut self, on_tick: impl Fn(u64) + Send + 'static) {
        self.stop();

        let generation = self.counter.lock().generation;
        let counter = Arc::clone(&self.counter);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut state = counter.lock();
                if state.generation != generation {
                    break;
                }
                state.seconds += 1;
                tracing::trace!("Call duration: {}s", state.seconds);
                on_tick(state.seconds);
            }
        }));
    }

    /// Cancels the tick task and resets the counter to zero
    pub fn stop(&mut self) {
        {
            let mut counter = self.counter.lock();
            counter.generation += 1;
            counter.seconds = 0;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DurationTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
