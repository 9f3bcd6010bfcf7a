/// Recurring timers owned by the coordinator.
///
/// At most one timer per kind.  Each arming gets a fresh generation; ticks
/// carry it so a tick queued by a cancelled timer can be recognised and
/// dropped.
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::core::CoreEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    ClockRefresh,
    MetadataPoll,
}

struct Armed {
    generation: u64,
    abort: AbortHandle,
}

pub struct TaskRegistry {
    tx: mpsc::UnboundedSender<CoreEvent>,
    clock_refresh: Option<Armed>,
    metadata_poll: Option<Armed>,
    clock_initialized: bool,
    next_generation: u64,
}

impl TaskRegistry {
    pub fn new(tx: mpsc::UnboundedSender<CoreEvent>) -> Self {
        Self {
            tx,
            clock_refresh: None,
            metadata_poll: None,
            clock_initialized: false,
            next_generation: 1,
        }
    }

    fn slot(&mut self, kind: TaskKind) -> &mut Option<Armed> {
        match kind {
            TaskKind::ClockRefresh => &mut self.clock_refresh,
            TaskKind::MetadataPoll => &mut self.metadata_poll,
        }
    }

    /// Cancel any timer of this kind, then start a new one ticking every
    /// `period`, first tick one period from now.
    pub fn arm(&mut self, kind: TaskKind, period: Duration) -> u64 {
        self.disarm(kind);
        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.tx.clone();
        let start = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.send(CoreEvent::Tick { kind, generation }).is_err() {
                    break;
                }
            }
        });
        debug!("tasks: armed {:?} gen={} every {:?}", kind, generation, period);
        *self.slot(kind) = Some(Armed {
            generation,
            abort: task.abort_handle(),
        });
        generation
    }

    /// Arm the clock refresh the first time only.  Returns whether it armed.
    pub fn arm_clock_refresh_once(&mut self, period: Duration) -> bool {
        if self.clock_initialized {
            return false;
        }
        self.clock_initialized = true;
        self.arm(TaskKind::ClockRefresh, period);
        true
    }

    pub fn disarm(&mut self, kind: TaskKind) {
        if let Some(armed) = self.slot(kind).take() {
            armed.abort.abort();
            debug!("tasks: disarmed {:?} gen={}", kind, armed.generation);
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::ClockRefresh => self.clock_refresh.is_some(),
            TaskKind::MetadataPoll => self.metadata_poll.is_some(),
        }
    }

    /// Whether a tick with this generation comes from the live timer.
    pub fn is_current(&self, kind: TaskKind, generation: u64) -> bool {
        let armed = match kind {
            TaskKind::ClockRefresh => &self.clock_refresh,
            TaskKind::MetadataPoll => &self.metadata_poll,
        };
        armed.as_ref().is_some_and(|a| a.generation == generation)
    }

    #[cfg(test)]
    pub fn armed_count(&self) -> usize {
        self.clock_refresh.is_some() as usize + self.metadata_poll.is_some() as usize
    }

    pub fn shutdown(&mut self) {
        self.disarm(TaskKind::ClockRefresh);
        self.disarm(TaskKind::MetadataPoll);
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<(TaskKind, u64)> {
        let mut out = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            if let CoreEvent::Tick { kind, generation } = evt {
                out.push((kind, generation));
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_leaves_one_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reg = TaskRegistry::new(tx);

        let first = reg.arm(TaskKind::MetadataPoll, Duration::from_secs(30));
        let second = reg.arm(TaskKind::MetadataPoll, Duration::from_secs(30));
        assert_ne!(first, second);
        assert_eq!(reg.armed_count(), 1);

        tokio::time::sleep(Duration::from_secs(95)).await;
        let got = ticks(&mut rx);
        assert_eq!(got.len(), 3);
        assert!(got
            .iter()
            .all(|(k, g)| *k == TaskKind::MetadataPoll && *g == second));
        assert!(!reg.is_current(TaskKind::MetadataPoll, first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_refresh_armed_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reg = TaskRegistry::new(tx);
        assert!(reg.arm_clock_refresh_once(Duration::from_secs(60)));
        assert!(!reg.arm_clock_refresh_once(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ticks(&mut rx).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_stops_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reg = TaskRegistry::new(tx);
        reg.arm(TaskKind::MetadataPoll, Duration::from_secs(30));
        reg.disarm(TaskKind::MetadataPoll);
        assert!(!reg.is_armed(TaskKind::MetadataPoll));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(ticks(&mut rx).is_empty());
    }
}
