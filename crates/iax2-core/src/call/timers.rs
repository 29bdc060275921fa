use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::CallCommand;

/// Timers owned by a call processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Peer failed to reply to a frame that expects an answer
    NoResponse,
    /// Time to send the next Ping/LagRq pair
    StatusCheck,
}

/// Timer tasks for one call.
///
/// A timer only posts [`CallCommand::Timer`] to the call's queue; the call
/// reacts on its own task. Dropping the set aborts every timer.
pub(crate) struct CallTimers {
    commands: mpsc::UnboundedSender<CallCommand>,
    handles: HashMap<TimerKind, JoinHandle<()>>,
}

impl CallTimers {
    pub fn new(commands: mpsc::UnboundedSender<CallCommand>) -> Self {
        Self {
            commands,
            handles: HashMap::new(),
        }
    }

    /// (Re)start a one-shot timer
    pub fn start_once(&mut self, kind: TimerKind, delay: Duration) {
        self.stop(kind);
        let tx = self.commands.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CallCommand::Timer(kind));
        });
        self.handles.insert(kind, handle);
    }

    /// (Re)start a periodic timer; the first expiry is one period from now
    pub fn start_periodic(&mut self, kind: TimerKind, period: Duration) {
        self.stop(kind);
        let tx = self.commands.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(CallCommand::Timer(kind)).is_err() {
                    break;
                }
            }
        });
        self.handles.insert(kind, handle);
    }

    pub fn stop(&mut self, kind: TimerKind) {
        if let Some(handle) = self.handles.remove(&kind) {
            handle.abort();
        }
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.handles.get(&kind).map_or(false, |h| !h.is_finished())
    }

    pub fn stop_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for CallTimers {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_posts_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = CallTimers::new(tx);
        timers.start_once(TimerKind::NoResponse, Duration::from_secs(5));
        assert!(timers.is_running(TimerKind::NoResponse));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(matches!(rx.try_recv(), Ok(CallCommand::Timer(TimerKind::NoResponse))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_and_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = CallTimers::new(tx);
        timers.start_once(TimerKind::NoResponse, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(3)).await;
        // restarting pushes the expiry out
        timers.start_once(TimerKind::NoResponse, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        timers.stop(TimerKind::NoResponse);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = CallTimers::new(tx);
        timers.start_periodic(TimerKind::StatusCheck, Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(6500)).await;
        let mut fired = 0;
        while let Ok(CallCommand::Timer(TimerKind::StatusCheck)) = rx.try_recv() {
            fired += 1;
        }
        assert_eq!(fired, 3);
        timers.stop_all();
    }
}
