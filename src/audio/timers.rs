use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    EmptyChannel,
    EmptyQueue,
    Paused,
    SkipGrace,
}

impl TimerKind {
    /// Ambos significan "nada que hacer", solo uno puede estar armado
    fn exclusive_with(&self) -> Option<TimerKind> {
        match self {
            TimerKind::EmptyChannel => Some(TimerKind::EmptyQueue),
            TimerKind::EmptyQueue => Some(TimerKind::EmptyChannel),
            _ => None,
        }
    }
}

struct Slot {
    seq: u64,
    task: JoinHandle<()>,
}

/// Timers con dueño: rearmar o cancelar aborta el anterior, y un disparo
/// solo cuenta si su secuencia sigue siendo la vigente. Todo se cancela al
/// soltar la estructura.
#[derive(Default)]
pub struct ScopedTimers {
    slots: HashMap<TimerKind, Slot>,
    seq: u64,
}

impl ScopedTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arma `kind`; al vencer envía `message(kind, seq)` por `sender`
    pub fn arm<M, F>(
        &mut self,
        kind: TimerKind,
        after: Duration,
        sender: mpsc::UnboundedSender<M>,
        message: F,
    ) -> u64
    where
        M: Send + 'static,
        F: FnOnce(TimerKind, u64) -> M + Send + 'static,
    {
        self.cancel(kind);
        if let Some(other) = kind.exclusive_with() {
            self.cancel(other);
        }

        self.seq += 1;
        let seq = self.seq;
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = sender.send(message(kind, seq));
        });

        debug!("⏲️ Timer {:?} armado ({:?})", kind, after);
        self.slots.insert(kind, Slot { seq, task });
        seq
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slots.remove(&kind) {
            Some(slot) => {
                slot.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.task.abort();
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Consume un disparo. Devuelve `false` si es de un armado anterior.
    pub fn take_fired(&mut self, kind: TimerKind, seq: u64) -> bool {
        match self.slots.get(&kind) {
            Some(slot) if slot.seq == seq => {
                self.slots.remove(&kind);
                true
            }
            _ => false,
        }
    }
}

impl Drop for ScopedTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_window() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = ScopedTimers::new();
        let seq = timers.arm(TimerKind::Paused, Duration::from_secs(60), tx, |k, s| (k, s));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(rx.try_recv().is_err());

        let (kind, fired) = rx.recv().await.unwrap();
        assert_eq!(kind, TimerKind::Paused);
        assert_eq!(fired, seq);
        assert!(timers.take_fired(kind, fired));
        assert!(!timers.take_fired(kind, fired));
        assert!(!timers.is_armed(TimerKind::Paused));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_the_previous_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = ScopedTimers::new();
        let first = timers.arm(TimerKind::EmptyQueue, Duration::from_secs(10), tx.clone(), |k, s| (k, s));
        let second = timers.arm(TimerKind::EmptyQueue, Duration::from_secs(20), tx, |k, s| (k, s));

        let (_, fired) = rx.recv().await.unwrap();
        assert_eq!(fired, second);
        assert_ne!(first, second);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_channel_and_empty_queue_are_exclusive() {
        let (tx, _rx) = mpsc::unbounded_channel::<(TimerKind, u64)>();
        let mut timers = ScopedTimers::new();
        timers.arm(TimerKind::EmptyQueue, Duration::from_secs(10), tx.clone(), |k, s| (k, s));
        timers.arm(TimerKind::SkipGrace, Duration::from_secs(2), tx.clone(), |k, s| (k, s));
        timers.arm(TimerKind::EmptyChannel, Duration::from_secs(10), tx, |k, s| (k, s));

        assert!(timers.is_armed(TimerKind::EmptyChannel));
        assert!(!timers.is_armed(TimerKind::EmptyQueue));
        assert!(timers.is_armed(TimerKind::SkipGrace));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_cancels_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = ScopedTimers::new();
        timers.arm(TimerKind::EmptyChannel, Duration::from_secs(1), tx, |k, s| (k, s));
        drop(timers);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.recv().await.is_none());
    }
}
