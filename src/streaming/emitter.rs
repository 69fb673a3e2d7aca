use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

struct PendingEmission {
    token: CancellationToken,
    handle: JoinHandle<()>,
    /// Set once the timer elapsed and `emit` has started reading state.
    fired: Arc<AtomicBool>,
}

impl PendingEmission {
    fn absorbs_notifications(&self) -> bool {
        !self.fired.load(Ordering::Acquire) && !self.handle.is_finished() && !self.token.is_cancelled()
    }
}

/// Collapses bursts of change notifications into at most one emission per
/// `interval`.
///
/// The first notification arms a timer; notifications arriving while it is
/// armed are folded into it. The emission itself reads fresh state when it
/// fires, so nothing from the collapsed notifications is lost. Once an
/// emission is running, the next notification arms a new timer even if the
/// running one has not finished.
#[derive(Clone)]
pub struct StreamingEmitter {
    interval: Duration,
    pending: Arc<Mutex<Option<PendingEmission>>>,
    collapsed: Arc<AtomicU64>,
    emitted: Arc<AtomicU64>,
}

impl StreamingEmitter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: Arc::new(Mutex::new(None)),
            collapsed: Arc::new(AtomicU64::new(0)),
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns true if this call armed a new timer, false if it was collapsed
    /// into one already pending.
    pub async fn notify<F, Fut>(&self, emit: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.pending.lock().await;
        if guard.as_ref().is_some_and(PendingEmission::absorbs_notifications) {
            self.collapsed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let fired = Arc::new(AtomicBool::new(false));
        let task_fired = fired.clone();
        let interval = self.interval;
        let emitted = self.emitted.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    task_fired.store(true, Ordering::Release);
                    emitted.fetch_add(1, Ordering::Relaxed);
                    emit().await;
                }
                _ = task_token.cancelled() => {}
            }
        });

        *guard = Some(PendingEmission {
            token,
            handle,
            fired,
        });
        true
    }

    /// Drops a pending emission without running it.
    pub async fn cancel(&self) {
        if let Some(pending) = self.pending.lock().await.take() {
            pending.token.cancel();
            pending.handle.abort();
        }
    }

    pub fn collapsed_count(&self) -> u64 {
        self.collapsed.load(Ordering::Relaxed)
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_emission() {
        let emitter = StreamingEmitter::new(Duration::from_millis(400));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..5 {
            let tx = tx.clone();
            let armed = emitter
                .notify(move || async move {
                    let _ = tx.send(i);
                })
                .await;
            assert_eq!(armed, i == 0);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rx.recv().await, Some(0));
        assert!(rx.try_recv().is_err());
        assert_eq!(emitter.emitted_count(), 1);
        assert_eq!(emitter.collapsed_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn new_window_after_emission() {
        let emitter = StreamingEmitter::new(Duration::from_millis(100));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for round in 0..2 {
            let tx = tx.clone();
            assert!(emitter.notify(move || async move { let _ = tx.send(round); }).await);
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(emitter.emitted_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_during_slow_emission_is_streamed() {
        let emitter = StreamingEmitter::new(Duration::from_millis(100));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        assert!(
            emitter
                .notify(move || async move {
                    let _ = first.send(0);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                })
                .await
        );

        // The first emission has read its state and is stuck in the engine.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rx.try_recv(), Ok(0));

        let second = tx.clone();
        assert!(emitter.notify(move || async move { let _ = second.send(1); }).await);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(emitter.emitted_count(), 2);
        assert_eq!(emitter.collapsed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_emission() {
        let emitter = StreamingEmitter::new(Duration::from_millis(100));
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();

        emitter.notify(move || async move { let _ = tx.send(1); }).await;
        emitter.cancel().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(emitter.emitted_count(), 0);
    }
}
