//! `StageAdvanced` delivery.
//!
//! The ledger hands every accepted stage change to one `Notifier`. Delivery
//! is best-effort: an `Err` is logged by the caller and never undoes the
//! append. Implementations are called while the order's lock is held, so
//! they must not block.

use std::sync::{Arc, Mutex, PoisonError};

use fulfillment_kernel::domain::StageAdvanced;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier unavailable: {0}")]
    Unavailable(String),

    #[error("{failed} of {total} notifiers failed: {first}")]
    Partial {
        failed: usize,
        total: usize,
        first: Box<NotifyError>,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, advanced: &StageAdvanced) -> Result<(), NotifyError>;
}

/// Writes each advance to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, advanced: &StageAdvanced) -> Result<(), NotifyError> {
        info!(
            order_id = %advanced.order_id,
            from = advanced.from_stage_id.as_deref().unwrap_or("-"),
            to = %advanced.to_stage_id,
            event_id = %advanced.event_id,
            "stage advanced"
        );
        Ok(())
    }
}

/// Broadcast hub for UI subscribers.
///
/// A subscriber that falls behind by more than the channel capacity loses
/// the oldest facts (`RecvError::Lagged`); the ledger is never blocked.
/// Having no subscribers is not a failure.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StageAdvanced>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageAdvanced> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, advanced: &StageAdvanced) -> Result<(), NotifyError> {
        // SendError only means nobody is listening right now.
        let _ = self.sender.send(advanced.clone());
        Ok(())
    }
}

/// Delivers to every target, even after one fails.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn Notifier>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, advanced: &StageAdvanced) -> Result<(), NotifyError> {
        let mut failed = 0;
        let mut first = None;
        for target in &self.targets {
            if let Err(e) = target.notify(advanced) {
                failed += 1;
                first.get_or_insert(e);
            }
        }
        match first {
            None => Ok(()),
            Some(first) => Err(NotifyError::Partial {
                failed,
                total: self.targets.len(),
                first: Box::new(first),
            }),
        }
    }
}

/// Keeps every advance in memory. Handy in tests and for the CLI's
/// one-shot commands.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<StageAdvanced>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advances(&self) -> Vec<StageAdvanced> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, advanced: &StageAdvanced) -> Result<(), NotifyError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(advanced.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fulfillment_kernel::domain::EventId;

    struct Failing;

    impl Notifier for Failing {
        fn notify(&self, _: &StageAdvanced) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("sms gateway down".into()))
        }
    }

    fn advance(to: &str) -> StageAdvanced {
        StageAdvanced {
            order_id: "FTO-2024-001".into(),
            from_stage_id: Some("sowing".into()),
            to_stage_id: to.into(),
            occurred_at: Utc.with_ymd_and_hms(2024, 6, 2, 9, 0, 0).unwrap(),
            event_id: EventId("e1".into()),
        }
    }

    #[test]
    fn broadcast_without_subscribers_is_ok() {
        let hub = BroadcastNotifier::new(4);
        assert_eq!(hub.subscriber_count(), 0);
        assert!(hub.notify(&advance("growing")).is_ok());
    }

    #[test]
    fn broadcast_reaches_subscriber() {
        let hub = BroadcastNotifier::new(4);
        let mut rx = hub.subscribe();
        hub.notify(&advance("growing")).unwrap();
        assert_eq!(rx.try_recv().unwrap().to_stage_id, "growing");
    }

    #[test]
    fn lagging_subscriber_loses_oldest() {
        let hub = BroadcastNotifier::new(2);
        let mut rx = hub.subscribe();
        for stage in ["growing", "harvesting", "packaging"] {
            hub.notify(&advance(stage)).unwrap();
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
        assert_eq!(rx.try_recv().unwrap().to_stage_id, "harvesting");
    }

    #[test]
    fn fanout_keeps_delivering_after_failure() {
        let recorder = Arc::new(RecordingNotifier::new());
        let fanout = FanoutNotifier::new()
            .with(Arc::new(Failing))
            .with(recorder.clone());

        let err = fanout.notify(&advance("growing")).unwrap_err();
        assert!(matches!(err, NotifyError::Partial { failed: 1, total: 2, .. }));
        assert_eq!(recorder.count(), 1);
    }
}
