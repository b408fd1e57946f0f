use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::sink::{EventSink, OutboundMessage, SinkError};

/// Sink that keeps every delivered message in memory.
///
/// Failures can be scripted (`fail_next`), made permanent (`fail_always`)
/// and sends can be slowed down (`set_delay`) to exercise the publisher's
/// retry, outbox and timeout paths.
#[derive(Default)]
pub struct InMemorySink {
    delivered: Mutex<Vec<OutboundMessage>>,
    scripted: Mutex<VecDeque<SinkError>>,
    always: Mutex<Option<SinkError>>,
    delay: Mutex<Option<Duration>>,
    attempts: AtomicU32,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` sends with `error`
    pub async fn fail_next(&self, times: usize, error: SinkError) {
        let mut scripted = self.scripted.lock().await;
        scripted.extend(std::iter::repeat(error).take(times));
    }

    /// Fail every send until cleared with `None`
    pub async fn fail_always(&self, error: Option<SinkError>) {
        *self.always.lock().await = error;
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    pub async fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().await.clone()
    }

    /// Every send call, successful or not
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.always.lock().await.clone() {
            return Err(error);
        }
        if let Some(error) = self.scripted.lock().await.pop_front() {
            return Err(error);
        }

        self.delivered.lock().await.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message() -> OutboundMessage {
        OutboundMessage {
            topic: "order-events".into(),
            key: "k".into(),
            payload: "{}".into(),
            event_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_scripted_failures_then_delivery() {
        let sink = InMemorySink::new();
        sink.fail_next(2, SinkError::Transient("broker timeout".into())).await;

        assert!(sink.send(&message()).await.is_err());
        assert!(sink.send(&message()).await.is_err());
        assert!(sink.send(&message()).await.is_ok());

        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.delivered().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_always_until_cleared() {
        let sink = InMemorySink::new();
        sink.fail_always(Some(SinkError::Permanent("nope".into()))).await;
        assert_eq!(sink.send(&message()).await, Err(SinkError::Permanent("nope".into())));

        sink.fail_always(None).await;
        assert!(sink.send(&message()).await.is_ok());
    }
}
