//! Fans finished recordings out to output sinks.

use std::sync::Arc;
use std::time::Duration;

use crate::recorder::SavedRecording;
use crate::sink::OutputSink;
use crate::{EventCallback, RecorderEvent};

/// Delivery outcome per sink, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<String>,
}

/// Delivers each saved recording to every registered sink.
pub(crate) struct SinkRouter {
    sinks: Vec<Arc<dyn OutputSink>>,
    event_callback: Option<EventCallback>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl SinkRouter {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>, retry_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            sinks,
            event_callback: None,
            retry_attempts: retry_attempts.max(1),
            retry_delay,
        }
    }

    pub fn with_event_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.event_callback = callback;
        self
    }

    fn emit_event(&self, event: RecorderEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Delivers to one sink with exponential backoff. Returns `true` on success.
    async fn deliver_to_sink(&self, sink: &Arc<dyn OutputSink>, recording: &SavedRecording) -> bool {
        let mut attempt = 0;
        let mut delay = self.retry_delay;

        loop {
            attempt += 1;
            match sink.on_saved(recording).await {
                Ok(()) => {
                    tracing::debug!(sink = sink.name(), attempt, "recording delivered");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        sink = sink.name(),
                        attempt,
                        error = %e,
                        "sink rejected recording"
                    );
                    self.emit_event(RecorderEvent::SinkError {
                        sink_name: sink.name().to_string(),
                        error: e.to_string(),
                        attempt,
                    });

                    if attempt >= self.retry_attempts {
                        return false;
                    }

                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// Delivers `recording` to all sinks concurrently.
    pub async fn deliver(&self, recording: &SavedRecording) -> DeliveryReport {
        let futures: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| self.deliver_to_sink(sink, recording))
            .collect();

        let results = futures::future::join_all(futures).await;
        let failed = self
            .sinks
            .iter()
            .zip(&results)
            .filter(|(_, ok)| !**ok)
            .map(|(sink, _)| sink.name().to_string())
            .collect::<Vec<_>>();
        DeliveryReport {
            delivered: results.len() - failed.len(),
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SinkError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestSink {
        name: String,
        write_count: AtomicUsize,
        fail_count: AtomicUsize,
    }

    impl TestSink {
        fn new(name: &str) -> Self {
            Self::failing(name, 0)
        }

        fn failing(name: &str, fail_times: usize) -> Self {
            Self {
                name: name.to_string(),
                write_count: AtomicUsize::new(0),
                fail_count: AtomicUsize::new(fail_times),
            }
        }

        fn writes(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OutputSink for TestSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_saved(&self, _recording: &SavedRecording) -> Result<(), SinkError> {
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::custom("intentional failure"));
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recording() -> SavedRecording {
        SavedRecording {
            path: PathBuf::from("clip.avrb"),
            video_samples: 1,
            audio_samples: 1,
            delta_us: 0,
        }
    }

    #[tokio::test]
    async fn test_router_delivers_to_all_sinks() {
        let sink1 = Arc::new(TestSink::new("sink1"));
        let sink2 = Arc::new(TestSink::new("sink2"));
        let router = SinkRouter::new(vec![sink1.clone(), sink2.clone()], 3, Duration::ZERO);

        let report = router.deliver(&recording()).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(sink1.writes(), 1);
        assert_eq!(sink2.writes(), 1);
    }

    #[tokio::test]
    async fn test_router_retries_on_failure() {
        let sink = Arc::new(TestSink::failing("sink", 2));
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let callback = crate::event_callback(move |e| events_clone.lock().push(e));

        let router = SinkRouter::new(vec![sink.clone()], 3, Duration::from_millis(1))
            .with_event_callback(Some(callback));
        let report = router.deliver(&recording()).await;

        assert_eq!(sink.writes(), 1);
        assert!(report.failed.is_empty());
        assert_eq!(events.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_router_gives_up_after_attempts() {
        let sink = Arc::new(TestSink::failing("flaky", 10));
        let router = SinkRouter::new(vec![sink.clone()], 2, Duration::from_millis(1));

        let report = router.deliver(&recording()).await;

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, vec!["flaky".to_string()]);
        assert_eq!(sink.writes(), 0);
    }
}
