//! Tokio mpsc channel sink implementation.

use crate::recorder::SavedRecording;
use crate::sink::OutputSink;
use crate::SinkError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A sink that forwards every saved recording to a tokio mpsc channel.
///
/// # Example
///
/// ```
/// use av_ring_recorder::{ChannelSink, SavedRecording};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<SavedRecording>(4);
/// let sink = ChannelSink::new(tx);
///
/// // Register with Recorder::builder().add_sink(sink), then:
/// // while let Some(recording) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<SavedRecording>,
}

impl ChannelSink {
    /// Creates a channel sink named `"channel"`.
    pub fn new(sender: mpsc::Sender<SavedRecording>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<SavedRecording>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_saved(&self, recording: &SavedRecording) -> Result<(), SinkError> {
        self.sender
            .send(recording.clone())
            .await
            .map_err(|_| SinkError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn recording() -> SavedRecording {
        SavedRecording {
            path: PathBuf::from("/tmp/clip.avrb"),
            video_samples: 5,
            audio_samples: 5,
            delta_us: 10_000,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_recording() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);

        sink.on_saved(&recording()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.path, PathBuf::from("/tmp/clip.avrb"));
        assert_eq!(received.delta_us, 10_000);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        drop(rx);

        let result = sink.on_saved(&recording()).await;
        assert!(matches!(result, Err(SinkError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::with_name("gallery", tx);
        assert_eq!(sink.name(), "gallery");
    }
}
