//! Builder pattern for [`Recorder`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::{MonotonicTimeSource, TimeSource};
use crate::encoder::{CodecFactory, SoftwareCodecFactory};
use crate::recorder::Recorder;
use crate::sink::OutputSink;
use crate::{event_callback, EventCallback, RecorderError, RecorderEvent};

/// Builder for configuring a [`Recorder`].
///
/// Use [`Recorder::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// use av_ring_recorder::{ChannelSink, Recorder};
/// use tokio::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel(4);
///
/// let recorder = Recorder::builder()
///     .output_path("clip.avrb")
///     .add_sink(ChannelSink::new(tx))
///     .on_event(|e| tracing::debug!(?e, "recorder event"))
///     .build()?;
/// # Ok::<(), av_ring_recorder::RecorderError>(())
/// ```
#[must_use]
pub struct RecorderBuilder {
    output_path: Option<PathBuf>,
    sinks: Vec<Arc<dyn OutputSink>>,
    event_callback: Option<EventCallback>,
    codec_factory: Arc<dyn CodecFactory>,
    time_source: Arc<dyn TimeSource>,
}

impl Default for RecorderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderBuilder {
    /// Creates a new builder with the software codec and a monotonic clock.
    pub fn new() -> Self {
        Self {
            output_path: None,
            sinks: Vec::new(),
            event_callback: None,
            codec_factory: Arc::new(SoftwareCodecFactory::default()),
            time_source: Arc::new(MonotonicTimeSource::new()),
        }
    }

    /// Where finished containers are written. Required.
    ///
    /// Each save overwrites the file at this path.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Add a sink to be told about every finished recording.
    pub fn add_sink<S: OutputSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add a sink that is shared with other owners.
    pub fn add_shared_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include state changes, buffer overflows, prunes and sink errors.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(RecorderEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Replace the codec backend.
    ///
    /// Default: [`SoftwareCodecFactory`]
    pub fn codec_factory<F: CodecFactory + 'static>(mut self, factory: F) -> Self {
        self.codec_factory = Arc::new(factory);
        self
    }

    /// Replace the clock used for retention pruning.
    ///
    /// Capture timestamps must come from the same clock.
    /// Default: [`MonotonicTimeSource`]
    pub fn time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.time_source = source;
        self
    }

    fn validate(&self) -> Result<&PathBuf, RecorderError> {
        let path = self
            .output_path
            .as_ref()
            .ok_or_else(|| RecorderError::invalid_config("output path is required"))?;
        if path.file_name().is_none() {
            return Err(RecorderError::invalid_config(format!(
                "output path {} does not name a file",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Validates the configuration and creates an idle recorder.
    pub fn build(self) -> Result<Recorder, RecorderError> {
        let output_path = self.validate()?.clone();
        tracing::debug!(
            path = %output_path.display(),
            sinks = self.sinks.len(),
            "recorder built"
        );
        Ok(Recorder::new(
            output_path,
            self.sinks,
            self.event_callback,
            self.codec_factory,
            self.time_source,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use tokio::sync::mpsc;

    #[test]
    fn test_builder_default() {
        let builder = RecorderBuilder::new();
        assert!(builder.output_path.is_none());
        assert!(builder.sinks.is_empty());
        assert!(builder.event_callback.is_none());
    }

    #[test]
    fn test_builder_collects_sinks() {
        let builder = Recorder::builder()
            .add_sink(ChannelSink::new(mpsc::channel(1).0))
            .add_sink(ChannelSink::with_name("second", mpsc::channel(1).0));
        assert_eq!(builder.sinks.len(), 2);
        assert_eq!(builder.sinks[1].name(), "second");
    }

    #[test]
    fn test_builder_requires_output_path() {
        let result = Recorder::builder().build();
        assert!(matches!(result, Err(RecorderError::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_rejects_directory_path() {
        let result = Recorder::builder().output_path("/").build();
        assert!(matches!(result, Err(RecorderError::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_sinks_optional() {
        let recorder = Recorder::builder().output_path("clip.avrb").build().unwrap();
        assert_eq!(recorder.output_path(), std::path::Path::new("clip.avrb"));
    }
}
