use std::fmt;
use std::sync::Arc;

use crate::chunk::{EncodedChunk, TrackKind};
use crate::config::RetryPolicy;
use crate::encoder::{BufferFlags, Codec, CodecFactory, EncoderParams, FormatDescriptor, OutputStatus};
use crate::error::EncoderError;
use crate::pipeline::retry_blocking;

/// Lifecycle of an [`EncoderAdapter`].
///
/// ```text
/// Unconfigured ─configure─► Configured ─submit─► Feeding ⇄ Draining
///                                                   │
///                                                finish
///                                                   ▼
///                                 Stopped ◄─eos─ Finishing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// No codec exists yet.
    Unconfigured,
    /// Codec configured and started, nothing submitted.
    Configured,
    /// The last operation submitted input.
    Feeding,
    /// The last operation polled output.
    Draining,
    /// End of stream was submitted, output is being drained.
    Finishing,
    /// End of stream was emitted and the codec is released.
    Stopped,
}

impl EncoderState {
    /// Lowercase name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Feeding => "feeding",
            Self::Draining => "draining",
            Self::Finishing => "finishing",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an [`EncoderAdapter`] hands back from a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// The codec's output format is final. Emitted once, before any chunk.
    TrackFormat(FormatDescriptor),
    /// An encoded chunk. The last one has `end_of_stream` set.
    Chunk(EncodedChunk),
}

/// Drives one [`Codec`] through configure / submit / poll / finish.
///
/// The adapter owns its codec. Dropping the adapter stops and releases the
/// codec if that has not happened yet, so an error anywhere in the save
/// pipeline still tears the encoder down.
pub struct EncoderAdapter {
    kind: TrackKind,
    factory: Arc<dyn CodecFactory>,
    retry: RetryPolicy,
    codec: Option<Box<dyn Codec>>,
    state: EncoderState,
    format_emitted: bool,
    last_pts_us: u64,
    submitted: u64,
    emitted: u64,
}

impl EncoderAdapter {
    /// Creates an unconfigured adapter for `kind`.
    pub fn new(kind: TrackKind, factory: Arc<dyn CodecFactory>, retry: RetryPolicy) -> Self {
        Self {
            kind,
            factory,
            retry,
            codec: None,
            state: EncoderState::Unconfigured,
            format_emitted: false,
            last_pts_us: 0,
            submitted: 0,
            emitted: 0,
        }
    }

    /// Stream kind this adapter encodes.
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Number of samples submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Number of data chunks emitted so far, excluding end of stream.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Creates, configures and starts the codec.
    pub fn configure(&mut self, params: &EncoderParams) -> Result<(), EncoderError> {
        self.expect_state("configure", &[EncoderState::Unconfigured])?;
        if params.kind() != self.kind {
            return Err(EncoderError::configuration(
                self.kind,
                format!("received {} parameters", params.kind()),
            ));
        }

        let mut codec = self
            .factory
            .create(self.kind)
            .map_err(|e| EncoderError::configuration(self.kind, e.to_string()))?;

        if let Err(e) = codec.configure(params).and_then(|()| codec.start()) {
            codec.release();
            return Err(EncoderError::configuration(self.kind, e.to_string()));
        }

        tracing::debug!(kind = %self.kind, ?params, "encoder configured");
        self.codec = Some(codec);
        self.state = EncoderState::Configured;
        Ok(())
    }

    /// Copies `payload` into a codec input slot stamped with `pts_us`.
    ///
    /// Blocks for at most the retry policy's timeout while every input slot
    /// is busy. Output is not drained while waiting, so a codec that holds
    /// input until its output is consumed needs
    /// [`submit_draining`](Self::submit_draining) instead.
    pub fn submit(&mut self, payload: &[u8], pts_us: u64) -> Result<(), EncoderError> {
        let kind = self.kind;
        let retry = self.retry;
        retry_blocking(
            retry,
            || self.try_submit(payload, pts_us).map(|queued| queued.then_some(())),
            |waited, attempts| EncoderError::InputSlotTimeout {
                kind,
                waited,
                attempts,
            },
        )
    }

    /// Makes one attempt to queue `payload`. Returns `false` if no input
    /// slot was free.
    pub fn try_submit(&mut self, payload: &[u8], pts_us: u64) -> Result<bool, EncoderError> {
        self.expect_state(
            "submit",
            &[
                EncoderState::Configured,
                EncoderState::Feeding,
                EncoderState::Draining,
            ],
        )?;
        if !self.try_queue(payload, pts_us, BufferFlags::default())? {
            return Ok(false);
        }
        self.last_pts_us = pts_us;
        self.submitted += 1;
        self.state = EncoderState::Feeding;
        tracing::trace!(kind = %self.kind, pts_us, len = payload.len(), "sample submitted");
        Ok(true)
    }

    /// Like [`submit`](Self::submit), but hands every output that becomes
    /// ready while waiting for an input slot to `on_output`.
    pub fn submit_draining<E>(
        &mut self,
        payload: &[u8],
        pts_us: u64,
        on_output: impl FnMut(EncoderOutput) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<EncoderError>,
    {
        self.offer_draining(|adapter| adapter.try_submit(payload, pts_us), on_output)
    }

    /// Polls once for output. `Ok(None)` means nothing is ready yet.
    pub fn poll_output(&mut self) -> Result<Option<EncoderOutput>, EncoderError> {
        self.expect_state(
            "poll output",
            &[
                EncoderState::Configured,
                EncoderState::Feeding,
                EncoderState::Draining,
                EncoderState::Finishing,
            ],
        )?;
        let kind = self.kind;
        let state = self.state.as_str();
        // borrow the field alone so the flags below stay accessible
        let Some(codec) = self.codec.as_mut() else {
            return Err(EncoderError::InvalidState {
                kind,
                operation: "poll output",
                state,
            });
        };

        let output = match codec.dequeue_output().map_err(|e| EncoderError::codec(kind, e.0))? {
            OutputStatus::TryAgainLater => None,
            OutputStatus::FormatChanged => {
                if self.format_emitted {
                    return Err(EncoderError::FormatChangedTwice { kind });
                }
                let format = codec.output_format().ok_or_else(|| {
                    EncoderError::codec(kind, "format change reported without a format")
                })?;
                self.format_emitted = true;
                tracing::debug!(kind = %kind, len = format.as_bytes().len(), "output format ready");
                Some(EncoderOutput::TrackFormat(format))
            }
            OutputStatus::Ready { slot, info } => {
                if !self.format_emitted {
                    return Err(EncoderError::DataBeforeFormat { kind });
                }
                let data: Arc<[u8]> = match codec.output_buffer(slot) {
                    Some(buffer) if buffer.len() >= info.size => Arc::from(&buffer[..info.size]),
                    _ => return Err(EncoderError::MissingOutputBuffer { kind, slot }),
                };
                codec
                    .release_output(slot)
                    .map_err(|e| EncoderError::codec(kind, e.0))?;

                if info.flags.end_of_stream {
                    self.shutdown();
                    self.state = EncoderState::Stopped;
                    tracing::debug!(kind = %kind, emitted = self.emitted, "encoder reached end of stream");
                    Some(EncoderOutput::Chunk(EncodedChunk::end_of_stream(
                        kind,
                        info.pts_us,
                    )))
                } else {
                    self.emitted += 1;
                    Some(EncoderOutput::Chunk(
                        EncodedChunk::new(kind, data, info.pts_us)
                            .with_key_frame(info.flags.key_frame),
                    ))
                }
            }
        };

        if output.is_some()
            && matches!(self.state, EncoderState::Configured | EncoderState::Feeding)
        {
            self.state = EncoderState::Draining;
        }
        Ok(output)
    }

    /// Polls until output is available or the retry policy is exhausted.
    pub fn poll_output_blocking(&mut self) -> Result<EncoderOutput, EncoderError> {
        let kind = self.kind;
        let retry = self.retry;
        retry_blocking(
            retry,
            || self.poll_output(),
            |waited, attempts| EncoderError::OutputTimeout {
                kind,
                waited,
                attempts,
            },
        )
    }

    /// Submits the end-of-stream marker at the last submitted timestamp.
    ///
    /// Blocks like [`submit`](Self::submit) while every input slot is busy.
    pub fn finish(&mut self) -> Result<(), EncoderError> {
        let kind = self.kind;
        let retry = self.retry;
        retry_blocking(
            retry,
            || self.try_finish().map(|queued| queued.then_some(())),
            |waited, attempts| EncoderError::InputSlotTimeout {
                kind,
                waited,
                attempts,
            },
        )
    }

    /// Makes one attempt to queue the end-of-stream marker.
    pub fn try_finish(&mut self) -> Result<bool, EncoderError> {
        self.expect_state(
            "finish",
            &[
                EncoderState::Configured,
                EncoderState::Feeding,
                EncoderState::Draining,
            ],
        )?;
        if !self.try_queue(&[], self.last_pts_us, BufferFlags::END_OF_STREAM)? {
            return Ok(false);
        }
        self.state = EncoderState::Finishing;
        tracing::debug!(kind = %self.kind, submitted = self.submitted, "end of stream submitted");
        Ok(true)
    }

    /// Like [`finish`](Self::finish), but drains output into `on_output`
    /// while waiting for an input slot.
    pub fn finish_draining<E>(
        &mut self,
        on_output: impl FnMut(EncoderOutput) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<EncoderError>,
    {
        self.offer_draining(Self::try_finish, on_output)
    }

    /// Polls until the end-of-stream chunk, returning everything emitted.
    ///
    /// Each wait is bounded by the retry policy.
    pub fn drain_to_end(&mut self) -> Result<Vec<EncoderOutput>, EncoderError> {
        let mut outputs = Vec::new();
        while self.state != EncoderState::Stopped {
            outputs.push(self.poll_output_blocking()?);
        }
        Ok(outputs)
    }

    /// Retries `offer` under the retry policy, polling output between
    /// attempts so a codec waiting on its output slots can make progress.
    fn offer_draining<E>(
        &mut self,
        mut offer: impl FnMut(&mut Self) -> Result<bool, EncoderError>,
        mut on_output: impl FnMut(EncoderOutput) -> Result<(), E>,
    ) -> Result<(), E>
    where
        E: From<EncoderError>,
    {
        let kind = self.kind;
        let retry = self.retry;
        retry_blocking(
            retry,
            || {
                if offer(self)? {
                    return Ok(Some(()));
                }
                let mut drained = false;
                while let Some(output) = self.poll_output()? {
                    on_output(output)?;
                    drained = true;
                }
                // freed output slots may have released an input slot
                if drained && offer(self)? {
                    return Ok(Some(()));
                }
                Ok(None)
            },
            |waited, attempts| {
                EncoderError::InputSlotTimeout {
                    kind,
                    waited,
                    attempts,
                }
                .into()
            },
        )
    }

    fn try_queue(
        &mut self,
        payload: &[u8],
        pts_us: u64,
        flags: BufferFlags,
    ) -> Result<bool, EncoderError> {
        let kind = self.kind;
        let codec = self.codec_mut("submit")?;

        let Some(slot) = codec
            .dequeue_input_slot()
            .map_err(|e| EncoderError::codec(kind, e.0))?
        else {
            return Ok(false);
        };

        let buffer = codec
            .input_buffer(slot)
            .ok_or(EncoderError::MissingInputBuffer { kind, slot })?;
        buffer.clear();
        buffer.extend_from_slice(payload);

        codec
            .queue_input(slot, payload.len(), pts_us, flags)
            .map_err(|e| EncoderError::codec(kind, e.0))?;
        Ok(true)
    }

    fn codec_mut(&mut self, operation: &'static str) -> Result<&mut Box<dyn Codec>, EncoderError> {
        let kind = self.kind;
        let state = self.state.as_str();
        self.codec.as_mut().ok_or(EncoderError::InvalidState {
            kind,
            operation,
            state,
        })
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[EncoderState],
    ) -> Result<(), EncoderError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EncoderError::InvalidState {
                kind: self.kind,
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            codec.stop();
            codec.release();
        }
    }
}

impl Drop for EncoderAdapter {
    fn drop(&mut self) {
        if self.codec.is_some() {
            tracing::debug!(kind = %self.kind, state = %self.state, "releasing encoder");
            self.shutdown();
        }
    }
}

impl fmt::Debug for EncoderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderAdapter")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("submitted", &self.submitted)
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::{AudioFormat, VideoFormat};
    use crate::encoder::{BufferInfo, SoftwareCodec, SoftwareCodecFactory};
    use crate::CodecError;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(30),
            backoff: Duration::from_millis(5),
        }
    }

    fn video_adapter(factory: Arc<dyn CodecFactory>) -> EncoderAdapter {
        let mut adapter = EncoderAdapter::new(TrackKind::Video, factory, fast_retry());
        adapter
            .configure(&EncoderParams::Video(VideoFormat::default()))
            .unwrap();
        adapter
    }

    /// Scripted codec for exercising protocol violations.
    struct ScriptedCodec {
        script: Vec<OutputStatus>,
        grant_input: bool,
        format: Option<FormatDescriptor>,
        input: Vec<u8>,
        released: Arc<AtomicUsize>,
    }

    impl ScriptedCodec {
        fn new(script: Vec<OutputStatus>, released: Arc<AtomicUsize>) -> Self {
            Self {
                script,
                grant_input: true,
                format: Some(FormatDescriptor::new(vec![0xAB])),
                input: Vec::new(),
                released,
            }
        }
    }

    impl Codec for ScriptedCodec {
        fn configure(&mut self, _: &EncoderParams) -> Result<(), CodecError> {
            Ok(())
        }
        fn start(&mut self) -> Result<(), CodecError> {
            Ok(())
        }
        fn dequeue_input_slot(&mut self) -> Result<Option<usize>, CodecError> {
            Ok(self.grant_input.then_some(0))
        }
        fn input_buffer(&mut self, _: usize) -> Option<&mut Vec<u8>> {
            Some(&mut self.input)
        }
        fn queue_input(&mut self, _: usize, _: usize, _: u64, _: BufferFlags) -> Result<(), CodecError> {
            Ok(())
        }
        fn dequeue_output(&mut self) -> Result<OutputStatus, CodecError> {
            if self.script.is_empty() {
                Ok(OutputStatus::TryAgainLater)
            } else {
                Ok(self.script.remove(0))
            }
        }
        fn output_format(&self) -> Option<FormatDescriptor> {
            self.format.clone()
        }
        fn output_buffer(&self, _: usize) -> Option<&[u8]> {
            None
        }
        fn release_output(&mut self, _: usize) -> Result<(), CodecError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedFactory {
        script: Vec<OutputStatus>,
        grant_input: bool,
        released: Arc<AtomicUsize>,
    }

    impl CodecFactory for ScriptedFactory {
        fn create(&self, _: TrackKind) -> Result<Box<dyn Codec>, CodecError> {
            let mut codec = ScriptedCodec::new(self.script.clone(), Arc::clone(&self.released));
            codec.grant_input = self.grant_input;
            Ok(Box::new(codec))
        }
    }

    fn scripted(script: Vec<OutputStatus>, grant_input: bool) -> (Arc<dyn CodecFactory>, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let factory = ScriptedFactory {
            script,
            grant_input,
            released: Arc::clone(&released),
        };
        (Arc::new(factory), released)
    }

    #[test]
    fn test_k_samples_produce_k_chunks_and_one_eos() {
        let mut adapter = video_adapter(Arc::new(SoftwareCodecFactory::default()));
        let mut outputs = Vec::new();
        for i in 0..5u64 {
            adapter.submit(&[i as u8; 16], i * 33_000).unwrap();
            while let Some(output) = adapter.poll_output().unwrap() {
                outputs.push(output);
            }
        }
        adapter.finish().unwrap();
        outputs.extend(adapter.drain_to_end().unwrap());

        let formats = outputs
            .iter()
            .filter(|o| matches!(o, EncoderOutput::TrackFormat(_)))
            .count();
        let chunks: Vec<_> = outputs
            .iter()
            .filter_map(|o| match o {
                EncoderOutput::Chunk(c) => Some(c),
                EncoderOutput::TrackFormat(_) => None,
            })
            .collect();
        assert_eq!(formats, 1);
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks.iter().filter(|c| c.end_of_stream).count(), 1);
        assert!(chunks[5].end_of_stream);
        assert_eq!(chunks[5].pts_us, 132_000);
        assert!(matches!(outputs[0], EncoderOutput::TrackFormat(_)));
        assert_eq!(adapter.state(), EncoderState::Stopped);
        assert_eq!(adapter.emitted(), 5);
    }

    #[test]
    fn test_configure_failure_is_fatal() {
        let mut adapter = EncoderAdapter::new(
            TrackKind::Audio,
            Arc::new(SoftwareCodecFactory::default()),
            fast_retry(),
        );
        let err = adapter
            .configure(&EncoderParams::Audio(AudioFormat {
                sample_rate: 0,
                ..Default::default()
            }))
            .unwrap_err();
        assert!(matches!(err, EncoderError::Configuration { kind: TrackKind::Audio, .. }));
        assert_eq!(adapter.state(), EncoderState::Unconfigured);
    }

    #[test]
    fn test_submit_before_configure_rejected() {
        let mut adapter = EncoderAdapter::new(
            TrackKind::Video,
            Arc::new(SoftwareCodecFactory::default()),
            fast_retry(),
        );
        let err = adapter.submit(&[1], 0).unwrap_err();
        assert!(matches!(err, EncoderError::InvalidState { operation: "submit", .. }));
    }

    #[test]
    fn test_input_slot_timeout_when_outputs_never_polled() {
        // one input and one output slot: the second frame occupies the input
        // slot because the first output is never drained
        let mut adapter = video_adapter(Arc::new(SoftwareCodecFactory::new(1, 1)));
        adapter.submit(&[1], 0).unwrap();
        adapter.submit(&[2], 1).unwrap();
        let err = adapter.submit(&[3], 2).unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, EncoderError::InputSlotTimeout { kind: TrackKind::Video, .. }));
    }

    /// Software codec with one slot per side that only answers every other
    /// output poll, like a hardware encoder still working on a frame.
    struct LateCodec {
        inner: SoftwareCodec,
        polls: usize,
    }

    impl LateCodec {
        fn new() -> Self {
            Self {
                inner: SoftwareCodec::new(TrackKind::Video, 1, 1),
                polls: 0,
            }
        }
    }

    impl Codec for LateCodec {
        fn configure(&mut self, params: &EncoderParams) -> Result<(), CodecError> {
            self.inner.configure(params)
        }
        fn start(&mut self) -> Result<(), CodecError> {
            self.inner.start()
        }
        fn dequeue_input_slot(&mut self) -> Result<Option<usize>, CodecError> {
            self.inner.dequeue_input_slot()
        }
        fn input_buffer(&mut self, slot: usize) -> Option<&mut Vec<u8>> {
            self.inner.input_buffer(slot)
        }
        fn queue_input(&mut self, slot: usize, len: usize, pts_us: u64, flags: BufferFlags) -> Result<(), CodecError> {
            self.inner.queue_input(slot, len, pts_us, flags)
        }
        fn dequeue_output(&mut self) -> Result<OutputStatus, CodecError> {
            self.polls += 1;
            if self.polls % 2 == 1 {
                return Ok(OutputStatus::TryAgainLater);
            }
            self.inner.dequeue_output()
        }
        fn output_format(&self) -> Option<FormatDescriptor> {
            self.inner.output_format()
        }
        fn output_buffer(&self, slot: usize) -> Option<&[u8]> {
            self.inner.output_buffer(slot)
        }
        fn release_output(&mut self, slot: usize) -> Result<(), CodecError> {
            self.inner.release_output(slot)
        }
        fn stop(&mut self) {
            self.inner.stop();
        }
        fn release(&mut self) {
            self.inner.release();
        }
    }

    struct LateFactory;

    impl CodecFactory for LateFactory {
        fn create(&self, _: TrackKind) -> Result<Box<dyn Codec>, CodecError> {
            Ok(Box::new(LateCodec::new()))
        }
    }

    #[test]
    fn test_blocking_submit_stalls_on_late_codec() {
        let mut adapter = video_adapter(Arc::new(LateFactory));
        let mut result = Ok(());
        for i in 0..5u64 {
            result = adapter.submit(&[i as u8; 16], i * 33_000);
            if result.is_err() {
                break;
            }
            while let Some(_output) = adapter.poll_output().unwrap() {}
        }
        assert!(matches!(result, Err(EncoderError::InputSlotTimeout { .. })));
    }

    #[test]
    fn test_submit_draining_keeps_late_codec_moving() {
        let mut adapter = video_adapter(Arc::new(LateFactory));
        let mut outputs = Vec::new();
        for i in 0..5u64 {
            adapter
                .submit_draining(&[i as u8; 16], i * 33_000, |output| {
                    outputs.push(output);
                    Ok::<(), EncoderError>(())
                })
                .unwrap();
            while let Some(output) = adapter.poll_output().unwrap() {
                outputs.push(output);
            }
        }
        adapter
            .finish_draining(|output| {
                outputs.push(output);
                Ok::<(), EncoderError>(())
            })
            .unwrap();
        outputs.extend(adapter.drain_to_end().unwrap());

        let chunks: Vec<_> = outputs
            .iter()
            .filter_map(|o| match o {
                EncoderOutput::Chunk(c) => Some(c),
                EncoderOutput::TrackFormat(_) => None,
            })
            .collect();
        assert!(matches!(outputs[0], EncoderOutput::TrackFormat(_)));
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks.iter().filter(|c| c.end_of_stream).count(), 1);
        assert!(chunks[5].end_of_stream);
        let pts: Vec<u64> = chunks[..5].iter().map(|c| c.pts_us).collect();
        assert_eq!(pts, vec![0, 33_000, 66_000, 99_000, 132_000]);
        assert_eq!(adapter.state(), EncoderState::Stopped);
    }

    #[test]
    fn test_try_submit_reports_busy_slot() {
        let (factory, _) = scripted(Vec::new(), false);
        let mut adapter = video_adapter(factory);
        assert!(!adapter.try_submit(&[1], 0).unwrap());
        assert_eq!(adapter.submitted(), 0);
        assert_eq!(adapter.state(), EncoderState::Configured);
        assert!(!adapter.try_finish().unwrap());
        assert_eq!(adapter.state(), EncoderState::Configured);
    }

    #[test]
    fn test_output_timeout_is_distinct() {
        let (factory, _) = scripted(Vec::new(), true);
        let mut adapter = video_adapter(factory);
        let err = adapter.poll_output_blocking().unwrap_err();
        assert!(matches!(err, EncoderError::OutputTimeout { .. }));
    }

    #[test]
    fn test_missing_output_buffer_is_protocol_violation() {
        let ready = OutputStatus::Ready {
            slot: 3,
            info: BufferInfo {
                size: 4,
                pts_us: 0,
                flags: BufferFlags::default(),
            },
        };
        let (factory, released) = scripted(vec![OutputStatus::FormatChanged, ready], true);
        let mut adapter = video_adapter(factory);
        adapter.submit(&[0; 4], 0).unwrap();
        assert!(matches!(
            adapter.poll_output().unwrap(),
            Some(EncoderOutput::TrackFormat(_))
        ));
        let err = adapter.poll_output().unwrap_err();
        assert!(matches!(err, EncoderError::MissingOutputBuffer { slot: 3, .. }));
        assert!(err.is_protocol_violation());

        drop(adapter);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_format_change_rejected() {
        let (factory, _) = scripted(
            vec![OutputStatus::FormatChanged, OutputStatus::FormatChanged],
            true,
        );
        let mut adapter = video_adapter(factory);
        adapter.poll_output().unwrap();
        let err = adapter.poll_output().unwrap_err();
        assert!(matches!(err, EncoderError::FormatChangedTwice { .. }));
    }

    #[test]
    fn test_data_before_format_rejected() {
        let ready = OutputStatus::Ready {
            slot: 0,
            info: BufferInfo {
                size: 0,
                pts_us: 0,
                flags: BufferFlags::default(),
            },
        };
        let (factory, _) = scripted(vec![ready], true);
        let mut adapter = video_adapter(factory);
        let err = adapter.poll_output().unwrap_err();
        assert!(matches!(err, EncoderError::DataBeforeFormat { .. }));
    }

    #[test]
    fn test_finish_without_slot_times_out() {
        let (factory, released) = scripted(Vec::new(), false);
        let mut adapter = video_adapter(factory);
        assert!(adapter.finish().unwrap_err().is_timeout());
        drop(adapter);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_poll_after_stop_rejected() {
        let mut adapter = video_adapter(Arc::new(SoftwareCodecFactory::default()));
        adapter.submit(&[9; 8], 0).unwrap();
        adapter.finish().unwrap();
        adapter.drain_to_end().unwrap();
        let err = adapter.poll_output().unwrap_err();
        assert!(matches!(err, EncoderError::InvalidState { state: "stopped", .. }));
    }
}
