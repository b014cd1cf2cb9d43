//! Built-in software codec.
//!
//! Video frames are run-length encoded as `(run, byte)` pairs with a key
//! frame at the start of every second of frames. Audio is passed through
//! as PCM. The codec keeps a fixed pool of input and output slots and stops
//! consuming input while every output slot is held by the caller, so the
//! slot handshake behaves like a hardware encoder under backpressure.

use std::collections::VecDeque;

use crate::chunk::TrackKind;
use crate::encoder::{
    BufferFlags, BufferInfo, Codec, CodecFactory, EncoderParams, FormatDescriptor, OutputStatus,
};
use crate::CodecError;

/// Descriptor tag for run-length encoded video.
const VIDEO_CODEC_TAG: &[u8; 4] = b"rle1";

/// Descriptor tag for PCM audio.
const AUDIO_CODEC_TAG: &[u8; 4] = b"pcm1";

/// Longest run a single `(run, byte)` pair can express.
const MAX_RUN: usize = u8::MAX as usize;

/// Default number of input and output slots.
const DEFAULT_SLOTS: usize = 4;

/// Run-length encodes `input` as `(run, byte)` pairs.
pub fn rle_encode(input: &[u8], out: &mut Vec<u8>) {
    out.clear();
    let mut iter = input.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        let mut run = 1usize;
        while run < MAX_RUN && iter.peek() == Some(&byte) {
            iter.next();
            run += 1;
        }
        out.push(run as u8);
        out.push(byte);
    }
}

/// Reverses [`rle_encode`]. Returns `None` for malformed input.
pub fn rle_decode(input: &[u8]) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(input.len());
    for pair in input.chunks_exact(2) {
        let (run, byte) = (pair[0], pair[1]);
        if run == 0 {
            return None;
        }
        out.extend(std::iter::repeat(byte).take(run as usize));
    }
    Some(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Configured,
    Running,
    Stopped,
    Released,
}

#[derive(Debug)]
struct QueuedInput {
    slot: usize,
    len: usize,
    pts_us: u64,
    flags: BufferFlags,
}

/// Software implementation of [`Codec`].
pub struct SoftwareCodec {
    kind: TrackKind,
    lifecycle: Lifecycle,
    params: Option<EncoderParams>,
    input_buffers: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    lent_inputs: Vec<bool>,
    queued: VecDeque<QueuedInput>,
    output_buffers: Vec<Vec<u8>>,
    free_outputs: VecDeque<usize>,
    ready: VecDeque<(usize, BufferInfo)>,
    format: Option<FormatDescriptor>,
    format_announced: bool,
    inputs_accepted: u64,
    frames_encoded: u64,
    end_of_stream_queued: bool,
}

impl SoftwareCodec {
    /// Creates an unconfigured codec with the given slot pool sizes.
    pub fn new(kind: TrackKind, input_slots: usize, output_slots: usize) -> Self {
        let input_slots = input_slots.max(1);
        let output_slots = output_slots.max(1);
        Self {
            kind,
            lifecycle: Lifecycle::Created,
            params: None,
            input_buffers: vec![Vec::new(); input_slots],
            free_inputs: (0..input_slots).collect(),
            lent_inputs: vec![false; input_slots],
            queued: VecDeque::new(),
            output_buffers: vec![Vec::new(); output_slots],
            free_outputs: (0..output_slots).collect(),
            ready: VecDeque::new(),
            format: None,
            format_announced: false,
            inputs_accepted: 0,
            frames_encoded: 0,
            end_of_stream_queued: false,
        }
    }

    fn require_running(&self, operation: &str) -> Result<(), CodecError> {
        if self.lifecycle == Lifecycle::Running {
            Ok(())
        } else {
            Err(CodecError::new(format!(
                "{} codec cannot {operation} in state {:?}",
                self.kind, self.lifecycle
            )))
        }
    }

    fn descriptor(params: &EncoderParams) -> FormatDescriptor {
        let mut bytes = Vec::with_capacity(20);
        match params {
            EncoderParams::Video(video) => {
                bytes.extend_from_slice(VIDEO_CODEC_TAG);
                bytes.extend_from_slice(&video.width.to_le_bytes());
                bytes.extend_from_slice(&video.height.to_le_bytes());
                bytes.extend_from_slice(&video.frame_rate.to_le_bytes());
                bytes.extend_from_slice(&video.bit_rate.to_le_bytes());
            }
            EncoderParams::Audio(audio) => {
                bytes.extend_from_slice(AUDIO_CODEC_TAG);
                bytes.extend_from_slice(&audio.sample_rate.to_le_bytes());
                bytes.extend_from_slice(&audio.channels.to_le_bytes());
                bytes.extend_from_slice(&audio.bit_rate.to_le_bytes());
            }
        }
        FormatDescriptor::new(bytes)
    }

    fn is_key_frame(&self) -> bool {
        match self.params {
            Some(EncoderParams::Video(video)) => {
                self.frames_encoded % u64::from(video.frame_rate.max(1)) == 0
            }
            _ => true,
        }
    }

    /// Moves queued input into free output slots.
    fn pump(&mut self) {
        while !self.queued.is_empty() {
            let Some(out_slot) = self.free_outputs.pop_front() else {
                break;
            };
            let Some(input) = self.queued.pop_front() else {
                self.free_outputs.push_front(out_slot);
                break;
            };

            let info = if input.flags.end_of_stream {
                self.output_buffers[out_slot].clear();
                BufferInfo {
                    size: 0,
                    pts_us: input.pts_us,
                    flags: BufferFlags::END_OF_STREAM,
                }
            } else {
                let key_frame = self.is_key_frame();
                let payload = &self.input_buffers[input.slot][..input.len];
                let out = &mut self.output_buffers[out_slot];
                match self.kind {
                    TrackKind::Video => rle_encode(payload, out),
                    TrackKind::Audio => {
                        out.clear();
                        out.extend_from_slice(payload);
                    }
                }
                self.frames_encoded += 1;
                BufferInfo {
                    size: out.len(),
                    pts_us: input.pts_us,
                    flags: BufferFlags {
                        end_of_stream: false,
                        key_frame,
                    },
                }
            };

            self.input_buffers[input.slot].clear();
            self.free_inputs.push_back(input.slot);
            self.ready.push_back((out_slot, info));
        }
    }
}

impl Codec for SoftwareCodec {
    fn configure(&mut self, params: &EncoderParams) -> Result<(), CodecError> {
        if self.lifecycle != Lifecycle::Created {
            return Err(CodecError::new("codec already configured"));
        }
        if params.kind() != self.kind {
            return Err(CodecError::new(format!(
                "{} codec cannot be configured with {} parameters",
                self.kind,
                params.kind()
            )));
        }
        match params {
            EncoderParams::Video(video) => {
                if video.width == 0 || video.height == 0 {
                    return Err(CodecError::new(format!(
                        "unsupported frame size {}x{}",
                        video.width, video.height
                    )));
                }
                if video.frame_rate == 0 {
                    return Err(CodecError::new("frame rate must be non-zero"));
                }
            }
            EncoderParams::Audio(audio) => {
                if audio.sample_rate == 0 {
                    return Err(CodecError::new("sample rate must be non-zero"));
                }
                if audio.channels == 0 {
                    return Err(CodecError::new("channel count must be non-zero"));
                }
            }
        }
        self.params = Some(*params);
        self.format = Some(Self::descriptor(params));
        self.lifecycle = Lifecycle::Configured;
        Ok(())
    }

    fn start(&mut self) -> Result<(), CodecError> {
        if self.lifecycle != Lifecycle::Configured {
            return Err(CodecError::new("codec must be configured before start"));
        }
        self.lifecycle = Lifecycle::Running;
        Ok(())
    }

    fn dequeue_input_slot(&mut self) -> Result<Option<usize>, CodecError> {
        self.require_running("dequeue input")?;
        if self.end_of_stream_queued {
            return Err(CodecError::new("input requested after end of stream"));
        }
        self.pump();
        let slot = self.free_inputs.pop_front();
        if let Some(slot) = slot {
            self.lent_inputs[slot] = true;
        }
        Ok(slot)
    }

    fn input_buffer(&mut self, slot: usize) -> Option<&mut Vec<u8>> {
        if !self.lent_inputs.get(slot).copied().unwrap_or(false) {
            return None;
        }
        self.input_buffers.get_mut(slot)
    }

    fn queue_input(
        &mut self,
        slot: usize,
        len: usize,
        pts_us: u64,
        flags: BufferFlags,
    ) -> Result<(), CodecError> {
        self.require_running("queue input")?;
        if !self.lent_inputs.get(slot).copied().unwrap_or(false) {
            return Err(CodecError::new(format!("input slot {slot} was not dequeued")));
        }
        if len > self.input_buffers[slot].len() {
            return Err(CodecError::new(format!(
                "queued {len} bytes but slot {slot} holds {}",
                self.input_buffers[slot].len()
            )));
        }
        self.lent_inputs[slot] = false;
        self.end_of_stream_queued |= flags.end_of_stream;
        self.inputs_accepted += 1;
        self.queued.push_back(QueuedInput {
            slot,
            len,
            pts_us,
            flags,
        });
        self.pump();
        Ok(())
    }

    fn dequeue_output(&mut self) -> Result<OutputStatus, CodecError> {
        self.require_running("dequeue output")?;
        self.pump();
        if !self.format_announced {
            if self.inputs_accepted == 0 {
                return Ok(OutputStatus::TryAgainLater);
            }
            self.format_announced = true;
            return Ok(OutputStatus::FormatChanged);
        }
        Ok(match self.ready.pop_front() {
            Some((slot, info)) => OutputStatus::Ready { slot, info },
            None => OutputStatus::TryAgainLater,
        })
    }

    fn output_format(&self) -> Option<FormatDescriptor> {
        if self.format_announced {
            self.format.clone()
        } else {
            None
        }
    }

    fn output_buffer(&self, slot: usize) -> Option<&[u8]> {
        if self.free_outputs.contains(&slot) {
            return None;
        }
        self.output_buffers.get(slot).map(Vec::as_slice)
    }

    fn release_output(&mut self, slot: usize) -> Result<(), CodecError> {
        if slot >= self.output_buffers.len()
            || self.free_outputs.contains(&slot)
            || self.ready.iter().any(|(s, _)| *s == slot)
        {
            return Err(CodecError::new(format!(
                "output slot {slot} is not held by the caller"
            )));
        }
        self.output_buffers[slot].clear();
        self.free_outputs.push_back(slot);
        self.pump();
        Ok(())
    }

    fn stop(&mut self) {
        if matches!(self.lifecycle, Lifecycle::Running | Lifecycle::Configured) {
            self.queued.clear();
            self.ready.clear();
            self.lifecycle = Lifecycle::Stopped;
        }
    }

    fn release(&mut self) {
        self.input_buffers = Vec::new();
        self.output_buffers = Vec::new();
        self.free_inputs.clear();
        self.free_outputs.clear();
        self.lent_inputs.clear();
        self.queued.clear();
        self.ready.clear();
        self.lifecycle = Lifecycle::Released;
    }
}

/// Creates [`SoftwareCodec`]s. The default factory for every recorder.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareCodecFactory {
    input_slots: usize,
    output_slots: usize,
}

impl SoftwareCodecFactory {
    /// Creates a factory whose codecs have the given slot pool sizes.
    pub fn new(input_slots: usize, output_slots: usize) -> Self {
        Self {
            input_slots,
            output_slots,
        }
    }
}

impl Default for SoftwareCodecFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS, DEFAULT_SLOTS)
    }
}

impl CodecFactory for SoftwareCodecFactory {
    fn create(&self, kind: TrackKind) -> Result<Box<dyn Codec>, CodecError> {
        Ok(Box::new(SoftwareCodec::new(
            kind,
            self.input_slots,
            self.output_slots,
        )))
    }
}
