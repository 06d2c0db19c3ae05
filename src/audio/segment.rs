use anyhow::{Context, Result};
use std::io::Cursor;

use super::backend::AudioFrame;

/// One finalized, independently decodable slice of encoded audio.
///
/// The payload is a complete WAV container; any consumer can decode it
/// without seeing the segments before or after it. Ordering is carried by
/// the transport, not the payload; `index` exists for logging only.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Complete container bytes
    pub data: Vec<u8>,
    /// Position in the capture sequence (first segment is 0)
    pub index: usize,
    /// Audio duration covered by this segment
    pub duration_ms: u64,
}

impl AudioSegment {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encoder sub-states. A segment is either accumulating samples or being
/// finalized into a container; writes during `Rotating` are rejected so a
/// rotation can never lose or double-encode a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Encoding,
    Rotating,
}

/// Accumulates conditioned PCM and emits a complete WAV container per
/// rotation.
///
/// A continuous encoder output is not chunk-decodable mid-stream, so the
/// encoder is finalized on every clock tick and immediately restarted
/// against the same stream: back-to-back complete containers, no gap.
pub struct SegmentEncoder {
    spec: hound::WavSpec,
    state: EncoderState,
    samples: Vec<i16>,
    next_index: usize,
}

impl SegmentEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            spec: hound::WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            state: EncoderState::Encoding,
            samples: Vec::new(),
            next_index: 0,
        }
    }

    /// Append one conditioned frame to the in-flight segment.
    pub fn write_frame(&mut self, frame: &AudioFrame) {
        if self.state != EncoderState::Encoding {
            // Unreachable from the single encoding task, but the invariant
            // stays checkable.
            return;
        }
        self.samples.extend_from_slice(&frame.samples);
    }

    /// Finalize the in-flight segment and start the next one.
    ///
    /// Returns `None` when no samples arrived since the last rotation; an
    /// empty container is dropped, not forwarded.
    pub fn rotate(&mut self) -> Result<Option<AudioSegment>> {
        self.state = EncoderState::Rotating;
        let samples = std::mem::take(&mut self.samples);
        self.state = EncoderState::Encoding;

        if samples.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.spec)
                .context("failed to create segment writer")?;
            for &sample in &samples {
                writer
                    .write_sample(sample)
                    .context("failed to write sample to segment")?;
            }
            writer.finalize().context("failed to finalize segment")?;
        }

        let index = self.next_index;
        self.next_index += 1;

        let frames = samples.len() as u64 / self.spec.channels as u64;
        let duration_ms = frames * 1000 / self.spec.sample_rate as u64;

        Ok(Some(AudioSegment {
            data: cursor.into_inner(),
            index,
            duration_ms,
        }))
    }

    /// Drop the in-flight samples without emitting a segment.
    pub fn discard(&mut self) {
        self.samples.clear();
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }
}

/// Condition a captured frame to the encoder's target format.
pub fn condition_frame(frame: AudioFrame, target_rate: u32, target_channels: u16) -> AudioFrame {
    let mut conditioned = frame;

    if conditioned.channels != target_channels && target_channels == 1 {
        conditioned = downmix_to_mono(conditioned);
    }

    if conditioned.sample_rate != target_rate {
        conditioned = decimate(conditioned, target_rate);
    }

    conditioned
}

/// Downsample by decimation (every Nth sample). Upsampling is not
/// attempted; frames below the target rate pass through unchanged.
fn decimate(frame: AudioFrame, target_rate: u32) -> AudioFrame {
    let ratio = frame.sample_rate / target_rate;
    if ratio <= 1 {
        return frame;
    }

    let decimated: Vec<i16> = frame
        .samples
        .iter()
        .step_by(ratio as usize)
        .copied()
        .collect();

    AudioFrame {
        samples: decimated,
        sample_rate: target_rate,
        channels: frame.channels,
        timestamp_ms: frame.timestamp_ms,
    }
}

/// Sum interleaved stereo pairs into mono, clamped to the i16 range.
fn downmix_to_mono(frame: AudioFrame) -> AudioFrame {
    if frame.channels != 2 {
        return frame; // only stereo downmix is supported
    }

    let mut mono = Vec::with_capacity(frame.samples.len() / 2);
    for pair in frame.samples.chunks_exact(2) {
        let sum = pair[0] as i32 + pair[1] as i32;
        mono.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    AudioFrame {
        samples: mono,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}
