//! Test-tone synthesizer used by the demo and the tests
//!
//! Channel `n` plays a sine at `220 Hz * (n + 1)` so channels can be told
//! apart by ear.

use std::f64::consts::TAU;

use crate::audio::types::StreamFormat;

const BASE_FREQUENCY_HZ: f64 = 220.0;
const DEFAULT_VOLUME: f32 = 0.5;

/// Per-channel sine generator writing interleaved frames in any supported encoding
#[derive(Debug, Clone)]
pub struct SineSynth {
    format: StreamFormat,
    volume: f32,
    phases: Vec<f64>,
}

impl SineSynth {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            volume: DEFAULT_VOLUME,
            phases: vec![0.0; format.channels as usize],
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn frequency(channel: u32) -> f64 {
        BASE_FREQUENCY_HZ * (channel as f64 + 1.0)
    }

    /// Fill `frames` interleaved frames of `buffer`
    pub fn render(&mut self, buffer: &mut [u8], frames: u32) {
        let sample_bytes = self.format.encoding.bytes_per_sample() as usize;
        let frame_bytes = self.format.bytes_per_frame() as usize;
        if frame_bytes == 0 {
            return;
        }

        let encoding = self.format.encoding;
        let rate = self.format.sample_rate;
        for frame in buffer.chunks_exact_mut(frame_bytes).take(frames as usize) {
            for (channel, sample) in frame.chunks_exact_mut(sample_bytes).enumerate() {
                let phase = &mut self.phases[channel];
                encoding.write_sample(phase.sin() as f32 * self.volume, sample);
                *phase = (*phase + TAU * Self::frequency(channel as u32) / rate) % TAU;
            }
        }
    }

    /// Render callback owning this synth
    pub fn into_callback(mut self) -> impl FnMut(&mut [u8], u32) + Send + 'static {
        move |buffer: &mut [u8], frames: u32| self.render(buffer, frames)
    }
}
