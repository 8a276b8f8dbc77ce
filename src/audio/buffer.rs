use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Cached duration in seconds
    #[serde(skip)]
    pub duration_secs: f32,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
            duration_secs: 0.0,
        }
    }

    pub fn from_samples(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        let mut buffer = Self {
            samples,
            sample_rate,
            channels,
            duration_secs: 0.0,
        };
        buffer.update_duration();
        buffer
    }

    /// Recalculate and update duration_secs
    pub fn update_duration(&mut self) {
        self.duration_secs = self.frames_to_secs(self.frame_count());
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.duration_secs = 0.0;
    }

    pub fn append(&mut self, data: &[i16]) {
        self.samples.extend_from_slice(data);
        self.update_duration();
    }

    /// Drops every frame past `limit`. Returns true when samples were removed.
    pub fn truncate_to(&mut self, limit: Duration) -> bool {
        if self.sample_rate == 0 {
            return false;
        }
        let channels = self.channels.max(1) as usize;
        let max_frames = (limit.as_secs_f64() * self.sample_rate as f64).floor() as usize;
        let max_samples = max_frames.saturating_mul(channels);
        if self.samples.len() <= max_samples {
            return false;
        }
        self.samples.truncate(max_samples);
        self.update_duration();
        true
    }

    fn frames_to_secs(&self, frames: usize) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            frames as f32 / self.sample_rate as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_accounts_for_channels() {
        let buffer = AudioBuffer::from_samples(vec![0; 32_000], 16_000, 2);
        assert!((buffer.duration_secs - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn truncate_keeps_whole_frames_within_limit() {
        let mut buffer = AudioBuffer::from_samples(vec![1; 16_000 * 3], 16_000, 1);
        assert!(buffer.truncate_to(Duration::from_millis(1500)));
        assert_eq!(buffer.samples.len(), 24_000);
        assert!((buffer.duration_secs - 1.5).abs() < 1e-6);

        assert!(!buffer.truncate_to(Duration::from_secs(10)));
    }
}
