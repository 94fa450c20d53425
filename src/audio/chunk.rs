use super::backend::AudioFrame;

/// Re-chunks arbitrarily sized sample runs into fixed-size frames
///
/// Holds at most one partial frame; every complete frame is handed out
/// immediately.
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    samples_emitted: u64,
}

impl FrameChunker {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
            samples_emitted: 0,
        }
    }

    /// Append samples, returning every frame they complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(self.emit(samples));
            }
        }

        frames
    }

    /// Number of samples waiting for the next frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discard the partial frame
    pub fn reset(&mut self) {
        self.pending.clear();
        self.samples_emitted = 0;
    }

    fn emit(&mut self, samples: Vec<f32>) -> AudioFrame {
        let timestamp_ms = if self.sample_rate == 0 {
            0
        } else {
            self.samples_emitted * 1000 / u64::from(self.sample_rate)
        };
        self.samples_emitted += samples.len() as u64;

        AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            timestamp_ms,
        }
    }
}
