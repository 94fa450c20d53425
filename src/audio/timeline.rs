// Sample-accurate output clock.
//
// Time on the clock is the number of frames rendered divided by the sample
// rate. Sources are mixed in at their start frame; once the render position
// passes a source's last sample its id is reported on the end channel.

use tokio::sync::mpsc;

use super::pcm::PcmBuffer;

/// Identifier of one scheduled playback source
pub type SourceId = u64;

#[derive(Debug)]
struct ScheduledSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Debug)]
pub struct Timeline {
    sample_rate: u32,
    position: u64,
    sources: Vec<ScheduledSource>,
    ended_tx: mpsc::UnboundedSender<SourceId>,
}

impl Timeline {
    pub fn new(sample_rate: u32, ended_tx: mpsc::UnboundedSender<SourceId>) -> Self {
        Self {
            sample_rate,
            position: 0,
            sources: Vec::new(),
            ended_tx,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current clock time in seconds
    pub fn current_time(&self) -> f64 {
        self.frame_time(self.position)
    }

    /// Number of sources that have not finished yet
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Schedule `buffer` to start at `start_at` seconds
    ///
    /// A start time already in the past plays from the current position.
    /// Returns the start time the source actually got.
    pub fn schedule(&mut self, id: SourceId, start_at: f64, buffer: PcmBuffer) -> f64 {
        let requested = (start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let start_frame = requested.max(self.position);
        let start = self.frame_time(start_frame);

        if buffer.samples.is_empty() {
            let _ = self.ended_tx.send(id);
            return start;
        }

        self.sources.push(ScheduledSource {
            id,
            start_frame,
            samples: buffer.samples,
        });
        start
    }

    fn frame_time(&self, frame: u64) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frame as f64 / f64::from(self.sample_rate)
    }

    /// Mix the next `out.len() / channels` frames into `out`
    ///
    /// Every channel receives the same mono mix, clamped to [-1.0, 1.0].
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let t = self.position + offset as u64;
            let mut mixed = 0.0f32;
            for source in &self.sources {
                if t >= source.start_frame && t < source.end_frame() {
                    mixed += source.samples[(t - source.start_frame) as usize];
                }
            }
            let mixed = mixed.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = mixed;
            }
        }

        self.position += frames as u64;
        self.reap();
    }

    /// Advance the clock without producing output
    pub fn advance(&mut self, frames: u64) {
        self.position += frames;
        self.reap();
    }

    /// Drop every scheduled source without end notifications
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.sources.len();
        self.sources.clear();
        stopped
    }

    fn reap(&mut self) {
        let position = self.position;
        let ended_tx = &self.ended_tx;
        self.sources.retain(|source| {
            if source.end_frame() <= position {
                let _ = ended_tx.send(source.id);
                false
            } else {
                true
            }
        });
    }
}
