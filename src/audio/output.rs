use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::pcm::{float_to_pcm16, PcmBuffer};
use super::resample::LinearResampler;
use super::timeline::{SourceId, Timeline};

/// Timeline shared between the session and a rendering thread
pub type SharedTimeline = Arc<Mutex<Timeline>>;

/// Playback device with its own clock
///
/// Finished sources are reported on the end channel the output was created
/// with.
pub trait AudioOutput: Send {
    /// Current output clock time in seconds
    fn current_time(&self) -> f64;

    /// Schedule a buffer to start at `start_at` seconds on the output clock
    ///
    /// Returns the start time the buffer actually got, which is later than
    /// requested when the clock has already passed `start_at`.
    fn schedule(&mut self, id: SourceId, start_at: f64, buffer: PcmBuffer) -> Result<f64>;

    /// Stop and forget all scheduled buffers, returning how many were dropped
    fn stop_all(&mut self) -> usize;

    /// Release the device. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Get output name for logging
    fn name(&self) -> &str;
}

/// Where synthesized speech goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSink {
    /// Default output device
    Speaker,
    /// WAV file, written in real time
    File(PathBuf),
}

/// Renders a timeline for a device running at a different rate
///
/// The timeline stays at the source rate, so scheduled start times and
/// durations stay exact. Blocks pulled from it go through one resampler for
/// the whole session; fragment boundaries never add or lose device frames.
pub struct ResamplingRenderer {
    timeline: SharedTimeline,
    resampler: LinearResampler,
    block: Vec<f32>,
    pending: VecDeque<f32>,
}

impl ResamplingRenderer {
    /// Source frames pulled from the timeline at a time
    const BLOCK_FRAMES: usize = 256;

    pub fn new(timeline: SharedTimeline, source_rate: u32, device_rate: u32) -> Self {
        Self {
            timeline,
            resampler: LinearResampler::new(source_rate, device_rate),
            block: vec![0.0; Self::BLOCK_FRAMES],
            pending: VecDeque::new(),
        }
    }

    /// Fill `out` with interleaved frames at the device rate
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);

        if self.resampler.is_passthrough() {
            match self.timeline.lock() {
                Ok(mut timeline) => timeline.render(out, channels),
                Err(_) => out.fill(0.0),
            }
            return;
        }

        let frames = out.len() / channels;
        while self.pending.len() < frames {
            self.block.fill(0.0);
            if let Ok(mut timeline) = self.timeline.lock() {
                timeline.render(&mut self.block, 1);
            }
            self.pending.extend(self.resampler.process(&self.block));
        }

        for frame in out.chunks_mut(channels) {
            let sample = self.pending.pop_front().unwrap_or(0.0);
            frame.fill(sample);
        }
    }
}

/// Audio output factory
pub struct AudioOutputFactory;

impl AudioOutputFactory {
    pub async fn create(
        sink: &AudioSink,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>> {
        match sink {
            AudioSink::Speaker => {
                #[cfg(feature = "cpal-audio")]
                {
                    let output = super::device::SpeakerOutput::open(sample_rate, ended_tx).await?;
                    Ok(Box::new(output))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    let _ = (sample_rate, ended_tx);
                    bail!("Speaker playback requires the `cpal-audio` feature; use --output-wav instead")
                }
            }

            AudioSink::File(path) => {
                let output = WavOutput::create(path, sample_rate, ended_tx)?;
                Ok(Box::new(output))
            }
        }
    }
}

type SharedWriter = Arc<Mutex<Option<hound::WavWriter<BufWriter<File>>>>>;

/// Output that renders the timeline into a WAV file at wall-clock pace
pub struct WavOutput {
    path: PathBuf,
    timeline: SharedTimeline,
    writer: SharedWriter,
    task: Option<JoinHandle<()>>,
}

impl WavOutput {
    /// Render granularity
    const TICK: Duration = Duration::from_millis(20);

    /// Start a new WAV file, replacing any existing one
    pub fn create(
        path: impl AsRef<Path>,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self> {
        if sample_rate == 0 {
            bail!("Output sample rate must be non-zero");
        }

        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!("WAV output opened: {:?} ({}Hz)", path, sample_rate);
        Ok(Self::start(path, writer, sample_rate, ended_tx))
    }

    /// Continue a WAV file written by an earlier session
    ///
    /// The file must have the format `create` writes at the same rate.
    pub fn append(
        path: impl AsRef<Path>,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = hound::WavWriter::append(&path)
            .with_context(|| format!("Failed to reopen WAV file: {:?}", path))?;

        let spec = writer.spec();
        if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_rate != sample_rate {
            bail!(
                "Cannot append {}Hz mono audio to {:?} ({}Hz, {} channels, {} bits)",
                sample_rate,
                path,
                spec.sample_rate,
                spec.channels,
                spec.bits_per_sample
            );
        }

        info!("WAV output reopened: {:?} ({}Hz)", path, sample_rate);
        Ok(Self::start(path, writer, sample_rate, ended_tx))
    }

    fn start(
        path: PathBuf,
        writer: hound::WavWriter<BufWriter<File>>,
        sample_rate: u32,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Self {
        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate, ended_tx)));
        let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));

        let task = tokio::spawn(Self::render_loop(
            Arc::clone(&timeline),
            Arc::clone(&writer),
            sample_rate,
        ));

        Self {
            path,
            timeline,
            writer,
            task: Some(task),
        }
    }

    async fn render_loop(timeline: SharedTimeline, writer: SharedWriter, sample_rate: u32) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(Self::TICK);
        let mut block = Vec::new();

        loop {
            ticker.tick().await;

            let due = (started.elapsed().as_secs_f64() * f64::from(sample_rate)) as u64;

            {
                let Ok(mut timeline) = timeline.lock() else {
                    break;
                };
                let frames = due.saturating_sub(timeline.position()) as usize;
                if frames == 0 {
                    continue;
                }
                block.resize(frames, 0.0);
                timeline.render(&mut block, 1);
            }

            let Ok(mut guard) = writer.lock() else {
                break;
            };
            let Some(wav) = guard.as_mut() else {
                break;
            };
            for sample in float_to_pcm16(&block) {
                if let Err(e) = wav.write_sample(sample) {
                    warn!("Failed to write output sample: {}", e);
                    return;
                }
            }
        }
    }
}

impl AudioOutput for WavOutput {
    fn current_time(&self) -> f64 {
        self.timeline
            .lock()
            .map(|timeline| timeline.current_time())
            .unwrap_or_default()
    }

    fn schedule(&mut self, id: SourceId, start_at: f64, buffer: PcmBuffer) -> Result<f64> {
        if self.is_closed() {
            bail!("Output is closed");
        }
        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| anyhow::anyhow!("Output timeline lock poisoned"))?;
        Ok(timeline.schedule(id, start_at, buffer))
    }

    fn stop_all(&mut self) -> usize {
        self.timeline
            .lock()
            .map(|mut timeline| timeline.stop_all())
            .unwrap_or_default()
    }

    fn close(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.abort();

        let writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("Output writer lock poisoned"))?
            .take();

        if let Some(writer) = writer {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        info!("WAV output closed: {:?}", self.path);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close WAV output on drop: {}", e);
        }
    }
}
