// Microphone capture and speaker playback through cpal.
//
// cpal streams are not Send, so each stream lives on its own thread and is
// dropped there when the owner signals stop. Neither starting nor stopping a
// stream blocks an async worker.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::chunk::FrameChunker;
use super::output::{AudioOutput, ResamplingRenderer, SharedTimeline};
use super::pcm::PcmBuffer;
use super::resample::{downmix_to_mono, LinearResampler};
use super::timeline::{SourceId, Timeline};

/// A stream thread plus the channel that tells it to stop
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    /// Build a stream on a new thread and keep it alive until stopped
    ///
    /// Resolves once the stream is playing or has failed to start.
    async fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().context("Failed to start audio stream")?;
                    Ok(stream)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Blocks until stop() or the owner is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn audio thread")?;

        ready_rx
            .await
            .map_err(|_| anyhow!("Audio thread exited during startup"))??;

        Ok(Self { stop_tx, handle })
    }

    /// Signal the thread to drop its stream
    ///
    /// Inside a runtime the join happens on the blocking pool; elsewhere
    /// (a drop after shutdown) it happens inline.
    fn stop(self) {
        let _ = self.stop_tx.send(());
        let handle = self.handle;
        let join = move || {
            if handle.join().is_err() {
                error!("Audio stream thread panicked");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(join);
            }
            Err(_) => join(),
        }
    }
}

/// Microphone capture from the default input device
///
/// Device audio is downmixed, resampled to the session rate, and cut into
/// fixed-size frames inside the capture callback.
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    device_name: String,
    stream_config: StreamConfig,
    sample_format: SampleFormat,
    thread: Option<StreamThread>,
    capturing: Arc<AtomicBool>,
}

impl MicrophoneBackend {
    /// Acquire the default input device
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        let supported = device
            .default_input_config()
            .context("Failed to query input device configuration")?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let sample_format = supported.sample_format();
        let stream_config: StreamConfig = supported.into();

        info!(
            "Microphone acquired: {} ({}Hz, {} channels, {:?})",
            device_name, stream_config.sample_rate.0, stream_config.channels, sample_format
        );

        Ok(Self {
            config,
            device_name,
            stream_config,
            sample_format,
            thread: None,
            capturing: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Per-callback processing: device buffer in, session frames out
struct CaptureProcessor {
    channels: u16,
    resampler: LinearResampler,
    chunker: FrameChunker,
    tx: mpsc::Sender<AudioFrame>,
}

impl CaptureProcessor {
    fn process(&mut self, interleaved: &[f32]) {
        let mono = downmix_to_mono(interleaved, self.channels);
        let resampled = self.resampler.process(&mono);
        for frame in self.chunker.push(&resampled) {
            if self.tx.try_send(frame).is_err() {
                debug!("Capture frame dropped: session not keeping up");
            }
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let stream_config = self.stream_config.clone();
        let sample_format = self.sample_format;
        let mut processor = CaptureProcessor {
            channels: stream_config.channels,
            resampler: LinearResampler::new(stream_config.sample_rate.0, self.config.target_sample_rate),
            chunker: FrameChunker::new(self.config.frame_size, self.config.target_sample_rate),
            tx,
        };

        let thread = StreamThread::spawn("liana-capture", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| anyhow!("Input device disappeared"))?;
            let on_error = |err: cpal::StreamError| error!("Audio capture error: {}", err);

            let stream = match sample_format {
                SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| processor.process(data),
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                        processor.process(&floats);
                    },
                    on_error,
                    None,
                ),
                other => bail!("Unsupported input sample format: {:?}", other),
            };

            stream.context("Failed to build input stream")
        })
        .await?;

        self.thread = Some(thread);
        self.capturing.store(true, Ordering::SeqCst);
        info!("Microphone capture started: {}", self.device_name);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread.stop();
            info!("Microphone capture stopped: {}", self.device_name);
        }
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

/// Playback on the default output device
///
/// The timeline runs at the source rate and the device callback pulls it
/// through one session-long resampler, so the output clock is the number of
/// source frames the device has consumed.
pub struct SpeakerOutput {
    source_rate: u32,
    timeline: SharedTimeline,
    thread: Option<StreamThread>,
}

impl SpeakerOutput {
    pub async fn open(source_rate: u32, ended_tx: mpsc::UnboundedSender<SourceId>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;

        let supported = device
            .default_output_config()
            .context("Failed to query output device configuration")?;

        let sample_format = supported.sample_format();
        let stream_config: StreamConfig = supported.into();
        let device_rate = stream_config.sample_rate.0;
        let channels = usize::from(stream_config.channels);

        let timeline = Arc::new(Mutex::new(Timeline::new(source_rate, ended_tx)));
        let mut renderer = ResamplingRenderer::new(Arc::clone(&timeline), source_rate, device_rate);

        let thread = StreamThread::spawn("liana-playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| anyhow!("Output device disappeared"))?;
            let on_error = |err: cpal::StreamError| error!("Audio playback error: {}", err);

            let stream = match sample_format {
                SampleFormat::F32 => device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data, channels),
                    on_error,
                    None,
                ),
                SampleFormat::I16 => {
                    let mut scratch = Vec::new();
                    device.build_output_stream(
                        &stream_config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            scratch.resize(data.len(), 0.0f32);
                            renderer.render(&mut scratch, channels);
                            for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                                *out = (sample * 32767.0) as i16;
                            }
                        },
                        on_error,
                        None,
                    )
                }
                other => bail!("Unsupported output sample format: {:?}", other),
            };

            stream.context("Failed to build output stream")
        })
        .await?;

        info!(
            "Speaker output opened ({}Hz device, {}Hz source, {} channels)",
            device_rate, source_rate, channels
        );

        Ok(Self {
            source_rate,
            timeline,
            thread: Some(thread),
        })
    }
}

impl AudioOutput for SpeakerOutput {
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

        // Fragments normally arrive at the source rate already
        let buffer = if buffer.sample_rate == 0 || buffer.sample_rate == self.source_rate {
            buffer
        } else {
            let samples = LinearResampler::new(buffer.sample_rate, self.source_rate).process(&buffer.samples);
            PcmBuffer::new(samples, self.source_rate)
        };

        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| anyhow!("Output timeline lock poisoned"))?;
        Ok(timeline.schedule(id, start_at, buffer))
    }

    fn stop_all(&mut self) -> usize {
        self.timeline
            .lock()
            .map(|mut timeline| timeline.stop_all())
            .unwrap_or_default()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread.stop();
            info!("Speaker output closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.thread.is_none()
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close speaker output on drop: {}", e);
        }
    }
}
