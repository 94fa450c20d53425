pub mod backend;
pub mod chunk;
pub mod file;
pub mod output;
pub mod pcm;
pub mod resample;
pub mod timeline;

#[cfg(feature = "cpal-audio")]
pub mod device;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use chunk::FrameChunker;
pub use file::{AudioFile, WavFileBackend};
pub use output::{AudioOutput, AudioOutputFactory, AudioSink, ResamplingRenderer, WavOutput};
pub use pcm::{decode_fragment, encode_block, MediaBlob, PcmBuffer};
pub use timeline::{SourceId, Timeline};
