pub mod archiver;
pub mod channel;
pub mod device;
pub mod frame;
#[cfg(feature = "audio-io")]
pub mod input;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod pcm;
pub mod sink;
pub mod source;
pub mod wav;

pub use archiver::{ArchiveTap, ArchivedAudio, AudioArchiver};
pub use channel::{BoundedAudioChannel, ChannelStats, DropPolicy, PushOutcome};
pub use frame::{AudioFrame, Direction, FrameSequencer};
#[cfg(feature = "audio-io")]
pub use input::{input_devices, AudioDeviceInfo, CaptureParams};
#[cfg(feature = "audio-io")]
pub use output::{output_devices, PlaybackParams};
pub use sink::AudioSink;
pub use source::AudioSource;
pub use wav::write_wav;
