//! Microphone capture on a dedicated device thread.
//!
//! The cpal callback downmixes to mono, slices the stream into fixed-size frames and
//! pushes them into the capture [`BoundedAudioChannel`]. Stream errors are forwarded
//! to the session supervisor as [`TutorError::DeviceError`].

use super::channel::BoundedAudioChannel;
use super::device::DeviceThread;
use super::frame::{Direction, FrameSequencer};
use crate::{Result, TutorError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

/// Audio device information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    /// Position in the host's device list, used for selection
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Parameters for opening the capture stream
#[derive(Debug, Clone)]
pub struct CaptureParams {
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub startup_timeout: Duration,
}

/// List available audio input devices
pub fn input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    host.input_devices()
        .map(|devices| {
            devices
                .enumerate()
                .filter_map(|(index, device)| {
                    let name = device.name().ok()?;
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    Some(AudioDeviceInfo {
                        index,
                        name,
                        is_default,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn select_input_device(host: &cpal::Host, index: Option<usize>) -> Result<Device> {
    match index {
        Some(index) => host
            .input_devices()
            .map_err(|e| TutorError::DeviceError(format!("Failed to enumerate input devices: {}", e)))?
            .nth(index)
            .ok_or_else(|| TutorError::DeviceError(format!("No input device at index {}", index))),
        None => host
            .default_input_device()
            .ok_or_else(|| TutorError::DeviceError("No input device available".into())),
    }
}

/// Open the microphone and start pushing frames into `channel`.
pub fn spawn_capture(
    params: CaptureParams,
    channel: BoundedAudioChannel,
    errors: UnboundedSender<TutorError>,
) -> Result<DeviceThread> {
    DeviceThread::spawn("audio-capture", params.startup_timeout, move |stop, ready| {
        let host = cpal::default_host();
        let device = match select_input_device(&host, params.device_index) {
            Ok(device) => device,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let channels = match device.default_input_config() {
            Ok(config) => config.channels(),
            Err(e) => {
                let _ = ready.send(Err(TutorError::DeviceError(format!(
                    "Failed to get input config: {}",
                    e
                ))));
                return;
            }
        };

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(
            "Using input device: {} ({}Hz, {} channel(s))",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            params.sample_rate,
            channels
        );

        let pending = Arc::new(Mutex::new(Vec::<f32>::with_capacity(params.frame_samples)));
        let sequencer = Arc::new(Mutex::new(FrameSequencer::new(Direction::Capture)));
        let callback_pending = Arc::clone(&pending);
        let callback_sequencer = Arc::clone(&sequencer);
        let callback_channel = channel.clone();
        let frame_samples = params.frame_samples.max(1);
        let channel_count = channels as usize;

        let err_fn = move |err: cpal::StreamError| {
            error!("Audio input stream error: {}", err);
            let _ = errors.send(TutorError::DeviceError(format!("Input stream failed: {}", err)));
        };

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut pending = callback_pending.lock();
                if channel_count == 1 {
                    pending.extend_from_slice(data);
                } else {
                    pending.extend(
                        data.chunks(channel_count)
                            .map(|frame| frame.iter().sum::<f32>() / channel_count as f32),
                    );
                }
                while pending.len() >= frame_samples {
                    let samples: Vec<f32> = pending.drain(..frame_samples).collect();
                    let frame = callback_sequencer.lock().frame(samples);
                    callback_channel.push(frame);
                }
            },
            err_fn,
            None,
        );

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(TutorError::DeviceError(format!(
                    "Failed to build input stream: {}",
                    e
                ))));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready.send(Err(TutorError::DeviceError(format!(
                "Failed to start input stream: {}",
                e
            ))));
            return;
        }
        let _ = ready.send(Ok(()));

        stop.wait();
        let _ = stream.pause();
        drop(stream);

        // Flush the partial frame so the tail of the last sentence is not lost
        let tail: Vec<f32> = std::mem::take(&mut *pending.lock());
        if !tail.is_empty() {
            let frame = sequencer.lock().frame(tail);
            channel.push(frame);
        }
        debug!("Audio capture stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // Should not panic even without audio devices
        let devices = input_devices();
        for (position, device) in devices.iter().enumerate() {
            assert!(device.index >= position);
        }
    }

    #[test]
    fn test_missing_device_index_is_device_error() {
        let host = cpal::default_host();
        let result = select_input_device(&host, Some(usize::MAX));
        assert!(matches!(result, Err(TutorError::DeviceError(_))));
    }
}
