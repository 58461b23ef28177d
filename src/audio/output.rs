use super::channel::BoundedAudioChannel;
use super::device::DeviceThread;
use super::input::AudioDeviceInfo;
use crate::{Result, TutorError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

/// Parameters for opening the playback stream
#[derive(Debug, Clone)]
pub struct PlaybackParams {
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub startup_timeout: Duration,
}

/// List available audio output devices
pub fn output_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    host.output_devices()
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

fn select_output_device(host: &cpal::Host, index: Option<usize>) -> Result<Device> {
    match index {
        Some(index) => host
            .output_devices()
            .map_err(|e| TutorError::DeviceError(format!("Failed to enumerate output devices: {}", e)))?
            .nth(index)
            .ok_or_else(|| TutorError::DeviceError(format!("No output device at index {}", index))),
        None => host
            .default_output_device()
            .ok_or_else(|| TutorError::DeviceError("No output device available".into())),
    }
}

/// Open the speaker and play frames pulled from `channel`.
///
/// `flush_generation` is bumped by the sink on barge-in; the callback then discards
/// the partially played frame it is holding.
pub fn spawn_playback(
    params: PlaybackParams,
    channel: BoundedAudioChannel,
    flush_generation: Arc<AtomicU64>,
    errors: UnboundedSender<TutorError>,
) -> Result<DeviceThread> {
    DeviceThread::spawn("audio-playback", params.startup_timeout, move |stop, ready| {
        let host = cpal::default_host();
        let device = match select_output_device(&host, params.device_index) {
            Ok(device) => device,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let channels = match device.default_output_config() {
            Ok(config) => config.channels(),
            Err(e) => {
                let _ = ready.send(Err(TutorError::DeviceError(format!(
                    "Failed to get output config: {}",
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
            "Using output device: {} ({}Hz, {} channel(s))",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            params.sample_rate,
            channels
        );

        let callback_channel = channel.clone();
        let channel_count = channels as usize;
        let mut current: Vec<f32> = Vec::new();
        let mut position = 0usize;
        let mut seen_generation = flush_generation.load(Ordering::Acquire);

        let err_fn = move |err: cpal::StreamError| {
            error!("Audio output stream error: {}", err);
            let _ = errors.send(TutorError::DeviceError(format!("Output stream failed: {}", err)));
        };

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let generation = flush_generation.load(Ordering::Acquire);
                if generation != seen_generation {
                    seen_generation = generation;
                    current.clear();
                    position = 0;
                }

                for out in data.chunks_mut(channel_count) {
                    if position >= current.len() {
                        match callback_channel.try_pull() {
                            Some(frame) => {
                                current = frame.samples;
                                position = 0;
                            }
                            None => {
                                // Underrun
                                out.fill(0.0);
                                continue;
                            }
                        }
                    }
                    let sample = current.get(position).copied().unwrap_or(0.0);
                    position += 1;
                    out.fill(sample);
                }
            },
            err_fn,
            None,
        );

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(TutorError::DeviceError(format!(
                    "Failed to build output stream: {}",
                    e
                ))));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready.send(Err(TutorError::DeviceError(format!(
                "Failed to start output stream: {}",
                e
            ))));
            return;
        }
        let _ = ready.send(Ok(()));

        let drain = stop.wait();
        let deadline = Instant::now() + drain;
        while !channel.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        drop(stream);
        debug!(remaining = channel.len(), "Audio playback stopped");
    })
}
