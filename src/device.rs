//! Audio device playback through cpal.
//!
//! The renderer is synchronous; frames are handed to the stream callback
//! through a small bounded queue, so `write` blocks until the device
//! makes room. Dropping the sender at finish lets the callback drain and
//! fall silent.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use log::{error, info};

use crate::output::{OutputError, SampleSink};

const QUEUE_BLOCKS: usize = 4;

pub struct DeviceSink {
    tx: Option<SyncSender<Vec<i16>>>,
    stream: cpal::Stream,
    channels: usize,
}

impl DeviceSink {
    pub fn new(srate: u32, channels: usize) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| OutputError::Device("no audio output device".into()))?;
        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(srate),
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_format = device
            .default_output_config()
            .map_err(|e| OutputError::Device(e.to_string()))?
            .sample_format();
        info!(
            "audio device: {} at {} Hz, {} channel(s), {:?}",
            device.name().unwrap_or_else(|_| "?".into()),
            srate,
            channels,
            sample_format
        );
        let (tx, rx) = sync_channel::<Vec<i16>>(QUEUE_BLOCKS);
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, rx)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, rx)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, rx)?,
            other => {
                return Err(OutputError::Device(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|e| OutputError::Device(e.to_string()))?;
        Ok(DeviceSink {
            tx: Some(tx),
            stream,
            channels,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: Receiver<Vec<i16>>,
) -> Result<cpal::Stream, OutputError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let err_fn = |err| error!("audio stream error: {err}");
    let mut pending: Vec<i16> = Vec::new();
    let mut pos = 0usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    if pos >= pending.len() {
                        match rx.recv() {
                            Ok(block) => {
                                pending = block;
                                pos = 0;
                            }
                            // Sender gone: hold silence.
                            Err(_) => {
                                *out = T::from_sample(0.0f32);
                                continue;
                            }
                        }
                    }
                    let s = pending[pos] as f32 / 32768.0;
                    pos += 1;
                    *out = T::from_sample(s);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| OutputError::Device(e.to_string()))
}

impl SampleSink for DeviceSink {
    fn write(&mut self, frames: &[i16]) -> Result<usize, OutputError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| OutputError::Device("device sink closed".into()))?;
        tx.send(frames.to_vec())
            .map_err(|_| OutputError::Device("audio stream stopped".into()))?;
        Ok(frames.len() / self.channels)
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        // Let the callback drain the queue before the stream stops.
        self.tx.take();
        std::thread::sleep(std::time::Duration::from_millis(300));
        self.stream
            .pause()
            .map_err(|e| OutputError::Device(e.to_string()))?;
        Ok(())
    }
}
