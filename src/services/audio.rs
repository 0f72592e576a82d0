// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    orchestration::Engine,
    types::{SampleType, SAMPLE_RATE},
};
use core::fmt::Debug;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, FromSample, Sample as CpalSample, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
};
use crossbeam_channel::{Receiver, Sender};

/// [AudioServiceEvent]s inform clients what's going on.
#[derive(Debug)]
pub enum AudioServiceEvent {
    /// The stream started. Provides the sample rate and channel count.
    Reset(usize, u16),
    /// cpal reported a problem with the running stream.
    StreamError(String),
}

/// Wrapper for cpal structs that implements [core::fmt::Debug].
struct WrappedStream {
    cpal_stream: Stream,

    /// The size, in frames, of a single group of frames in the audio buffer.
    /// https://www.alsa-project.org/wiki/FramesPeriods
    period_size: usize,

    sample_rate: usize,
    channel_count: u16,
}
impl Debug for WrappedStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WrappedStream")
            .field("cpal_stream", &"(skipped)")
            .field("period_size", &self.period_size)
            .field("sample_rate", &self.sample_rate)
            .field("channel_count", &self.channel_count)
            .finish()
    }
}
impl WrappedStream {
    fn new_with(
        engine: Engine,
        period_size: usize,
        sender: &Sender<AudioServiceEvent>,
    ) -> anyhow::Result<Self> {
        let (device, config) = Self::host_device_setup()?;
        let sample_rate = config.sample_rate().0 as usize;
        let channel_count = config.channels();
        let cpal_stream = Self::stream_setup_for(engine, &device, &config, period_size, sender)?;
        cpal_stream.play()?;
        Ok(Self {
            cpal_stream,
            period_size,
            sample_rate,
            channel_count,
        })
    }

    /// Returns the default device and a stream config for it at the engine's
    /// sample rate, if the device can do that rate.
    fn host_device_setup() -> anyhow::Result<(cpal::Device, SupportedStreamConfig)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::Error::msg("Default output device is not available"))?;

        let wanted = cpal::SampleRate(SAMPLE_RATE as u32);
        let config = device
            .supported_output_configs()?
            .find(|c| c.min_sample_rate() <= wanted && wanted <= c.max_sample_rate())
            .map(|c| c.with_sample_rate(wanted));
        let config = match config {
            Some(config) => config,
            None => {
                let config = device.default_output_config()?;
                log::warn!(target: "Audio",
                    "device can't run at {SAMPLE_RATE}Hz, using {}Hz; pitch will be off",
                    config.sample_rate().0
                );
                config
            }
        };
        Ok((device, config))
    }

    /// Creates a Stream for the given device and config that pulls samples
    /// from `engine`. This function is actually a wrapper around the generic
    /// [WrappedStream::stream_make()].
    fn stream_setup_for(
        engine: Engine,
        device: &cpal::Device,
        config: &SupportedStreamConfig,
        period_size: usize,
        sender: &Sender<AudioServiceEvent>,
    ) -> anyhow::Result<Stream> {
        let sample_format = config.sample_format();
        let mut config: StreamConfig = config.clone().into();

        // We set buffer size here, rather than in host_device_setup(), because
        // it's troublesome to create a [cpal::SupportedBufferSize] on the fly.
        config.buffer_size = BufferSize::Fixed(period_size as u32);

        match sample_format {
            cpal::SampleFormat::I8 => Self::stream_make::<i8>(engine, &config, device, sender),
            cpal::SampleFormat::I16 => Self::stream_make::<i16>(engine, &config, device, sender),
            cpal::SampleFormat::I32 => Self::stream_make::<i32>(engine, &config, device, sender),
            cpal::SampleFormat::I64 => Self::stream_make::<i64>(engine, &config, device, sender),
            cpal::SampleFormat::U8 => Self::stream_make::<u8>(engine, &config, device, sender),
            cpal::SampleFormat::U16 => Self::stream_make::<u16>(engine, &config, device, sender),
            cpal::SampleFormat::U32 => Self::stream_make::<u32>(engine, &config, device, sender),
            cpal::SampleFormat::U64 => Self::stream_make::<u64>(engine, &config, device, sender),
            cpal::SampleFormat::F32 => Self::stream_make::<f32>(engine, &config, device, sender),
            cpal::SampleFormat::F64 => Self::stream_make::<f64>(engine, &config, device, sender),
            format => Err(anyhow::anyhow!("unsupported sample format {format:?}")),
        }
    }

    /// Generic portion of stream_setup_for(). The engine moves into the
    /// callback and lives on the audio thread from then on.
    fn stream_make<T>(
        mut engine: Engine,
        config: &StreamConfig,
        device: &cpal::Device,
        sender: &Sender<AudioServiceEvent>,
    ) -> anyhow::Result<Stream>
    where
        T: SizedSample + FromSample<SampleType>,
    {
        let error_sender = sender.clone();
        let err_fn = move |err: cpal::StreamError| {
            log::error!(target: "Audio", "output stream: {err}");
            let _ = error_sender.try_send(AudioServiceEvent::StreamError(err.to_string()));
        };

        let channel_count = config.channels as usize;
        let mut scratch: Vec<SampleType> = Vec::new();
        let stream = device.build_output_stream(
            config,
            move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
                Self::on_window(output, channel_count, &mut engine, &mut scratch)
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }

    /// cpal callback that asks the engine for exactly one window of samples,
    /// converting them if needed to the stream's expected data type.
    fn on_window<T>(
        output: &mut [T],
        channel_count: usize,
        engine: &mut Engine,
        scratch: &mut Vec<SampleType>,
    ) where
        T: CpalSample + FromSample<SampleType>,
    {
        let num_frames = output.len() / channel_count.max(1);
        // Only allocates when a window is bigger than any before it.
        if scratch.len() < output.len() {
            scratch.resize(output.len(), 0.0);
        }
        let scratch = &mut scratch[..output.len()];
        engine.fill(scratch, num_frames, channel_count);
        for (out, sample) in output.iter_mut().zip(scratch.iter()) {
            *out = T::from_sample(*sample);
        }
    }
}

/// [AudioService] drives an [Engine] from the default cpal output device.
/// The engine renders inside the device callback, so there is no buffering
/// beyond what the device itself does.
#[derive(Debug)]
pub struct AudioService {
    events: Receiver<AudioServiceEvent>,

    stream: WrappedStream,
}
impl AudioService {
    /// This value is on the upper edge of perceptible latency for 44.1KHz (512
    /// / 44100 = 11.6 milliseconds).
    pub const SUGGESTED_PERIOD_SIZE: usize = 512;

    /// Opens the default output device and starts playing `engine` with
    /// callbacks of `period_size` frames.
    pub fn new_with(engine: Engine, period_size: usize) -> anyhow::Result<Self> {
        let (sender, events) = crossbeam_channel::unbounded();
        let stream = WrappedStream::new_with(engine, period_size, &sender)?;
        log::info!(target: "Audio",
            "stream started: {}Hz, {} channels, {} frames per period",
            stream.sample_rate,
            stream.channel_count,
            stream.period_size
        );
        let _ = sender.send(AudioServiceEvent::Reset(
            stream.sample_rate,
            stream.channel_count,
        ));
        Ok(Self { events, stream })
    }

    /// Listen here for [AudioServiceEvent]s.
    pub fn events(&self) -> &Receiver<AudioServiceEvent> {
        &self.events
    }

    #[allow(missing_docs)]
    pub fn sample_rate(&self) -> usize {
        self.stream.sample_rate
    }

    #[allow(missing_docs)]
    pub fn channel_count(&self) -> u16 {
        self.stream.channel_count
    }

    /// Stops pulling samples from the engine. Dropping the service does the
    /// same.
    pub fn pause(&self) -> anyhow::Result<()> {
        self.stream.cpal_stream.pause()?;
        Ok(())
    }

    /// Undoes [AudioService::pause()].
    pub fn resume(&self) -> anyhow::Result<()> {
        self.stream.cpal_stream.play()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_fills_every_channel() {
        let mut engine = Engine::default();
        let handle = engine.handle();
        handle.set_instrument_note(crate::types::InstrumentId::DrumMachine, 49, 1.0);

        let mut output = vec![0.0f32; 256 * 2];
        let mut scratch = Vec::new();
        WrappedStream::on_window(&mut output, 2, &mut engine, &mut scratch);
        assert_eq!(scratch.len(), output.len());
        for frame in output.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(output.iter().any(|s| *s != 0.0), "a struck drum should be audible");
    }
}
