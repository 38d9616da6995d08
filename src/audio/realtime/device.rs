//! Sound-card audio for the WebRTC backend, built on `cpal` and `opus`.
//!
//! [`CpalMicrophone`] captures the default input device, downmixes to mono,
//! resamples to 48 kHz and writes 20 ms Opus frames to the session track.
//! [`CpalSpeaker`] decodes the assistant's Opus payloads and plays them on
//! the default output device.
//!
//! `cpal::Stream` is not `Send`, so every stream is opened and dropped on
//! its own thread.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::transport::{AudioSink, LocalAudioTrack, MediaDevices, RemoteAudioStream};
use super::webrtc::{SampleTrackSource, WebRtcAudioTrack};
use crate::audio::types::AudioConstraints;
use crate::error::RealtalkError;

/// Opus clock rate. Both directions are resampled to and from it.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;
/// Samples in one 20 ms mono frame at [`OPUS_SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = 960;

/// 120 ms at 48 kHz, the longest frame libopus decodes.
const MAX_DECODED_SAMPLES: usize = 5_760;
const MAX_PACKET_BYTES: usize = 1_500;
const MAX_PLAYBACK_BACKLOG: usize = OPUS_SAMPLE_RATE as usize * 2;
const CAPTURE_POLL: Duration = Duration::from_millis(100);

/// Linear-interpolating rate converter that carries state across chunks.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    passthrough: bool,
    step: f64,
    position: f64,
    pending: Vec<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            passthrough: from_rate == to_rate,
            step: f64::from(from_rate) / f64::from(to_rate.max(1)),
            position: 0.0,
            pending: Vec::new(),
        }
    }

    /// Convert `input` and append the result to `output`.
    ///
    /// The last input sample is held back until the next call, since it is
    /// the left edge of the next interpolation.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.passthrough {
            output.extend_from_slice(input);
            return;
        }
        self.pending.extend_from_slice(input);
        while self.position + 1.0 < self.pending.len() as f64 {
            let index = self.position as usize;
            let fraction = (self.position - index as f64) as f32;
            let left = self.pending[index];
            let right = self.pending[index + 1];
            output.push(left + (right - left) * fraction);
            self.position += self.step;
        }
        let consumed = (self.position as usize).min(self.pending.len().saturating_sub(1));
        self.pending.drain(..consumed);
        self.position -= consumed as f64;
    }
}

/// Turns mono capture chunks at the device rate into 20 ms PCM16 frames.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    resampler: LinearResampler,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(input_rate: u32) -> Self {
        Self {
            resampler: LinearResampler::new(input_rate, OPUS_SAMPLE_RATE),
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
        }
    }

    /// Feed samples; returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<i16>> {
        self.resampler.process(samples, &mut self.pending);
        let complete = self.pending.len() / FRAME_SAMPLES * FRAME_SAMPLES;
        let frames = self.pending[..complete]
            .chunks(FRAME_SAMPLES)
            .map(|frame| frame.iter().copied().map(to_pcm16).collect())
            .collect();
        self.pending.drain(..complete);
        frames
    }
}

pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

pub fn from_pcm16(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Average interleaved frames down to one channel.
fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.chunks(channels.max(1))
        .map(|frame| {
            frame.iter().map(|&sample| f32::from_sample(sample)).sum::<f32>() / frame.len() as f32
        })
        .collect()
}

/// Write one mono sample to every channel of each output frame; silence on
/// underrun.
fn fill_output<T>(data: &mut [T], channels: usize, backlog: &mut VecDeque<f32>)
where
    T: Sample + FromSample<f32>,
{
    for frame in data.chunks_mut(channels.max(1)) {
        frame.fill(T::from_sample(backlog.pop_front().unwrap_or(0.0)));
    }
}

fn enqueue(backlog: &mut VecDeque<f32>, samples: &[f32]) {
    backlog.extend(samples.iter().copied());
    let overflow = backlog.len().saturating_sub(MAX_PLAYBACK_BACKLOG);
    backlog.drain(..overflow);
}

struct OpusFrameEncoder {
    encoder: opus::Encoder,
    buffer: Vec<u8>,
}

impl OpusFrameEncoder {
    fn new() -> Result<Self, opus::Error> {
        Ok(Self {
            encoder: opus::Encoder::new(
                OPUS_SAMPLE_RATE,
                opus::Channels::Mono,
                opus::Application::Voip,
            )?,
            buffer: vec![0u8; MAX_PACKET_BYTES],
        })
    }

    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, opus::Error> {
        let len = self.encoder.encode(pcm, &mut self.buffer)?;
        Ok(Bytes::copy_from_slice(&self.buffer[..len]))
    }
}

/// Default input device feeding a fresh sample track per session.
///
/// Capture runs until the track is stopped. Echo cancellation and the other
/// [`AudioConstraints`] are left to the platform's audio stack.
#[derive(Default)]
pub struct CpalMicrophone {
    tracks: SampleTrackSource,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaDevices for CpalMicrophone {
    async fn acquire_microphone(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Arc<dyn LocalAudioTrack>, RealtalkError> {
        let track = self.tracks.create_track();
        tracing::debug!(track_id = %track.id(), ?constraints, "Opening default input device");

        let (ready_tx, ready_rx) = oneshot::channel();
        let capture_track = track.clone();
        let runtime = Handle::current();
        thread::Builder::new()
            .name("realtalk-capture".into())
            .spawn(move || run_capture(capture_track, runtime, ready_tx))?;

        let opened = ready_rx
            .await
            .unwrap_or_else(|_| Err("Capture thread exited during setup".into()));
        match opened {
            Ok(()) => Ok(track),
            Err(reason) => {
                track.stop();
                Err(RealtalkError::MediaAcquisition(reason))
            }
        }
    }
}

fn run_capture(
    track: Arc<WebRtcAudioTrack>,
    runtime: Handle,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let (samples_tx, samples_rx) = std_mpsc::channel();
    let opened = open_input(samples_tx).and_then(|(stream, rate)| {
        let encoder = OpusFrameEncoder::new()
            .map_err(|e| format!("Failed to create Opus encoder: {e}"))?;
        Ok((stream, rate, encoder))
    });
    let (_stream, rate, mut encoder) = match opened {
        Ok(opened) => opened,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut frames = FrameAssembler::new(rate);
    while !track.is_stopped() {
        let chunk = match samples_rx.recv_timeout(CAPTURE_POLL) {
            Ok(chunk) => chunk,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };
        for pcm in frames.push(&chunk) {
            let frame = match encoder.encode(&pcm) {
                Ok(frame) => frame,
                Err(error) => {
                    tracing::warn!(%error, "Failed to encode microphone frame");
                    continue;
                }
            };
            if let Err(error) = runtime.block_on(track.write_opus_frame(frame)) {
                tracing::warn!(%error, "Dropping microphone frame");
            }
        }
    }
    tracing::debug!(track_id = %track.id(), "Microphone capture stopped");
}

fn open_input(samples: std_mpsc::Sender<Vec<f32>>) -> Result<(cpal::Stream, u32), String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "No input device available".to_string())?;
    let supported = device
        .default_input_config()
        .map_err(|e| format!("Failed to get default input config: {e}"))?;
    let rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        ?format,
        rate,
        channels = config.channels,
        "Using input device"
    );

    let stream = match format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, samples),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, samples),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, samples),
        other => return Err(format!("Unsupported input sample format: {other:?}")),
    }
    .map_err(|e| format!("Failed to build input stream: {e}"))?;
    stream
        .play()
        .map_err(|e| format!("Failed to start input stream: {e}"))?;
    Ok((stream, rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: std_mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let _ = samples.send(downmix(data, channels));
        },
        |error| tracing::warn!(%error, "Audio input stream error"),
        None,
    )
}

/// Plays remote audio on the default output device.
///
/// Playback of a stream ends when the stream closes. After `detach` it ends
/// at the next packet.
#[derive(Default)]
pub struct CpalSpeaker {
    playback: Mutex<Option<CancellationToken>>,
}

impl CpalSpeaker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for CpalSpeaker {
    fn attach(&self, stream: RemoteAudioStream) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.playback.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        let track_id = stream.track_id.clone();
        let spawned = thread::Builder::new()
            .name("realtalk-playback".into())
            .spawn(move || {
                if let Err(reason) = run_playback(stream, &cancel) {
                    tracing::warn!(%reason, "Remote audio playback unavailable");
                }
            });
        if let Err(error) = spawned {
            tracing::warn!(%track_id, %error, "Failed to start playback thread");
        }
    }

    fn detach(&self) {
        if let Some(cancel) = self.playback.lock().take() {
            cancel.cancel();
        }
    }
}

fn run_playback(mut stream: RemoteAudioStream, cancel: &CancellationToken) -> Result<(), String> {
    let backlog = Arc::new(Mutex::new(VecDeque::with_capacity(MAX_PLAYBACK_BACKLOG)));
    let (_output, rate) = open_output(backlog.clone())?;
    let mut decoder = opus::Decoder::new(OPUS_SAMPLE_RATE, opus::Channels::Mono)
        .map_err(|e| format!("Failed to create Opus decoder: {e}"))?;
    let mut resampler = LinearResampler::new(OPUS_SAMPLE_RATE, rate);
    let mut pcm = vec![0i16; MAX_DECODED_SAMPLES];
    let mut decoded = Vec::with_capacity(MAX_DECODED_SAMPLES);
    let mut resampled = Vec::new();
    tracing::debug!(track_id = %stream.track_id, rate, "Playing remote audio");

    while let Some(packet) = stream.packets.blocking_recv() {
        if cancel.is_cancelled() {
            break;
        }
        let count = match decoder.decode(&packet, &mut pcm, false) {
            Ok(count) => count,
            Err(error) => {
                tracing::debug!(%error, "Dropping undecodable audio packet");
                continue;
            }
        };
        decoded.clear();
        decoded.extend(pcm[..count].iter().copied().map(from_pcm16));
        resampled.clear();
        resampler.process(&decoded, &mut resampled);
        enqueue(&mut backlog.lock(), &resampled);
    }
    tracing::debug!(track_id = %stream.track_id, "Remote audio playback ended");
    Ok(())
}

fn open_output(backlog: Arc<Mutex<VecDeque<f32>>>) -> Result<(cpal::Stream, u32), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "No output device available".to_string())?;
    let supported = device
        .default_output_config()
        .map_err(|e| format!("Failed to get default output config: {e}"))?;
    let rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        ?format,
        rate,
        channels = config.channels,
        "Using output device"
    );

    let stream = match format {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, backlog),
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, backlog),
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, backlog),
        other => return Err(format!("Unsupported output sample format: {other:?}")),
    }
    .map_err(|e| format!("Failed to build output stream: {e}"))?;
    stream
        .play()
        .map_err(|e| format!("Failed to start output stream: {e}"))?;
    Ok((stream, rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    backlog: Arc<Mutex<VecDeque<f32>>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            fill_output(data, channels, &mut backlog.lock());
        },
        |error| tracing::warn!(%error, "Audio output stream error"),
        None,
    )
}
