//! Microphone capture.
//!
//! cpal streams are not `Send`, so the device and its callback live on a
//! dedicated thread. The callback pushes device-rate samples into a ring
//! buffer; the thread loop resamples them to 8 kHz, μ-law encodes, and hands
//! 20 ms frames to an async writer that feeds the outgoing RTP track.

use crate::{audio, codec};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use mentor_core::{error::VoiceError, transport::LocalTrack};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use webrtc::{media::Sample, track::track_local::track_local_static_sample::TrackLocalStaticSample};

const FRAME_DURATION: Duration = Duration::from_millis(20);

/// A live microphone capture feeding one local RTP track.
pub(crate) struct MicrophoneTrack {
    id: String,
    stop: Arc<AtomicBool>,
}

impl LocalTrack for MicrophoneTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Opens the default input device and starts the capture pipeline.
///
/// Resolves once the device is delivering audio, or with a
/// [`VoiceError::Permission`] when there is no usable input device.
pub(crate) async fn start_capture(
    id: String,
    rtc_track: Arc<TrackLocalStaticSample>,
) -> Result<MicrophoneTrack, VoiceError> {
    let stop = Arc::new(AtomicBool::new(false));
    let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(64);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

    let thread_stop = stop.clone();
    std::thread::Builder::new()
        .name("mentor-mic-capture".into())
        .spawn(move || capture_thread(thread_stop, frame_tx, ready_tx))
        .map_err(|e| VoiceError::Permission(format!("could not start capture thread: {e}")))?;

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => return Err(VoiceError::Permission(reason)),
        Err(_) => {
            return Err(VoiceError::Permission(
                "capture thread exited during setup".into(),
            ));
        }
    }

    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let sample = Sample {
                data: frame,
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = rtc_track.write_sample(&sample).await {
                debug!(error = %e, "stopping microphone writer");
                break;
            }
        }
    });

    Ok(MicrophoneTrack { id, stop })
}

fn capture_thread(
    stop: Arc<AtomicBool>,
    frames: mpsc::Sender<Bytes>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err("no audio input device".into()));
        return;
    };
    let config = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(format!("input device unusable: {e}")));
            return;
        }
    };
    let channels = config.channels() as usize;
    let device_rate = f64::from(config.sample_rate().0);
    // 20 ms of device audio per resampler chunk.
    let chunk = (device_rate / 50.0) as usize;

    let ring = HeapRb::<f32>::new(chunk * 8);
    let (producer, mut consumer) = ring.split();

    let failed = Arc::new(AtomicBool::new(false));
    let stream = match build_input_stream(&device, &config, channels, producer, failed.clone()) {
        Ok(stream) => stream,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("could not start capture stream: {e}")));
        return;
    }

    let mut resampler = match audio::create_resampler(device_rate, f64::from(codec::SAMPLE_RATE), chunk)
    {
        Ok(resampler) => resampler,
        Err(e) => {
            let _ = ready.send(Err(format!("capture resampler setup failed: {e}")));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut input = vec![0f32; chunk];
    let mut pending: Vec<i16> = Vec::new();
    while !stop.load(Ordering::SeqCst) && !failed.load(Ordering::SeqCst) {
        if consumer.occupied_len() < chunk {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        consumer.pop_slice(&mut input);

        match rubato::Resampler::process(&mut resampler, &[input.as_slice()], None) {
            Ok(mut output) => {
                pending.extend(audio::f32_to_i16(&output.swap_remove(0)));
                while pending.len() >= codec::FRAME_SAMPLES {
                    let frame: Vec<i16> = pending.drain(..codec::FRAME_SAMPLES).collect();
                    let encoded = codec::encode_ulaw_slice(&frame);
                    if frames.blocking_send(Bytes::from(encoded)).is_err() {
                        // Writer is gone; the session ended.
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "resampling failed; dropping capture chunk"),
        }
    }
    drop(stream);
    debug!("microphone capture stopped");
}

fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    channels: usize,
    mut producer: ringbuf::HeapProd<f32>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, String> {
    let stream_config: cpal::StreamConfig = config.config();
    let error_flag = failed.clone();
    let on_error = move |e: cpal::StreamError| {
        warn!(error = %e, "capture stream error");
        error_flag.store(true, Ordering::SeqCst);
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _| {
                producer.push_slice(&audio::downmix_to_mono(data, channels));
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _| {
                let as_f32 = audio::i16_to_f32(data);
                producer.push_slice(&audio::downmix_to_mono(&as_f32, channels));
            },
            on_error,
            None,
        ),
        other => return Err(format!("unsupported capture sample format {other:?}")),
    };
    stream.map_err(|e| format!("could not open capture stream: {e}"))
}
