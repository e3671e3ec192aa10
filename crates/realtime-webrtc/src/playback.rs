//! Remote-audio playback.
//!
//! The output device lives on its own thread for the same reason capture
//! does. Decoded 8 kHz audio is resampled to the device rate on the pushing
//! side and drained by the output callback through a ring buffer. `clear()`
//! silences the sink without tearing the device down, so one sink outlives
//! any number of sessions.

use crate::{audio, codec};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use mentor_core::{error::VoiceError, transport::PlaybackSink};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use rubato::FastFixedIn;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
    mpsc,
};
use std::time::Duration;
use tracing::{debug, warn};

pub struct CpalPlayback {
    producer: Mutex<ringbuf::HeapProd<f32>>,
    resampler: Mutex<FastFixedIn<f32>>,
    pending: Mutex<Vec<f32>>,
    /// False after `clear()`; the output callback drains and plays silence.
    live: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl CpalPlayback {
    /// Opens the default output device and starts the playback thread.
    pub fn new() -> Result<Arc<Self>, VoiceError> {
        let stop = Arc::new(AtomicBool::new(false));
        let live = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_stop = stop.clone();
        let thread_live = live.clone();
        std::thread::Builder::new()
            .name("mentor-playback".into())
            .spawn(move || playback_thread(thread_stop, thread_live, ready_tx))
            .map_err(|e| VoiceError::Transport(format!("could not start playback thread: {e}")))?;

        let (producer, device_rate) = ready_rx
            .recv()
            .map_err(|_| VoiceError::Transport("playback thread exited during setup".into()))?
            .map_err(VoiceError::Transport)?;

        let resampler =
            audio::create_resampler(f64::from(codec::SAMPLE_RATE), device_rate, codec::FRAME_SAMPLES)
                .map_err(|e| VoiceError::Transport(format!("playback resampler setup failed: {e}")))?;

        Ok(Arc::new(Self {
            producer: Mutex::new(producer),
            resampler: Mutex::new(resampler),
            pending: Mutex::new(Vec::new()),
            live,
            stop,
        }))
    }

    /// Queues decoded 8 kHz mono audio for the speaker.
    pub fn push(&self, pcm: &[i16]) {
        self.live.store(true, Ordering::SeqCst);

        let mut pending = self.pending.lock().unwrap();
        pending.extend(audio::i16_to_f32(pcm));

        while pending.len() >= codec::FRAME_SAMPLES {
            let chunk: Vec<f32> = pending.drain(..codec::FRAME_SAMPLES).collect();
            let mut resampler = self.resampler.lock().unwrap();
            match rubato::Resampler::process(&mut *resampler, &[chunk.as_slice()], None) {
                Ok(mut output) => {
                    self.producer.lock().unwrap().push_slice(&output.swap_remove(0));
                }
                Err(e) => warn!(error = %e, "playback resampling failed; dropping chunk"),
            }
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn clear(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.pending.lock().unwrap().clear();
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

type PlaybackReady = Result<(ringbuf::HeapProd<f32>, f64), String>;

fn playback_thread(stop: Arc<AtomicBool>, live: Arc<AtomicBool>, ready: mpsc::Sender<PlaybackReady>) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err("no audio output device".into()));
        return;
    };
    let config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(format!("output device unusable: {e}")));
            return;
        }
    };
    let channels = config.channels() as usize;
    let device_rate = f64::from(config.sample_rate().0);

    // Two seconds of headroom between the decoder and the speaker.
    let ring = HeapRb::<f32>::new(device_rate as usize * 2);
    let (producer, mut consumer) = ring.split();

    let stream_config: cpal::StreamConfig = config.config();
    let on_error = |e: cpal::StreamError| warn!(error = %e, "playback stream error");

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |out: &mut [f32], _| {
                for frame in out.chunks_exact_mut(channels) {
                    let sample = if live.load(Ordering::SeqCst) {
                        consumer.try_pop().unwrap_or(0.0)
                    } else {
                        // Muted: keep draining so stale audio never resumes.
                        let _ = consumer.try_pop();
                        0.0
                    };
                    frame.fill(sample);
                }
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |out: &mut [i16], _| {
                for frame in out.chunks_exact_mut(channels) {
                    let sample = if live.load(Ordering::SeqCst) {
                        consumer.try_pop().unwrap_or(0.0)
                    } else {
                        let _ = consumer.try_pop();
                        0.0
                    };
                    let value =
                        (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    frame.fill(value);
                }
            },
            on_error,
            None,
        ),
        other => {
            let _ = ready.send(Err(format!("unsupported playback sample format {other:?}")));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(format!("could not open playback stream: {e}")));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("could not start playback stream: {e}")));
        return;
    }
    let _ = ready.send(Ok((producer, device_rate)));

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }
    drop(stream);
    debug!("playback stopped");
}
