//! Microphone capture as a sequence of fixed-size 24 kHz PCM16 frames.

use std::sync::{Arc, Mutex};

use rubato::{FastFixedIn, Resampler};

use crate::audio::{create_resampler, to_pcm16, REALTIME_API_PCM16_SAMPLE_RATE};
use crate::error::DeviceError;
use crate::slot::{DeviceGuard, DeviceSlot};

/// 100 ms at 24 kHz.
pub const FRAME_SAMPLES: usize = 2400;

const RESAMPLER_CHUNK: usize = 480;

/// Receives mono f32 samples at the device rate.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Receives one PCM16 frame at a time.
pub type FrameSink = Box<dyn FnMut(Vec<i16>) + Send + 'static>;

/// A microphone-like source. `open` starts delivering mono samples to `sink`
/// and returns the device sample rate.
pub trait InputDevice: Send {
    fn open(&mut self, sink: SampleSink) -> Result<u32, DeviceError>;
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Ended,
    Paused,
    Recording,
}

struct Framer {
    resampler: Option<FastFixedIn<f32>>,
    pending_in: Vec<f32>,
    pending_out: Vec<i16>,
    consumer: Option<FrameSink>,
}

impl Framer {
    fn new() -> Self {
        Self {
            resampler: None,
            pending_in: Vec::new(),
            pending_out: Vec::with_capacity(FRAME_SAMPLES),
            consumer: None,
        }
    }

    fn push(&mut self, samples: &[f32]) {
        if self.consumer.is_none() {
            return;
        }
        match self.resampler.as_mut() {
            None => self.pending_out.extend(to_pcm16(samples)),
            Some(resampler) => {
                self.pending_in.extend_from_slice(samples);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending_in.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = self.pending_in.drain(..needed).collect();
                    match resampler.process(std::slice::from_ref(&chunk), None) {
                        Ok(out) => self.pending_out.extend(to_pcm16(&out[0])),
                        Err(e) => tracing::error!("capture resampling failed: {}", e),
                    }
                }
            }
        }
        while self.pending_out.len() >= FRAME_SAMPLES {
            let frame: Vec<i16> = self.pending_out.drain(..FRAME_SAMPLES).collect();
            if let Some(consumer) = self.consumer.as_mut() {
                consumer(frame);
            }
        }
    }

    /// Delivers the partial frame, if any, and detaches the consumer.
    fn flush(&mut self) {
        let rest = std::mem::take(&mut self.pending_out);
        self.pending_in.clear();
        if let Some(mut consumer) = self.consumer.take() {
            if !rest.is_empty() {
                consumer(rest);
            }
        }
    }
}

pub struct CaptureChannel {
    device: Box<dyn InputDevice>,
    slot: DeviceSlot,
    guard: Option<DeviceGuard>,
    framer: Arc<Mutex<Framer>>,
    status: CaptureStatus,
}

impl CaptureChannel {
    pub fn new(device: Box<dyn InputDevice>, slot: DeviceSlot) -> Self {
        Self {
            device,
            slot,
            guard: None,
            framer: Arc::new(Mutex::new(Framer::new())),
            status: CaptureStatus::Ended,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    /// Acquires and opens the device. No-op while already begun.
    pub fn begin(&mut self) -> Result<(), DeviceError> {
        if self.guard.is_some() {
            return Ok(());
        }
        let guard = self.slot.acquire()?;
        let framer = self.framer.clone();
        let sink: SampleSink = Box::new(move |samples| {
            if let Ok(mut framer) = framer.lock() {
                framer.push(samples);
            }
        });
        let rate = self.device.open(sink)?;
        let resampler = if rate as f64 == REALTIME_API_PCM16_SAMPLE_RATE {
            None
        } else {
            match create_resampler(rate as f64, REALTIME_API_PCM16_SAMPLE_RATE, RESAMPLER_CHUNK) {
                Ok(resampler) => Some(resampler),
                Err(e) => {
                    self.device.close();
                    return Err(DeviceError::Resampler(e.to_string()));
                }
            }
        };
        if let Ok(mut framer) = self.framer.lock() {
            *framer = Framer::new();
            framer.resampler = resampler;
        }
        tracing::debug!("capture opened at {} Hz", rate);
        self.guard = Some(guard);
        self.status = CaptureStatus::Paused;
        Ok(())
    }

    /// Starts delivering frames to `consumer`.
    pub fn record(&mut self, consumer: FrameSink) -> Result<(), DeviceError> {
        if self.guard.is_none() {
            return Err(DeviceError::NotOpen);
        }
        if let Ok(mut framer) = self.framer.lock() {
            framer.flush();
            framer.consumer = Some(consumer);
        }
        self.status = CaptureStatus::Recording;
        Ok(())
    }

    /// Stops delivering frames; the trailing partial frame is flushed to the consumer.
    pub fn pause(&mut self) {
        if let Ok(mut framer) = self.framer.lock() {
            framer.flush();
        }
        if self.status == CaptureStatus::Recording {
            self.status = CaptureStatus::Paused;
        }
    }

    /// Closes the device and releases the slot.
    pub fn end(&mut self) {
        self.pause();
        if self.guard.take().is_some() {
            self.device.close();
            tracing::debug!("capture closed");
        }
        self.status = CaptureStatus::Ended;
    }
}

impl Drop for CaptureChannel {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Hands the sink back to the test so it can inject samples.
    struct FakeMic {
        rate: u32,
        sinks: mpsc::Sender<SampleSink>,
        closed: Arc<Mutex<u32>>,
    }

    impl InputDevice for FakeMic {
        fn open(&mut self, sink: SampleSink) -> Result<u32, DeviceError> {
            self.sinks.send(sink).map_err(|e| DeviceError::Stream(e.to_string()))?;
            Ok(self.rate)
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() += 1;
        }
    }

    fn channel(rate: u32, slot: DeviceSlot) -> (CaptureChannel, mpsc::Receiver<SampleSink>, Arc<Mutex<u32>>) {
        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(Mutex::new(0));
        let mic = FakeMic { rate, sinks: tx, closed: closed.clone() };
        (CaptureChannel::new(Box::new(mic), slot), rx, closed)
    }

    fn collector() -> (FrameSink, Arc<Mutex<Vec<Vec<i16>>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink_frames = frames.clone();
        (Box::new(move |frame| sink_frames.lock().unwrap().push(frame)), frames)
    }

    #[test]
    fn frames_are_fixed_size_and_pause_flushes_the_rest() {
        let (mut capture, sinks, _) = channel(24_000, DeviceSlot::new("microphone"));
        capture.begin().unwrap();
        let mut sink = sinks.recv().unwrap();

        sink(&vec![0.1; 1000]);
        let (consumer, frames) = collector();
        capture.record(consumer).unwrap();
        assert_eq!(capture.status(), CaptureStatus::Recording);

        sink(&vec![0.1; 2000]);
        assert!(frames.lock().unwrap().is_empty());
        sink(&vec![0.1; 3000]);
        assert_eq!(frames.lock().unwrap().len(), 2);
        assert!(frames.lock().unwrap().iter().all(|f| f.len() == FRAME_SAMPLES));

        sink(&vec![0.1; 100]);
        capture.pause();
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].len(), 5000 + 100 - 2 * FRAME_SAMPLES);
        assert_eq!(capture.status(), CaptureStatus::Paused);
    }

    #[test]
    fn samples_are_dropped_after_pause() {
        let (mut capture, sinks, _) = channel(24_000, DeviceSlot::new("microphone"));
        capture.begin().unwrap();
        let mut sink = sinks.recv().unwrap();
        let (consumer, frames) = collector();
        capture.record(consumer).unwrap();
        capture.pause();
        sink(&vec![0.5; FRAME_SAMPLES * 2]);
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn device_rate_is_converted_to_24k() {
        let (mut capture, sinks, _) = channel(48_000, DeviceSlot::new("microphone"));
        capture.begin().unwrap();
        let mut sink = sinks.recv().unwrap();
        let (consumer, frames) = collector();
        capture.record(consumer).unwrap();
        for _ in 0..20 {
            sink(&vec![0.0; 4800]);
        }
        let count = frames.lock().unwrap().len();
        assert!((19..=20).contains(&count), "got {count} frames");
    }

    #[test]
    fn end_releases_the_slot_and_begin_is_idempotent() {
        let slot = DeviceSlot::new("microphone");
        let (mut first, _sinks, closed) = channel(24_000, slot.clone());
        let (mut second, _other, _) = channel(24_000, slot.clone());

        first.begin().unwrap();
        first.begin().unwrap();
        assert!(matches!(second.begin(), Err(DeviceError::Busy(_))));

        first.end();
        assert_eq!(*closed.lock().unwrap(), 1);
        assert!(second.begin().is_ok());
        drop(second);
        assert!(!slot.is_held());
    }

    #[test]
    fn record_requires_begin() {
        let (mut capture, _sinks, _) = channel(24_000, DeviceSlot::new("microphone"));
        let (consumer, _) = collector();
        assert!(matches!(capture.record(consumer), Err(DeviceError::NotOpen)));
    }
}
