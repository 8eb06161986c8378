//! Track-keyed PCM playback with sample-exact interruption.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use rubato::{FastFixedOut, Resampler};

use crate::audio::{create_output_resampler, REALTIME_API_PCM16_SAMPLE_RATE};
use crate::error::DeviceError;

const RESAMPLER_CHUNK: usize = 480;

/// Fills a mono buffer at the device rate.
pub type RenderSource = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// A speaker-like sink. `open` starts pulling samples from `source` and
/// returns the device sample rate.
pub trait OutputDevice: Send {
    fn open(&mut self, source: RenderSource) -> Result<u32, DeviceError>;
    fn close(&mut self);
}

/// Position of the interrupted track, in 24 kHz samples rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOffset {
    pub track_id: String,
    pub offset: usize,
}

/// Samples of one track rendered back-to-back starting at queue position `start`.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u64,
    rendered: usize,
    len: usize,
}

#[derive(Debug)]
struct Track {
    id: String,
    samples: VecDeque<i16>,
    rendered: usize,
    /// Set once the item completes; no more chunks will arrive.
    finished: bool,
    /// Broken only by underruns.
    runs: Vec<Run>,
}

impl Track {
    fn advance(&mut self, at: u64) {
        match self.runs.last_mut() {
            Some(run) if run.start + run.len as u64 == at => run.len += 1,
            _ => self.runs.push(Run {
                start: at,
                rendered: self.rendered,
                len: 1,
            }),
        }
        self.rendered += 1;
    }

    /// Samples of this track rendered before queue position `position`.
    fn rendered_at(&self, position: u64) -> usize {
        self.runs
            .iter()
            .rev()
            .find(|run| run.start <= position)
            .map_or(0, |run| run.rendered + (position - run.start).min(run.len as u64) as usize)
    }

    fn is_audible(&self, position: u64) -> bool {
        !self.finished || !self.samples.is_empty() || self.rendered_at(position) < self.rendered
    }
}

/// Queue of tracks rendered back-to-back, counted in source samples.
#[derive(Debug, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
    interrupted: HashSet<String>,
    /// Source samples rendered so far, silence included.
    position: u64,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a chunk. Returns false when the track was interrupted earlier.
    pub fn push(&mut self, track_id: &str, samples: &[i16]) -> bool {
        if self.interrupted.contains(track_id) {
            return false;
        }
        match self.tracks.iter_mut().find(|track| track.id == track_id) {
            Some(track) => track.samples.extend(samples.iter().copied()),
            None => self.tracks.push_back(Track {
                id: track_id.to_string(),
                samples: samples.iter().copied().collect(),
                rendered: 0,
                finished: false,
                runs: Vec::new(),
            }),
        }
        true
    }

    /// Marks the track complete. Once its audio has been heard it is no longer
    /// reported by [`TrackQueue::interrupt`].
    pub fn finish(&mut self, track_id: &str) {
        if let Some(track) = self.tracks.iter_mut().find(|track| track.id == track_id) {
            track.finished = true;
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Renders into `out` as f32, padding with silence. Returns the number of
    /// samples taken from tracks.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            let Some(track) = self.tracks.front_mut() else { break };
            match track.samples.pop_front() {
                Some(sample) => {
                    out[written] = sample as f32 / 32768.0;
                    track.advance(self.position + written as u64);
                    written += 1;
                }
                None if self.tracks.len() > 1 => {
                    self.tracks.pop_front();
                }
                None => break,
            }
        }
        out[written..].fill(0.0);
        self.position += out.len() as u64;
        written
    }

    /// True while any queued sample is left to render.
    pub fn is_playing(&self) -> bool {
        self.tracks.iter().any(|track| !track.samples.is_empty())
    }

    /// Drops everything queued, see [`TrackQueue::interrupt_at`].
    pub fn interrupt(&mut self) -> Option<TrackOffset> {
        self.interrupt_at(self.position)
    }

    /// Drops everything queued and reports the track heard at queue position
    /// `heard` with its samples rendered up to there. A track still streaming
    /// is reported even when its buffer ran dry. All dropped tracks stop
    /// accepting chunks.
    pub fn interrupt_at(&mut self, heard: u64) -> Option<TrackOffset> {
        let current = self
            .tracks
            .iter()
            .find(|track| track.is_audible(heard))
            .map(|track| TrackOffset {
                track_id: track.id.clone(),
                offset: track.rendered_at(heard),
            });
        for track in self.tracks.drain(..) {
            self.interrupted.insert(track.id);
        }
        current
    }
}

struct Renderer {
    queue: TrackQueue,
    resampler: Option<FastFixedOut<f32>>,
    /// Resampled output not yet handed to the device.
    ready: VecDeque<f32>,
    open: bool,
    rate: u32,
    /// Queue position when the device was opened.
    opened_at: u64,
    /// Frames handed to the device since it was opened.
    played: u64,
}

impl Renderer {
    fn fill(&mut self, out: &mut [f32]) {
        if !self.open {
            out.fill(0.0);
            return;
        }
        self.played += out.len() as u64;
        let Some(resampler) = self.resampler.as_mut() else {
            self.queue.render(out);
            return;
        };
        while self.ready.len() < out.len() {
            let mut chunk = vec![0.0; resampler.input_frames_next()];
            self.queue.render(&mut chunk);
            match resampler.process(std::slice::from_ref(&chunk), None) {
                Ok(resampled) => self.ready.extend(resampled[0].iter().copied()),
                Err(e) => {
                    tracing::error!("playback resampling failed: {}", e);
                    break;
                }
            }
        }
        for sample in out.iter_mut() {
            *sample = self.ready.pop_front().unwrap_or(0.0);
        }
    }

    /// Queue position reached by the frames the device has actually played.
    fn heard(&self) -> u64 {
        let rate = u64::from(self.rate.max(1));
        self.opened_at + self.played * REALTIME_API_PCM16_SAMPLE_RATE as u64 / rate
    }

    fn interrupt(&mut self) -> Option<TrackOffset> {
        let heard = self.heard().min(self.queue.position());
        self.ready.clear();
        let offset = self.queue.interrupt_at(heard);
        // Resampled-but-unplayed input is dropped; resume counting from here.
        self.opened_at = self.queue.position();
        self.played = 0;
        offset
    }
}

pub struct PlaybackChannel {
    device: Box<dyn OutputDevice>,
    renderer: Arc<Mutex<Renderer>>,
    connected: bool,
}

impl PlaybackChannel {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            device,
            renderer: Arc::new(Mutex::new(Renderer {
                queue: TrackQueue::new(),
                resampler: None,
                ready: VecDeque::new(),
                open: false,
                rate: REALTIME_API_PCM16_SAMPLE_RATE as u32,
                opened_at: 0,
                played: 0,
            })),
            connected: false,
        }
    }

    /// Opens the output device. No-op while connected.
    pub fn connect(&mut self) -> Result<(), DeviceError> {
        if self.connected {
            return Ok(());
        }
        let renderer = self.renderer.clone();
        let source: RenderSource = Box::new(move |out| match renderer.lock() {
            Ok(mut renderer) => renderer.fill(out),
            Err(_) => out.fill(0.0),
        });
        let rate = self.device.open(source)?;
        let resampler = if rate as f64 == REALTIME_API_PCM16_SAMPLE_RATE {
            None
        } else {
            match create_output_resampler(REALTIME_API_PCM16_SAMPLE_RATE, rate as f64, RESAMPLER_CHUNK) {
                Ok(resampler) => Some(resampler),
                Err(e) => {
                    self.device.close();
                    return Err(DeviceError::Resampler(e.to_string()));
                }
            }
        };
        if let Ok(mut renderer) = self.renderer.lock() {
            renderer.resampler = resampler;
            renderer.ready.clear();
            renderer.rate = rate;
            renderer.opened_at = renderer.queue.position();
            renderer.played = 0;
            renderer.open = true;
        }
        tracing::debug!("playback opened at {} Hz", rate);
        self.connected = true;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Queues 24 kHz PCM16 for `track_id`.
    pub fn add_pcm(&self, track_id: &str, samples: &[i16]) -> bool {
        match self.renderer.lock() {
            Ok(mut renderer) => renderer.queue.push(track_id, samples),
            Err(_) => false,
        }
    }

    /// No more audio will arrive for `track_id`.
    pub fn finish(&self, track_id: &str) {
        if let Ok(mut renderer) = self.renderer.lock() {
            renderer.queue.finish(track_id);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.renderer
            .lock()
            .map(|renderer| renderer.queue.is_playing())
            .unwrap_or(false)
    }

    /// Stops playback immediately, see [`TrackQueue::interrupt`].
    pub fn interrupt(&self) -> Option<TrackOffset> {
        let mut renderer = self.renderer.lock().ok()?;
        let offset = renderer.interrupt();
        if let Some(offset) = &offset {
            tracing::debug!("interrupted track {} at sample {}", offset.track_id, offset.offset);
        }
        offset
    }

    pub fn close(&mut self) {
        self.interrupt();
        if let Ok(mut renderer) = self.renderer.lock() {
            renderer.open = false;
        }
        if self.connected {
            self.device.close();
            self.connected = false;
            tracing::debug!("playback closed");
        }
    }
}

impl Drop for PlaybackChannel {
    fn drop(&mut self) {
        self.close();
    }
}
