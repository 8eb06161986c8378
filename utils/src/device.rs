use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Device;

use crate::audio::downmix;
use crate::capture::{InputDevice, SampleSink};
use crate::error::DeviceError;
use crate::playback::{OutputDevice, RenderSource};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device")),
        Some(target) => host
            .input_devices()?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("No target device found: {}", target)),
    }
}

pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device")),
        Some(target) => host
            .output_devices()?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow::anyhow!("No target device found: {}", target)),
    }
}

fn describe(device: &Device, config: Result<cpal::SupportedStreamConfig, cpal::DefaultStreamConfigError>, default: &Option<String>) -> Option<String> {
    let name = device.name().ok()?;
    let config = config.ok()?;
    let mut line = format!(" * {}({}ch, {}hz)", name, config.channels(), config.sample_rate().0);
    if default.as_deref() == Some(name.as_str()) {
        line.push_str(" [default]");
    }
    Some(line)
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default = host.default_input_device().and_then(|device| device.name().ok());
    let lines: Vec<String> = host
        .input_devices()?
        .filter_map(|device| describe(&device, device.default_input_config(), &default))
        .collect();
    Ok(lines.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default = host.default_output_device().and_then(|device| device.name().ok());
    let lines: Vec<String> = host
        .output_devices()?
        .filter_map(|device| describe(&device, device.default_output_config(), &default))
        .collect();
    Ok(lines.join("\n"))
}

/// A running cpal stream. `cpal::Stream` is not `Send`, so it lives on its
/// own thread until told to stop.
struct StreamThread {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<(Self, u32), DeviceError>
    where
        F: FnOnce() -> Result<(cpal::Stream, u32), DeviceError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;
        let rate = ready_rx
            .recv()
            .map_err(|e| DeviceError::Stream(e.to_string()))??;
        Ok((Self { stop, handle }, rate))
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            tracing::error!("audio stream thread panicked");
        }
    }
}

/// Microphone backed by cpal; samples are downmixed to mono.
pub struct CpalInput {
    device_name: Option<String>,
    stream: Option<StreamThread>,
}

impl CpalInput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name, stream: None }
    }
}

impl InputDevice for CpalInput {
    fn open(&mut self, mut sink: SampleSink) -> Result<u32, DeviceError> {
        self.close();
        let device_name = self.device_name.clone();
        let (stream, rate) = StreamThread::spawn("capture", move || {
            let device = get_or_default_input(device_name).map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            let config: cpal::StreamConfig = device.default_input_config()?.into();
            let channels = config.channels as usize;
            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| sink(&downmix(data, channels)),
                |err| tracing::error!("an error occurred on input stream: {}", err),
                None,
            )?;
            stream.play()?;
            Ok((stream, config.sample_rate.0))
        })?;
        self.stream = Some(stream);
        Ok(rate)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
    }
}

/// Speaker backed by cpal; the mono render is copied to every channel.
pub struct CpalOutput {
    device_name: Option<String>,
    stream: Option<StreamThread>,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name, stream: None }
    }
}

impl OutputDevice for CpalOutput {
    fn open(&mut self, mut source: RenderSource) -> Result<u32, DeviceError> {
        self.close();
        let device_name = self.device_name.clone();
        let (stream, rate) = StreamThread::spawn("playback", move || {
            let device = get_or_default_output(device_name).map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            let config: cpal::StreamConfig = device.default_output_config()?.into();
            let channels = config.channels as usize;
            let mut mono = Vec::new();
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    source(&mut mono);
                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        frame.fill(sample);
                    }
                },
                |err| tracing::error!("an error occurred on output stream: {}", err),
                None,
            )?;
            stream.play()?;
            Ok((stream, config.sample_rate.0))
        })?;
        self.stream = Some(stream);
        Ok(rate)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
