//! Periodic still-image capture feeding the reconciler.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use teddy_realtime_utils::{DeviceError, DeviceGuard, DeviceSlot};
use tokio::process::Command;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::ArtifactError;
use crate::services::{ImageUploader, LocalArtifactStore};
use crate::types::ImageArtifact;

pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(5);

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives each uploaded image.
pub type ImageSink = Box<dyn Fn(ImageArtifact) + Send + Sync + 'static>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSource: Send {
    /// Grabs one JPEG still.
    async fn capture(&mut self) -> Result<Vec<u8>, ArtifactError>;
}

/// Runs an external grabber that writes a JPEG to stdout, e.g.
/// `ffmpeg -f v4l2 -i /dev/video0 -frames:v 1 -f mjpeg -`.
#[derive(Debug, Clone)]
pub struct CommandFrameSource {
    program: String,
    args: Vec<String>,
}

impl CommandFrameSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a shell-like command line on whitespace.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl FrameSource for CommandFrameSource {
    async fn capture(&mut self) -> Result<Vec<u8>, ArtifactError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ArtifactError::Capture(format!("failed to spawn {}: {}", self.program, e)))?;

        let output = tokio::time::timeout(CAPTURE_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ArtifactError::Capture(format!("{} timed out", self.program)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ArtifactError::Capture(format!("{} failed: {}", self.program, stderr.trim())));
        }
        if output.stdout.is_empty() {
            return Err(ArtifactError::Capture(format!("{} produced no image", self.program)));
        }
        Ok(output.stdout)
    }
}

/// The running capture task. Stopping or dropping it aborts the task and
/// releases the camera before returning.
pub struct CaptureLoop {
    task: JoinHandle<()>,
    _camera: DeviceGuard,
}

impl CaptureLoop {
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        slot: &DeviceSlot,
        interval: Duration,
        artifacts: LocalArtifactStore,
        uploader: Option<Arc<dyn ImageUploader>>,
        sink: ImageSink,
    ) -> Result<Self, DeviceError> {
        let camera = slot.acquire()?;
        let sink = Arc::new(sink);
        let task = tokio::spawn(async move {
            let mut uploads = JoinSet::new();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                while uploads.try_join_next().is_some() {}

                let captured_at = Utc::now();
                let jpeg = match source.capture().await {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        tracing::error!("camera capture failed: {}", e);
                        continue;
                    }
                };
                let key = artifacts.save(captured_at, &jpeg);
                tracing::debug!("saved {} ({} bytes)", key, jpeg.len());

                let Some(uploader) = uploader.clone() else { continue };
                let sink = sink.clone();
                uploads.spawn(async move {
                    match uploader.upload(jpeg).await {
                        Ok(Some(url)) => sink(ImageArtifact {
                            url,
                            timestamp: captured_at.timestamp_millis(),
                        }),
                        Ok(None) => tracing::warn!("image upload returned no url"),
                        Err(e) => tracing::error!("image upload failed: {}", e),
                    }
                });
            }
        });
        Ok(Self { task, _camera: camera })
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::upload::MockImageUploader;
    use tokio::sync::mpsc;

    fn channel_sink() -> (ImageSink, mpsc::UnboundedReceiver<ImageArtifact>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(move |image| drop(tx.send(image))), rx)
    }

    fn frames() -> MockFrameSource {
        let mut source = MockFrameSource::new();
        source.expect_capture().returning(|| Ok(vec![0xff, 0xd8, 0xff]));
        source
    }

    #[tokio::test]
    async fn uploaded_frames_reach_the_sink() {
        let mut uploader = MockImageUploader::new();
        uploader
            .expect_upload()
            .returning(|_| Ok(Some("https://img/1.jpg".to_string())));
        let artifacts = LocalArtifactStore::new();
        let (sink, mut images) = channel_sink();
        let slot = DeviceSlot::new("camera");

        let capture = CaptureLoop::spawn(
            Box::new(frames()),
            &slot,
            Duration::from_millis(10),
            artifacts.clone(),
            Some(Arc::new(uploader)),
            sink,
        )
        .unwrap();

        let image = tokio::time::timeout(Duration::from_secs(2), images.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(image.url, "https://img/1.jpg");
        assert!(image.timestamp > 0);
        assert!(!artifacts.is_empty());
        assert!(slot.is_held());

        capture.stop();
        assert!(!slot.is_held());
    }

    #[tokio::test]
    async fn failed_uploads_do_not_stop_the_loop() {
        let mut uploader = MockImageUploader::new();
        let mut calls = 0;
        uploader.expect_upload().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ArtifactError::Response("503".to_string()))
            } else {
                Ok(Some(format!("https://img/{calls}.jpg")))
            }
        });
        let (sink, mut images) = channel_sink();

        let _capture = CaptureLoop::spawn(
            Box::new(frames()),
            &DeviceSlot::new("camera"),
            Duration::from_millis(10),
            LocalArtifactStore::new(),
            Some(Arc::new(uploader)),
            sink,
        )
        .unwrap();

        let image = tokio::time::timeout(Duration::from_secs(2), images.recv())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(image.url, "https://img/1.jpg");
    }

    #[tokio::test]
    async fn camera_is_exclusive() {
        let slot = DeviceSlot::new("camera");
        let (sink, _) = channel_sink();
        let first = CaptureLoop::spawn(
            Box::new(frames()),
            &slot,
            DEFAULT_CAPTURE_INTERVAL,
            LocalArtifactStore::new(),
            None,
            sink,
        )
        .unwrap();

        let (sink, _) = channel_sink();
        let second = CaptureLoop::spawn(
            Box::new(MockFrameSource::new()),
            &slot,
            DEFAULT_CAPTURE_INTERVAL,
            LocalArtifactStore::new(),
            None,
            sink,
        );
        assert!(matches!(second, Err(DeviceError::Busy(_))));

        drop(first);
        assert!(!slot.is_held());
        let (sink, _) = channel_sink();
        let third = CaptureLoop::spawn(
            Box::new(MockFrameSource::new()),
            &slot,
            DEFAULT_CAPTURE_INTERVAL,
            LocalArtifactStore::new(),
            None,
            sink,
        );
        assert!(third.is_ok());
    }

    #[test]
    fn command_line_is_split_into_program_and_args() {
        let source = CommandFrameSource::parse("ffmpeg -i /dev/video0 -frames:v 1").unwrap();
        assert_eq!(source.program, "ffmpeg");
        assert_eq!(source.args, vec!["-i", "/dev/video0", "-frames:v", "1"]);
        assert!(CommandFrameSource::parse("   ").is_none());
    }
}
