//! The conversation session: one owner for transport, devices, the item list
//! and the tools, driven one input at a time.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use teddy_realtime_utils::{
    slot, CaptureChannel, CaptureStatus, DeviceSlot, FrameSink, InputDevice, OutputDevice, PlaybackChannel,
    TrackOffset,
};
use tokio::sync::mpsc;

use crate::agent::RemoteAgent;
use crate::camera::{CaptureLoop, FrameSource, DEFAULT_CAPTURE_INTERVAL};
use crate::conversation::ConversationEvent;
use crate::error::{SessionError, TransportError};
use crate::event_log::{EventLog, EventSource, RealtimeEvent};
use crate::instructions::BASE_INSTRUCTIONS;
use crate::reconciler::{AudioFile, ConversationWithImages, Reconciler};
use crate::services::{ImageUploader, LocalArtifactStore, PersistenceStore, VisionAnalyzer};
use crate::tools::{self, AnalyzeRecentImage, Memory, SetMemory, ToolDispatcher, ToolHandler};
use crate::transport::{Inbound, RealtimeTransport, ServerRx};
use crate::types::audio::{TranscriptionModel, TurnDetection, Voice};
use crate::types::tools::FunctionTool;
use crate::types::{self, ConversationItem, ImageArtifact, ItemKind};

/// Sent as the first user message of every session.
pub const GREETING: &str = "Hello!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    /// Push-to-talk; the client commits each turn.
    Manual,
    /// Server-side voice activity detection decides turns.
    VoiceActivity,
}

impl TurnMode {
    pub fn turn_detection(self) -> Option<TurnDetection> {
        match self {
            TurnMode::Manual => None,
            TurnMode::VoiceActivity => Some(TurnDetection::default()),
        }
    }
}

impl FromStr for TurnMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" | "push_to_talk" => Ok(TurnMode::Manual),
            "vad" | "server_vad" | "voice_activity" => Ok(TurnMode::VoiceActivity),
            other => Err(format!("unknown turn mode: {other}")),
        }
    }
}

/// Whether the microphone is streaming to the server. In voice-activity mode
/// this follows the continuous stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recording {
    Idle,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub connection: Connection,
    pub turn_mode: TurnMode,
    pub recording: Recording,
}

/// Everything that can move the session forward.
#[derive(Debug)]
pub enum SessionInput {
    Server(Inbound),
    Frame(Vec<i16>),
    Decoded { item_id: String, file: AudioFile },
    Image(ImageArtifact),
    ToolSettled { call_id: String, output: Value },
}

pub struct Session {
    agent: RemoteAgent,
    capture: CaptureChannel,
    playback: PlaybackChannel,
    reconciler: Reconciler,
    tools: ToolDispatcher,
    events: EventLog,
    memory: Memory,
    artifacts: LocalArtifactStore,
    store: Option<Arc<dyn PersistenceStore>>,
    uploader: Option<Arc<dyn ImageUploader>>,
    user_id: String,
    state: SessionState,
    terminated: bool,
    server_rx: Option<ServerRx>,
    frames_tx: mpsc::UnboundedSender<Vec<i16>>,
    frames_rx: mpsc::UnboundedReceiver<Vec<i16>>,
    inputs_tx: mpsc::UnboundedSender<SessionInput>,
    inputs_rx: mpsc::UnboundedReceiver<SessionInput>,
    camera: Option<CaptureLoop>,
    camera_slot: DeviceSlot,
    capture_interval: Duration,
    /// Audio length last sent for decoding, per item.
    decoded: HashMap<String, usize>,
}

impl Session {
    pub fn builder(
        transport: Box<dyn RealtimeTransport>,
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
    ) -> SessionBuilder {
        SessionBuilder::new(transport, input, output)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn items(&self) -> &[ConversationWithImages] {
        self.reconciler.entries()
    }

    pub fn events(&self) -> &[RealtimeEvent] {
        self.events.entries()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub fn memory(&self) -> BTreeMap<String, String> {
        self.memory.lock().map(|memory| memory.clone()).unwrap_or_default()
    }

    pub fn config(&self) -> &types::Session {
        self.agent.session()
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.capture.status()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn camera_active(&self) -> bool {
        self.camera.is_some()
    }

    pub fn artifacts(&self) -> &LocalArtifactStore {
        &self.artifacts
    }

    fn is_connected(&self) -> bool {
        self.state.connection == Connection::Connected
    }

    fn sync_recording(&mut self) {
        self.state.recording = match self.capture.status() {
            CaptureStatus::Recording if self.is_connected() => Recording::Recording,
            _ => Recording::Idle,
        };
    }

    fn log_outbound(&mut self) {
        for raw in self.agent.drain_outbound() {
            self.events.record(EventSource::Client, raw);
        }
    }

    /// Logs what was sent; a transport failure tears the session down.
    async fn checked<T>(&mut self, result: Result<T, TransportError>) -> Result<T, SessionError> {
        self.log_outbound();
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::error!("transport failed: {}", e);
                self.teardown().await;
                Err(e.into())
            }
        }
    }

    fn frame_sink(&self) -> FrameSink {
        let frames = self.frames_tx.clone();
        Box::new(move |frame| {
            let _ = frames.send(frame);
        })
    }

    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.terminated {
            return Err(SessionError::Terminated);
        }
        if self.state.connection != Connection::Disconnected {
            return Err(TransportError::AlreadyConnected.into());
        }
        self.agent.validate()?;

        self.state.connection = Connection::Connecting;
        self.events.restart();
        if let Err(e) = self.capture.begin() {
            tracing::error!("microphone unavailable: {}", e);
        }
        if let Err(e) = self.playback.connect() {
            tracing::error!("speaker unavailable: {}", e);
        }

        let result = self.agent.connect().await;
        let server_rx = self.checked(result).await?;
        self.server_rx = Some(server_rx);
        self.state.connection = Connection::Connected;
        tracing::info!("session connected");

        let result = self.agent.send_user_message(GREETING).await;
        let greeting = self.checked(result).await?;
        self.apply(greeting).await?;

        if self.state.turn_mode == TurnMode::VoiceActivity {
            if let Err(e) = self.capture.record(self.frame_sink()) {
                tracing::error!("could not start streaming the microphone: {}", e);
            }
        }
        self.sync_recording();
        Ok(())
    }

    /// Ends the session for good. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if let Some(camera) = self.camera.take() {
            camera.stop();
        }

        let records = self.reconciler.records();
        if let (false, Some(store)) = (records.is_empty(), self.store.clone()) {
            let user_id = self.user_id.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save(&user_id, records).await {
                    tracing::error!("failed to save conversation: {}", e);
                }
            });
        }

        self.events.clear();
        self.reconciler.clear();
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }
        self.decoded.clear();

        self.agent.disconnect().await;
        self.server_rx = None;
        self.capture.end();
        self.playback.close();
        while self.frames_rx.try_recv().is_ok() {}

        self.state.connection = Connection::Disconnected;
        self.state.recording = Recording::Idle;
        tracing::info!("session disconnected");
    }

    /// Pauses the microphone and sends whatever it flushed.
    async fn pause_capture(&mut self) -> Result<(), SessionError> {
        self.capture.pause();
        while let Ok(frame) = self.frames_rx.try_recv() {
            if self.is_connected() {
                let result = self.agent.append_input_audio(&frame).await;
                self.checked(result).await?;
            }
        }
        Ok(())
    }

    pub async fn set_turn_mode(&mut self, mode: TurnMode) -> Result<(), SessionError> {
        if mode == TurnMode::Manual && self.capture.status() == CaptureStatus::Recording {
            self.pause_capture().await?;
        }
        self.state.turn_mode = mode;
        let result = self
            .agent
            .update_session(|session| session.set_turn_detection(mode.turn_detection()))
            .await;
        self.checked(result).await?;
        let streaming = if mode == TurnMode::VoiceActivity && self.is_connected() {
            self.capture.record(self.frame_sink())
        } else {
            Ok(())
        };
        self.sync_recording();
        Ok(streaming?)
    }

    async fn cancel(&mut self, offset: TrackOffset) -> Result<(), SessionError> {
        match self.agent.cancel_response(&offset.track_id, offset.offset).await {
            Err(e @ (TransportError::UnknownItem(_) | TransportError::NotAssistant(_))) => {
                self.log_outbound();
                tracing::error!("{}", e);
                Ok(())
            }
            result => self.checked(result).await,
        }
    }

    pub async fn start_recording(&mut self) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if self.state.turn_mode != TurnMode::Manual {
            return Err(SessionError::NotManual);
        }
        if self.state.recording == Recording::Recording {
            return Ok(());
        }
        if let Some(offset) = self.playback.interrupt() {
            self.cancel(offset).await?;
        }
        self.capture.record(self.frame_sink())?;
        self.sync_recording();
        Ok(())
    }

    pub async fn stop_recording(&mut self) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if self.state.turn_mode != TurnMode::Manual {
            return Err(SessionError::NotManual);
        }
        if self.state.recording == Recording::Idle {
            return Ok(());
        }
        self.pause_capture().await?;
        self.sync_recording();
        let result = self.agent.create_response().await;
        self.checked(result).await
    }

    /// Sends a typed user message and asks for a reply.
    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let result = self.agent.send_user_message(text).await;
        let event = self.checked(result).await?;
        self.apply(event).await
    }

    /// Removes the item here and asks the server to do the same; a failed
    /// request is only logged.
    pub async fn delete_item(&mut self, id: &str) {
        self.reconciler.remove(id);
        let result = self.agent.delete_item(id).await;
        self.log_outbound();
        if let Err(e) = result {
            tracing::error!("could not delete item {}: {}", id, e);
        }
    }

    /// Adds or replaces a tool and pushes the new tool list when connected.
    pub async fn register_tool(
        &mut self,
        definition: FunctionTool,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), SessionError> {
        self.tools.register(definition, handler);
        let definitions = self.tools.definitions();
        let result = self.agent.update_session(|session| session.set_tools(definitions)).await;
        self.checked(result).await
    }

    pub fn start_camera(&mut self, source: Box<dyn FrameSource>) -> Result<(), SessionError> {
        if self.terminated {
            return Err(SessionError::Terminated);
        }
        if self.camera.is_some() {
            return Ok(());
        }
        let inputs = self.inputs_tx.clone();
        let camera = CaptureLoop::spawn(
            source,
            &self.camera_slot,
            self.capture_interval,
            self.artifacts.clone(),
            self.uploader.clone(),
            Box::new(move |image| {
                let _ = inputs.send(SessionInput::Image(image));
            }),
        )?;
        self.camera = Some(camera);
        Ok(())
    }

    pub fn stop_camera(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.stop();
        }
    }

    /// Waits for the next input. `None` once the session has ended.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        if self.terminated {
            return None;
        }
        let Self {
            server_rx,
            frames_rx,
            inputs_rx,
            ..
        } = self;
        let server = async {
            match server_rx.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            inbound = server => Some(SessionInput::Server(inbound.unwrap_or(Inbound::Closed { reason: None }))),
            Some(frame) = frames_rx.recv() => Some(SessionInput::Frame(frame)),
            Some(input) = inputs_rx.recv() => Some(input),
            else => None,
        }
    }

    /// Processes inputs until the session ends. Returns the error that ended it.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        while let Some(input) = self.next_input().await {
            self.handle(input).await?;
        }
        Ok(())
    }

    pub async fn handle(&mut self, input: SessionInput) -> Result<(), SessionError> {
        if self.terminated {
            return Ok(());
        }
        match input {
            SessionInput::Server(Inbound::Event { raw, event }) => {
                self.events.record(EventSource::Server, raw);
                for change in self.agent.process(&event) {
                    self.apply(change).await?;
                }
            }
            SessionInput::Server(Inbound::Closed { reason }) => {
                tracing::warn!("server closed the connection: {:?}", reason);
                self.teardown().await;
                return Err(TransportError::Closed(reason).into());
            }
            SessionInput::Server(Inbound::Failed(e)) => {
                tracing::error!("transport failed: {}", e);
                self.teardown().await;
                return Err(e.into());
            }
            SessionInput::Frame(frame) => {
                if self.is_connected() {
                    let result = self.agent.append_input_audio(&frame).await;
                    self.checked(result).await?;
                }
            }
            SessionInput::Decoded { item_id, file } => {
                if !self.reconciler.attach_audio_file(&item_id, file) {
                    tracing::debug!("dropping decoded audio for removed item {}", item_id);
                }
            }
            SessionInput::Image(image) => self.reconciler.attach(image),
            SessionInput::ToolSettled { call_id, output } => {
                if self.is_connected() {
                    let result = self.agent.send_tool_output(&call_id, &output).await;
                    self.checked(result).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply(&mut self, change: ConversationEvent) -> Result<(), SessionError> {
        match change {
            ConversationEvent::Updated { item, delta } => {
                if let Some(audio) = delta.as_ref().and_then(|delta| delta.audio.as_deref()) {
                    if !self.playback.add_pcm(&item.id, audio) {
                        tracing::debug!("dropped audio for interrupted item {}", item.id);
                    }
                }
                if item.is_completed() && item.is_assistant() {
                    self.playback.finish(&item.id);
                }
                self.decode_if_complete(&item);
                self.reconciler.upsert(item);
            }
            ConversationEvent::Completed { item } => self.dispatch_tool(&item),
            ConversationEvent::Interrupted => {
                if let Some(offset) = self.playback.interrupt() {
                    self.cancel(offset).await?;
                }
            }
            ConversationEvent::Deleted { item_id } => {
                self.reconciler.remove(&item_id);
            }
            ConversationEvent::Error(details) => tracing::error!("realtime error: {}", details),
        }
        Ok(())
    }

    fn decode_if_complete(&mut self, item: &ConversationItem) {
        let Some(samples) = item.formatted.audio.clone() else { return };
        if !item.is_completed() || self.decoded.get(&item.id) == Some(&samples.len()) {
            return;
        }
        self.decoded.insert(item.id.clone(), samples.len());
        let item_id = item.id.clone();
        let inputs = self.inputs_tx.clone();
        tokio::task::spawn_blocking(move || match AudioFile::decode(&samples) {
            Ok(file) => {
                let _ = inputs.send(SessionInput::Decoded { item_id, file });
            }
            Err(e) => tracing::error!("could not decode audio for {}: {}", item_id, e),
        });
    }

    fn dispatch_tool(&self, item: &ConversationItem) {
        if item.kind != ItemKind::FunctionCall {
            return;
        }
        let Some(call) = item.formatted.tool.clone() else { return };
        tracing::debug!("calling tool {} ({})", call.name, call.call_id);
        let handler = self.tools.handler(&call.name);
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            let output = tools::settle(handler, &call.name, &call.arguments).await;
            let _ = inputs.send(SessionInput::ToolSettled {
                call_id: call.call_id,
                output,
            });
        });
    }
}

pub struct SessionBuilder {
    transport: Box<dyn RealtimeTransport>,
    input: Box<dyn InputDevice>,
    output: Box<dyn OutputDevice>,
    instructions: String,
    voice: Voice,
    turn_mode: TurnMode,
    user_id: String,
    store: Option<Arc<dyn PersistenceStore>>,
    uploader: Option<Arc<dyn ImageUploader>>,
    vision: Option<Arc<dyn VisionAnalyzer>>,
    microphone: DeviceSlot,
    camera: DeviceSlot,
    capture_interval: Duration,
}

impl SessionBuilder {
    pub fn new(
        transport: Box<dyn RealtimeTransport>,
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
    ) -> Self {
        Self {
            transport,
            input,
            output,
            instructions: BASE_INSTRUCTIONS.to_string(),
            voice: Voice::Echo,
            turn_mode: TurnMode::Manual,
            user_id: "default".to_string(),
            store: None,
            uploader: None,
            vision: None,
            microphone: slot::microphone(),
            camera: slot::camera(),
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
        }
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_turn_mode(mut self, turn_mode: TurnMode) -> Self {
        self.turn_mode = turn_mode;
        self
    }

    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = user_id.to_string();
        self
    }

    pub fn with_store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ImageUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionAnalyzer>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_microphone_slot(mut self, slot: DeviceSlot) -> Self {
        self.microphone = slot;
        self
    }

    pub fn with_camera_slot(mut self, slot: DeviceSlot) -> Self {
        self.camera = slot;
        self
    }

    pub fn with_capture_interval(mut self, interval: Duration) -> Self {
        self.capture_interval = interval;
        self
    }

    pub fn build(self) -> Session {
        let memory = Memory::default();
        let artifacts = LocalArtifactStore::new();

        let mut tools = ToolDispatcher::new();
        tools.register(SetMemory::definition(), Arc::new(SetMemory::new(memory.clone())));
        tools.register(
            AnalyzeRecentImage::definition(),
            Arc::new(AnalyzeRecentImage::new(artifacts.clone(), self.vision.clone())),
        );

        let config = types::Session::new()
            .with_instructions(&self.instructions)
            .with_voice(self.voice)
            .with_input_audio_transcription_enable(TranscriptionModel::Whisper)
            .with_tools(tools.definitions());
        let config = match self.turn_mode.turn_detection() {
            Some(turn_detection) => config.with_turn_detection_enable(turn_detection),
            None => config.with_turn_detection_disable(),
        }
        .build();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        Session {
            agent: RemoteAgent::new(self.transport, config),
            capture: CaptureChannel::new(self.input, self.microphone),
            playback: PlaybackChannel::new(self.output),
            reconciler: Reconciler::new(),
            tools,
            events: EventLog::new(),
            memory,
            artifacts,
            store: self.store,
            uploader: self.uploader,
            user_id: self.user_id,
            state: SessionState {
                connection: Connection::Disconnected,
                turn_mode: self.turn_mode,
                recording: Recording::Idle,
            },
            terminated: false,
            server_rx: None,
            frames_tx,
            frames_rx,
            inputs_tx,
            inputs_rx,
            camera: None,
            camera_slot: self.camera,
            capture_interval: self.capture_interval,
            decoded: HashMap::new(),
        }
    }
}
