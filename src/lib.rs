pub mod agent;
pub mod camera;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event_log;
pub mod instructions;
pub mod reconciler;
pub mod services;
pub mod session;
pub mod tools;
pub mod transport;

pub use teddy_realtime_types as types;
pub use teddy_realtime_utils as utils;

pub use client::{Client, Config, ConfigBuilder};
pub use config::SessionConfig;
pub use error::{ArtifactError, ConfigError, DeviceError, SessionError, ToolError, TransportError};
pub use session::{Connection, Recording, Session, SessionBuilder, SessionInput, SessionState, TurnMode};
pub use transport::{Inbound, RealtimeTransport, ServerRx};
