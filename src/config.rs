//! Process-level settings read from the environment (and `.env`).

use std::path::PathBuf;
use std::time::Duration;

use crate::camera::DEFAULT_CAPTURE_INTERVAL;
use crate::client::consts::OPENAI_API_KEY;
use crate::client::Config;
use crate::error::ConfigError;
use crate::services::vision::DEFAULT_VISION_MODEL;
use crate::session::TurnMode;
use crate::types::audio::Voice;

pub const REALTIME_RELAY_URL: &str = "REALTIME_RELAY_URL";
pub const TEDDY_USER_ID: &str = "TEDDY_USER_ID";
pub const TEDDY_VOICE: &str = "TEDDY_VOICE";
pub const TEDDY_TURN_MODE: &str = "TEDDY_TURN_MODE";
pub const TEDDY_CAPTURE_INTERVAL_SECS: &str = "TEDDY_CAPTURE_INTERVAL_SECS";
pub const TEDDY_DATA_DIR: &str = "TEDDY_DATA_DIR";
pub const TEDDY_NG_WORDS_FILE: &str = "TEDDY_NG_WORDS_FILE";
pub const IMAGE_UPLOAD_URL: &str = "IMAGE_UPLOAD_URL";
pub const VISION_MODEL: &str = "VISION_MODEL";

pub const DEFAULT_USER_ID: &str = "default";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const OPENAI_HTTP_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug)]
pub struct SessionConfig {
    pub client: Config,
    pub user_id: String,
    pub voice: Voice,
    pub turn_mode: TurnMode,
    pub capture_interval: Duration,
    pub data_dir: PathBuf,
    pub ng_words_file: Option<PathBuf>,
    pub image_upload_url: Option<String>,
    pub vision_model: String,
}

impl SessionConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv_override().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut client = Config::builder().with_api_key(&var(OPENAI_API_KEY).unwrap_or_default());
        if let Some(relay_url) = var(REALTIME_RELAY_URL) {
            client = client.with_relay_url(&relay_url);
        }
        let client = client.build();
        client.validate()?;

        let voice = var(TEDDY_VOICE)
            .map(|voice| voice.parse::<Voice>())
            .transpose()
            .map_err(|e| match e {})?
            .unwrap_or(Voice::Echo);

        let turn_mode = match var(TEDDY_TURN_MODE) {
            None => TurnMode::Manual,
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: TEDDY_TURN_MODE,
                value,
            })?,
        };

        let capture_interval = match var(TEDDY_CAPTURE_INTERVAL_SECS) {
            None => DEFAULT_CAPTURE_INTERVAL,
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: TEDDY_CAPTURE_INTERVAL_SECS,
                        value,
                    })
                }
            },
        };

        Ok(Self {
            client,
            user_id: var(TEDDY_USER_ID).unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            voice,
            turn_mode,
            capture_interval,
            data_dir: var(TEDDY_DATA_DIR).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()).into(),
            ng_words_file: var(TEDDY_NG_WORDS_FILE).map(PathBuf::from),
            image_upload_url: var(IMAGE_UPLOAD_URL),
            vision_model: var(VISION_MODEL).unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_with_only_a_key() {
        let config = SessionConfig::from_lookup(lookup(&[(OPENAI_API_KEY, "sk-test")])).unwrap();
        assert_eq!(config.user_id, "default");
        assert_eq!(config.voice, Voice::Echo);
        assert_eq!(config.turn_mode, TurnMode::Manual);
        assert_eq!(config.capture_interval, Duration::from_secs(5));
        assert_eq!(config.vision_model, "gpt-4o");
        assert!(config.image_upload_url.is_none());
    }

    #[test]
    fn no_key_and_no_relay_is_rejected() {
        let err = SessionConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential));

        let relayed = SessionConfig::from_lookup(lookup(&[(REALTIME_RELAY_URL, "ws://localhost:8081")])).unwrap();
        assert_eq!(relayed.client.relay_url(), Some("ws://localhost:8081"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SessionConfig::from_lookup(lookup(&[
            (OPENAI_API_KEY, "sk-test"),
            (TEDDY_VOICE, "shimmer"),
            (TEDDY_TURN_MODE, "vad"),
            (TEDDY_CAPTURE_INTERVAL_SECS, "2"),
            (TEDDY_USER_ID, "kid-1"),
        ]))
        .unwrap();
        assert_eq!(config.voice, Voice::Shimmer);
        assert_eq!(config.turn_mode, TurnMode::VoiceActivity);
        assert_eq!(config.capture_interval, Duration::from_secs(2));
        assert_eq!(config.user_id, "kid-1");
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = SessionConfig::from_lookup(lookup(&[(OPENAI_API_KEY, "k"), (TEDDY_CAPTURE_INTERVAL_SECS, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: TEDDY_CAPTURE_INTERVAL_SECS, .. }));

        let err = SessionConfig::from_lookup(lookup(&[(OPENAI_API_KEY, "k"), (TEDDY_TURN_MODE, "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: TEDDY_TURN_MODE, .. }));
    }
}
