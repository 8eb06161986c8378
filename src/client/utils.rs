use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::client::config::Config;
use crate::client::consts::{AUTHORIZATION_HEADER, OPENAI_BETA_HEADER};

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    if let Some(relay_url) = config.relay_url() {
        return relay_url.into_client_request();
    }
    let mut request = format!("{}/realtime?model={}", config.base_url(), config.model()).into_client_request()?;
    request.headers_mut().insert(
        AUTHORIZATION_HEADER,
        format!("Bearer {}", config.api_key().expose_secret()).as_str().parse()?,
    );
    request.headers_mut().insert(OPENAI_BETA_HEADER, "realtime=v1".parse()?);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_request_carries_auth_and_model() {
        let config = Config::builder().with_api_key("sk-test").with_model("gpt-test").build();
        let request = build_request(&config).unwrap();
        assert_eq!(request.uri().to_string(), "wss://api.openai.com/v1/realtime?model=gpt-test");
        assert_eq!(request.headers()[AUTHORIZATION_HEADER], "Bearer sk-test");
        assert_eq!(request.headers()[OPENAI_BETA_HEADER], "realtime=v1");
    }

    #[test]
    fn relay_request_has_no_key() {
        let config = Config::builder().with_api_key("sk-test").with_relay_url("ws://localhost:8081").build();
        let request = build_request(&config).unwrap();
        assert_eq!(request.uri().host(), Some("localhost"));
        assert!(request.headers().get(AUTHORIZATION_HEADER).is_none());
    }
}
