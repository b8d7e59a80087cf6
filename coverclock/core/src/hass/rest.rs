//! REST state and picture fetches
//!
//! The orchestrator only sees the [`StateSource`] trait; [`HttpStateSource`]
//! is the Home Assistant implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::error::FetchError;
use super::protocol::EntityState;
use super::url::BaseUrl;

/// Per-request timeout for REST calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const USER_AGENT: &str = concat!("coverclock/", env!("CARGO_PKG_VERSION"));

/// Pull access to entity state and cover art
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Current state snapshot of `entity_id`
    async fn fetch_state(&self, entity_id: &str) -> Result<EntityState, FetchError>;

    /// Raw bytes of the entity's current picture
    async fn fetch_picture(&self, entity_id: &str) -> Result<Vec<u8>, FetchError>;
}

/// [`StateSource`] backed by the Home Assistant REST API
#[derive(Clone)]
pub struct HttpStateSource {
    base_url: BaseUrl,
    token: String,
    http: reqwest::Client,
}

impl fmt::Debug for HttpStateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStateSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpStateSource {
    /// Build a source for `base_url`
    ///
    /// `insecure_tls` disables certificate verification for REST calls only.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: BaseUrl,
        token: impl Into<String>,
        insecure_tls: bool,
    ) -> Result<Self, FetchError> {
        if insecure_tls && base_url.is_secure() {
            tracing::warn!(url = %base_url, "TLS certificate verification disabled for REST calls");
        } else if insecure_tls {
            tracing::debug!(url = %base_url, "Insecure TLS requested for a plain HTTP base URL");
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self {
            base_url,
            token: token.into(),
            http,
        })
    }

    /// URL the picture of `state` is served from
    ///
    /// Falls back to the media player proxy when the entity advertises no
    /// picture.
    #[must_use]
    pub fn picture_url(&self, state: &EntityState) -> String {
        match state.picture_path() {
            Some(path) => self.base_url.join(path),
            None => self.base_url.media_proxy_url(&state.entity_id),
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut request = self.http.get(url);
        // Only our own instance gets the token
        if self.base_url.is_same_origin(url) {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl StateSource for HttpStateSource {
    async fn fetch_state(&self, entity_id: &str) -> Result<EntityState, FetchError> {
        let url = self.base_url.state_url(entity_id);
        let body = self.get_bytes(&url).await?;
        let mut state: EntityState = serde_json::from_slice(&body)?;
        if state.entity_id.is_empty() {
            state.entity_id = entity_id.to_string();
        }
        tracing::debug!(entity_id, state = ?state.state, "Fetched entity state");
        Ok(state)
    }

    async fn fetch_picture(&self, entity_id: &str) -> Result<Vec<u8>, FetchError> {
        let state = self.fetch_state(entity_id).await?;
        let url = self.picture_url(&state);
        let bytes = self.get_bytes(&url).await?;
        tracing::debug!(entity_id, bytes = bytes.len(), "Fetched picture");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 responder: path → (status, body); records request heads
    struct FakeRest {
        base_url: BaseUrl,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRest {
        async fn start(routes: HashMap<String, (u16, Vec<u8>)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        head.extend_from_slice(&buf[..n]);
                    }
                    let head = String::from_utf8_lossy(&head).to_string();
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    log.lock().push(head);

                    let (status, body) = routes.get(&path).cloned().unwrap_or((404, b"nope".to_vec()));
                    let response = format!(
                        "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                }
            });
            Self {
                base_url: BaseUrl::parse(&format!("http://{addr}")).unwrap(),
                requests,
            }
        }

        fn source(&self) -> HttpStateSource {
            HttpStateSource::new(self.base_url.clone(), "rest-token", false).unwrap()
        }
    }

    fn state_body(state: &str, picture: Option<&str>) -> Vec<u8> {
        let mut attributes = serde_json::Map::new();
        if let Some(picture) = picture {
            attributes.insert("entity_picture".into(), json!(picture));
        }
        json!({"entity_id": "media_player.den", "state": state, "attributes": attributes})
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_fetch_state_sends_bearer_token() {
        let server = FakeRest::start(HashMap::from([(
            "/api/states/media_player.den".to_string(),
            (200, state_body("playing", None)),
        )]))
        .await;

        let state = server.source().fetch_state("media_player.den").await.unwrap();
        assert!(state.is_playing());

        let requests = server.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        let head = requests[0].to_ascii_lowercase();
        assert!(head.contains("authorization: bearer rest-token"), "{head}");
        assert!(head.contains("user-agent: coverclock/"), "{head}");
    }

    #[tokio::test]
    async fn test_fetch_picture_follows_entity_picture() {
        let server = FakeRest::start(HashMap::from([
            (
                "/api/states/media_player.den".to_string(),
                (200, state_body("playing", Some("/api/media_player_proxy/den?token=x"))),
            ),
            (
                "/api/media_player_proxy/den?token=x".to_string(),
                (200, b"picture-bytes".to_vec()),
            ),
        ]))
        .await;

        let bytes = server.source().fetch_picture("media_player.den").await.unwrap();
        assert_eq!(bytes, b"picture-bytes");
    }

    #[tokio::test]
    async fn test_fetch_picture_falls_back_to_media_proxy() {
        let server = FakeRest::start(HashMap::from([
            (
                "/api/states/media_player.den".to_string(),
                (200, state_body("playing", None)),
            ),
            (
                "/api/media_player_proxy/media_player.den".to_string(),
                (200, b"proxied".to_vec()),
            ),
        ]))
        .await;

        let bytes = server.source().fetch_picture("media_player.den").await.unwrap();
        assert_eq!(bytes, b"proxied");
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = FakeRest::start(HashMap::new()).await;
        let err = server.source().fetch_state("media_player.den").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }), "{err}");
    }

    #[tokio::test]
    async fn test_malformed_state_is_decode_error() {
        let server = FakeRest::start(HashMap::from([(
            "/api/states/media_player.den".to_string(),
            (200, b"<html>".to_vec()),
        )]))
        .await;
        let err = server.source().fetch_state("media_player.den").await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)), "{err}");
    }

    #[tokio::test]
    async fn test_token_withheld_from_look_alike_port() {
        let foreign = FakeRest::start(HashMap::from([(
            "/cover.jpg".to_string(),
            (200, b"foreign".to_vec()),
        )]))
        .await;

        // Base whose port is a string prefix of the foreign server's port
        let foreign_url = foreign.base_url.as_str().to_string();
        let prefix = &foreign_url[..foreign_url.len() - 1];
        let source =
            HttpStateSource::new(BaseUrl::parse(prefix).unwrap(), "rest-token", false).unwrap();

        let bytes = source
            .get_bytes(&format!("{foreign_url}/cover.jpg"))
            .await
            .unwrap();
        assert_eq!(bytes, b"foreign");

        let requests = foreign.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        let head = requests[0].to_ascii_lowercase();
        assert!(!head.contains("authorization"), "{head}");
    }

    #[test]
    fn test_picture_url_for_absolute_pictures() {
        let source =
            HttpStateSource::new(BaseUrl::parse("http://ha.local").unwrap(), "t", true).unwrap();
        let mut state = EntityState {
            entity_id: "media_player.den".into(),
            ..Default::default()
        };
        assert_eq!(
            source.picture_url(&state),
            "http://ha.local/api/media_player_proxy/media_player.den"
        );
        state
            .attributes
            .insert("entity_picture".into(), json!("https://cdn.example.com/a.jpg"));
        assert_eq!(source.picture_url(&state), "https://cdn.example.com/a.jpg");
    }
}
