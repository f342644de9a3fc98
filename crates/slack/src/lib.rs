use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use songstatus_core::PresenceConfig;
use songstatus_engine::{PresenceApi, PresenceStatus};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("songstatus/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("no Slack token configured")]
    MissingToken,
    #[error("invalid Slack API base url `{url}`: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack api error: {0}")]
    Api(String),
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Profile {
    #[serde(default)]
    status_text: String,
    #[serde(default)]
    status_emoji: String,
    #[serde(default)]
    status_expiration: i64,
}

#[derive(Debug, Serialize)]
struct ProfileUpdate<'a> {
    profile: &'a Profile,
}

/// Slack user status over `users.profile.get` / `users.profile.set`.
pub struct SlackPresenceClient {
    http: reqwest::Client,
    api_base: Url,
    token: String,
    max_text_len: usize,
}

impl SlackPresenceClient {
    pub fn from_config(cfg: &PresenceConfig) -> Result<Self, SlackError> {
        let token = cfg
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(SlackError::MissingToken)?
            .to_string();

        let mut base = cfg.api_base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let api_base = Url::parse(&base).map_err(|source| SlackError::InvalidBaseUrl {
            url: cfg.api_base.clone(),
            source,
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            api_base,
            token,
            max_text_len: cfg.max_text_len,
        })
    }

    fn endpoint(&self, method: &str) -> Result<Url, SlackError> {
        self.api_base
            .join(method)
            .map_err(|source| SlackError::InvalidBaseUrl {
                url: self.api_base.to_string(),
                source,
            })
    }

    async fn get_profile(&self) -> Result<Profile, SlackError> {
        let resp = self
            .http
            .get(self.endpoint("users.profile.get")?)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;

        let body: ApiResponse = resp.json().await?;
        check_ok(&body)?;
        Ok(body.profile.unwrap_or_default())
    }

    async fn set_profile(&self, profile: &Profile) -> Result<(), SlackError> {
        let resp = self
            .http
            .post(self.endpoint("users.profile.set")?)
            .bearer_auth(&self.token)
            .json(&ProfileUpdate { profile })
            .send()
            .await?
            .error_for_status()?;

        let body: ApiResponse = resp.json().await?;
        check_ok(&body)
    }
}

#[async_trait]
impl PresenceApi for SlackPresenceClient {
    async fn read(&self) -> anyhow::Result<PresenceStatus> {
        let profile = self.get_profile().await?;
        Ok(PresenceStatus {
            text: profile.status_text,
            emoji: profile.status_emoji,
            expires_at: (profile.status_expiration > 0).then_some(profile.status_expiration),
        })
    }

    async fn write(&self, text: &str, emoji: &str, ttl: Duration) -> anyhow::Result<()> {
        let profile = Profile {
            status_text: truncate_chars(text, self.max_text_len),
            status_emoji: emoji.to_string(),
            status_expiration: expiration_after(SystemTime::now(), ttl),
        };
        debug!(text = %profile.status_text, emoji, "setting slack status");
        self.set_profile(&profile).await?;
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        debug!("clearing slack status");
        self.set_profile(&Profile::default()).await?;
        Ok(())
    }
}

fn check_ok(body: &ApiResponse) -> Result<(), SlackError> {
    if body.ok {
        Ok(())
    } else {
        Err(SlackError::Api(
            body.error.clone().unwrap_or_else(|| "unknown_error".to_string()),
        ))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn expiration_after(now: SystemTime, ttl: Duration) -> i64 {
    let now = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    (now + ttl.as_secs()) as i64
}

#[cfg(test)]
mod tests {
    use super::{expiration_after, truncate_chars, SlackError, SlackPresenceClient};
    use serde_json::json;
    use songstatus_core::PresenceConfig;
    use songstatus_engine::PresenceApi;
    use std::time::{Duration, SystemTime};
    use wiremock::matchers::{body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SlackPresenceClient {
        SlackPresenceClient::from_config(&PresenceConfig {
            api_base: format!("{}/api", server.uri()),
            token: Some("xoxp-test".to_string()),
            max_text_len: 10,
            ..PresenceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn requires_a_token() {
        let err = SlackPresenceClient::from_config(&PresenceConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SlackError::MissingToken));

        let blank = PresenceConfig {
            token: Some("  ".to_string()),
            ..PresenceConfig::default()
        };
        assert!(SlackPresenceClient::from_config(&blank).is_err());
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(truncate_chars("Motörhead - Ace", 9), "Motörhead");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn expiration_is_now_plus_ttl() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(expiration_after(now, Duration::from_secs(600)), 1_600);
    }

    #[tokio::test]
    async fn reads_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users.profile.get"))
            .and(header("authorization", "Bearer xoxp-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "profile": {
                    "status_text": "In a meeting",
                    "status_emoji": ":spiral_calendar_pad:",
                    "status_expiration": 0
                }
            })))
            .mount(&server)
            .await;

        let status = client_for(&server).read().await.unwrap();
        assert_eq!(status.text, "In a meeting");
        assert_eq!(status.emoji, ":spiral_calendar_pad:");
        assert_eq!(status.expires_at, None);
    }

    #[tokio::test]
    async fn writes_truncated_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users.profile.set"))
            .and(header("authorization", "Bearer xoxp-test"))
            .and(body_partial_json(json!({
                "profile": { "status_text": "Get Lucky ", "status_emoji": ":musical_note:" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .write("Get Lucky - Daft Punk", ":musical_note:", Duration::from_secs(600))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clears_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users.profile.set"))
            .and(body_json(json!({
                "profile": { "status_text": "", "status_emoji": "", "status_expiration": 0 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).clear().await.unwrap();
    }

    #[tokio::test]
    async fn api_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users.profile.get"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "invalid_auth" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/users.profile.set"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let read = client.read().await.unwrap_err();
        assert!(read.to_string().contains("invalid_auth"));

        let write = client
            .write("x", ":musical_note:", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(
            write.downcast_ref::<SlackError>(),
            Some(SlackError::Http(_))
        ));
    }
}
