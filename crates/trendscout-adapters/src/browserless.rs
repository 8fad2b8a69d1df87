use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use trendscout_core::{INSTAGRAM_EXPLORE_URL, INSTAGRAM_LOGIN_URL};

use crate::{
    absolute_post_url, BrowserOptions, CapturedPage, Credentials, PageError, PageSession,
    HOME_SELECTOR, POST_LINK_SELECTOR,
};

const PRELUDE_JS: &str = include_str!("../scripts/prelude.js");
const LOGIN_JS: &str = include_str!("../scripts/login.js");
const EXPLORE_JS: &str = include_str!("../scripts/explore.js");
const POST_JS: &str = include_str!("../scripts/post.js");

const USERNAME_SELECTORS: &[&str] = &[
    "input[name='username']",
    "input[aria-label='Phone number, username, or email']",
];
const COOKIE_SELECTORS: &[&str] = &[
    "button[data-testid='cookie-banner-accept']",
    "button[id*='cookie']",
];
const COOKIE_LABELS: &[&str] = &[
    "Allow all cookies",
    "Allow essential and optional cookies",
    "Accept",
    "Allow",
];
const POPUP_LABELS: &[&str] = &["Not Now", "Not now"];

#[derive(Debug, Clone)]
pub struct BrowserlessConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub options: BrowserOptions,
    pub timeout: Duration,
}

/// Page session driven through a Browserless `/function` endpoint.
///
/// Every call runs in a fresh browser; the cookies returned by `login` are
/// replayed into each later call so the session stays authenticated.
#[derive(Debug)]
pub struct BrowserlessSession {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    options: BrowserOptions,
    cookies: Mutex<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct LoginOutcome {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    cookies: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct CaptureOutcome {
    url: String,
    html: String,
}

impl BrowserlessSession {
    pub fn new(config: BrowserlessConfig) -> Result<Self, PageError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.filter(|t| !t.trim().is_empty()),
            options: config.options,
            cookies: Mutex::new(Vec::new()),
        })
    }

    fn launch_options(&self) -> JsonValue {
        json!({
            "headless": self.options.headless,
            "args": [
                format!(
                    "--window-size={},{}",
                    self.options.viewport_width, self.options.viewport_height
                ),
                format!("--lang={}", self.options.locale),
            ],
        })
    }

    async fn base_context(&self) -> JsonValue {
        let cookies = self.cookies.lock().await.clone();
        json!({
            "viewport": {
                "width": self.options.viewport_width,
                "height": self.options.viewport_height,
            },
            "locale": self.options.locale,
            "timezone": self.options.timezone,
            "cookies": cookies,
        })
    }

    async fn run<T: DeserializeOwned>(
        &self,
        script: &str,
        extra: JsonValue,
    ) -> Result<T, PageError> {
        let mut context = self.base_context().await;
        if let (Some(base), JsonValue::Object(extra)) = (context.as_object_mut(), extra) {
            base.extend(extra);
        }

        let mut query = vec![("launch", self.launch_options().to_string())];
        if let Some(token) = &self.token {
            query.push(("token", token.clone()));
        }

        let body = json!({
            "code": format!("{PRELUDE_JS}\n{script}"),
            "context": context,
        });

        let resp = self
            .client
            .post(format!("{}/function", self.base_url))
            .query(&query)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::REQUEST_TIMEOUT {
                return Err(PageError::Timeout(message));
            }
            return Err(PageError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| PageError::Script(format!("unexpected script output: {e}")))
    }

    async fn capture(
        &self,
        script: &str,
        url: &str,
        extra: JsonValue,
    ) -> Result<CapturedPage, PageError> {
        let outcome: CaptureOutcome = self.run(script, extra).await.map_err(|err| match err {
            PageError::Api { status, message } => PageError::Navigation {
                url: url.to_string(),
                message: format!("status {status}: {message}"),
            },
            other => other,
        })?;
        debug!(url = %outcome.url, bytes = outcome.html.len(), "page captured");
        Ok(CapturedPage {
            url: outcome.url,
            html: outcome.html,
            captured_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PageSession for BrowserlessSession {
    fn describe(&self) -> String {
        format!("browserless at {}", self.base_url)
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), PageError> {
        info!(username = %credentials.username, "logging in");
        let outcome: LoginOutcome = self
            .run(
                LOGIN_JS,
                json!({
                    "loginUrl": INSTAGRAM_LOGIN_URL,
                    "username": credentials.username,
                    "password": credentials.password,
                    "usernameSelectors": USERNAME_SELECTORS,
                    "cookieSelectors": COOKIE_SELECTORS,
                    "cookieLabels": COOKIE_LABELS,
                    "popupLabels": POPUP_LABELS,
                    "homeSelector": HOME_SELECTOR,
                }),
            )
            .await?;

        if !outcome.ok {
            let reason = outcome.reason.unwrap_or_else(|| "unknown reason".to_string());
            warn!(%reason, "login rejected");
            return Err(PageError::Login(reason));
        }

        info!(cookies = outcome.cookies.len(), "login succeeded");
        *self.cookies.lock().await = outcome.cookies;
        Ok(())
    }

    async fn explore(&self, scroll_count: u32) -> Result<CapturedPage, PageError> {
        info!(scroll_count, "capturing explore page");
        self.capture(
            EXPLORE_JS,
            INSTAGRAM_EXPLORE_URL,
            json!({
                "url": INSTAGRAM_EXPLORE_URL,
                "postLinkSelector": POST_LINK_SELECTOR,
                "scrollCount": scroll_count,
            }),
        )
        .await
    }

    async fn post(&self, post_url: &str) -> Result<CapturedPage, PageError> {
        let url = absolute_post_url(post_url);
        self.capture(POST_JS, &url, json!({ "url": url })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session(server: &MockServer) -> BrowserlessSession {
        BrowserlessSession::new(BrowserlessConfig {
            base_url: server.uri(),
            token: Some("tok".into()),
            options: BrowserOptions::default(),
            timeout: Duration::from_secs(5),
        })
        .expect("session")
    }

    fn creds() -> Credentials {
        Credentials {
            username: "scout".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn login_cookies_are_replayed_into_later_captures() {
        let server = MockServer::start().await;
        let cookie = json!({"name": "sessionid", "value": "abc", "domain": ".instagram.com"});

        Mock::given(method("POST"))
            .and(path("/function"))
            .and(query_param("token", "tok"))
            .and(body_partial_json(json!({"context": {"username": "scout"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "cookies": [cookie.clone()]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/function"))
            .and(body_partial_json(json!({
                "context": {"scrollCount": 2, "cookies": [cookie], "timezone": "Asia/Kolkata"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://www.instagram.com/explore/",
                "html": "<html></html>"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = session(&server);
        session.login(&creds()).await.expect("login");
        let page = session.explore(2).await.expect("explore");
        assert_eq!(page.url, "https://www.instagram.com/explore/");
        assert_eq!(page.html, "<html></html>");
    }

    #[tokio::test]
    async fn rejected_login_reports_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/function"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false,
                "reason": "home icon did not appear after submit",
                "cookies": []
            })))
            .mount(&server)
            .await;

        let err = session(&server).login(&creds()).await.unwrap_err();
        assert!(matches!(err, PageError::Login(ref r) if r.contains("home icon")));
    }

    #[tokio::test]
    async fn failed_post_capture_is_a_navigation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/function"))
            .respond_with(ResponseTemplate::new(500).set_body_string("net::ERR_NAME_NOT_RESOLVED"))
            .mount(&server)
            .await;

        let err = session(&server).post("/p/abc/").await.unwrap_err();
        match err {
            PageError::Navigation { url, message } => {
                assert_eq!(url, "https://www.instagram.com/p/abc/");
                assert!(message.contains("ERR_NAME_NOT_RESOLVED"));
            }
            other => panic!("expected navigation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_timeout_status_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/function"))
            .respond_with(ResponseTemplate::new(408).set_body_string("Timed out"))
            .mount(&server)
            .await;

        let err = session(&server).explore(1).await.unwrap_err();
        assert!(matches!(err, PageError::Timeout(_)));
    }
}
