//! Reddit OAuth implementation of the `PostSource` port.

pub mod listing;

use std::num::NonZeroU32;
use std::thread;
use std::time::{Duration, Instant};

use collector_core::domain::Sort;
use collector_core::error::SourceError;
use collector_core::ports::{Page, PageRequest, PostSource};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

pub const DEFAULT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";

/// Reddit's budget window is ten minutes; longer reset hints are not trusted.
const MAX_BUDGET_PAUSE: Duration = Duration::from_secs(600);

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Script application credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub credentials: Credentials,
    /// Client-side pacing. Reddit allows 100 per minute for OAuth clients.
    pub requests_per_minute: u32,
    pub timeout: Duration,
    pub auth_url: String,
    pub api_base: String,
}

impl RedditConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            requests_per_minute: 60,
            timeout: Duration::from_secs(30),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// One authenticated API session, owned by the collector for a run.
pub struct RedditSession {
    http: Client,
    config: RedditConfig,
    token: Option<AccessToken>,
    limiter: DirectRateLimiter,
    /// Set when upstream reports an empty request budget.
    pause_until: Option<Instant>,
}

impl RedditSession {
    pub fn new(config: RedditConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .user_agent(config.credentials.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|err| SourceError::Upstream(format!("could not build HTTP client: {err}")))?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(rpm));

        Ok(Self {
            http,
            config,
            token: None,
            limiter,
            pause_until: None,
        })
    }

    /// Waits for the local quota and for any pause upstream asked for.
    fn pace(&mut self) {
        if let Some(until) = self.pause_until.take() {
            let now = Instant::now();
            if until > now {
                debug!(wait_ms = (until - now).as_millis() as u64, "upstream budget exhausted, pausing");
                thread::sleep(until - now);
            }
        }
        while let Err(not_until) = self.limiter.check() {
            thread::sleep(not_until.wait_time_from(DefaultClock::default().now()));
        }
    }

    fn token_is_fresh(&self) -> bool {
        self.token
            .as_ref()
            .map(|token| token.expires_at > Instant::now())
            .unwrap_or(false)
    }

    fn request_token(&mut self) -> Result<(), SourceError> {
        self.pace();
        let credentials = &self.config.credentials;
        let response = self
            .http
            .post(&self.config.auth_url)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Authentication(
                    format!("token endpoint returned {status}"),
                ),
                _ => classify_status(status, response.headers(), "access_token"),
            });
        }

        let body = response.text().map_err(transport_error)?;
        let (value, expires_in) = listing::parse_token(&body)?;
        // refresh a minute early so a page request never races expiry
        let lifetime = Duration::from_secs(expires_in.saturating_sub(60).max(1));
        self.token = Some(AccessToken {
            value,
            expires_at: Instant::now() + lifetime,
        });
        info!(expires_in, "obtained access token");
        Ok(())
    }

    fn listing_url(&self, request: &PageRequest<'_>) -> String {
        let mut url = format!(
            "{}/r/{}/{}?limit={}&raw_json=1",
            self.config.api_base.trim_end_matches('/'),
            request.channel,
            request.sort,
            request.limit
        );
        if request.sort == Sort::Top {
            url.push_str("&t=");
            url.push_str(request.time_filter.as_str());
        }
        if let Some(after) = request.after {
            url.push_str("&after=");
            url.push_str(after);
        }
        url
    }

    fn get(&mut self, url: &str) -> Result<Response, SourceError> {
        self.pace();
        let token = self
            .token
            .as_ref()
            .map(|token| token.value.as_str())
            .ok_or_else(|| SourceError::Authentication("no access token".to_string()))?;
        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .map_err(transport_error)
    }

    fn observe_budget(&mut self, headers: &HeaderMap) {
        let remaining = header_f64(headers, "x-ratelimit-remaining");
        let reset = header_secs(headers, "x-ratelimit-reset");
        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            if remaining < 1.0 && !reset.is_zero() {
                self.pause_until = Some(Instant::now() + reset.min(MAX_BUDGET_PAUSE));
            }
        }
    }
}

impl PostSource for RedditSession {
    fn authenticate(&mut self) -> Result<(), SourceError> {
        self.request_token()
    }

    fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Page, SourceError> {
        if !self.token_is_fresh() {
            self.request_token()?;
        }

        let url = self.listing_url(request);
        let mut response = self.get(&url)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(channel = request.channel, "access token rejected, refreshing once");
            self.request_token()?;
            response = self.get(&url)?;
        }
        self.observe_budget(response.headers());

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers(), request.channel));
        }
        let body = response.text().map_err(transport_error)?;
        listing::parse_listing(&body)
    }
}

/// Maps a non-success listing status onto the collector's error taxonomy.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, channel: &str) -> SourceError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::UNAUTHORIZED => {
            SourceError::Authentication(format!("r/{channel} rejected the session ({status})"))
        }
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            SourceError::ChannelUnavailable(format!("r/{channel} returned {status}"))
        }
        StatusCode::REQUEST_TIMEOUT => SourceError::Transient(format!("r/{channel} returned {status}")),
        s if s.is_server_error() => SourceError::Transient(format!("r/{channel} returned {status}")),
        _ => SourceError::Upstream(format!("r/{channel} returned {status}")),
    }
}

/// `Retry-After` when present, otherwise Reddit's own reset counter.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_secs(headers, RETRY_AFTER.as_str()).or_else(|| header_secs(headers, "x-ratelimit-reset"))
}

/// A seconds header as a `Duration`; negative or out-of-range values are ignored.
fn header_secs(headers: &HeaderMap, name: &str) -> Option<Duration> {
    header_f64(headers, name).and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn transport_error(err: reqwest::Error) -> SourceError {
    SourceError::Transient(err.to_string())
}
