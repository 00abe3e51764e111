use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use lektor_config::{Config, USERNAME_COOKIE_VAR};
use lektor_model::{LectureId, LectureMetadata, ProbeStatus};
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// Maps lecture ids onto the upstream portal: cheap reachability probes for
/// the scheduler and full page resolution for the pipeline.
#[async_trait]
pub trait LectureResolver: Send + Sync {
    /// Reachability of the lecture page. Transport failures map to
    /// [`ProbeStatus::Unreachable`] rather than an error; the scheduler
    /// treats both the same way.
    async fn probe(&self, id: LectureId) -> ProbeStatus;

    /// Fetch the lecture page once and extract the media url plus whatever
    /// metadata the info box offers.
    async fn resolve(&self, id: LectureId) -> Result<ResolvedLecture>;
}

/// Everything a single page fetch yields.
#[derive(Debug, Clone)]
pub struct ResolvedLecture {
    pub media_url: String,
    pub metadata: LectureMetadata,
    /// The lecture page itself, persisted alongside the metadata.
    pub page_url: String,
}

/// Resolver for the tele-task portal.
///
/// The session cookie is read through [`Config::session_cookie`] on every
/// request, so a rotated credential takes effect without a restart — in
/// particular right after a 401.
pub struct TeletaskResolver {
    client: reqwest::Client,
    config: Arc<Config>,
}

impl std::fmt::Debug for TeletaskResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeletaskResolver")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl TeletaskResolver {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    fn page_url(&self, id: LectureId) -> String {
        format!("{}{}", self.config.base_url, id)
    }

    async fn fetch_page(&self, id: LectureId) -> reqwest::Result<reqwest::Response> {
        let url = self.page_url(id);
        debug!(%id, %url, "requesting lecture page");
        let mut request = self.client.get(&url);
        if let Some(cookie) = self.config.session_cookie() {
            request = request
                .header(reqwest::header::COOKIE, format!("username={cookie}"));
        }
        request.send().await
    }
}

#[async_trait]
impl LectureResolver for TeletaskResolver {
    async fn probe(&self, id: LectureId) -> ProbeStatus {
        match self.fetch_page(id).await {
            Ok(response) => match response.status() {
                StatusCode::OK => ProbeStatus::Available,
                StatusCode::NOT_FOUND => {
                    debug!(%id, "404, not available yet");
                    ProbeStatus::NotFound
                }
                StatusCode::UNAUTHORIZED => {
                    // The next fetch_page re-reads the cookie from the
                    // environment, so rotation needs no further handling.
                    warn!(
                        %id,
                        "401 from portal, check the {USERNAME_COOKIE_VAR} variable"
                    );
                    ProbeStatus::Unauthorized
                }
                StatusCode::FORBIDDEN => {
                    debug!(%id, "403, access forbidden");
                    ProbeStatus::Forbidden
                }
                status => {
                    warn!(%id, %status, "unexpected status from portal");
                    ProbeStatus::Unreachable
                }
            },
            Err(err) => {
                warn!(%id, error = %err, "probe request failed");
                ProbeStatus::Unreachable
            }
        }
    }

    async fn resolve(&self, id: LectureId) -> Result<ResolvedLecture> {
        let response = self.fetch_page(id).await?.error_for_status()?;
        let html = response.text().await?;
        let media_url = extract_media_url(id, &html)?;
        Ok(ResolvedLecture {
            media_url,
            metadata: extract_metadata(&html),
            page_url: self.page_url(id),
        })
    }
}

/// Pull the player configuration JSON out of the page and pick a media url
/// from it.
fn extract_media_url(id: LectureId, html: &str) -> Result<String> {
    let Some(configuration) = player_configuration(html) else {
        warn!(%id, "no player configuration found on lecture page");
        return Err(CoreError::MediaUrlNotFound(id));
    };
    let configuration: Value = serde_json::from_str(&configuration)?;
    pick_media_url(&configuration).ok_or_else(|| {
        warn!(%id, "player configuration contains no usable mp4 url");
        CoreError::MediaUrlNotFound(id)
    })
}

/// The HTML-escaped `configuration` attribute of the `#player` element.
fn player_configuration(html: &str) -> Option<String> {
    static TAG: OnceLock<Regex> = OnceLock::new();
    static ATTR: OnceLock<Regex> = OnceLock::new();
    let tag = TAG
        .get_or_init(|| Regex::new(r#"<[^>]*\bid="player"[^>]*>"#).expect("static regex"))
        .find(html)?;
    let caps = ATTR
        .get_or_init(|| Regex::new(r#"configuration="([^"]*)""#).expect("static regex"))
        .captures(tag.as_str())?;
    Some(decode_entities(&caps[1]))
}

/// Media url preference, most podcast-like first: the audio-only podcast
/// feeds transcribe fastest, the combined camera streams are the last
/// resort.
fn pick_media_url(configuration: &Value) -> Option<String> {
    if let Some(fallback) = configuration.get("fallbackStream").and_then(Value::as_object) {
        for suffix in ["podcast.mp4", ".mp4"] {
            if let Some(url) = fallback
                .values()
                .filter_map(Value::as_str)
                .find(|url| url.ends_with(suffix))
            {
                return Some(url.to_string());
            }
        }
    }

    let streams = configuration.get("streams").and_then(Value::as_array)?;
    if let Some(url) = stream_urls(streams).find(|url| url.ends_with("podcast.mp4")) {
        return Some(url.to_string());
    }

    let sd_urls: Vec<&str> = streams
        .iter()
        .filter_map(|stream| stream.get("sd"))
        .filter_map(Value::as_str)
        .collect();
    for suffix in ["video.mp4", "CameraMicrophone.mp4", "video_complete.mp4"] {
        if let Some(url) = sd_urls.iter().find(|url| url.ends_with(suffix)) {
            return Some((*url).to_string());
        }
    }
    if let Some(url) = sd_urls.iter().find(|url| url.ends_with(".mp4")) {
        return Some((*url).to_string());
    }

    stream_urls(streams)
        .find(|url| url.ends_with(".mp4"))
        .map(str::to_string)
}

fn stream_urls<'v>(streams: &'v [Value]) -> impl Iterator<Item = &'v str> {
    streams
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|stream| stream.values())
        .filter_map(Value::as_str)
}

/// Scrape the lecture info box. Every field is best-effort; a sparse page
/// yields a sparse result.
fn extract_metadata(html: &str) -> LectureMetadata {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    static SERIES: OnceLock<Regex> = OnceLock::new();
    static LECTURER: OnceLock<Regex> = OnceLock::new();

    // The info box follows the lecture image; scraping from there avoids
    // picking up unrelated headings elsewhere on the page.
    let window = match html.find("lecture-img") {
        Some(position) => &html[position..],
        None => html,
    };

    let mut metadata = LectureMetadata::default();

    metadata.title = TITLE
        .get_or_init(|| Regex::new(r"(?s)<h3[^>]*>(.*?)</h3>").expect("static regex"))
        .captures(window)
        .map(|caps| caps[1].trim().to_string());

    if let Some(caps) = SERIES
        .get_or_init(|| {
            Regex::new(r#"(?s)<a href="/series/(\d+)[^"]*"[^>]*>(.*?)</a>"#)
                .expect("static regex")
        })
        .captures(window)
    {
        metadata.series_id = caps[1].parse().ok();
        metadata.series_name = Some(caps[2].trim().to_string());
    }

    for caps in LECTURER
        .get_or_init(|| {
            Regex::new(r#"(?s)<a href="/lecturer/(\d+)[^"]*"[^>]*>(.*?)</a>"#)
                .expect("static regex")
        })
        .captures_iter(window)
    {
        if let Ok(lecturer_id) = caps[1].parse() {
            metadata.lecturer_ids.push(lecturer_id);
            metadata.lecturer_names.push(caps[2].trim().to_string());
        }
    }

    metadata.date = labeled_field(window, "Date")
        .and_then(|raw| chrono::NaiveDate::parse_from_str(&raw, "%B %d, %Y").ok());
    metadata.language = labeled_field(window, "Language");
    metadata.duration = labeled_field(window, "Duration");

    metadata
}

/// Value of a `Label: value<br>` line in the info box.
fn labeled_field(html: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?is){label}:\s*(.*?)\s*<br");
    let regex = Regex::new(&pattern).expect("field label regex");
    regex
        .captures(html)
        .map(|caps| caps[1].trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Undo the HTML escaping of the configuration attribute.
fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
