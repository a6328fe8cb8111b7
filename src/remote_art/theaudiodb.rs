//! TheAudioDB album-thumbnail provider.

use std::io::Read;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use serde_json::Value;

use super::CoverFetchProvider;

const THEAUDIODB_BASE_URL: &str = "https://www.theaudiodb.com/api/v1/json/2";
const THEAUDIODB_SOURCE_NAME: &str = "TheAudioDB";
const RATE_LIMIT_WAIT_LIMIT: Duration = Duration::from_secs(4);
const USER_AGENT: &str = "coverkeeper/0.1.0 (album artwork lookup)";

/// Looks up album thumbnails via `searchalbum.php`.
pub struct TheAudioDbProvider {
    http_client: ureq::Agent,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    request_timeout: Duration,
}

impl TheAudioDbProvider {
    pub fn new(request_timeout_ms: u32) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(7))
            .timeout_write(Duration::from_secs(7))
            .build();
        let quota = Quota::with_period(Duration::from_secs(2))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        Self {
            http_client,
            limiter: RateLimiter::direct(quota),
            request_timeout: Duration::from_millis(u64::from(request_timeout_ms)),
        }
    }

    fn request_url(endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{THEAUDIODB_BASE_URL}/{endpoint}");
        if params.is_empty() {
            return url;
        }

        url.push('?');
        for (index, (key, value)) in params.iter().enumerate() {
            if index > 0 {
                url.push('&');
            }
            url.push_str(key);
            url.push('=');
            url.push_str(urlencoding::encode(value).as_ref());
        }
        url
    }

    fn wait_for_rate_limit_slot(&self) -> bool {
        if self.limiter.check().is_ok() {
            return true;
        }
        let deadline = Instant::now() + RATE_LIMIT_WAIT_LIMIT;
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
            if self.limiter.check().is_ok() {
                return true;
            }
        }
        false
    }

    fn get(&self, url: &str) -> Result<ureq::Response, String> {
        if !self.wait_for_rate_limit_slot() {
            return Err(format!("{THEAUDIODB_SOURCE_NAME} rate limit saturated"));
        }
        self.http_client
            .get(url)
            .set("User-Agent", USER_AGENT)
            .timeout(self.request_timeout)
            .call()
            .map_err(|error| format!("Request failed: {error}"))
    }

    fn search_album(&self, artist: &str, album: &str) -> Result<Value, String> {
        let url = Self::request_url("searchalbum.php", &[("s", artist), ("a", album)]);
        let response = self.get(&url)?;
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| format!("Failed to read response: {error}"))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|error| format!("Invalid JSON response: {error}"))
    }

    /// Thumbnail URLs in response order, high-quality variants first.
    fn album_thumb_urls(payload: &Value) -> Vec<String> {
        let Some(albums) = payload.get("album").and_then(Value::as_array) else {
            return Vec::new();
        };
        let mut urls: Vec<String> = Vec::new();
        for album in albums {
            for key in ["strAlbumThumbHQ", "strAlbumThumb"] {
                let Some(url) = album.get(key).and_then(Value::as_str) else {
                    continue;
                };
                let url = url.trim();
                if url.is_empty() || urls.iter().any(|existing| existing == url) {
                    continue;
                }
                urls.push(url.to_string());
            }
        }
        urls
    }
}

impl CoverFetchProvider for TheAudioDbProvider {
    fn name(&self) -> &str {
        THEAUDIODB_SOURCE_NAME
    }

    fn fetch_covers(
        &self,
        artist: &str,
        album: &str,
        on_save: &mut dyn FnMut(&mut dyn Read) -> bool,
        on_error: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), String> {
        if artist.trim().is_empty() || album.trim().is_empty() {
            return Ok(());
        }

        let payload = match self.search_album(artist, album) {
            Ok(payload) => payload,
            Err(reason) => {
                on_error(&reason);
                return Ok(());
            }
        };

        let urls = Self::album_thumb_urls(&payload);
        debug!(
            "{}: {} thumbnail candidate(s) for {:?} / {:?}",
            THEAUDIODB_SOURCE_NAME,
            urls.len(),
            artist,
            album
        );
        for url in urls {
            match self.get(&url) {
                Ok(response) => {
                    let mut reader = response.into_reader();
                    if !on_save(&mut reader) {
                        break;
                    }
                }
                Err(reason) => {
                    if on_error(&reason) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
