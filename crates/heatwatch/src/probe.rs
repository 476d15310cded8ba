//! Media duration probe.
//!
//! Reads the head of the processed video and pulls the duration out of the
//! ISO-BMFF `moov/mvhd` box. Files written without faststart keep `moov`
//! at the end, so a second ranged read of the tail follows when the head
//! has no movie header. The value only feeds local validation, so every
//! failure resolves to `None`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use crate::config::ClientConfig;

/// Determines the duration, in seconds, of a media resource.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Returns `None` when the duration cannot be determined.
    async fn probe_duration(&self, media_url: &str) -> Option<f64>;
}

/// Probes MP4 files with ranged `GET`s of their first and last bytes.
#[derive(Clone)]
pub struct Mp4HeaderProbe {
    client: Client,
    header_bytes: u64,
    timeout: Duration,
    token: Option<SecretString>,
}

impl Mp4HeaderProbe {
    pub fn new(client: Client, config: &ClientConfig, token: Option<SecretString>) -> Self {
        Self {
            client,
            header_bytes: config.probe.header_bytes.max(16),
            timeout: config.probe.timeout(),
            token,
        }
    }

    /// Fetches at most `header_bytes` for `range`. With `partial_only`, a
    /// server that ignores the range yields `None`.
    async fn fetch_range(
        &self,
        media_url: &str,
        range: String,
        partial_only: bool,
    ) -> Result<Option<Vec<u8>>, reqwest::Error> {
        let mut request = self
            .client
            .get(media_url)
            .header(RANGE, range)
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let mut response = request.send().await?.error_for_status()?;
        if partial_only && response.status() != StatusCode::PARTIAL_CONTENT {
            return Ok(None);
        }

        // Servers that ignore Range send the whole file; stop reading early.
        let limit = self.header_bytes as usize;
        let mut buf = Vec::with_capacity(limit.min(64 * 1024));
        while buf.len() < limit {
            match response.chunk().await? {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => break,
            }
        }
        buf.truncate(limit);
        Ok(Some(buf))
    }

    async fn fetch_head(&self, media_url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let range = format!("bytes=0-{}", self.header_bytes - 1);
        Ok(self
            .fetch_range(media_url, range, false)
            .await?
            .unwrap_or_default())
    }

    async fn fetch_tail(&self, media_url: &str) -> Result<Option<Vec<u8>>, reqwest::Error> {
        let range = format!("bytes=-{}", self.header_bytes);
        self.fetch_range(media_url, range, true).await
    }
}

#[async_trait]
impl DurationProbe for Mp4HeaderProbe {
    async fn probe_duration(&self, media_url: &str) -> Option<f64> {
        let head = match self.fetch_head(media_url).await {
            Ok(head) => head,
            Err(e) => {
                log::debug!("Duration probe of {} failed: {}", media_url, e);
                return None;
            }
        };
        if let Some(duration) = parse_mp4_duration(&head) {
            return Some(duration);
        }
        // A head shorter than the limit is the whole file.
        if (head.len() as u64) < self.header_bytes {
            log::debug!("No movie header in {} ({} bytes)", media_url, head.len());
            return None;
        }

        let tail = match self.fetch_tail(media_url).await {
            Ok(Some(tail)) => tail,
            Ok(None) => {
                log::debug!("Server ignored the tail range for {}", media_url);
                return None;
            }
            Err(e) => {
                log::debug!("Tail read of {} failed: {}", media_url, e);
                return None;
            }
        };
        let duration = parse_mp4_duration_tail(&tail);
        if duration.is_none() {
            log::debug!(
                "No movie header within the first or last {} bytes of {}",
                self.header_bytes,
                media_url
            );
        }
        duration
    }
}

struct BoxHeader<'a> {
    kind: &'a [u8],
    body: &'a [u8],
}

/// Splits `data` into top-level boxes, stopping at the first truncated one.
fn boxes<'a>(mut data: &'a [u8]) -> impl Iterator<Item = BoxHeader<'a>> {
    std::iter::from_fn(move || {
        let cur: &'a [u8] = data;
        if cur.len() < 8 {
            return None;
        }
        let size32 = u32::from_be_bytes(cur[0..4].try_into().ok()?) as u64;
        let kind = &cur[4..8];
        let (header_len, size) = match size32 {
            0 => (8u64, cur.len() as u64),
            1 => {
                if cur.len() < 16 {
                    return None;
                }
                (16u64, u64::from_be_bytes(cur[8..16].try_into().ok()?))
            }
            n => (8u64, n),
        };
        if size < header_len || size > cur.len() as u64 {
            data = &[];
            return None;
        }
        data = &cur[size as usize..];
        Some(BoxHeader {
            kind,
            body: &cur[header_len as usize..size as usize],
        })
    })
}

/// Duration in seconds from an MP4 prefix, if its movie header is complete.
pub fn parse_mp4_duration(data: &[u8]) -> Option<f64> {
    let moov = boxes(data).find(|b| b.kind == b"moov")?;
    duration_from_moov(moov.body)
}

/// Duration in seconds from the last bytes of an MP4 file.
///
/// The slice starts at an arbitrary offset, so box boundaries are unknown;
/// every `moov` tag whose box fits in the slice is tried in turn.
pub fn parse_mp4_duration_tail(data: &[u8]) -> Option<f64> {
    data.windows(4)
        .enumerate()
        .filter(|(i, tag)| *i >= 4 && *tag == b"moov")
        .find_map(|(i, _)| {
            let start = i - 4;
            let size = u32::from_be_bytes(data[start..i].try_into().ok()?) as usize;
            let end = match size {
                0 => data.len(),
                n if n >= 8 => start.checked_add(n)?,
                _ => return None,
            };
            duration_from_moov(data.get(i + 4..end)?)
        })
}

fn duration_from_moov(moov: &[u8]) -> Option<f64> {
    let mvhd = boxes(moov).find(|b| b.kind == b"mvhd")?;
    let body = mvhd.body;

    let version = *body.first()?;
    let (timescale, duration) = match version {
        0 => {
            let timescale = u32::from_be_bytes(body.get(12..16)?.try_into().ok()?);
            let duration = u32::from_be_bytes(body.get(16..20)?.try_into().ok()?);
            if duration == u32::MAX {
                return None;
            }
            (timescale, duration as u64)
        }
        1 => {
            let timescale = u32::from_be_bytes(body.get(20..24)?.try_into().ok()?);
            let duration = u64::from_be_bytes(body.get(24..32)?.try_into().ok()?);
            if duration == u64::MAX {
                return None;
            }
            (timescale, duration)
        }
        _ => return None,
    };

    if timescale == 0 {
        return None;
    }
    Some(duration as f64 / timescale as f64)
}
