//! Job record, platforms, and the lifecycle state machine.

use chrono::{DateTime, Utc};
use collector_core::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{JobError, JobResult};

/// Supported platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Instagram,
}

impl Platform {
    /// All supported platforms.
    pub const ALL: [Self; 2] = [Self::Youtube, Self::Instagram];

    /// Stable lowercase name, also used as the rate gate key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
        }
    }

    /// Detects the platform a URL belongs to.
    ///
    /// Only content the scrapers understand is recognised: YouTube videos,
    /// shorts, channels and playlists; Instagram posts, reels, IGTV and
    /// profiles.
    #[must_use]
    pub fn detect(url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let host = host.strip_prefix("m.").unwrap_or(host);
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        match host {
            "youtu.be" if !segments.is_empty() => Some(Self::Youtube),
            "youtube.com" => {
                let recognised = match segments.first().copied() {
                    Some("watch") => url.query_pairs().any(|(k, _)| k == "v"),
                    Some("playlist") => url.query_pairs().any(|(k, _)| k == "list"),
                    Some("shorts" | "channel" | "c" | "user") => segments.len() >= 2,
                    Some(handle) => handle.starts_with('@') && handle.len() > 1,
                    None => false,
                };
                recognised.then_some(Self::Youtube)
            }
            "instagram.com" => {
                let recognised = match segments.as_slice() {
                    ["p" | "reel" | "reels" | "tv", _, ..] => true,
                    [profile] => is_profile_name(profile),
                    _ => false,
                };
                recognised.then_some(Self::Instagram)
            }
            _ => None,
        }
    }
}

fn is_profile_name(segment: &str) -> bool {
    const RESERVED: [&str; 6] = ["explore", "accounts", "direct", "stories", "p", "reel"];
    !segment.is_empty()
        && !RESERVED.contains(&segment)
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(Self::Youtube),
            "instagram" => Ok(Self::Instagram),
            other => Err(JobError::Validation(format!("Unsupported platform: {other}"))),
        }
    }
}

/// Job status.
///
/// ```text
/// pending ──> running ──> completed | failed
///    │           │
///    │           └──> cancelling ──> cancelled
///    └──> cancelled
/// ```
///
/// Side edges: `running -> pending` when shutdown interrupts a worker,
/// `running -> cancelled` when the scraper stops on its own token check,
/// `pending | cancelling -> failed` for admission errors and the
/// cancellation watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Running,
        Self::Cancelling,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, failed, or cancelled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pending, running, or cancelling.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled | Self::Failed)
                | (
                    Self::Running,
                    Self::Completed
                        | Self::Failed
                        | Self::Cancelling
                        | Self::Cancelled
                        | Self::Pending
                )
                | (Self::Cancelling, Self::Cancelled | Self::Failed)
        )
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| JobError::Validation(format!("Unknown job status: {s}")))
    }
}

/// One scrape request, end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub platform: Platform,
    pub status: JobStatus,
    pub title: Option<String>,
    /// 0..=100, non-decreasing while running.
    pub progress: u8,
    pub current_operation: Option<String>,
    /// Set iff status is `failed`.
    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Source job when this record was created by a retry.
    pub retry_of: Option<JobId>,
    pub bytes_downloaded: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff status is terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a fresh pending job.
    #[must_use]
    pub fn new(url: impl Into<String>, platform: Platform) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            url: url.into(),
            platform,
            status: JobStatus::Pending,
            title: None,
            progress: 0,
            current_operation: Some("Queued".to_string()),
            error_message: None,
            retry_count: 0,
            retry_of: None,
            bytes_downloaded: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Creates the pending successor of a failed job.
    #[must_use]
    pub fn retry_of(source: &Self) -> Self {
        let mut job = Self::new(source.url.clone(), source.platform);
        job.title.clone_from(&source.title);
        job.retry_count = source.retry_count + 1;
        job.retry_of = Some(source.id);
        job
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `next`, enforcing the state machine and the terminal
    /// bookkeeping invariants.
    pub fn transition(&mut self, next: JobStatus) -> JobResult<()> {
        if self.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                job_id: self.id,
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        self.completed_at = next.is_terminal().then_some(now);
        if next != JobStatus::Failed {
            self.error_message = None;
        }
        Ok(())
    }

    /// Checks the record-level invariants.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.progress <= 100
            && self.completed_at.is_some() == self.status.is_terminal()
            && self.error_message.is_some() == (self.status == JobStatus::Failed)
    }
}

/// Validates a submission URL and checks it belongs to `platform`.
pub fn validate_url(raw: &str, platform: Platform) -> JobResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(JobError::Validation("URL is required".to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|_| JobError::Validation(format!("Invalid URL: {trimmed}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(JobError::Validation(
            "URL must start with http:// or https://".to_string(),
        ));
    }

    match Platform::detect(&url) {
        Some(detected) if detected == platform => Ok(url),
        Some(detected) => Err(JobError::Validation(format!(
            "URL belongs to {detected}, not {platform}"
        ))),
        None => Err(JobError::Validation(format!(
            "URL is not a supported {platform} link"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(raw: &str) -> Option<Platform> {
        Platform::detect(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_detect_youtube() {
        assert_eq!(detect("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), Some(Platform::Youtube));
        assert_eq!(detect("https://youtu.be/dQw4w9WgXcQ"), Some(Platform::Youtube));
        assert_eq!(detect("https://youtube.com/shorts/abc123"), Some(Platform::Youtube));
        assert_eq!(detect("https://m.youtube.com/channel/UC123"), Some(Platform::Youtube));
        assert_eq!(detect("https://www.youtube.com/playlist?list=PL123"), Some(Platform::Youtube));
        assert_eq!(detect("https://www.youtube.com/@somecreator"), Some(Platform::Youtube));
        assert_eq!(detect("https://www.youtube.com/watch"), None);
        assert_eq!(detect("https://youtu.be/"), None);
    }

    #[test]
    fn test_detect_instagram() {
        assert_eq!(detect("https://www.instagram.com/p/Cabc123/"), Some(Platform::Instagram));
        assert_eq!(detect("https://instagram.com/reel/Cxyz/"), Some(Platform::Instagram));
        assert_eq!(detect("https://instagram.com/tv/Cxyz"), Some(Platform::Instagram));
        assert_eq!(detect("https://www.instagram.com/some.user_1/"), Some(Platform::Instagram));
        assert_eq!(detect("https://www.instagram.com/explore/"), None);
        assert_eq!(detect("https://www.instagram.com/"), None);
    }

    #[test]
    fn test_detect_unknown_host() {
        assert_eq!(detect("https://example.com/watch?v=1"), None);
        assert_eq!(detect("https://notyoutube.com/watch?v=1"), None);
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://youtu.be/abc", Platform::Youtube).is_ok());
        assert!(validate_url("  https://youtu.be/abc  ", Platform::Youtube).is_ok());

        for (raw, platform) in [
            ("", Platform::Youtube),
            ("not a url", Platform::Youtube),
            ("ftp://youtube.com/watch?v=1", Platform::Youtube),
            ("https://youtu.be/abc", Platform::Instagram),
            ("https://example.com/", Platform::Instagram),
        ] {
            let err = validate_url(raw, platform).unwrap_err();
            assert!(matches!(err, JobError::Validation(_)), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_status_roundtrip_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("dead_letter".parse::<JobStatus>().is_err());
        assert_eq!("YouTube".parse::<Platform>().unwrap(), Platform::Youtube);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_transition_bookkeeping() {
        let mut job = Job::new("https://youtu.be/abc", Platform::Youtube);
        assert!(job.is_consistent());

        job.transition(JobStatus::Running).unwrap();
        assert!(job.completed_at.is_none());

        job.error_message = Some("Rate limited".to_string());
        job.transition(JobStatus::Failed).unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.is_consistent());

        let err = job.transition(JobStatus::Running).unwrap_err();
        assert!(matches!(err, JobError::AlreadyTerminal { .. }));
    }

    #[test]
    fn test_pending_cannot_complete() {
        let mut job = Job::new("https://youtu.be/abc", Platform::Youtube);
        let err = job.transition(JobStatus::Completed).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_retry_of_copies_lineage() {
        let mut source = Job::new("https://youtu.be/abc", Platform::Youtube);
        source.title = Some("A video".to_string());
        source.retry_count = 1;

        let retry = Job::retry_of(&source);
        assert_ne!(retry.id, source.id);
        assert_eq!(retry.url, source.url);
        assert_eq!(retry.title.as_deref(), Some("A video"));
        assert_eq!(retry.retry_count, 2);
        assert_eq!(retry.retry_of, Some(source.id));
        assert_eq!(retry.status, JobStatus::Pending);
    }
}
