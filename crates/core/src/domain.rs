use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedItem;
use crate::features::Features;
use crate::text::clean_text;

/// A single collected post, stored as one JSON object per line in the raw dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub channel: String,
    /// Unix epoch seconds.
    pub created_at: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub is_self: bool,
    pub collected_at: DateTime<Utc>,
}

/// An upstream item after field mapping, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPost {
    pub id: Option<String>,
    pub created_at: Option<i64>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub score: Option<i64>,
    pub num_comments: Option<i64>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub over_18: Option<bool>,
    pub is_self: Option<bool>,
}

impl RawPost {
    /// Checks required fields and fills defaults for the optional ones.
    pub fn validate(
        self,
        channel: &str,
        collected_at: DateTime<Utc>,
    ) -> Result<PostRecord, MalformedItem> {
        let id = match self.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => return Err(MalformedItem::MissingField("id")),
        };
        let created_at = self
            .created_at
            .ok_or(MalformedItem::MissingField("created_at"))?;
        if created_at < 0 {
            return Err(MalformedItem::InvalidField {
                field: "created_at",
                reason: format!("negative timestamp {created_at}"),
            });
        }

        Ok(PostRecord {
            id,
            channel: channel.to_string(),
            created_at,
            title: self.title.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            score: self.score.unwrap_or(0),
            num_comments: self.num_comments.unwrap_or(0),
            author: self.author,
            url: self.url,
            over_18: self.over_18.unwrap_or(false),
            is_self: self.is_self.unwrap_or(false),
            collected_at,
        })
    }
}

/// Listing order requested from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl Sort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sort::Hot => "hot",
            Sort::New => "new",
            Sort::Top => "top",
            Sort::Rising => "rising",
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Sort::Hot),
            "new" => Ok(Sort::New),
            "top" => Ok(Sort::Top),
            "rising" => Ok(Sort::Rising),
            other => Err(format!(
                "unknown sort `{other}` (expected hot, new, top or rising)"
            )),
        }
    }
}

/// Time window for `top` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeFilter::Hour),
            "day" => Ok(TimeFilter::Day),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            "year" => Ok(TimeFilter::Year),
            "all" => Ok(TimeFilter::All),
            other => Err(format!(
                "unknown time filter `{other}` (expected hour, day, week, month, year or all)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Malformed,
    Duplicate,
    OutsideWindow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    pub malformed: usize,
    pub duplicate: usize,
    pub outside_window: usize,
}

impl SkipCounts {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Malformed => self.malformed += 1,
            SkipReason::Duplicate => self.duplicate += 1,
            SkipReason::OutsideWindow => self.outside_window += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.malformed + self.duplicate + self.outside_window
    }

    fn absorb(&mut self, other: &SkipCounts) {
        self.malformed += other.malformed;
        self.duplicate += other.duplicate;
        self.outside_window += other.outside_window;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    Complete,
    /// The channel stopped early; whatever was written before stays written.
    Partial { reason: String },
    /// The run halted before reaching this channel.
    NotAttempted { reason: String },
}

impl ChannelStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, ChannelStatus::Complete)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Complete => f.write_str("complete"),
            ChannelStatus::Partial { reason } => write!(f, "partial failure: {reason}"),
            ChannelStatus::NotAttempted { reason } => write!(f, "not attempted: {reason}"),
        }
    }
}

/// Counts for one channel of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub channel: String,
    pub fetched: usize,
    pub written: usize,
    pub skipped: SkipCounts,
    pub pages: usize,
    pub status: ChannelStatus,
}

impl ChannelReport {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            fetched: 0,
            written: 0,
            skipped: SkipCounts::default(),
            pages: 0,
            status: ChannelStatus::Complete,
        }
    }

    pub fn not_attempted(channel: &str, reason: &str) -> Self {
        Self {
            status: ChannelStatus::NotAttempted {
                reason: reason.to_string(),
            },
            ..Self::new(channel)
        }
    }
}

/// Summary of one collection run, produced for every run that got past authentication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub written: usize,
    pub skipped: SkipCounts,
    pub channels: Vec<ChannelReport>,
}

impl CollectionResult {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            fetched: 0,
            written: 0,
            skipped: SkipCounts::default(),
            channels: Vec::new(),
        }
    }

    pub fn add_channel(&mut self, report: ChannelReport) {
        self.fetched += report.fetched;
        self.written += report.written;
        self.skipped.absorb(&report.skipped);
        self.channels.push(report);
    }

    /// Records written per channel, keyed by channel name.
    pub fn per_channel_written(&self) -> BTreeMap<String, usize> {
        self.channels
            .iter()
            .map(|c| (c.channel.clone(), c.written))
            .collect()
    }

    /// True when every channel finished its fetch.
    pub fn is_complete(&self) -> bool {
        self.channels.iter().all(|c| c.status.is_complete())
    }

    pub fn failed_channels(&self) -> impl Iterator<Item = &ChannelReport> {
        self.channels.iter().filter(|c| !c.status.is_complete())
    }
}

/// A raw record plus the derived text and feature columns of the processed dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    #[serde(flatten)]
    pub post: PostRecord,
    pub full_text: String,
    pub clean_text: String,
    #[serde(flatten)]
    pub features: Features,
}

impl ProcessedRecord {
    pub fn from_post(post: PostRecord) -> Self {
        let full_text = format!("{} {}", post.title, post.body);
        let clean_text = clean_text(&full_text);
        let features = Features::derive(&post, &full_text, &clean_text);
        Self {
            post,
            full_text,
            clean_text,
            features,
        }
    }
}
