//! Per-record features for the processed dataset: text statistics, posting
//! time and engagement.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::PostRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStats {
    pub char_count: usize,
    pub word_count: usize,
    /// Mean characters per whitespace-separated word; 0 for empty text.
    pub avg_word_length: f64,
}

impl TextStats {
    pub fn of(text: &str) -> Self {
        let lengths: Vec<usize> = text.split_whitespace().map(|w| w.chars().count()).collect();
        let avg_word_length = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
        };
        Self {
            char_count: text.chars().count(),
            word_count: lengths.len(),
            avg_word_length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    /// Hours 0-6 are night, 7-12 morning, 13-18 afternoon, the rest evening.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=6 => TimeOfDay::Night,
            7..=12 => TimeOfDay::Morning,
            13..=18 => TimeOfDay::Afternoon,
            _ => TimeOfDay::Evening,
        }
    }
}

/// Northern-hemisphere meteorological seasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => Season::Winter,
        }
    }
}

/// Calendar features of `created_at`, in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeFeatures {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub weekday: String,
    /// 0 is Monday.
    pub weekday_num: u32,
    pub is_weekend: bool,
    pub time_of_day: TimeOfDay,
    pub season: Season,
}

impl TimeFeatures {
    pub fn from_epoch(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(|dt| Self::at(&dt))
    }

    pub fn at(dt: &DateTime<Utc>) -> Self {
        let weekday = dt.weekday();
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            weekday: weekday_name(weekday).to_string(),
            weekday_num: weekday.num_days_from_monday(),
            is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
            time_of_day: TimeOfDay::from_hour(dt.hour()),
            season: Season::from_month(dt.month()),
        }
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementFeatures {
    pub score_positive: bool,
    /// `sign(score) * ln(1 + |score|)`
    pub score_log: f64,
    pub has_comments: bool,
    pub comments_log: f64,
    /// Comments per point of score, with |score| floored at 1.
    pub engagement_ratio: f64,
}

impl EngagementFeatures {
    pub fn of(score: i64, num_comments: i64) -> Self {
        let comments = num_comments.max(0) as f64;
        let magnitude = score.unsigned_abs() as f64;
        Self {
            score_positive: score > 0,
            score_log: (score.signum() as f64) * magnitude.ln_1p(),
            has_comments: num_comments > 0,
            comments_log: comments.ln_1p(),
            engagement_ratio: comments / magnitude.max(1.0),
        }
    }
}

/// All derived columns of one processed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub title_stats: TextStats,
    pub body_stats: TextStats,
    pub full_text_stats: TextStats,
    pub clean_text_stats: TextStats,
    /// Share of characters in `full_text` that are uppercase.
    pub uppercase_ratio: f64,
    pub question_marks: usize,
    /// Absent when `created_at` is outside the representable range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeFeatures>,
    pub engagement: EngagementFeatures,
}

impl Features {
    pub fn derive(post: &PostRecord, full_text: &str, clean_text: &str) -> Self {
        let full_stats = TextStats::of(full_text);
        let uppercase = full_text.chars().filter(|c| c.is_uppercase()).count();
        let uppercase_ratio = if full_stats.char_count == 0 {
            0.0
        } else {
            uppercase as f64 / full_stats.char_count as f64
        };

        Self {
            title_stats: TextStats::of(&post.title),
            body_stats: TextStats::of(&post.body),
            full_text_stats: full_stats,
            clean_text_stats: TextStats::of(clean_text),
            uppercase_ratio,
            question_marks: full_text.matches('?').count(),
            time: TimeFeatures::from_epoch(post.created_at),
            engagement: EngagementFeatures::of(post.score, post.num_comments),
        }
    }
}
