use std::collections::HashSet;
use std::error::Error;

use chrono::{DateTime, Utc};

use crate::domain::{CollectionResult, PostRecord, RawPost, Sort, TimeFilter};
use crate::error::{SourceError, StoreError};

pub type Result<T> = std::result::Result<T, Box<dyn Error>>;

/// One listing request against a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest<'a> {
    pub channel: &'a str,
    pub sort: Sort,
    /// Only meaningful for [`Sort::Top`].
    pub time_filter: TimeFilter,
    pub limit: usize,
    /// Pagination cursor from the previous page.
    pub after: Option<&'a str>,
}

/// One page of upstream items, in the order upstream returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<RawPost>,
    /// `None` once upstream has nothing more to give.
    pub after: Option<String>,
}

/// An authenticated content API session.
///
/// One session is owned by the collector for the duration of a run and is
/// shared by every channel.
pub trait PostSource {
    fn authenticate(&mut self) -> std::result::Result<(), SourceError>;

    fn fetch_page(&mut self, request: &PageRequest<'_>) -> std::result::Result<Page, SourceError>;
}

/// What the collector needs to know about a dataset before appending to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetIndex {
    pub ids: HashSet<String>,
    pub latest_collected_at: Option<DateTime<Utc>>,
}

/// Append-only destination for records. Each call writes one complete record.
pub trait RecordSink {
    fn append(&mut self, record: &PostRecord) -> std::result::Result<(), StoreError>;
}

/// The raw dataset: a sink that can also report what it already holds.
pub trait DatasetStore: RecordSink {
    fn load_index(&self) -> std::result::Result<DatasetIndex, StoreError>;
}

/// Persists a finished run's summary, e.g. as a report file.
pub trait ReportWriter: Send + Sync {
    fn write(&self, result: &CollectionResult) -> Result<()>;
}
