use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::domain::{
    ChannelReport, ChannelStatus, CollectionResult, PostRecord, RawPost, SkipReason, Sort,
    TimeFilter,
};
use crate::error::{CollectError, SourceError};
use crate::ports::{DatasetStore, PageRequest, PostSource, RecordSink};
use crate::retry::RetryPolicy;
use crate::utils::format_epoch;

/// Largest page upstream will serve in one listing call.
pub const MAX_PAGE_SIZE: usize = 100;

/// What to collect and how hard to try.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSettings {
    pub channels: Vec<String>,
    /// Upper bound on items fetched per channel, malformed and duplicate ones included.
    pub limit_per_channel: usize,
    pub sort: Sort,
    pub time_filter: TimeFilter,
    /// Items created before this instant are skipped.
    pub since: Option<DateTime<Utc>>,
    pub page_size: usize,
    pub retry: RetryPolicy,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            channels: vec!["depression".to_string(), "mentalhealth".to_string()],
            limit_per_channel: 1000,
            sort: Sort::default(),
            time_filter: TimeFilter::default(),
            since: None,
            page_size: MAX_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl CollectorSettings {
    pub fn validate(&self) -> Result<(), CollectError> {
        if self.channels.is_empty() {
            return Err(CollectError::Settings("no channels configured".into()));
        }
        if self.limit_per_channel == 0 {
            return Err(CollectError::Settings("limit per channel must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(CollectError::Settings(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Ids seen so far and the provenance clock, carried across channels.
struct RunState {
    seen: HashSet<String>,
    last_collected_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Never hands out a timestamp older than one already in the dataset.
    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last_collected_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_collected_at = Some(stamp);
        stamp
    }
}

/// How a channel ended, from the run's point of view.
enum ChannelEnd {
    Continue,
    /// Stop the run; later channels are reported as not attempted.
    Halt(String),
}

/// Application service that pulls posts from a source into the raw dataset.
pub struct CollectionService {
    source: Box<dyn PostSource>,
    store: Box<dyn DatasetStore>,
    sinks: Vec<Box<dyn RecordSink>>,
    settings: CollectorSettings,
    clock: Box<dyn Fn() -> DateTime<Utc>>,
}

impl CollectionService {
    /// Creates a new CollectionService with the given dependencies
    pub fn new(
        source: Box<dyn PostSource>,
        store: Box<dyn DatasetStore>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            source,
            store,
            sinks: Vec::new(),
            settings,
            clock: Box::new(Utc::now),
        }
    }

    /// Adds a secondary sink that receives every record written to the dataset.
    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Authenticates, then collects every configured channel in order.
    ///
    /// Only settings, authentication and an unreadable dataset fail the whole
    /// run. Channel-level problems end up in the returned result.
    pub fn run(&mut self) -> Result<CollectionResult, CollectError> {
        self.settings.validate()?;
        let started_at = (self.clock)();
        info!(
            channels = ?self.settings.channels,
            limit = self.settings.limit_per_channel,
            sort = %self.settings.sort,
            "starting collection run"
        );

        let retry = self.settings.retry;
        let source = &mut self.source;
        retry
            .run("authenticate", || source.authenticate())
            .map_err(|err| match err {
                SourceError::Authentication(reason) => CollectError::Authentication(reason),
                other => CollectError::Session(other),
            })?;

        let index = self.store.load_index()?;
        info!(
            existing = index.ids.len(),
            latest_collected_at = ?index.latest_collected_at,
            "loaded dataset index"
        );
        let mut state = RunState {
            seen: index.ids,
            last_collected_at: index.latest_collected_at,
        };

        let mut result = CollectionResult::new(started_at);
        let mut halted: Option<String> = None;
        let channels = self.settings.channels.clone();

        for channel in &channels {
            if let Some(reason) = &halted {
                result.add_channel(ChannelReport::not_attempted(channel, reason));
                continue;
            }

            let mut report = ChannelReport::new(channel);
            if let ChannelEnd::Halt(reason) = self.collect_channel(&mut report, &mut state) {
                halted = Some(reason);
            }
            result.add_channel(report);
        }

        result.finished_at = (self.clock)();
        info!(
            fetched = result.fetched,
            written = result.written,
            skipped = result.skipped.total(),
            complete = result.is_complete(),
            "collection run finished"
        );
        Ok(result)
    }

    fn collect_channel(&mut self, report: &mut ChannelReport, state: &mut RunState) -> ChannelEnd {
        let limit = self.settings.limit_per_channel;
        let retry = self.settings.retry;
        let mut after: Option<String> = None;
        info!(channel = %report.channel, "collecting channel");

        while report.fetched < limit {
            let request = PageRequest {
                channel: &report.channel,
                sort: self.settings.sort,
                time_filter: self.settings.time_filter,
                limit: (limit - report.fetched).min(self.settings.page_size),
                after: after.as_deref(),
            };

            let source = &mut self.source;
            let page = match retry.run(&report.channel, || source.fetch_page(&request)) {
                Ok(page) => page,
                Err(err) => {
                    error!(channel = %report.channel, error = %err, "channel fetch abandoned");
                    let halt = matches!(err, SourceError::Authentication(_));
                    report.status = ChannelStatus::Partial {
                        reason: err.to_string(),
                    };
                    return if halt {
                        ChannelEnd::Halt(format!("session lost on r/{}", report.channel))
                    } else {
                        ChannelEnd::Continue
                    };
                }
            };

            report.pages += 1;
            debug!(
                channel = %report.channel,
                page = report.pages,
                items = page.items.len(),
                after = ?page.after,
                "fetched page"
            );
            if page.items.is_empty() {
                break;
            }

            let mut past_window = false;
            for raw in page.items {
                // upstream may hand back more than asked for
                if report.fetched >= limit {
                    break;
                }
                report.fetched += 1;

                let record = match self.admit(raw, report, state) {
                    Ok(record) => record,
                    Err(reason) => {
                        if reason == SkipReason::OutsideWindow && self.settings.sort == Sort::New {
                            past_window = true;
                        }
                        report.skipped.record(reason);
                        continue;
                    }
                };

                if let Err(err) = self.store.append(&record) {
                    error!(channel = %report.channel, error = %err, "dataset append failed");
                    report.status = ChannelStatus::Partial {
                        reason: err.to_string(),
                    };
                    return ChannelEnd::Halt("dataset no longer writable".to_string());
                }
                for sink in &mut self.sinks {
                    if let Err(err) = sink.append(&record) {
                        warn!(id = %record.id, error = %err, "secondary sink append failed");
                    }
                }
                state.seen.insert(record.id);
                report.written += 1;
            }

            // newest-first listing: nothing further down can be inside the window
            if past_window {
                debug!(channel = %report.channel, "reached the start of the collection window");
                break;
            }
            match page.after {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        info!(
            channel = %report.channel,
            fetched = report.fetched,
            written = report.written,
            skipped = report.skipped.total(),
            pages = report.pages,
            "channel complete"
        );
        ChannelEnd::Continue
    }

    /// Validates one upstream item and checks it against the window and the seen ids.
    fn admit(
        &self,
        raw: RawPost,
        report: &ChannelReport,
        state: &mut RunState,
    ) -> Result<PostRecord, SkipReason> {
        let collected_at = state.stamp((self.clock)());
        let record = raw.validate(&report.channel, collected_at).map_err(|err| {
            debug!(channel = %report.channel, error = %err, "skipping malformed item");
            SkipReason::Malformed
        })?;

        if let Some(since) = self.settings.since {
            if record.created_at < since.timestamp() {
                debug!(
                    id = %record.id,
                    created = %format_epoch(record.created_at),
                    "skipping item older than the window"
                );
                return Err(SkipReason::OutsideWindow);
            }
        }
        if state.seen.contains(&record.id) {
            return Err(SkipReason::Duplicate);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::ports::{DatasetIndex, Page};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;
    use std::time::Duration;

    type Script = HashMap<String, VecDeque<Result<Page, SourceError>>>;

    /// Source that replays scripted pages per channel and records each request.
    struct ScriptedSource {
        auth: Result<(), SourceError>,
        pages: Script,
        requests: Rc<RefCell<Vec<(String, usize, Option<String>)>>>,
    }

    impl PostSource for ScriptedSource {
        fn authenticate(&mut self) -> Result<(), SourceError> {
            self.auth.clone()
        }

        fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Page, SourceError> {
            self.requests.borrow_mut().push((
                request.channel.to_string(),
                request.limit,
                request.after.map(str::to_string),
            ));
            self.pages
                .get_mut(request.channel)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| Ok(Page::default()))
        }
    }

    /// In-memory dataset shared with the test through an `Rc`.
    #[derive(Clone, Default)]
    struct MemoryStore {
        records: Rc<RefCell<Vec<PostRecord>>>,
        fail_appends: bool,
    }

    impl RecordSink for MemoryStore {
        fn append(&mut self, record: &PostRecord) -> Result<(), StoreError> {
            if self.fail_appends {
                return Err(StoreError::io(
                    "memory",
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ));
            }
            self.records.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    impl DatasetStore for MemoryStore {
        fn load_index(&self) -> Result<DatasetIndex, StoreError> {
            let records = self.records.borrow();
            Ok(DatasetIndex {
                ids: records.iter().map(|r| r.id.clone()).collect(),
                latest_collected_at: records.iter().map(|r| r.collected_at).max(),
            })
        }
    }

    fn item(id: &str, created_at: i64) -> RawPost {
        RawPost {
            id: Some(id.to_string()),
            created_at: Some(created_at),
            title: Some(format!("post {id}")),
            score: Some(3),
            num_comments: Some(1),
            ..RawPost::default()
        }
    }

    fn malformed() -> RawPost {
        RawPost {
            id: None,
            created_at: Some(1_700_000_000),
            ..RawPost::default()
        }
    }

    fn page(items: Vec<RawPost>, after: Option<&str>) -> Result<Page, SourceError> {
        Ok(Page {
            items,
            after: after.map(str::to_string),
        })
    }

    fn settings(channels: &[&str], limit: usize) -> CollectorSettings {
        CollectorSettings {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            limit_per_channel: limit,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(2),
                multiplier: 2.0,
            },
            ..CollectorSettings::default()
        }
    }

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 9, 30, 0).unwrap()
    }

    fn script(entries: Vec<(&str, Vec<Result<Page, SourceError>>)>) -> Script {
        entries
            .into_iter()
            .map(|(channel, pages)| (channel.to_string(), pages.into_iter().collect()))
            .collect()
    }

    fn service(
        pages: Script,
        store: MemoryStore,
        settings: CollectorSettings,
    ) -> (CollectionService, Rc<RefCell<Vec<(String, usize, Option<String>)>>>) {
        let requests = Rc::new(RefCell::new(Vec::new()));
        let source = ScriptedSource {
            auth: Ok(()),
            pages,
            requests: Rc::clone(&requests),
        };
        let service = CollectionService::new(Box::new(source), Box::new(store), settings)
            .with_clock(fixed_clock);
        (service, requests)
    }

    #[test]
    fn test_two_channel_scenario() {
        let store = MemoryStore::default();
        let pages = script(vec![
            ("depression", vec![page(vec![item("d1", 100), item("d2", 101)], Some("t3_d2"))]),
            ("psychology", vec![page(vec![item("p1", 200), malformed()], None)]),
        ]);
        let (mut service, _) = service(pages, store.clone(), settings(&["depression", "psychology"], 2));

        let result = service.run().unwrap();

        assert_eq!(result.fetched, 4);
        assert_eq!(result.written, 3);
        assert_eq!(result.skipped.total(), 1);
        assert_eq!(result.skipped.malformed, 1);
        let per_channel = result.per_channel_written();
        assert_eq!(per_channel["depression"], 2);
        assert_eq!(per_channel["psychology"], 1);
        assert!(result.is_complete());

        let written = store.records.borrow();
        let ids: Vec<&str> = written.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2", "p1"]);
    }

    #[test]
    fn test_rerun_without_new_items_writes_nothing() {
        let store = MemoryStore::default();
        let first = script(vec![("depression", vec![page(vec![item("a", 1), item("b", 2)], None)])]);
        let (mut service1, _) = service(first, store.clone(), settings(&["depression"], 10));
        assert_eq!(service1.run().unwrap().written, 2);

        let second = script(vec![("depression", vec![page(vec![item("a", 1), item("b", 2)], None)])]);
        let (mut service2, _) = service(second, store.clone(), settings(&["depression"], 10));
        let result = service2.run().unwrap();

        assert_eq!(result.fetched, 2);
        assert_eq!(result.written, 0);
        assert_eq!(result.skipped.duplicate, 2);
        assert_eq!(store.records.borrow().len(), 2);
    }

    #[test]
    fn test_duplicates_across_channels_in_one_run() {
        let store = MemoryStore::default();
        let pages = script(vec![
            ("depression", vec![page(vec![item("x", 1)], None)]),
            ("mentalhealth", vec![page(vec![item("x", 1), item("y", 2)], None)]),
        ]);
        let (mut service, _) = service(pages, store.clone(), settings(&["depression", "mentalhealth"], 10));

        let result = service.run().unwrap();
        assert_eq!(result.written, 2);
        assert_eq!(result.channels[1].skipped.duplicate, 1);
    }

    #[test]
    fn test_pagination_follows_cursor_until_limit() {
        let store = MemoryStore::default();
        let pages = script(vec![(
            "depression",
            vec![
                page(vec![item("a", 1), item("b", 2)], Some("t3_b")),
                page(vec![item("c", 3), item("d", 4)], Some("t3_d")),
            ],
        )]);
        let mut cfg = settings(&["depression"], 3);
        cfg.page_size = 2;
        let (mut service, requests) = service(pages, store.clone(), cfg);

        let result = service.run().unwrap();

        assert_eq!(result.fetched, 3);
        assert_eq!(result.written, 3);
        assert_eq!(result.channels[0].pages, 2);
        let requests = requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], ("depression".to_string(), 2, None));
        assert_eq!(requests[1], ("depression".to_string(), 1, Some("t3_b".to_string())));
    }

    #[test]
    fn test_stops_when_upstream_is_exhausted() {
        let store = MemoryStore::default();
        let pages = script(vec![("depression", vec![page(vec![item("a", 1)], None)])]);
        let (mut service, requests) = service(pages, store, settings(&["depression"], 500));

        let result = service.run().unwrap();
        assert_eq!(result.fetched, 1);
        assert_eq!(requests.borrow().len(), 1);
        assert!(result.is_complete());
    }

    #[test]
    fn test_rate_limit_then_success_completes_channel() {
        let store = MemoryStore::default();
        let pages = script(vec![(
            "depression",
            vec![
                Err(SourceError::RateLimited { retry_after: None }),
                page(vec![item("a", 1)], None),
            ],
        )]);
        let (mut service, _) = service(pages, store.clone(), settings(&["depression"], 5));

        let result = service.run().unwrap();
        assert!(result.is_complete());
        assert_eq!(result.written, 1);
    }

    #[test]
    fn test_rate_limit_exhausted_is_partial_and_others_continue() {
        let store = MemoryStore::default();
        let throttled = (0..3)
            .map(|_| Err(SourceError::RateLimited { retry_after: None }))
            .collect();
        let pages = script(vec![
            ("depression", throttled),
            ("psychology", vec![page(vec![item("p1", 1)], None)]),
        ]);
        let (mut service, _) = service(pages, store.clone(), settings(&["depression", "psychology"], 5));

        let result = service.run().unwrap();

        assert!(!result.is_complete());
        assert!(matches!(result.channels[0].status, ChannelStatus::Partial { .. }));
        assert_eq!(result.channels[1].status, ChannelStatus::Complete);
        assert_eq!(result.per_channel_written()["psychology"], 1);
    }

    #[test]
    fn test_partial_failure_keeps_earlier_pages() {
        let store = MemoryStore::default();
        let pages = script(vec![(
            "depression",
            vec![
                page(vec![item("a", 1)], Some("t3_a")),
                Err(SourceError::ChannelUnavailable("r/depression returned 403".into())),
            ],
        )]);
        let (mut service, _) = service(pages, store.clone(), settings(&["depression"], 10));

        let result = service.run().unwrap();
        assert_eq!(result.written, 1);
        assert!(!result.is_complete());
        assert_eq!(store.records.borrow().len(), 1);
    }

    #[test]
    fn test_authentication_failure_aborts_before_fetch() {
        let requests = Rc::new(RefCell::new(Vec::new()));
        let source = ScriptedSource {
            auth: Err(SourceError::Authentication("invalid_grant".into())),
            pages: script(vec![("depression", vec![page(vec![item("a", 1)], None)])]),
            requests: Rc::clone(&requests),
        };
        let store = MemoryStore::default();
        let mut service = CollectionService::new(
            Box::new(source),
            Box::new(store.clone()),
            settings(&["depression"], 5),
        );

        let err = service.run().unwrap_err();
        assert!(matches!(err, CollectError::Authentication(_)));
        assert!(requests.borrow().is_empty());
        assert!(store.records.borrow().is_empty());
    }

    #[test]
    fn test_session_lost_mid_run_halts_remaining_channels() {
        let store = MemoryStore::default();
        let pages = script(vec![(
            "depression",
            vec![Err(SourceError::Authentication("token revoked".into()))],
        )]);
        let (mut service, requests) = service(pages, store, settings(&["depression", "psychology"], 5));

        let result = service.run().unwrap();
        assert!(matches!(result.channels[0].status, ChannelStatus::Partial { .. }));
        assert!(matches!(result.channels[1].status, ChannelStatus::NotAttempted { .. }));
        assert_eq!(requests.borrow().len(), 1);
    }

    #[test]
    fn test_append_failure_halts_run_but_returns_summary() {
        let store = MemoryStore {
            fail_appends: true,
            ..MemoryStore::default()
        };
        let pages = script(vec![
            ("depression", vec![page(vec![item("a", 1)], None)]),
            ("psychology", vec![page(vec![item("b", 1)], None)]),
        ]);
        let (mut service, _) = service(pages, store, settings(&["depression", "psychology"], 5));

        let result = service.run().unwrap();
        assert_eq!(result.written, 0);
        assert!(matches!(result.channels[0].status, ChannelStatus::Partial { .. }));
        assert!(matches!(result.channels[1].status, ChannelStatus::NotAttempted { .. }));
    }

    #[test]
    fn test_since_window_skips_old_items_and_stops_new_listing() {
        let store = MemoryStore::default();
        let since = Utc.timestamp_opt(1_000, 0).unwrap();
        let pages = script(vec![(
            "depression",
            vec![
                page(vec![item("fresh", 2_000), item("stale", 500)], Some("t3_stale")),
                page(vec![item("older", 100)], None),
            ],
        )]);
        let mut cfg = settings(&["depression"], 50);
        cfg.sort = Sort::New;
        cfg.since = Some(since);
        let (mut service, requests) = service(pages, store.clone(), cfg);

        let result = service.run().unwrap();
        assert_eq!(result.written, 1);
        assert_eq!(result.skipped.outside_window, 1);
        assert_eq!(requests.borrow().len(), 1);
    }

    #[test]
    fn test_collected_at_never_goes_backwards() {
        let later = fixed_clock() + ChronoDuration::hours(5);
        let store = MemoryStore::default();
        store.records.borrow_mut().push(PostRecord {
            id: "old".into(),
            channel: "depression".into(),
            created_at: 1,
            title: String::new(),
            body: String::new(),
            score: 0,
            num_comments: 0,
            author: None,
            url: None,
            over_18: false,
            is_self: true,
            collected_at: later,
        });
        let pages = script(vec![("depression", vec![page(vec![item("new", 2)], None)])]);
        let (mut service, _) = service(pages, store.clone(), settings(&["depression"], 5));

        service.run().unwrap();
        let records = store.records.borrow();
        assert_eq!(records[1].id, "new");
        assert!(records[1].collected_at >= later);
    }

    #[test]
    fn test_secondary_sink_receives_written_records() {
        let store = MemoryStore::default();
        let snapshot = MemoryStore::default();
        let pages = script(vec![("depression", vec![page(vec![item("a", 1), malformed()], None)])]);
        let (service, _) = service(pages, store.clone(), settings(&["depression"], 5));
        let mut service = service.with_sink(Box::new(snapshot.clone()));

        service.run().unwrap();
        assert_eq!(*snapshot.records.borrow(), *store.records.borrow());
        assert_eq!(snapshot.records.borrow().len(), 1);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let store = MemoryStore::default();
        let (mut service, _) = service(Script::new(), store, settings(&[], 5));
        assert!(matches!(service.run(), Err(CollectError::Settings(_))));

        let mut cfg = settings(&["depression"], 5);
        cfg.page_size = 500;
        assert!(cfg.validate().is_err());
    }
}
