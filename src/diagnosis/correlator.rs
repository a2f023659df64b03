use chrono::{DateTime, Duration, Utc};
use log::{error, info};

use crate::clients::LogStore;
use crate::error::Result;

use super::types::{
    ExecutionWindow, LogBundle, LogEvent, LogGroup, LogGroupSet, LogKind, SkippedGroup,
    TimeBounds,
};

/// Evidence budget applied while correlating logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationPolicy {
    /// Window used when the execution window is unknown
    pub default_lookback: Duration,
    /// Native events are fetched from `[end - native_window, end]`
    pub native_window: Duration,
    /// Native pagination stops once this many events are collected
    pub native_fetch_cap: usize,
    /// Native events kept in the final bundle, latest first
    pub native_retained: usize,
}

impl Default for CorrelationPolicy {
    fn default() -> Self {
        Self {
            default_lookback: Duration::hours(1),
            native_window: Duration::minutes(30),
            native_fetch_cap: 100,
            native_retained: 50,
        }
    }
}

/// Fetches and merges log evidence for a failure window.
pub struct LogCorrelator<'a> {
    logs: &'a dyn LogStore,
    policy: CorrelationPolicy,
}

impl<'a> LogCorrelator<'a> {
    pub fn new(logs: &'a dyn LogStore, policy: CorrelationPolicy) -> Self {
        Self { logs, policy }
    }

    /// Collects evidence from every group, one group at a time in set order.
    ///
    /// A group that fails is recorded in `skipped_groups` and does not stop
    /// the others.
    pub async fn correlate(
        &self,
        groups: &LogGroupSet,
        window: ExecutionWindow,
        now: DateTime<Utc>,
    ) -> LogBundle {
        let bounds = window.or_lookback(now, self.policy.default_lookback);
        info!(
            "Fetching logs from {} to {} ({} to {})",
            bounds.start.to_rfc3339(),
            bounds.end.to_rfc3339(),
            bounds.start_ms(),
            bounds.end_ms()
        );

        let mut collected = Vec::new();
        let mut skipped = Vec::new();
        for group in groups.iter() {
            match self.fetch_group(group, bounds).await {
                Ok(events) => {
                    info!("Found {} {:?} logs in {}", events.len(), group.kind, group.name);
                    collected.extend(events);
                }
                Err(e) => {
                    error!("Error fetching logs from {}: {e}", group.name);
                    skipped.push(SkippedGroup {
                        log_group: group.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let mut bundle = assemble(collected, self.policy.native_retained);
        bundle.skipped_groups = skipped;
        info!("Returning {} logs", bundle.logs.len());
        bundle
    }

    async fn fetch_group(&self, group: &LogGroup, bounds: TimeBounds) -> Result<Vec<LogEvent>> {
        let Some(stream) = self.logs.latest_stream(&group.name).await? else {
            info!("No log streams in {}", group.name);
            return Ok(Vec::new());
        };

        let (start_ms, cap) = match group.kind {
            LogKind::Event => (bounds.start_ms(), None),
            LogKind::Native => (
                bounds.end_ms() - self.policy.native_window.num_milliseconds(),
                Some(self.policy.native_fetch_cap),
            ),
        };

        self.fetch_stream(group, &stream.log_stream_name, start_ms, bounds.end_ms(), cap)
            .await
    }

    /// Pages forward until the token stops advancing, a page comes back
    /// empty, or `cap` events have been collected.
    async fn fetch_stream(
        &self,
        group: &LogGroup,
        stream: &str,
        start_ms: i64,
        end_ms: i64,
        cap: Option<usize>,
    ) -> Result<Vec<LogEvent>> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .logs
                .get_events(&group.name, stream, start_ms, end_ms, next_token.as_deref())
                .await?;
            if page.events.is_empty() {
                break;
            }

            events.extend(page.events.into_iter().map(|raw| LogEvent {
                log_group: group.name.clone(),
                timestamp: raw.timestamp,
                message: raw.message,
                kind: group.kind,
            }));

            if cap.is_some_and(|cap| events.len() >= cap) {
                break;
            }
            match page.next_forward_token {
                Some(token) if Some(&token) != next_token.as_ref() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(events)
    }
}

/// Sorts merged evidence and applies the two-tier truncation: every
/// event-kind entry is kept, native-kind entries only the latest
/// `native_retained`.
///
/// Sorting is stable, so entries with equal timestamps keep arrival order.
pub fn assemble(mut events: Vec<LogEvent>, native_retained: usize) -> LogBundle {
    events.sort_by_key(|e| e.timestamp);

    // TODO: the native tail is taken across all native groups together, so
    // a noisy group can push a quieter group's entries out entirely; decide
    // whether to retain a per-group quota instead.
    let (mut kept, native): (Vec<LogEvent>, Vec<LogEvent>) =
        events.into_iter().partition(|e| e.kind == LogKind::Event);

    let total_events = kept.len();
    let total_native = native.len();
    let tail_start = total_native.saturating_sub(native_retained);
    kept.extend(native.into_iter().skip(tail_start));
    kept.sort_by_key(|e| e.timestamp);

    LogBundle {
        logs: kept,
        total_events,
        total_native,
        log_summary: format!("Found {total_events} events and {total_native} native logs"),
        skipped_groups: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::MemoryLogStore;
    use crate::clients::RawLogEvent;
    use chrono::TimeZone;

    const EVENT_GROUP: &str = "/aws/events/app-event-log-group";
    const NATIVE_GROUP: &str = "/aws/codebuild/app";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn raw(timestamp: i64, message: &str) -> RawLogEvent {
        RawLogEvent {
            timestamp,
            message: message.to_string(),
        }
    }

    fn log_event(timestamp: i64, kind: LogKind, message: &str) -> LogEvent {
        LogEvent {
            log_group: "g".to_string(),
            timestamp,
            message: message.to_string(),
            kind,
        }
    }

    fn build_groups() -> LogGroupSet {
        LogGroupSet::new(vec![
            LogGroup {
                name: EVENT_GROUP.to_string(),
                kind: LogKind::Event,
            },
            LogGroup {
                name: NATIVE_GROUP.to_string(),
                kind: LogKind::Native,
            },
        ])
        .unwrap()
    }

    #[cfg(test)]
    mod assemble {
        use super::*;

        #[test]
        fn keeps_all_events_and_last_native_entries() {
            let mut events: Vec<_> = (0..80)
                .map(|i| log_event(i * 10, LogKind::Native, &format!("n{i}")))
                .collect();
            events.push(log_event(5, LogKind::Event, "started"));
            events.push(log_event(795, LogKind::Event, "failed"));

            let bundle = assemble(events, 50);

            assert_eq!(bundle.total_events, 2);
            assert_eq!(bundle.total_native, 80);
            assert_eq!(bundle.logs.len(), 52);
            assert!(bundle.logs.iter().any(|e| e.message == "started"));
            let natives: Vec<_> = bundle
                .logs
                .iter()
                .filter(|e| e.kind == LogKind::Native)
                .map(|e| e.timestamp)
                .collect();
            assert_eq!(natives.first(), Some(&300));
            assert_eq!(natives.last(), Some(&790));
        }

        #[test]
        fn output_is_sorted_and_stable_for_equal_timestamps() {
            let events = vec![
                log_event(20, LogKind::Native, "b"),
                log_event(10, LogKind::Native, "a1"),
                log_event(10, LogKind::Native, "a2"),
                log_event(10, LogKind::Event, "e"),
            ];

            let bundle = assemble(events, 50);
            let messages: Vec<_> = bundle.logs.iter().map(|e| e.message.as_str()).collect();
            assert_eq!(messages, vec!["e", "a1", "a2", "b"]);
        }

        #[test]
        fn length_invariant_holds_below_retention() {
            let events = vec![
                log_event(1, LogKind::Native, "n"),
                log_event(2, LogKind::Event, "e"),
            ];
            let bundle = assemble(events, 50);
            assert_eq!(
                bundle.logs.len(),
                bundle.total_events + bundle.total_native.min(50)
            );
            assert_eq!(bundle.log_summary, "Found 1 events and 1 native logs");
        }

        #[test]
        fn empty_input_gives_empty_bundle() {
            let bundle = assemble(Vec::new(), 50);
            assert!(bundle.logs.is_empty());
            assert_eq!(bundle.total_events, 0);
            assert_eq!(bundle.total_native, 0);
        }
    }

    #[tokio::test]
    async fn native_groups_are_fetched_from_window_ending_at_failure() {
        let start = t0();
        let end = t0() + Duration::hours(2);
        let store = MemoryLogStore::new()
            .with_stream(EVENT_GROUP, "events", vec![raw(start.timestamp_millis(), "e")])
            .with_stream(NATIVE_GROUP, "run-1", vec![raw(end.timestamp_millis(), "n")]);

        LogCorrelator::new(&store, CorrelationPolicy::default())
            .correlate(&build_groups(), ExecutionWindow::new(start, end), Utc::now())
            .await;

        let requests = store.requests();
        let event_request = requests.iter().find(|r| r.log_group == EVENT_GROUP).unwrap();
        assert_eq!(event_request.start_ms, start.timestamp_millis());
        assert_eq!(event_request.end_ms, end.timestamp_millis());

        let native: Vec<_> = requests.iter().filter(|r| r.log_group == NATIVE_GROUP).collect();
        assert!(!native.is_empty());
        for request in native {
            assert_eq!(
                request.start_ms,
                (end - Duration::minutes(30)).timestamp_millis()
            );
            assert_eq!(request.end_ms, end.timestamp_millis());
        }
    }

    #[tokio::test]
    async fn native_pagination_stops_at_cap() {
        let end = t0() + Duration::minutes(20);
        let natives = (0..500).map(|i| raw(t0().timestamp_millis() + i, "n")).collect();
        let store = MemoryLogStore::new()
            .with_stream(NATIVE_GROUP, "run-1", natives)
            .with_page_size(40);
        let groups = LogGroupSet::new(vec![LogGroup {
            name: NATIVE_GROUP.to_string(),
            kind: LogKind::Native,
        }])
        .unwrap();

        let bundle = LogCorrelator::new(&store, CorrelationPolicy::default())
            .correlate(&groups, ExecutionWindow::new(t0(), end), Utc::now())
            .await;

        // 40 + 40 + 40 crosses the cap of 100
        assert_eq!(store.requests().len(), 3);
        assert_eq!(bundle.total_native, 120);
        assert_eq!(bundle.logs.len(), 50);
    }

    #[tokio::test]
    async fn event_groups_are_paginated_without_cap() {
        let events = (0..250).map(|i| raw(t0().timestamp_millis() + i, "e")).collect();
        let store = MemoryLogStore::new()
            .with_stream(EVENT_GROUP, "events", events)
            .with_page_size(100);
        let groups = LogGroupSet::new(vec![LogGroup {
            name: EVENT_GROUP.to_string(),
            kind: LogKind::Event,
        }])
        .unwrap();

        let bundle = LogCorrelator::new(&store, CorrelationPolicy::default())
            .correlate(
                &groups,
                ExecutionWindow::new(t0(), t0() + Duration::minutes(5)),
                Utc::now(),
            )
            .await;

        assert_eq!(bundle.total_events, 250);
        assert_eq!(bundle.logs.len(), 250);
        // three full-or-partial pages and the empty terminating page
        assert_eq!(store.requests().len(), 4);
    }

    #[tokio::test]
    async fn failing_group_is_skipped() {
        let store = MemoryLogStore::new()
            .with_failing_group(EVENT_GROUP)
            .with_stream(NATIVE_GROUP, "run-1", vec![raw(t0().timestamp_millis(), "n")]);

        let bundle = LogCorrelator::new(&store, CorrelationPolicy::default())
            .correlate(
                &build_groups(),
                ExecutionWindow::new(t0(), t0() + Duration::minutes(5)),
                Utc::now(),
            )
            .await;

        assert_eq!(bundle.total_native, 1);
        assert_eq!(bundle.skipped_groups.len(), 1);
        assert_eq!(bundle.skipped_groups[0].log_group, EVENT_GROUP);
    }

    #[tokio::test]
    async fn unknown_window_uses_last_hour() {
        let now = t0();
        let store = MemoryLogStore::new()
            .with_stream(EVENT_GROUP, "events", vec![raw(now.timestamp_millis() - 1, "e")]);
        let groups = LogGroupSet::new(vec![LogGroup {
            name: EVENT_GROUP.to_string(),
            kind: LogKind::Event,
        }])
        .unwrap();

        let bundle = LogCorrelator::new(&store, CorrelationPolicy::default())
            .correlate(&groups, ExecutionWindow::unknown(), now)
            .await;

        assert_eq!(bundle.total_events, 1);
        let request = &store.requests()[0];
        assert_eq!(request.start_ms, (now - Duration::hours(1)).timestamp_millis());
        assert_eq!(request.end_ms, now.timestamp_millis());
    }

    #[tokio::test]
    async fn group_without_streams_contributes_nothing() {
        let store = MemoryLogStore::new();

        let bundle = LogCorrelator::new(&store, CorrelationPolicy::default())
            .correlate(&build_groups(), ExecutionWindow::unknown(), t0())
            .await;

        assert!(bundle.logs.is_empty());
        assert!(bundle.skipped_groups.is_empty());
        assert!(store.requests().is_empty());
    }
}
