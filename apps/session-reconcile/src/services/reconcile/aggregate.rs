use std::collections::HashMap;
use std::time::Duration;

use super::types::{RawEvent, SessionSummary, SourceSide};

struct SessionAccumulator {
    representative: usize,
    event_count: u64,
    has_purchase: bool,
    engagement_time: Duration,
}

/// Folds event rows into one summary per session id.
///
/// The representative row (start timestamp and every attribute) is the event with the
/// smallest timestamp; among events sharing that timestamp the one that appears first in
/// `events` wins. Summaries are returned in order of each session's first appearance.
pub fn aggregate_sessions(
    side: SourceSide,
    events: &[RawEvent],
    purchase_event_name: &str,
) -> Vec<SessionSummary> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut accumulators: Vec<SessionAccumulator> = Vec::new();

    for (idx, event) in events.iter().enumerate() {
        let is_purchase = event.purchase || event.event_name == purchase_event_name;
        match slots.get(event.session_id.as_str()) {
            Some(&slot) => {
                let acc = &mut accumulators[slot];
                if event.timestamp < events[acc.representative].timestamp {
                    acc.representative = idx;
                }
                acc.event_count += 1;
                acc.has_purchase |= is_purchase;
                acc.engagement_time += event.engagement_time;
            }
            None => {
                slots.insert(event.session_id.as_str(), accumulators.len());
                accumulators.push(SessionAccumulator {
                    representative: idx,
                    event_count: 1,
                    has_purchase: is_purchase,
                    engagement_time: event.engagement_time,
                });
            }
        }
    }

    accumulators
        .into_iter()
        .map(|acc| {
            let rep = &events[acc.representative];
            SessionSummary {
                side,
                session_id: rep.session_id.clone(),
                start_timestamp: rep.timestamp,
                device_category: rep.device_category,
                operating_system: rep.operating_system.clone(),
                browser: rep.browser.clone(),
                country: rep.country.clone(),
                traffic_source: rep.traffic_source.clone(),
                event_count: acc.event_count,
                has_purchase: acc.has_purchase,
                engagement_time: acc.engagement_time,
            }
        })
        .collect()
}
