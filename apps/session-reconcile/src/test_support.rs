use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::services::reconcile::pipeline::{reconcile_sessions, ReconcileOptions};
use crate::services::reconcile::profile::{CompositeShareSpec, ProfileOptions};
use crate::services::reconcile::types::{
    DeviceCategory, Diagnostics, RawEvent, Reconciliation, RunParams, SessionSummary, SourceLabels,
    SourceSide,
};
use crate::time::DateRange;

/// 2026-01-06 00:00:00 UTC (a Tuesday) plus `secs`.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn event(session_id: &str, secs: i64, name: &str) -> RawEvent {
    RawEvent {
        side: SourceSide::A,
        session_id: session_id.to_string(),
        timestamp: ts(secs),
        event_name: name.to_string(),
        device_category: DeviceCategory::Desktop,
        operating_system: "Windows".to_string(),
        browser: "Chrome".to_string(),
        country: "Australia".to_string(),
        traffic_source: None,
        purchase: false,
        engagement_time: Duration::ZERO,
    }
}

pub fn session(side: SourceSide, id: &str, secs: i64, device: DeviceCategory, country: &str) -> SessionSummary {
    SessionSummary {
        side,
        session_id: id.to_string(),
        start_timestamp: ts(secs),
        device_category: device,
        operating_system: "Windows".to_string(),
        browser: "Chrome".to_string(),
        country: country.to_string(),
        traffic_source: None,
        event_count: 1,
        has_purchase: false,
        engagement_time: Duration::ZERO,
    }
}

pub fn profile_options() -> ProfileOptions {
    ProfileOptions {
        timezone: chrono_tz::UTC,
        business_hours_start: 9,
        business_hours_end: 17,
        composites: vec![
            CompositeShareSpec::extension_capable_browser(&[
                "Chrome".to_string(),
                "Firefox".to_string(),
                "Edge".to_string(),
            ]),
            CompositeShareSpec::desktop_windows(),
        ],
    }
}

pub fn reconcile_options() -> ReconcileOptions {
    ReconcileOptions {
        time_window: Duration::from_secs(300),
        timezone: chrono_tz::UTC,
        canonical_side: SourceSide::A,
        purchase_event_name: "purchase".to_string(),
        exclude_bot_user_agents: true,
        fetch_timeout: Duration::from_secs(120),
        profile: profile_options(),
    }
}

pub fn run_params() -> RunParams {
    reconcile_options().run_params()
}

/// Two matched pairs plus one unmatched session per side. Category sizes are powers of two
/// so every derived percentage is exact in binary floating point.
pub fn sample_reconciliation() -> Reconciliation {
    let mut a1 = session(SourceSide::A, "a1", 10 * 3600, DeviceCategory::Desktop, "Australia");
    a1.traffic_source = Some("google".to_string());
    a1.has_purchase = true;
    a1.event_count = 7;
    a1.engagement_time = Duration::from_millis(1500);
    let mut a2 = session(SourceSide::A, "a2", 20 * 3600, DeviceCategory::Mobile, "Australia");
    a2.operating_system = "iOS".to_string();
    a2.browser = "Safari".to_string();
    a2.engagement_time = Duration::from_millis(2500);
    let mut a3 = session(SourceSide::A, "a3", 30 * 3600, DeviceCategory::Desktop, "China");
    a3.browser = "Firefox".to_string();

    let mut b1 = a1.clone();
    b1.side = SourceSide::B;
    b1.session_id = "b1".to_string();
    b1.start_timestamp = ts(10 * 3600 + 2);
    let mut b2 = a2.clone();
    b2.side = SourceSide::B;
    b2.session_id = "b2".to_string();
    b2.start_timestamp = ts(20 * 3600 - 40);
    b2.traffic_source = Some("(direct)".to_string());
    let b3 = session(SourceSide::B, "b3", 40 * 3600, DeviceCategory::Tablet, "New Zealand");

    let range = DateRange::new(
        NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
        NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
    )
    .unwrap();
    let labels = SourceLabels {
        a: "sst".to_string(),
        b: "direct".to_string(),
    };
    let diagnostics = Diagnostics {
        a_rows: 3,
        b_rows: 3,
        ..Diagnostics::default()
    };
    reconcile_sessions(
        &[a1, a2, a3],
        &[b1, b2, b3],
        range,
        labels,
        &reconcile_options(),
        diagnostics,
    )
    .expect("sample reconciliation")
}
