//! Withings measure group → Fitbit body log mapping.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::RelayError;
use crate::oauth::withings::{MEASURE_TYPE_FAT_RATIO, MEASURE_TYPE_WEIGHT};
use crate::oauth::{BodyLog, BodyLogKind, MeasureGroup};
use crate::store::Provider;

/// Real-valued magnitude of a raw Withings reading: `value * 10^unit`.
pub fn magnitude(value: i64, unit: i32) -> f64 {
    value as f64 * 10f64.powi(unit)
}

/// Magnitude rounded to two decimals, as Fitbit expects it.
pub fn format_magnitude(value: i64, unit: i32) -> String {
    format!("{:.2}", magnitude(value, unit))
}

/// Resolve the IANA zone Withings reports for the user.
///
/// Unknown or absent zones fall back to UTC.
pub fn user_timezone(name: Option<&str>) -> Tz {
    match name.map(str::parse::<Tz>) {
        Some(Ok(tz)) => tz,
        Some(Err(_)) => {
            tracing::warn!(timezone = name, "Unknown Withings timezone, using UTC");
            Tz::UTC
        }
        None => Tz::UTC,
    }
}

/// Build the Fitbit entries for one group, weight first.
///
/// Readings are selected by type; a type missing from the group yields no
/// entry for it. Date and time are local to `tz`, as Fitbit reads them.
pub fn body_logs(group: &MeasureGroup, tz: Tz) -> Result<Vec<BodyLog>, RelayError> {
    let taken_at = DateTime::<Utc>::from_timestamp(group.date, 0)
        .ok_or_else(|| RelayError::UpstreamRequest {
            provider: Provider::Withings,
            message: format!("measure group {} has invalid date {}", group.grpid, group.date),
        })?
        .with_timezone(&tz);
    let date = taken_at.format("%Y-%m-%d").to_string();
    let time = taken_at.format("%H:%M:%S").to_string();

    let logs = [
        (BodyLogKind::Weight, MEASURE_TYPE_WEIGHT),
        (BodyLogKind::Fat, MEASURE_TYPE_FAT_RATIO),
    ]
    .into_iter()
    .filter_map(|(kind, measure_type)| {
        group.find(measure_type).map(|m| BodyLog {
            kind,
            value: format_magnitude(m.value, m.unit),
            date: date.clone(),
            time: time.clone(),
        })
    })
    .collect();

    Ok(logs)
}
