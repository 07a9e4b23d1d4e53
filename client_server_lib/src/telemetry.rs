//! Fleetdash telemetry records as served by the cloud backend.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub const ACCEL_PREFIX: &str = "accel_";
pub const CURRENT_PREFIX: &str = "current_";

// Timestamps without an offset are read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const NAIVE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Anything but a JSON number reads as absent.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_f64())
}

/// A group that is not an object reads as absent.
fn lenient_group<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).ok())
}

/// One reading from one device at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub device_id: String,
    pub timestamp: String,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub voltage: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub signal_strength: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub speed: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub power: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_group",
        skip_serializing_if = "Option::is_none"
    )]
    pub gnss: Option<GnssFix>,
    #[serde(
        default,
        deserialize_with = "lenient_group",
        skip_serializing_if = "Option::is_none"
    )]
    pub accel: Option<Acceleration>,
    #[serde(
        default,
        deserialize_with = "lenient_group",
        skip_serializing_if = "Option::is_none"
    )]
    pub current: Option<CurrentStats>,
    // Firmware revisions add scalars faster than this struct learns about them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Position and fix quality reported by the GNSS receiver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GnssFix {
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub lat: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub lon: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub alt: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub speed: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub heading: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub hdop: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub satellites: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub quality: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub x: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub y: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub z: Option<f64>,
}

/// Min/avg/max current over the reporting window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentStats {
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub min: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub avg: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub max: Option<f64>,
}

/// Parsed record timestamp.
///
/// Valid instants order chronologically and always before unparseable ones,
/// which order among themselves by their raw text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SampleTime {
    At(DateTime<Utc>),
    Unparseable(String),
}

impl SampleTime {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return SampleTime::At(ts.with_timezone(&Utc));
        }

        let naive = NAIVE_DATETIME_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(text, NAIVE_DATE_FORMAT)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            });

        match naive {
            Some(naive) => SampleTime::At(naive.and_utc()),
            None => SampleTime::Unparseable(raw.to_string()),
        }
    }

    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            SampleTime::At(ts) => Some(*ts),
            SampleTime::Unparseable(_) => None,
        }
    }

    /// Display string used for chart axis labels.
    pub fn label(&self) -> String {
        match self {
            SampleTime::At(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            SampleTime::Unparseable(raw) => raw.clone(),
        }
    }
}

impl Ord for SampleTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SampleTime::At(a), SampleTime::At(b)) => a.cmp(b),
            (SampleTime::At(_), SampleTime::Unparseable(_)) => Ordering::Less,
            (SampleTime::Unparseable(_), SampleTime::At(_)) => Ordering::Greater,
            (SampleTime::Unparseable(a), SampleTime::Unparseable(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SampleTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TelemetryRecord {
    pub fn sample_time(&self) -> SampleTime {
        SampleTime::parse(&self.timestamp)
    }

    /// Resolve a requested field against this record.
    ///
    /// Lookup order: top-level scalar, GNSS group, current group, acceleration
    /// group. The first group defining the field wins.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.scalar(name)
            .or_else(|| self.gnss.as_ref().and_then(|g| g.field(name)))
            .or_else(|| self.current.as_ref().and_then(|c| c.field(name)))
            .or_else(|| self.accel.as_ref().and_then(|a| a.field(name)))
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        match name {
            "voltage" => self.voltage,
            "temperature" => self.temperature,
            "signalStrength" => self.signal_strength,
            "speed" => self.speed,
            "power" => self.power,
            _ => self.extra.get(name).and_then(Value::as_f64),
        }
    }
}

impl GnssFix {
    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            "lat" => self.lat,
            "lon" => self.lon,
            "alt" => self.alt,
            "speed" => self.speed,
            "heading" => self.heading,
            "hdop" => self.hdop,
            "satellites" => self.satellites,
            "quality" => self.quality,
            _ => self.extra.get(name).and_then(Value::as_f64),
        }
    }
}

impl CurrentStats {
    pub fn field(&self, name: &str) -> Option<f64> {
        match name.strip_prefix(CURRENT_PREFIX).unwrap_or(name) {
            "min" => self.min,
            "avg" => self.avg,
            "max" => self.max,
            _ => None,
        }
    }
}

impl Acceleration {
    pub fn field(&self, name: &str) -> Option<f64> {
        match name.strip_prefix(ACCEL_PREFIX)? {
            "x" => self.x,
            "y" => self.y,
            "z" => self.z,
            _ => None,
        }
    }
}

/// Decode a history payload: either a bare array of records or an object
/// wrapping them under `items`.
pub fn records_from_json(payload: Value) -> serde_json::Result<Vec<TelemetryRecord>> {
    match payload {
        Value::Object(mut map) if map.contains_key("items") => {
            serde_json::from_value(map.remove("items").unwrap_or(Value::Null))
        }
        other => serde_json::from_value(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> TelemetryRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn top_level_scalar_wins_over_gnss() {
        let r = record(json!({
            "deviceId": "A",
            "timestamp": "2024-05-01T10:00:00Z",
            "speed": 12.5,
            "gnss": {"speed": 99.0, "lat": 48.1}
        }));
        assert_eq!(r.field("speed"), Some(12.5));
        assert_eq!(r.field("lat"), Some(48.1));
    }

    #[test]
    fn nested_groups_resolve_by_name() {
        let r = record(json!({
            "deviceId": "A",
            "timestamp": "2024-05-01T10:00:00Z",
            "accel": {"x": 1, "y": 2, "z": 3},
            "current": {"min": 0.1, "avg": 0.4, "max": 0.9}
        }));
        assert_eq!(r.field("accel_y"), Some(2.0));
        assert_eq!(r.field("avg"), Some(0.4));
        assert_eq!(r.field("current_max"), Some(0.9));
        assert_eq!(r.field("accel_w"), None);
        assert_eq!(r.field("y"), None);
    }

    #[test]
    fn unknown_scalars_are_kept() {
        let r = record(json!({
            "deviceId": "A",
            "timestamp": "2024-05-01T10:00:00Z",
            "humidity": 41,
            "firmware": "1.2.3"
        }));
        assert_eq!(r.field("humidity"), Some(41.0));
        assert_eq!(r.field("firmware"), None);
        assert_eq!(r.field("voltage"), None);
    }

    #[test]
    fn unparseable_times_sort_last() {
        let valid = SampleTime::parse("2024-05-01T10:00:00+02:00");
        let invalid = SampleTime::parse("yesterday");
        assert!(valid < invalid);
        assert_eq!(valid.label(), "2024-05-01 08:00:00");
        assert_eq!(invalid.label(), "yesterday");
        assert_eq!(invalid.instant(), None);
    }

    #[test]
    fn offsetless_times_are_utc() {
        let plain = SampleTime::parse("2024-05-01T09:00:00");
        assert_eq!(plain.label(), "2024-05-01 09:00:00");
        assert!(plain < SampleTime::parse("2024-05-01T10:00:00.000"));
        assert_eq!(
            SampleTime::parse("2024-05-01 10:00:00"),
            SampleTime::parse("2024-05-01T10:00:00Z")
        );
        assert_eq!(SampleTime::parse("2024-05-01").label(), "2024-05-01 00:00:00");
        assert!(SampleTime::parse("2024-13-01T00:00:00").instant().is_none());
    }

    #[test]
    fn non_numeric_values_read_as_absent() {
        let records = records_from_json(json!([
            {"deviceId": "A", "timestamp": "2024-05-01T10:00:00Z", "voltage": 5},
            {
                "deviceId": "B",
                "timestamp": "2024-05-01T10:00:00Z",
                "temperature": "n/a",
                "voltage": 7,
                "gnss": "no fix",
                "accel": {"x": null, "y": "?", "z": 3}
            }
        ]))
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].temperature, None);
        assert_eq!(records[1].field("voltage"), Some(7.0));
        assert_eq!(records[1].gnss, None);
        assert_eq!(records[1].field("accel_y"), None);
        assert_eq!(records[1].field("accel_z"), Some(3.0));
    }

    #[test]
    fn history_payload_accepts_wrapped_items() {
        let wrapped = json!({"items": [{"deviceId": "A", "timestamp": "x"}], "next": null});
        assert_eq!(records_from_json(wrapped).unwrap().len(), 1);

        let bare = json!([{"deviceId": "B", "timestamp": "y"}]);
        assert_eq!(records_from_json(bare).unwrap()[0].device_id, "B");
    }
}
