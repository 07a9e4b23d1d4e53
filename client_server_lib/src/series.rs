//! Fleetdash series builder.
//!
//! Converts raw per-device readings into a timestamp-aligned table with one
//! column per device and field, ready to be drawn as overlaid line series.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::telemetry::{SampleTime, TelemetryRecord};
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{HashMap, HashSet};

/// One output row: a timestamp label plus a value (or null) per composite key.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesRow {
    pub label: String,
    pub time: Option<DateTime<Utc>>,
    pub values: Vec<(String, Option<f64>)>,
}

impl SeriesRow {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, value)| *value)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.values.iter().any(|(k, _)| k == key)
    }
}

// Flattened so chart widgets can index rows by composite key directly.
impl Serialize for SeriesRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("label", &self.label)?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct SeriesTable {
    /// Composite keys in column order: devices-major, fields-minor.
    pub keys: Vec<String>,
    pub rows: Vec<SeriesRow>,
    #[serde(skip)]
    devices: Vec<String>,
}

impl SeriesTable {
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// All values of one composite key, row by row.
    pub fn column(&self, key: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.keys.iter().position(|k| k == key)?;
        Some(self.rows.iter().map(|row| row.values[idx].1).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn composite_key(device_id: &str, field: &str) -> String {
    format!("{}-{}", device_id, field)
}

/// Build the chart table for `records` and the requested `fields`.
///
/// Records are stably sorted by timestamp, so when several records share a
/// device and instant the one appearing first in the input is used.
/// Unparseable timestamps sort after all valid ones.
pub fn build_series<F: AsRef<str>>(records: &[TelemetryRecord], fields: &[F]) -> SeriesTable {
    if records.is_empty() {
        return SeriesTable::default();
    }

    let mut seen_fields = HashSet::new();
    let fields: Vec<&str> = fields
        .iter()
        .map(AsRef::as_ref)
        .filter(|f| seen_fields.insert(*f))
        .collect();

    let mut sorted: Vec<(SampleTime, &TelemetryRecord)> =
        records.iter().map(|r| (r.sample_time(), r)).collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut devices: Vec<&str> = Vec::new();
    let mut times: Vec<&SampleTime> = Vec::new();
    let mut matches: HashMap<(usize, &str), &TelemetryRecord> = HashMap::new();

    for (time, record) in &sorted {
        if times.last().map_or(true, |last| *last != time) {
            times.push(time);
        }
        let device = record.device_id.as_str();
        if !devices.contains(&device) {
            devices.push(device);
        }
        matches.entry((times.len() - 1, device)).or_insert(*record);
    }

    let keys: Vec<String> = devices
        .iter()
        .flat_map(|device| fields.iter().map(move |field| composite_key(device, field)))
        .collect();

    let rows = times
        .iter()
        .enumerate()
        .map(|(idx, time)| {
            let mut values = Vec::with_capacity(keys.len());
            let mut key_iter = keys.iter();
            for device in &devices {
                let record = matches.get(&(idx, *device));
                for field in &fields {
                    let value = record.and_then(|r| r.field(field));
                    if let Some(key) = key_iter.next() {
                        values.push((key.clone(), value));
                    }
                }
            }
            SeriesRow {
                label: time.label(),
                time: time.instant(),
                values,
            }
        })
        .collect();

    log::trace!(
        "built series: {} records, {} devices, {} fields, {} rows",
        records.len(),
        devices.len(),
        fields.len(),
        times.len()
    );

    SeriesTable {
        keys,
        rows,
        devices: devices.into_iter().map(str::to_string).collect(),
    }
}

/// Split a comma separated field list as sent in `fields=voltage,accel_x`.
pub fn parse_field_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::records_from_json;
    use proptest::prelude::*;
    use serde_json::json;

    fn reading(device: &str, ts: &str, voltage: Option<f64>) -> TelemetryRecord {
        let mut value = json!({"deviceId": device, "timestamp": ts});
        if let Some(v) = voltage {
            value["voltage"] = json!(v);
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn aligns_devices_on_shared_timestamps() {
        let records = vec![
            reading("A", "2024-05-01T10:00:00Z", Some(5.0)),
            reading("B", "2024-05-01T10:00:00Z", Some(7.0)),
            reading("A", "2024-05-01T11:00:00Z", Some(6.0)),
        ];
        let table = build_series(&records, &["voltage"]);

        assert_eq!(table.keys, vec!["A-voltage", "B-voltage"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("A-voltage"), Some(5.0));
        assert_eq!(table.rows[0].get("B-voltage"), Some(7.0));
        assert_eq!(table.rows[1].get("A-voltage"), Some(6.0));
        assert!(table.rows[1].has_key("B-voltage"));
        assert_eq!(table.rows[1].get("B-voltage"), None);
        assert_eq!(table.rows[0].label, "2024-05-01 10:00:00");
    }

    #[test]
    fn empty_input_gives_empty_table() {
        let table = build_series(&[], &["voltage"]);
        assert!(table.rows.is_empty());
        assert!(table.keys.is_empty());
    }

    #[test]
    fn rows_follow_time_not_input_order() {
        let records = vec![
            reading("A", "2024-05-01T12:00:00Z", Some(3.0)),
            reading("A", "2024-05-01T09:00:00Z", Some(1.0)),
            reading("A", "2024-05-01T10:30:00+01:00", Some(2.0)),
        ];
        let table = build_series(&records, &["voltage"]);
        assert_eq!(
            table.column("A-voltage").unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn same_instant_in_different_offsets_is_one_row() {
        let records = vec![
            reading("A", "2024-05-01T10:00:00Z", Some(1.0)),
            reading("B", "2024-05-01T12:00:00+02:00", Some(2.0)),
        ];
        let table = build_series(&records, &["voltage"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("B-voltage"), Some(2.0));
    }

    #[test]
    fn duplicate_device_and_time_takes_first_input_record() {
        let records = vec![
            reading("A", "2024-05-01T10:00:00Z", Some(1.0)),
            reading("A", "2024-05-01T10:00:00Z", Some(2.0)),
        ];
        let table = build_series(&records, &["voltage"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("A-voltage"), Some(1.0));
    }

    #[test]
    fn unparseable_timestamps_come_last() {
        let records = vec![
            reading("A", "not-a-date", Some(9.0)),
            reading("A", "2024-05-01T10:00:00Z", Some(1.0)),
        ];
        let table = build_series(&records, &["voltage"]);
        assert_eq!(table.rows[1].label, "not-a-date");
        assert_eq!(table.rows[1].time, None);
        assert_eq!(table.rows[1].get("A-voltage"), Some(9.0));
    }

    #[test]
    fn offsetless_timestamps_sort_with_the_rest() {
        let records = vec![
            reading("A", "2024-05-01T12:00:00Z", Some(3.0)),
            reading("A", "2024-05-01T09:00:00", Some(1.0)),
            reading("A", "2024-05-01T10:00:00.000", Some(2.0)),
        ];
        let table = build_series(&records, &["voltage"]);

        let labels: Vec<&str> = table.rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["2024-05-01 09:00:00", "2024-05-01 10:00:00", "2024-05-01 12:00:00"]
        );
        assert_eq!(
            table.column("A-voltage").unwrap(),
            vec![Some(1.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn one_bad_value_only_nulls_its_own_cell() {
        let records = records_from_json(json!([
            {"deviceId": "A", "timestamp": "2024-05-01T10:00:00Z", "voltage": 5, "temperature": 20},
            {"deviceId": "B", "timestamp": "2024-05-01T10:00:00Z", "voltage": 7, "temperature": "n/a"}
        ]))
        .unwrap();
        let table = build_series(&records, &["voltage", "temperature"]);

        assert_eq!(table.rows.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.get("A-voltage"), Some(5.0));
        assert_eq!(row.get("A-temperature"), Some(20.0));
        assert_eq!(row.get("B-voltage"), Some(7.0));
        assert!(row.has_key("B-temperature"));
        assert_eq!(row.get("B-temperature"), None);
    }

    #[test]
    fn nested_acceleration_axis() {
        let record: TelemetryRecord = serde_json::from_value(json!({
            "deviceId": "A",
            "timestamp": "2024-05-01T10:00:00Z",
            "accel": {"x": 1, "y": 2, "z": 3}
        }))
        .unwrap();
        let table = build_series(&[record], &["accel_y"]);
        assert_eq!(table.rows[0].get("A-accel_y"), Some(2.0));
    }

    #[test]
    fn columns_are_device_major() {
        let records = vec![
            reading("B", "2024-05-01T10:00:00Z", None),
            reading("A", "2024-05-01T10:00:00Z", None),
        ];
        let table = build_series(&records, &["voltage", "temperature", "voltage"]);
        assert_eq!(
            table.keys,
            vec!["B-voltage", "B-temperature", "A-voltage", "A-temperature"]
        );
        assert_eq!(table.devices(), &["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn rows_serialize_flat() {
        let records = vec![reading("A", "2024-05-01T10:00:00Z", Some(5.0))];
        let table = build_series(&records, &["voltage", "power"]);
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(
            value,
            json!({
                "keys": ["A-voltage", "A-power"],
                "rows": [{"label": "2024-05-01 10:00:00", "A-voltage": 5.0, "A-power": null}]
            })
        );
    }

    #[test]
    fn field_list_parsing() {
        assert_eq!(
            parse_field_list("voltage, accel_x,,temperature "),
            vec!["voltage", "accel_x", "temperature"]
        );
        assert!(parse_field_list("").is_empty());
    }

    fn arb_record() -> impl Strategy<Value = TelemetryRecord> {
        (
            prop::sample::select(vec!["A", "B", "C"]),
            0u32..6,
            prop::option::of(-50.0f64..50.0),
        )
            .prop_map(|(device, hour, voltage)| {
                reading(device, &format!("2024-05-01T{:02}:00:00Z", hour), voltage)
            })
    }

    proptest! {
        #[test]
        fn row_count_matches_distinct_timestamps(records in prop::collection::vec(arb_record(), 0..40)) {
            let table = build_series(&records, &["voltage"]);
            let distinct: HashSet<&str> = records.iter().map(|r| r.timestamp.as_str()).collect();
            prop_assert_eq!(table.rows.len(), distinct.len());
        }

        #[test]
        fn every_row_has_the_full_cross_product(records in prop::collection::vec(arb_record(), 1..40)) {
            let fields = ["voltage", "temperature"];
            let table = build_series(&records, &fields);
            let devices: HashSet<&str> = records.iter().map(|r| r.device_id.as_str()).collect();
            prop_assert_eq!(table.keys.len(), devices.len() * fields.len());
            for row in &table.rows {
                let row_keys: Vec<&String> = row.values.iter().map(|(k, _)| k).collect();
                let expected: Vec<&String> = table.keys.iter().collect();
                prop_assert_eq!(row_keys, expected);
                for device in &devices {
                    prop_assert_eq!(row.get(&composite_key(device, "temperature")), None);
                }
            }
        }

        #[test]
        fn first_input_record_wins_on_ties(records in prop::collection::vec(arb_record(), 1..40)) {
            let table = build_series(&records, &["voltage"]);
            for row in &table.rows {
                let Some(time) = row.time else { continue };
                for device in table.devices() {
                    let first = records.iter().find(|r| {
                        &r.device_id == device && r.sample_time().instant() == Some(time)
                    });
                    let expected = first.and_then(|r| r.voltage);
                    prop_assert_eq!(row.get(&composite_key(device, "voltage")), expected);
                }
            }
        }
    }
}
