//! Time-series telemetry: glucose samples, pump events and carb entries.
//!
//! Every stream is kept newest-first by its ordering key (epoch ms).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::results::TempBasal;
use crate::time;

/// Anything that lives in a history stream.
pub trait Timestamped {
    /// Ordering key in epoch milliseconds.
    fn ordering_key(&self) -> i64;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSample {
    /// Epoch milliseconds.
    pub date: i64,
    #[serde(alias = "sgv")]
    pub glucose: f64,
    #[serde(default, alias = "device", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Display timestamp as sent by the client; never used for ordering.
    #[serde(default, alias = "dateString", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

impl GlucoseSample {
    pub fn new(at: DateTime<Utc>, glucose: f64, source: &str) -> Self {
        Self {
            date: time::to_millis(&at),
            glucose,
            source: Some(source.to_string()),
            timestamp: Some(time::format(&at)),
            direction: None,
        }
    }
}

impl Timestamped for GlucoseSample {
    fn ordering_key(&self) -> i64 {
        self.date
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PumpEventKind {
    Bolus,
    TempBasal,
    TempBasalDuration,
    Other,
}

/// A pump history record. Only the tag and timestamp are checked; the
/// type-specific payload is carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PumpEvent {
    #[serde(with = "time::flexible")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "_type")]
    pub event_type: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl PumpEvent {
    pub fn kind(&self) -> PumpEventKind {
        match self.event_type.as_str() {
            "Bolus" | "SMB" => PumpEventKind::Bolus,
            "TempBasal" => PumpEventKind::TempBasal,
            "TempBasalDuration" => PumpEventKind::TempBasalDuration,
            _ => PumpEventKind::Other,
        }
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }

    /// Bolus amount in units.
    pub fn amount(&self) -> Option<f64> {
        self.number("amount").or_else(|| self.number("insulin"))
    }

    /// Temp basal rate in U/h.
    pub fn rate(&self) -> Option<f64> {
        self.number("rate")
    }

    /// Duration in minutes, from either pump or careportal spelling.
    pub fn duration_minutes(&self) -> Option<f64> {
        self.number("duration (min)").or_else(|| self.number("duration"))
    }

    pub fn bolus(at: DateTime<Utc>, amount: f64) -> Self {
        let mut payload = Map::new();
        payload.insert("amount".into(), amount.into());
        Self {
            timestamp: at,
            event_type: "Bolus".into(),
            payload,
        }
    }

    /// The pump reports a temp basal as two records sharing a timestamp.
    pub fn temp_basal_pair(at: DateTime<Utc>, rate: f64, minutes: f64) -> [Self; 2] {
        let mut rate_payload = Map::new();
        rate_payload.insert("rate".into(), rate.into());
        rate_payload.insert("temp".into(), "absolute".into());
        let mut duration_payload = Map::new();
        duration_payload.insert("duration (min)".into(), minutes.into());
        [
            Self {
                timestamp: at,
                event_type: "TempBasal".into(),
                payload: rate_payload,
            },
            Self {
                timestamp: at,
                event_type: "TempBasalDuration".into(),
                payload: duration_payload,
            },
        ]
    }
}

impl Timestamped for PumpEvent {
    fn ordering_key(&self) -> i64 {
        time::to_millis(&self.timestamp)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarbEntry {
    #[serde(with = "time::flexible")]
    pub timestamp: DateTime<Utc>,
    pub carbs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entered_by: Option<String>,
}

impl CarbEntry {
    pub fn new(at: DateTime<Utc>, carbs: f64, entered_by: &str) -> Self {
        Self {
            timestamp: at,
            carbs,
            entered_by: Some(entered_by.to_string()),
        }
    }
}

impl Timestamped for CarbEntry {
    fn ordering_key(&self) -> i64 {
        time::to_millis(&self.timestamp)
    }
}

/// Stable sort, newest first.
pub fn sort_newest_first<T: Timestamped>(items: &mut [T]) {
    items.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));
}

pub fn is_newest_first<T: Timestamped>(items: &[T]) -> bool {
    items
        .windows(2)
        .all(|w| w[0].ordering_key() >= w[1].ordering_key())
}

/// The three streams of one patient.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub glucose: Vec<GlucoseSample>,
    pub pump: Vec<PumpEvent>,
    pub carbs: Vec<CarbEntry>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCounts {
    pub glucose: usize,
    pub pump: usize,
    pub carbs: usize,
}

impl HistoryCounts {
    pub fn total(&self) -> usize {
        self.glucose + self.pump + self.carbs
    }
}

impl History {
    pub fn sort(&mut self) {
        sort_newest_first(&mut self.glucose);
        sort_newest_first(&mut self.pump);
        sort_newest_first(&mut self.carbs);
    }

    pub fn is_sorted(&self) -> bool {
        is_newest_first(&self.glucose) && is_newest_first(&self.pump) && is_newest_first(&self.carbs)
    }

    /// Largest ordering key across all three streams.
    pub fn newest_key(&self) -> Option<i64> {
        let glucose = self.glucose.iter().map(Timestamped::ordering_key);
        let pump = self.pump.iter().map(Timestamped::ordering_key);
        let carbs = self.carbs.iter().map(Timestamped::ordering_key);
        glucose.chain(pump).chain(carbs).max()
    }

    pub fn counts(&self) -> HistoryCounts {
        HistoryCounts {
            glucose: self.glucose.len(),
            pump: self.pump.len(),
            carbs: self.carbs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    /// Newest temp basal on record, pairing the rate record with the
    /// duration record that shares its timestamp. Expects sorted streams.
    pub fn latest_temp_basal(&self) -> Option<TempBasal> {
        let rate_event = self
            .pump
            .iter()
            .find(|e| e.kind() == PumpEventKind::TempBasal && e.rate().is_some())?;
        let duration = self
            .pump
            .iter()
            .find(|e| {
                e.kind() == PumpEventKind::TempBasalDuration && e.timestamp == rate_event.timestamp
            })
            .and_then(PumpEvent::duration_minutes)
            .or_else(|| rate_event.duration_minutes())
            .unwrap_or(0.0);

        Some(TempBasal {
            rate: rate_event.rate().unwrap_or(0.0),
            duration,
            temp: "absolute".into(),
            started_at: Some(rate_event.timestamp),
        })
    }
}

/// New telemetry supplied with a calculate or ingest request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewData {
    #[serde(default)]
    pub glucose_readings: Vec<GlucoseSample>,
    #[serde(default)]
    pub pump_events: Vec<PumpEvent>,
    #[serde(default)]
    pub carb_entries: Vec<CarbEntry>,
}

impl NewData {
    pub fn is_empty(&self) -> bool {
        self.glucose_readings.is_empty() && self.pump_events.is_empty() && self.carb_entries.is_empty()
    }
}

/// History seeded at initialization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    #[serde(default)]
    pub glucose_history: Vec<GlucoseSample>,
    #[serde(default)]
    pub pump_history: Vec<PumpEvent>,
    #[serde(default)]
    pub carb_history: Vec<CarbEntry>,
}

impl From<InitialData> for History {
    fn from(data: InitialData) -> Self {
        let mut history = History {
            glucose: data.glucose_history,
            pump: data.pump_history,
            carbs: data.carb_history,
        };
        history.sort();
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        time::from_millis(ms).unwrap()
    }

    #[test]
    fn glucose_accepts_device_alias() {
        let s: GlucoseSample = serde_json::from_value(json!({
            "date": 1000, "glucose": 110, "device": "dexcom", "timestamp": "x"
        }))
        .unwrap();
        assert_eq!(s.source.as_deref(), Some("dexcom"));
        assert_eq!(s.ordering_key(), 1000);
    }

    #[test]
    fn pump_event_keeps_payload() {
        let e: PumpEvent = serde_json::from_value(json!({
            "timestamp": "2024-03-01T10:00:00Z", "_type": "Bolus", "amount": 1.5, "duration": 0
        }))
        .unwrap();
        assert_eq!(e.kind(), PumpEventKind::Bolus);
        assert_eq!(e.amount(), Some(1.5));
        let back = serde_json::to_value(&e).unwrap();
        assert_eq!(back["_type"], "Bolus");
        assert_eq!(back["amount"], 1.5);
    }

    #[test]
    fn pump_event_requires_type_tag() {
        let r: Result<PumpEvent, _> =
            serde_json::from_value(json!({"timestamp": "2024-03-01T10:00:00Z", "amount": 1}));
        assert!(r.is_err());
    }

    #[test]
    fn sort_orders_newest_first() {
        let mut h = History {
            glucose: vec![
                GlucoseSample::new(at(1_000), 100.0, "t"),
                GlucoseSample::new(at(3_000), 120.0, "t"),
                GlucoseSample::new(at(2_000), 110.0, "t"),
            ],
            pump: vec![PumpEvent::bolus(at(500), 1.0), PumpEvent::bolus(at(4_000), 2.0)],
            carbs: vec![CarbEntry::new(at(10), 5.0, "t"), CarbEntry::new(at(20), 6.0, "t")],
        };
        assert!(!h.is_sorted());
        h.sort();
        assert!(h.is_sorted());
        assert_eq!(h.glucose[0].glucose, 120.0);
        assert_eq!(h.pump[0].amount(), Some(2.0));
        assert_eq!(h.carbs[0].carbs, 6.0);
        assert_eq!(h.newest_key(), Some(4_000));
    }

    #[test]
    fn newest_key_empty_is_none() {
        assert_eq!(History::default().newest_key(), None);
    }

    #[test]
    fn latest_temp_basal_pairs_duration() {
        let mut h = History::default();
        h.pump.extend(PumpEvent::temp_basal_pair(at(1_000), 0.5, 30.0));
        h.pump.extend(PumpEvent::temp_basal_pair(at(5_000), 1.5, 60.0));
        h.sort();
        let temp = h.latest_temp_basal().unwrap();
        assert_eq!(temp.rate, 1.5);
        assert_eq!(temp.duration, 60.0);
        assert_eq!(temp.started_at, Some(at(5_000)));
    }

    #[test]
    fn no_temp_basal_without_rate_record() {
        let mut h = History::default();
        h.pump.push(PumpEvent::bolus(at(1_000), 1.0));
        assert!(h.latest_temp_basal().is_none());
    }

    #[test]
    fn initial_data_is_sorted_on_conversion() {
        let data: InitialData = serde_json::from_value(json!({
            "glucoseHistory": [
                {"date": 1, "glucose": 100},
                {"date": 2, "glucose": 101}
            ]
        }))
        .unwrap();
        let h = History::from(data);
        assert_eq!(h.glucose[0].date, 2);
        assert!(h.pump.is_empty());
    }
}
