//! Log of every message crossing the transport, with repeats collapsed.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RealtimeEvent {
    /// ISO-8601 receive/send time
    pub time: String,
    pub source: EventSource,
    /// Number of consecutive messages folded into this entry; absent means one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    pub event: Value,
}

impl RealtimeEvent {
    pub fn event_type(&self) -> Option<&str> {
        self.event.get("type").and_then(Value::as_str)
    }
}

#[derive(Debug)]
pub struct EventLog {
    started_at: DateTime<Utc>,
    entries: Vec<RealtimeEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[RealtimeEvent] {
        &self.entries
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Clears the log and makes now the zero of relative times.
    pub fn restart(&mut self) {
        self.started_at = Utc::now();
        self.entries.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn record(&mut self, source: EventSource, event: Value) {
        self.record_at(Utc::now(), source, event);
    }

    pub fn record_at(&mut self, at: DateTime<Utc>, source: EventSource, event: Value) {
        let event_type = event.get("type").and_then(Value::as_str);
        if let Some(last) = self.entries.last_mut() {
            if event_type.is_some() && last.event_type() == event_type {
                last.count = Some(last.count.unwrap_or(1) + 1);
                return;
            }
        }
        self.entries.push(RealtimeEvent {
            time: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            source,
            count: None,
            event,
        });
    }

    /// `mm:ss.hh` since the log started.
    pub fn display_time(&self, entry: &RealtimeEvent) -> String {
        let at = DateTime::parse_from_rfc3339(&entry.time)
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or(self.started_at);
        format_elapsed((at - self.started_at).num_milliseconds())
    }
}

pub fn format_elapsed(delta_ms: i64) -> String {
    let delta_ms = delta_ms.max(0);
    let hundredths = (delta_ms / 10) % 100;
    let seconds = (delta_ms / 1000) % 60;
    let minutes = (delta_ms / 60_000) % 60;
    format!("{minutes:02}:{seconds:02}.{hundredths:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn typed(kind: &str) -> Value {
        json!({ "type": kind })
    }

    #[test]
    fn consecutive_repeats_collapse() {
        let mut log = EventLog::new();
        for kind in ["A", "A", "A", "B", "A"] {
            log.record(EventSource::Server, typed(kind));
        }
        let summary: Vec<_> = log
            .entries()
            .iter()
            .map(|entry| (entry.event_type().unwrap(), entry.count))
            .collect();
        assert_eq!(summary, vec![("A", Some(3)), ("B", None), ("A", None)]);
    }

    #[test]
    fn repeats_collapse_across_directions() {
        let mut log = EventLog::new();
        log.record(EventSource::Client, typed("input_audio_buffer.append"));
        log.record(EventSource::Client, typed("input_audio_buffer.append"));
        log.record(EventSource::Server, typed("response.audio.delta"));
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[0].count, Some(2));
        assert_eq!(log.entries()[0].source, EventSource::Client);
    }

    #[test]
    fn relative_time_is_minutes_seconds_hundredths() {
        assert_eq!(format_elapsed(0), "00:00.00");
        assert_eq!(format_elapsed(61_234), "01:01.23");
        assert_eq!(format_elapsed(3_600_000 + 5_090), "00:05.09");

        let mut log = EventLog::new();
        let at = log.started_at() + chrono::Duration::milliseconds(2_500);
        log.record_at(at, EventSource::Server, typed("session.created"));
        assert_eq!(log.display_time(&log.entries()[0]), "00:02.50");
    }

    #[test]
    fn serialized_entry_omits_absent_count() {
        let mut log = EventLog::new();
        log.record(EventSource::Client, typed("session.update"));
        let json = serde_json::to_value(&log.entries()[0]).unwrap();
        assert_eq!(json["source"], "client");
        assert!(json.get("count").is_none());
        log.restart();
        assert!(log.entries().is_empty());
    }
}
