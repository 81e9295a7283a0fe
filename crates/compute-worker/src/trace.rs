//! Execution trace of the most recent proof, in Chrome trace-event format

use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
struct TraceEvent {
    name: String,
    cat: &'static str,
    ph: &'static str,
    /// Microseconds since the recorder was reset
    ts: u64,
    dur: u64,
    pid: u32,
    tid: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceFile<'a> {
    trace_events: &'a [TraceEvent],
    display_time_unit: &'static str,
}

/// Collects completed spans for one proof
#[derive(Debug)]
pub struct TraceRecorder {
    origin: Instant,
    events: Vec<TraceEvent>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            events: Vec::new(),
        }
    }

    /// Drop recorded events and restart the clock
    pub fn reset(&mut self) {
        self.origin = Instant::now();
        self.events.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Run `f` and record it as a complete ("X") event named `name`
    pub fn span<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        let ts = start.duration_since(self.origin).as_micros() as u64;
        let dur = start.elapsed().as_micros() as u64;
        self.events.push(TraceEvent {
            name: name.to_string(),
            cat: "prover",
            ph: "X",
            ts,
            dur,
            pid: std::process::id(),
            tid: rayon::current_thread_index().unwrap_or(0),
        });
        value
    }

    /// Serialize the recorded events as a Chrome trace JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&TraceFile {
            trace_events: &self.events,
            display_time_unit: "ms",
        })
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_records_event_and_returns_value() {
        let mut trace = TraceRecorder::new();
        let value = trace.span("execute", || 41 + 1);
        assert_eq!(value, 42);
        assert_eq!(trace.len(), 1);

        let json: serde_json::Value = serde_json::from_str(&trace.to_json().unwrap()).unwrap();
        let events = json["traceEvents"].as_array().unwrap();
        assert_eq!(events[0]["name"], "execute");
        assert_eq!(events[0]["ph"], "X");
        assert_eq!(json["displayTimeUnit"], "ms");
    }

    #[test]
    fn test_reset_clears_events() {
        let mut trace = TraceRecorder::new();
        trace.span("commit", || ());
        trace.reset();
        assert!(trace.is_empty());
    }
}
