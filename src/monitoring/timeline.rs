//! Execution Timeline
//!
//! Records when each process starts and finishes, for the run summary and
//! its ASCII Gantt chart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Width of the chart area in characters.
const CHART_WIDTH: f64 = 50.0;

/// Width of the process-name column.
const NAME_WIDTH: usize = 20;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Process thread started
    Started,
    /// Process finished successfully
    Completed,
    /// Process finished without invoking anything (outputs existed)
    Skipped,
    /// Process failed
    Failed,
    /// Process stopped because the run was aborted
    Aborted,
}

impl EventType {
    fn is_end(self) -> bool {
        !matches!(self, EventType::Started)
    }

    fn bar_char(self) -> char {
        match self {
            EventType::Failed => '!',
            EventType::Skipped | EventType::Aborted => '-',
            _ => '#',
        }
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub process: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
    end_time: Option<Instant>,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
            end_time: None,
        }
    }

    /// Records an event for a process.
    pub fn add_event(&mut self, process: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            process: process.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Freezes the total duration at the current instant.
    pub fn finish(&mut self) {
        self.end_time.get_or_insert_with(Instant::now);
    }

    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Time since the timeline was created, or its total once finished.
    pub fn elapsed(&self) -> Duration {
        self.end_time
            .unwrap_or_else(Instant::now)
            .duration_since(self.start_time)
    }

    fn offset_ms(&self, at: Instant) -> u128 {
        at.duration_since(self.start_time).as_millis()
    }

    /// Per-process (start, end, final event) in milliseconds from the start,
    /// ordered by start time.
    fn spans(&self) -> Vec<(String, u128, u128, EventType)> {
        let mut spans: HashMap<&str, (u128, Option<(u128, EventType)>)> = HashMap::new();

        for event in &self.events {
            let elapsed = self.offset_ms(event.timestamp);
            if event.event_type.is_end() {
                if let Some(span) = spans.get_mut(event.process.as_str()) {
                    span.1 = Some((elapsed, event.event_type));
                }
            } else {
                spans.insert(&event.process, (elapsed, None));
            }
        }

        let mut finished: Vec<_> = spans
            .into_iter()
            .filter_map(|(name, (start, end))| {
                end.map(|(end, kind)| (name.to_string(), start, end, kind))
            })
            .collect();
        finished.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        finished
    }

    /// Generates an ASCII Gantt chart.
    ///
    /// `#` marks completed processes, `!` failed ones and `-` skipped or
    /// aborted ones.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        let scale = CHART_WIDTH / total_time as f64;

        for (name, start, end, kind) in self.spans() {
            let start_pos = (start as f64 * scale) as usize;
            let width = ((end.saturating_sub(start)) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.extend(std::iter::repeat(kind.bar_char()).take(width));

            output.push_str(&format!(
                "{} |{:<w$}| ({} ms)\n",
                truncate(&name, NAME_WIDTH),
                bar,
                end.saturating_sub(start),
                w = CHART_WIDTH as usize + 1
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Process durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .map(|(name, start, end, _)| (name, end.saturating_sub(start)))
            .collect()
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a name to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.get_events().is_empty());
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("align", EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("align", EventType::Completed);

        let durations = timeline.get_durations();
        assert!(durations["align"] >= 50);
    }

    #[test]
    fn test_only_started_has_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("align", EventType::Started);
        assert!(timeline.get_durations().is_empty());
    }

    #[test]
    fn test_finish_freezes_elapsed() {
        let mut timeline = ExecutionTimeline::new();
        thread::sleep(Duration::from_millis(20));
        timeline.finish();
        let frozen = timeline.elapsed();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(timeline.elapsed(), frozen);
        assert!(frozen.as_millis() >= 20);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("download_apps", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("download_apps", EventType::Completed);

        timeline.add_event("unzip_apps", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("unzip_apps", EventType::Failed);
        timeline.finish();

        let chart = timeline.gantt_chart();
        assert!(chart.contains("download_apps"));
        assert!(chart.contains("unzip_apps"));
        assert!(chart.contains('#'));
        assert!(chart.contains('!'));
        assert!(chart.contains("Total:"));

        // Rows follow start order
        let download = chart.find("download_apps").unwrap();
        let unzip = chart.find("unzip_apps").unwrap();
        assert!(download < unzip);
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.gantt_chart().contains("Timeline"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("align_samples_normal", 10), "align_s...");
        assert_eq!(truncate("ålign_sämples", 8).chars().count(), 8);
    }
}
