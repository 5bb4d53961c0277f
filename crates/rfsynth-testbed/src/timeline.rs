//! Transmission timelines for real-time replay.
//!
//! A timeline is a CSV file with one row per transmission:
//!
//! ```text
//! report_type,instance_name,time_start,time_stop,freq_lo,freq_hi,timeLength_s,bandwidth_Hz,signal_index,tx_radio,iq_filename
//! energy,wifi_1 T_1,0.0,0.00136,2403780000,2420220000,0.00136,16440000,1,1,/tmp/wifi_1.32cf
//! ```
//!
//! `tx_radio` is 1-based. An optional `tx_channel` column (0-based) pins a
//! row to one channel; rows without it go to every channel reading the file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{TestbedError, TestbedResult};

/// One CSV row, with the column names used by the report tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRecord {
    #[serde(default)]
    pub report_type: String,
    #[serde(default)]
    pub instance_name: String,
    pub time_start: f64,
    #[serde(default)]
    pub time_stop: Option<f64>,
    pub freq_lo: f64,
    pub freq_hi: f64,
    #[serde(rename = "timeLength_s")]
    pub time_length_s: f64,
    #[serde(rename = "bandwidth_Hz", default)]
    pub bandwidth_hz: Option<f64>,
    #[serde(default)]
    pub signal_index: Option<i64>,
    pub tx_radio: usize,
    pub iq_filename: PathBuf,
    #[serde(default)]
    pub tx_channel: Option<usize>,
}

/// A scheduled transmission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    /// Row number in the source file (0-based, header excluded)
    pub row: usize,
    pub name: String,
    /// Zero-based tx radio index
    pub radio: usize,
    /// Channel the row is pinned to, if any
    pub channel: Option<usize>,
    /// Center frequency in Hz
    pub frequency: f64,
    pub payload: PathBuf,
    /// Seconds after the mission epoch
    pub start_s: f64,
    pub duration_s: f64,
}

impl TimelineEvent {
    pub fn stop_s(&self) -> f64 {
        self.start_s + self.duration_s
    }

    fn from_record(row: usize, record: TimelineRecord) -> Result<Self, String> {
        if record.tx_radio == 0 {
            return Err(format!("row {}: tx_radio is 1-based, got 0", row));
        }
        if !record.time_start.is_finite() || !record.time_length_s.is_finite() {
            return Err(format!("row {}: non-finite time", row));
        }
        if record.time_length_s < 0.0 {
            return Err(format!(
                "row {}: negative timeLength_s {}",
                row, record.time_length_s
            ));
        }
        Ok(Self {
            row,
            name: record.instance_name,
            radio: record.tx_radio - 1,
            channel: record.tx_channel,
            frequency: (record.freq_lo + record.freq_hi) / 2.0,
            payload: record.iq_filename,
            start_s: record.time_start,
            duration_s: record.time_length_s,
        })
    }
}

/// Events of one timeline, ordered by start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    /// Sort events by start time. Rows with equal start keep file order.
    pub fn new(mut events: Vec<TimelineEvent>) -> Self {
        events.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));
        Self { events }
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events one tx radio channel should play, in time order.
    pub fn for_channel(&self, radio: usize, channel: usize) -> Vec<TimelineEvent> {
        self.events
            .iter()
            .filter(|e| e.radio == radio && e.channel.map_or(true, |c| c == channel))
            .cloned()
            .collect()
    }

    /// Every tx radio with at least one event.
    pub fn radios(&self) -> BTreeSet<usize> {
        self.events.iter().map(|e| e.radio).collect()
    }
}

/// Parse a timeline from CSV text. `source` names the input in errors.
pub fn parse_timeline<R: Read>(reader: R, source: &Path) -> TestbedResult<Timeline> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut events = Vec::new();
    for (row, record) in csv_reader.deserialize::<TimelineRecord>().enumerate() {
        let record = record.map_err(|source_err| TestbedError::Csv {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        let event = TimelineEvent::from_record(row, record).map_err(|msg| {
            TestbedError::config(format!("{}: {}", source.display(), msg))
        })?;
        events.push(event);
    }

    Ok(Timeline::new(events))
}

pub fn load_timeline(path: impl AsRef<Path>) -> TestbedResult<Timeline> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| TestbedError::io(path, e))?;
    let timeline = parse_timeline(file, path)?;
    tracing::debug!(
        path = %path.display(),
        events = timeline.len(),
        radios = timeline.radios().len(),
        "Timeline loaded"
    );
    Ok(timeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "report_type,instance_name,time_start,time_stop,freq_lo,freq_hi,timeLength_s,bandwidth_Hz,signal_index,tx_radio,iq_filename\n";

    fn parse(body: &str) -> TestbedResult<Timeline> {
        let text = format!("{}{}", HEADER, body);
        parse_timeline(text.as_bytes(), Path::new("timeline.csv"))
    }

    #[test]
    fn test_parse_rows() {
        let timeline = parse(
            "energy,wifi_1 T_1,0.5,0.50136,2403780000,2420220000,0.00136,16440000,1,1,/tmp/wifi_1.32cf\n\
             energy,bt_1 T_1,0.0,0.001,2401000000,2403000000,0.001,2000000,2,2,/tmp/bt_1.32cf\n",
        )
        .unwrap();

        assert_eq!(timeline.len(), 2);
        let first = &timeline.events()[0];
        assert_eq!(first.name, "bt_1 T_1");
        assert_eq!(first.radio, 1);
        assert_eq!(first.row, 1);
        assert_eq!(first.frequency, 2402e6);

        let second = &timeline.events()[1];
        assert_eq!(second.radio, 0);
        assert_eq!(second.channel, None);
        assert_eq!(second.frequency, 2412e6);
        assert!((second.stop_s() - 0.50136).abs() < 1e-12);
    }

    #[test]
    fn test_equal_start_times_keep_file_order() {
        let timeline = parse(
            "energy,a,1.0,,1,1,0.1,,,1,a.cf32\n\
             energy,b,1.0,,1,1,0.1,,,1,b.cf32\n\
             energy,c,0.5,,1,1,0.1,,,1,c.cf32\n",
        )
        .unwrap();
        let names: Vec<&str> = timeline.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn test_optional_channel_column() {
        let text = "time_start,freq_lo,freq_hi,timeLength_s,tx_radio,iq_filename,tx_channel\n\
                    0.0,10,20,0.1,1,a.cf32,2\n\
                    0.2,10,20,0.1,1,a.cf32,\n";
        let timeline = parse_timeline(text.as_bytes(), Path::new("t.csv")).unwrap();
        assert_eq!(timeline.events()[0].channel, Some(2));
        assert_eq!(timeline.events()[1].channel, None);

        assert_eq!(timeline.for_channel(0, 2).len(), 2);
        assert_eq!(timeline.for_channel(0, 1).len(), 1);
        assert!(timeline.for_channel(1, 0).is_empty());
        assert_eq!(timeline.radios().into_iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_bad_rows() {
        assert!(matches!(
            parse("energy,a,zero,,1,1,0.1,,,1,a.cf32\n"),
            Err(TestbedError::Csv { .. })
        ));
        assert!(parse("energy,a,0.0,,1,1,0.1,,,0,a.cf32\n")
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_timeline(dir.path().join("none.csv")),
            Err(TestbedError::Io { .. })
        ));
    }
}
