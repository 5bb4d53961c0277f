//! Ground-truth report utilities.
//!
//! Reports are JSON documents of the form `{"reports": [ {...}, ... ]}` where
//! each entry has a `report_type` of `energy` or `signal`. Timeline times are
//! relative to the mission epoch; scoring needs them as POSIX times, which
//! [`offset_reports`] provides.

use rfsynth_core::MissionEpoch;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::{TestbedError, TestbedResult};
use crate::metadata::{load_metadata, save_json};

pub const NO_ANSWER: &str = "no_answer";

const ENERGY_TIME_FIELDS: [&str; 2] = ["time_start", "time_stop"];
const SIGNAL_TIME_FIELDS: [&str; 3] = ["time_start", "time_stop", "reference_time"];

fn report_list(doc: &Value) -> TestbedResult<&Vec<Value>> {
    doc.get("reports").and_then(Value::as_array).ok_or_else(|| {
        TestbedError::config("Report document has no \"reports\" array".to_string())
    })
}

/// Apply `edit` to every report, keeping the report even when the edit fails.
fn map_reports<F>(doc: &Value, mut edit: F) -> TestbedResult<Value>
where
    F: FnMut(&str, &mut Map<String, Value>) -> Result<(), String>,
{
    let reports = report_list(doc)?
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let mut item = item.clone();
            if let Value::Object(map) = &mut item {
                let kind = map
                    .get("report_type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Err(reason) = edit(&kind, map) {
                    error!(report = index, %reason, "Report left partially edited");
                }
            }
            item
        })
        .collect();

    let mut out = Map::new();
    out.insert("reports".to_string(), Value::Array(reports));
    Ok(Value::Object(out))
}

fn shift_fields(map: &mut Map<String, Value>, fields: &[&str], offset: f64) -> Result<(), String> {
    for field in fields {
        let value = map
            .get(*field)
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("missing numeric field '{}'", field))?;
        map.insert(field.to_string(), Value::from(value + offset));
    }
    Ok(())
}

/// Shift report times by `offset` seconds.
pub fn offset_reports(doc: &Value, offset: f64) -> TestbedResult<Value> {
    map_reports(doc, |kind, map| match kind {
        "signal" => shift_fields(map, &SIGNAL_TIME_FIELDS, offset),
        "energy" => shift_fields(map, &ENERGY_TIME_FIELDS, offset),
        _ => Ok(()),
    })
}

/// `qam16` style names become `16_qam`. Only a leading match counts.
fn transpose_num_letter(s: &str) -> Option<String> {
    let letters_end = s
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(s.len());
    if letters_end == 0 {
        return None;
    }
    let rest = &s[letters_end..];
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    Some(format!("{}_{}", &rest[..digits_end], &s[..letters_end]))
}

/// Map a modulation name to the form the scorer expects.
pub fn modulation_lookup(modulation: Option<&str>) -> String {
    let Some(name) = modulation.filter(|m| !m.is_empty()) else {
        return NO_ANSWER.to_string();
    };
    if let Some(transposed) = transpose_num_letter(name) {
        return transposed;
    }
    match name {
        "fm" | "am" => format!("{}_analog", name),
        "ssb" | "fh" | "ofdm" => NO_ANSWER.to_string(),
        other => other.to_string(),
    }
}

pub fn translate_modulation(doc: &Value) -> TestbedResult<Value> {
    info!("Translating modulation fields to scorable form");
    map_reports(doc, |kind, map| {
        if kind == "signal" {
            let translated = modulation_lookup(map.get("modulation").and_then(Value::as_str));
            map.insert("modulation".to_string(), Value::from(translated));
        }
        Ok(())
    })
}

/// Set `field` of every signal report to `no_answer`.
pub fn set_no_answer(doc: &Value, field: &str) -> TestbedResult<Value> {
    info!(field, "Setting signal report field to no_answer");
    map_reports(doc, |kind, map| {
        if kind == "signal" {
            map.insert(field.to_string(), Value::from(NO_ANSWER));
        }
        Ok(())
    })
}

/// `<dir>/<stem>_offset.json` next to the report.
pub fn offset_output_path(report: &Path) -> PathBuf {
    let stem = report
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    report.with_file_name(format!("{}_offset.json", stem))
}

/// Offset a report file and write the result beside it.
pub fn offset_report_file(report: &Path, offset: f64) -> TestbedResult<PathBuf> {
    info!(report = %report.display(), offset, "Offsetting report");
    let doc = load_metadata(report)?;
    let shifted = offset_reports(&doc, offset)?;
    let output = offset_output_path(report);
    save_json(&output, &shifted)?;
    info!(path = %output.display(), "Saved offset report");
    Ok(output)
}

/// Ground truth for a replay: report times moved onto the mission epoch,
/// modulation names translated and each of `no_answer_fields` cleared.
pub fn prepare_ground_truth(
    doc: &Value,
    epoch: MissionEpoch,
    no_answer_fields: &[String],
) -> TestbedResult<Value> {
    let shifted = offset_reports(doc, epoch.origin().as_secs_f64())?;
    let mut prepared = translate_modulation(&shifted)?;
    for field in no_answer_fields {
        prepared = set_no_answer(&prepared, field)?;
    }
    Ok(prepared)
}

/// Prepare a ground-truth report file and save it to `output`, or to
/// `<stem>_offset.json` beside the report.
pub fn ground_truth_file(
    report: &Path,
    output: Option<&Path>,
    epoch: MissionEpoch,
    no_answer_fields: &[String],
) -> TestbedResult<(PathBuf, Value)> {
    let doc = load_metadata(report)?;
    let prepared = prepare_ground_truth(&doc, epoch, no_answer_fields)?;
    let output = output.map_or_else(|| offset_output_path(report), Path::to_path_buf);
    save_json(&output, &prepared)?;
    info!(
        report = %report.display(),
        path = %output.display(),
        epoch_s = epoch.origin().as_secs_f64(),
        "Saved ground truth"
    );
    Ok((output, prepared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_modulation_lookup() {
        assert_eq!(modulation_lookup(Some("qam16")), "16_qam");
        assert_eq!(modulation_lookup(Some("psk8_gray")), "8_psk");
        assert_eq!(modulation_lookup(Some("fm")), "fm_analog");
        assert_eq!(modulation_lookup(Some("am")), "am_analog");
        assert_eq!(modulation_lookup(Some("ofdm")), NO_ANSWER);
        assert_eq!(modulation_lookup(Some("ssb")), NO_ANSWER);
        assert_eq!(modulation_lookup(Some("")), NO_ANSWER);
        assert_eq!(modulation_lookup(None), NO_ANSWER);
        assert_eq!(modulation_lookup(Some("gfsk")), "gfsk");
        assert_eq!(modulation_lookup(Some("8psk")), "8psk");
    }

    #[test]
    fn test_offset_reports() {
        let doc = json!({"reports": [
            {"report_type": "signal", "time_start": 1.0, "time_stop": 2.0, "reference_time": 1.5},
            {"report_type": "energy", "time_start": 0.5, "time_stop": 0.75, "reference_time": 9.0},
            {"report_type": "energy", "time_start": 3.0}
        ]});
        let out = offset_reports(&doc, 100.0).unwrap();
        let reports = out["reports"].as_array().unwrap();

        assert_eq!(reports[0]["time_start"], 101.0);
        assert_eq!(reports[0]["reference_time"], 101.5);
        assert_eq!(reports[1]["time_stop"], 100.75);
        // Energy reports keep their reference time
        assert_eq!(reports[1]["reference_time"], 9.0);
        // A malformed report is kept, edited as far as possible
        assert_eq!(reports[2]["time_start"], 103.0);
        assert_eq!(reports.len(), 3);
    }

    #[test]
    fn test_translate_only_signal_reports() {
        let doc = json!({"reports": [
            {"report_type": "signal", "modulation": "qam64"},
            {"report_type": "signal"},
            {"report_type": "energy", "modulation": "qam64"}
        ]});
        let out = translate_modulation(&doc).unwrap();
        assert_eq!(out["reports"][0]["modulation"], "64_qam");
        assert_eq!(out["reports"][1]["modulation"], NO_ANSWER);
        assert_eq!(out["reports"][2]["modulation"], "qam64");

        let cleared = set_no_answer(&doc, "protocol").unwrap();
        assert_eq!(cleared["reports"][0]["protocol"], NO_ANSWER);
        assert!(cleared["reports"][2].get("protocol").is_none());
    }

    #[test]
    fn test_missing_reports_array() {
        assert!(offset_reports(&json!({"items": []}), 1.0).is_err());
    }

    #[test]
    fn test_offset_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("truth.v2.json");
        save_json(
            &report,
            &json!({"reports": [{"report_type": "energy", "time_start": 0.0, "time_stop": 1.0}]}),
        )
        .unwrap();

        let output = offset_report_file(&report, 1_700_000_000.0).unwrap();
        assert_eq!(output, dir.path().join("truth.v2_offset.json"));
        let written = load_metadata(&output).unwrap();
        assert_eq!(written["reports"][0]["time_stop"], 1_700_000_001.0);
    }

    #[test]
    fn test_ground_truth_on_mission_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("truth.json");
        save_json(
            &report,
            &json!({"reports": [
                {"report_type": "signal", "time_start": 0.5, "time_stop": 0.75,
                 "reference_time": 0.5, "modulation": "qam16", "protocol": "wifi"},
                {"report_type": "energy", "time_start": 2.0, "time_stop": 2.5}
            ]}),
        )
        .unwrap();
        let epoch = MissionEpoch::new(rfsynth_core::WallClock::from_secs_f64(1_700_000_000.0));
        let out = dir.path().join("prepared.json");

        let (path, doc) =
            ground_truth_file(&report, Some(&out), epoch, &["protocol".to_string()]).unwrap();
        assert_eq!(path, out);
        assert_eq!(load_metadata(&out).unwrap(), doc);

        let reports = doc["reports"].as_array().unwrap();
        assert_eq!(reports[0]["time_start"], 1_700_000_000.5);
        assert_eq!(reports[0]["modulation"], "16_qam");
        assert_eq!(reports[0]["protocol"], NO_ANSWER);
        assert_eq!(reports[1]["time_stop"], 1_700_000_002.5);

        let (default_path, _) = ground_truth_file(&report, None, epoch, &[]).unwrap();
        assert_eq!(default_path, dir.path().join("truth_offset.json"));
    }
}
