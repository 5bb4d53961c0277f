//! Per-capture metadata and output file naming.
//!
//! Each saved slice gets a copy of its payload's source metadata with the
//! single transmit and receive channel that produced it embedded under
//! `transmitter_config` / `receiver_config`.

use rfsynth_core::PairKey;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RadioConfig;
use crate::error::{TestbedError, TestbedResult};

pub const RECEIVER_CONFIG_KEY: &str = "receiver_config";
pub const TRANSMITTER_CONFIG_KEY: &str = "transmitter_config";

/// Radio config reduced to one channel: `channels` is replaced by `channel`.
pub fn single_channel_config(radio: &RadioConfig, channel: usize) -> TestbedResult<Value> {
    let selected = radio.channels.get(channel).ok_or_else(|| {
        TestbedError::config(format!(
            "Channel {} does not exist ({} configured)",
            channel,
            radio.channels.len()
        ))
    })?;

    let mut value = serde_json::to_value(radio).map_err(|e| {
        TestbedError::config(format!("Cannot serialize radio config: {}", e))
    })?;
    let channel_value = serde_json::to_value(selected).map_err(|e| {
        TestbedError::config(format!("Cannot serialize channel config: {}", e))
    })?;

    if let Value::Object(map) = &mut value {
        map.remove("channels");
        map.insert("channel".to_string(), channel_value);
    }
    Ok(value)
}

/// Copy `source` and embed the resolved tx/rx channel configs.
///
/// A non-object source is wrapped as `{"source_metadata": ...}`.
pub fn rewrite_metadata(
    source: &Value,
    key: &PairKey,
    tx_radios: &[RadioConfig],
    rx_radios: &[RadioConfig],
) -> TestbedResult<Value> {
    let tx_radio = tx_radios.get(key.tx_radio).ok_or_else(|| {
        TestbedError::config(format!("Transmitter {} does not exist", key.tx_radio))
    })?;
    let rx_radio = rx_radios.get(key.rx_radio).ok_or_else(|| {
        TestbedError::config(format!("Receiver {} does not exist", key.rx_radio))
    })?;

    let mut updated = match source {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("source_metadata".to_string(), other.clone());
            map
        }
    };
    updated.insert(
        RECEIVER_CONFIG_KEY.to_string(),
        single_channel_config(rx_radio, key.rx_channel)?,
    );
    updated.insert(
        TRANSMITTER_CONFIG_KEY.to_string(),
        single_channel_config(tx_radio, key.tx_channel)?,
    );
    Ok(Value::Object(updated))
}

/// `Tx{i}-{j}_Rx{n}-{m}_<basename of original>` inside `dir`.
pub fn slice_path(dir: &Path, key: &PairKey, original: &Path) -> PathBuf {
    let basename = original
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{}{}", key.file_prefix(), basename))
}

pub fn load_metadata(path: &Path) -> TestbedResult<Value> {
    let text = fs::read_to_string(path).map_err(|e| TestbedError::io(path, e))?;
    serde_json::from_str(&text).map_err(|source| TestbedError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write pretty-printed JSON (4-space indent).
pub fn save_json(path: &Path, value: &Value) -> TestbedResult<()> {
    let text = to_pretty_json(value).map_err(|source| TestbedError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|e| TestbedError::persistence(path, e))
}

pub(crate) fn to_pretty_json(value: &Value) -> serde_json::Result<String> {
    use serde::Serialize;

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
