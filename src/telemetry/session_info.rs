//! Session-info text block.
//!
//! The block is YAML-shaped, but only loosely: values are extracted by
//! finding a key token and taking the remainder of its line. Lists such as
//! the driver roster are split into bounded records so that a key repeated
//! across records is read from the right one.

use super::UNKNOWN;

/// Fields the reader takes from the session-info block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDetails {
    pub track_name: String,
    pub car_name: String,
    pub session_type: String,
    pub driver_count: i32,
    pub player_car_idx: Option<i32>,
}

impl Default for SessionDetails {
    fn default() -> Self {
        Self {
            track_name: UNKNOWN.to_string(),
            car_name: UNKNOWN.to_string(),
            session_type: UNKNOWN.to_string(),
            driver_count: 0,
            player_car_idx: None,
        }
    }
}

impl SessionDetails {
    /// Parse the block for the given session number. Missing or malformed
    /// keys leave the matching field at its default.
    pub fn parse(text: &str, session_num: i32) -> Self {
        Self::parse_for_player(text, session_num, None)
    }

    /// Like [`parse`](Self::parse), falling back to `telemetry_car_idx` (the
    /// live `PlayerCarIdx` value) when the block has no `DriverCarIdx`.
    pub fn parse_for_player(text: &str, session_num: i32, telemetry_car_idx: Option<i32>) -> Self {
        let track_name = field(text, "TrackDisplayName")
            .or_else(|| field(text, "TrackName"))
            .unwrap_or(UNKNOWN)
            .to_string();

        let session_type = records(text, "SessionNum")
            .into_iter()
            .find(|record| parse_i32(field(record, "SessionNum")) == Some(session_num))
            .and_then(|record| field(record, "SessionType"))
            .unwrap_or(UNKNOWN)
            .to_string();

        let player_car_idx = parse_i32(field(text, "DriverCarIdx")).or(telemetry_car_idx);
        let drivers = records(text, "CarIdx");

        let car_name = player_car_idx
            .and_then(|idx| {
                drivers
                    .iter()
                    .find(|record| parse_i32(field(record, "CarIdx")) == Some(idx))
            })
            .and_then(|record| field(record, "CarScreenName").or_else(|| field(record, "CarPath")))
            .unwrap_or(UNKNOWN)
            .to_string();

        let driver_count = drivers
            .iter()
            .filter(|record| parse_i32(field(record, "CarIsPaceCar")) != Some(1))
            .count() as i32;

        Self {
            track_name,
            car_name,
            session_type,
            driver_count,
            player_car_idx,
        }
    }
}

/// Decode the raw block. The simulator pads it with NULs.
pub fn decode_block(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    // ISO-8859-1 maps every byte to the code point of the same value
    bytes[..end].iter().map(|&b| b as char).collect()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Value of the first line whose key is `key`, with quotes stripped.
/// List item markers (`- `) in front of the key are accepted.
pub fn field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let line = line.trim_start();
        let line = line.strip_prefix("- ").unwrap_or(line);
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        let value = rest.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        if value.is_empty() { None } else { Some(value) }
    })
}

/// Split every list whose items start with `- key:` into one slice per item.
///
/// An item ends at the next line indented no deeper than its own `- ` marker,
/// which is either the next item or the parent's next key.
pub fn records<'a>(text: &'a str, key: &str) -> Vec<&'a str> {
    let marker = format!("- {key}:");
    let mut records = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();

        let content = line.trim_end_matches(['\r', '\n']);
        if content.trim().is_empty() {
            continue;
        }
        let indent = indent_of(content);

        if let Some((record_start, record_indent)) = current {
            if indent > record_indent {
                continue;
            }
            records.push(&text[record_start..start]);
            current = None;
        }

        if content.trim_start().starts_with(&marker) {
            current = Some((start, indent));
        }
    }

    if let Some((record_start, _)) = current {
        records.push(&text[record_start..]);
    }
    records
}

fn parse_i32(value: Option<&str>) -> Option<i32> {
    value?.parse().ok()
}
