//! Human-readable rendering of decoded messages for the traffic log.
//!
//! Rendering produces a `serde_json::Value`, a separate tree from the
//! [`StructuredValue`] that goes back on the wire.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use supl_codec::{Leaf, StructuredValue};

/// Latitude scale: 2^23 steps per 90 degrees.
const LATITUDE_STEPS: f64 = (1u64 << 23) as f64;
/// Longitude scale: 2^24 steps per 360 degrees.
const LONGITUDE_STEPS: f64 = (1u64 << 24) as f64;

pub fn latitude_degrees(raw: i64) -> f64 {
    raw as f64 * 90.0 / LATITUDE_STEPS
}

pub fn longitude_degrees(raw: i64) -> f64 {
    raw as f64 * 360.0 / LONGITUDE_STEPS
}

/// Render a decoded value. Sequences become objects in field order, choices
/// become single-key objects, octets become space separated hex.
pub fn to_json(value: &StructuredValue) -> Value {
    match value {
        StructuredValue::Leaf(leaf) => leaf_to_json(leaf),
        StructuredValue::Sequence(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), to_json(v)))
                .collect::<Map<_, _>>(),
        ),
        StructuredValue::List(items) => Value::Array(items.iter().map(to_json).collect()),
        StructuredValue::Choice(tag, v) => {
            let mut map = Map::new();
            map.insert(tag.clone(), to_json(v));
            Value::Object(map)
        }
    }
}

fn leaf_to_json(leaf: &Leaf) -> Value {
    match leaf {
        Leaf::Null => Value::Null,
        Leaf::Boolean(b) => Value::Bool(*b),
        Leaf::Integer(i) => Value::from(*i),
        Leaf::Enumerated(name) => Value::String(name.clone()),
        Leaf::Bytes(bytes) => Value::String(hex(bytes)),
        Leaf::Bits { data, len } => Value::String(format!("{} ({len} bits)", hex(data))),
        Leaf::Text(s) => Value::String(s.clone()),
        Leaf::Time(s) => Value::String(format_time(s)),
        Leaf::Opaque(bytes) => serde_json::json!({ "unknown-extension": hex(bytes) }),
    }
}

/// `[0x0a, 0x1b]` → `"0a 1b"`.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// UTCTime / GeneralizedTime → `YYYY-MM-DD HH:MM:SS UTC`. Strings that are
/// not in one of the common Zulu forms are shown unchanged.
pub fn format_time(raw: &str) -> String {
    const FORMATS: [&str; 4] = [
        "%y%m%d%H%M%SZ",
        "%y%m%d%H%MZ",
        "%Y%m%d%H%M%SZ",
        "%Y%m%d%H%M%S%.fZ",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Rewrite every `positionEstimate` below `value` so that its raw
/// `latitude` / `longitude` read in decimal degrees.
pub fn convert_positions(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "positionEstimate" {
                    convert_estimate(child);
                }
                convert_positions(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(convert_positions),
        _ => {}
    }
}

fn convert_estimate(estimate: &mut Value) {
    let Some(map) = estimate.as_object_mut() else {
        return;
    };
    if let Some(lat) = map.get_mut("latitude") {
        if let Some(raw) = lat.as_i64() {
            *lat = Value::from(latitude_degrees(raw));
        }
    }
    if let Some(lon) = map.get_mut("longitude") {
        if let Some(raw) = lon.as_i64() {
            *lon = Value::from(longitude_degrees(raw));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn position_scaling() {
        assert_eq!(latitude_degrees(0), 0.0);
        assert_eq!(longitude_degrees(0), 0.0);
        assert_eq!(latitude_degrees(1 << 22), 45.0);
        assert_eq!(longitude_degrees(1 << 23), 180.0);
        assert_eq!(longitude_degrees(1 << 21), 45.0);
        assert_eq!(longitude_degrees(-(1 << 21)), -45.0);
    }

    #[test]
    fn renders_sequence_in_field_order() {
        let v = StructuredValue::sequence([
            ("zeta", StructuredValue::integer(1)),
            ("alpha", StructuredValue::bytes(vec![0x0a, 0x1b])),
            (
                "pick",
                StructuredValue::choice("flag", StructuredValue::boolean(true)),
            ),
            (
                "bits",
                StructuredValue::Leaf(Leaf::Bits {
                    data: vec![0xa0],
                    len: 3,
                }),
            ),
        ]);
        let rendered = to_json(&v);
        let keys: Vec<_> = rendered.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["zeta", "alpha", "pick", "bits"]);
        assert_eq!(rendered["alpha"], "0a 1b");
        assert_eq!(rendered["pick"], json!({ "flag": true }));
        assert_eq!(rendered["bits"], "a0 (3 bits)");
    }

    #[test]
    fn times_are_normalised() {
        assert_eq!(format_time("240229133005Z"), "2024-02-29 13:30:05 UTC");
        assert_eq!(format_time("20240229133005Z"), "2024-02-29 13:30:05 UTC");
        assert_eq!(format_time("20240229133005.25Z"), "2024-02-29 13:30:05 UTC");
        assert_eq!(format_time("garbage"), "garbage");
    }

    #[test]
    fn converts_nested_position_estimates() {
        let mut v = json!({
            "message": {
                "msSUPLEND": {
                    "position": {
                        "timestamp": "2024-02-29 13:30:05 UTC",
                        "positionEstimate": {
                            "latitudeSign": "north",
                            "latitude": 4194304,
                            "longitude": 2097152
                        }
                    }
                }
            }
        });
        convert_positions(&mut v);
        let est = &v["message"]["msSUPLEND"]["position"]["positionEstimate"];
        assert_eq!(est["latitude"], json!(45.0));
        assert_eq!(est["longitude"], json!(45.0));
        assert_eq!(est["latitudeSign"], "north");
    }

    #[test]
    fn hex_is_space_separated() {
        assert_eq!(hex(&[]), "");
        assert_eq!(hex(&[0x00, 0xff, 0x10]), "00 ff 10");
    }
}
