//! Cayenne Low Power Payload.
//!
//! A frame is a sequence of `channel | type | value` records. Structured objects
//! use `<type_name>_<channel>` keys, e.g. `{"temperature_3": 27.2}`.

use serde_json::{json, Map, Value};

use crate::{CodecError, Result};

#[derive(Debug, Clone, Copy)]
enum Layout {
    /// Unsigned integer, reported as-is.
    Int,
    /// Fixed-point value with the given resolution.
    Fixed { signed: bool, divisor: f64 },
    /// Three signed 16-bit axes.
    Xyz { divisor: f64 },
    /// Latitude, longitude and altitude as signed 24-bit values.
    Gps,
}

#[derive(Debug, Clone, Copy)]
struct SensorType {
    id: u8,
    name: &'static str,
    size: usize,
    layout: Layout,
}

const SENSOR_TYPES: &[SensorType] = &[
    SensorType { id: 0, name: "digital_input", size: 1, layout: Layout::Int },
    SensorType { id: 1, name: "digital_output", size: 1, layout: Layout::Int },
    SensorType { id: 2, name: "analog_input", size: 2, layout: Layout::Fixed { signed: true, divisor: 100.0 } },
    SensorType { id: 3, name: "analog_output", size: 2, layout: Layout::Fixed { signed: true, divisor: 100.0 } },
    SensorType { id: 101, name: "illuminance", size: 2, layout: Layout::Int },
    SensorType { id: 102, name: "presence", size: 1, layout: Layout::Int },
    SensorType { id: 103, name: "temperature", size: 2, layout: Layout::Fixed { signed: true, divisor: 10.0 } },
    SensorType { id: 104, name: "humidity", size: 1, layout: Layout::Fixed { signed: false, divisor: 2.0 } },
    SensorType { id: 113, name: "accelerometer", size: 6, layout: Layout::Xyz { divisor: 1000.0 } },
    SensorType { id: 115, name: "barometer", size: 2, layout: Layout::Fixed { signed: false, divisor: 10.0 } },
    SensorType { id: 134, name: "gyrometer", size: 6, layout: Layout::Xyz { divisor: 100.0 } },
    SensorType { id: 136, name: "gps", size: 9, layout: Layout::Gps },
];

fn by_id(id: u8) -> Result<&'static SensorType> {
    SENSOR_TYPES
        .iter()
        .find(|t| t.id == id)
        .ok_or(CodecError::UnsupportedType(id))
}

fn by_name(field: &str, name: &str) -> Result<&'static SensorType> {
    SENSOR_TYPES
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| invalid(field, format!("unknown sensor type '{name}'")))
}

fn invalid(field: &str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn read_be(data: &[u8], signed: bool) -> i64 {
    let raw = data.iter().fold(0i64, |acc, b| (acc << 8) | i64::from(*b));
    let bits = 8 * data.len() as u32;
    if signed && raw & (1 << (bits - 1)) != 0 {
        raw - (1 << bits)
    } else {
        raw
    }
}

fn write_be(out: &mut Vec<u8>, value: i64, size: usize) {
    for i in (0..size).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

fn to_raw(field: &str, value: &Value, divisor: f64, size: usize, signed: bool) -> Result<i64> {
    let v = value
        .as_f64()
        .ok_or_else(|| invalid(field, "expected a number"))?;
    let raw = (v * divisor).round() as i64;
    let bits = 8 * size as u32;
    let (min, max) = if signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    };
    if raw < min || raw > max {
        return Err(invalid(field, format!("value {v} out of range")));
    }
    Ok(raw)
}

fn decode_value(sensor: &SensorType, data: &[u8]) -> Value {
    match sensor.layout {
        Layout::Int => json!(read_be(data, false)),
        Layout::Fixed { signed, divisor } => json!(read_be(data, signed) as f64 / divisor),
        Layout::Xyz { divisor } => json!({
            "x": read_be(&data[0..2], true) as f64 / divisor,
            "y": read_be(&data[2..4], true) as f64 / divisor,
            "z": read_be(&data[4..6], true) as f64 / divisor,
        }),
        Layout::Gps => json!({
            "latitude": read_be(&data[0..3], true) as f64 / 10000.0,
            "longitude": read_be(&data[3..6], true) as f64 / 10000.0,
            "altitude": read_be(&data[6..9], true) as f64 / 100.0,
        }),
    }
}

fn encode_value(field: &str, sensor: &SensorType, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match sensor.layout {
        Layout::Int => {
            let raw = to_raw(field, value, 1.0, sensor.size, false)?;
            write_be(out, raw, sensor.size);
        }
        Layout::Fixed { signed, divisor } => {
            let raw = to_raw(field, value, divisor, sensor.size, signed)?;
            write_be(out, raw, sensor.size);
        }
        Layout::Xyz { divisor } => {
            for axis in ["x", "y", "z"] {
                let v = value
                    .get(axis)
                    .ok_or_else(|| invalid(field, format!("missing '{axis}'")))?;
                write_be(out, to_raw(field, v, divisor, 2, true)?, 2);
            }
        }
        Layout::Gps => {
            for (key, divisor) in [("latitude", 10000.0), ("longitude", 10000.0), ("altitude", 100.0)] {
                let v = value
                    .get(key)
                    .ok_or_else(|| invalid(field, format!("missing '{key}'")))?;
                write_be(out, to_raw(field, v, divisor, 3, true)?, 3);
            }
        }
    }
    Ok(())
}

/// Decodes an LPP frame into `{"<type>_<channel>": value}`.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut result = Map::new();
    let mut offset = 0;

    while offset < bytes.len() {
        if offset + 2 > bytes.len() {
            return Err(CodecError::InsufficientData {
                expected: 2,
                actual: bytes.len() - offset,
            });
        }
        let channel = bytes[offset];
        let sensor = by_id(bytes[offset + 1])?;
        offset += 2;

        if offset + sensor.size > bytes.len() {
            return Err(CodecError::InsufficientData {
                expected: sensor.size,
                actual: bytes.len() - offset,
            });
        }
        let value = decode_value(sensor, &bytes[offset..offset + sensor.size]);
        offset += sensor.size;

        result.insert(format!("{}_{}", sensor.name, channel), value);
    }

    Ok(Value::Object(result))
}

/// Encodes a `{"<type>_<channel>": value}` object into an LPP frame.
pub fn encode(obj: &Value) -> Result<Vec<u8>> {
    let fields = obj
        .as_object()
        .ok_or_else(|| invalid("$", "expected a JSON object"))?;
    let mut out = Vec::new();

    for (field, value) in fields {
        let (name, channel) = field
            .rsplit_once('_')
            .ok_or_else(|| invalid(field, "expected '<type>_<channel>'"))?;
        let channel: u8 = channel
            .parse()
            .map_err(|_| invalid(field, "channel must be 0..=255"))?;
        let sensor = by_name(field, name)?;

        out.push(channel);
        out.push(sensor.id);
        encode_value(field, sensor, value, &mut out)?;
    }

    Ok(out)
}
