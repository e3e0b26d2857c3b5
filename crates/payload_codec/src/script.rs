//! CEL-scripted codecs.
//!
//! An encode script sees `f_port` (int), `variables` (map of string to string)
//! and `obj` (the structured payload) and must evaluate to `bytes` or a list of
//! integers in `0..=255`:
//!
//! ```cel
//! [obj.mode == 'on' ? 1 : 0, int(variables.interval)]
//! ```
//!
//! A decode script sees `f_port`, `variables` and `bytes`, and may call
//! `cayenne_lpp_decode(bytes)`.

use std::collections::HashMap;
use std::sync::Arc;

use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, ExecutionError, Program, Value as CelValue};
use serde_json::Value as JsonValue;

use crate::{cayenne_lpp, CodecError, Result};

fn compile(script: &str) -> Result<Program> {
    Program::compile(script).map_err(|e| CodecError::ScriptCompilation(e.to_string()))
}

fn base_context(f_port: u8, variables: &HashMap<String, String>) -> Context<'static> {
    let mut context = Context::default();
    context.add_variable_from_value("f_port", CelValue::Int(i64::from(f_port)));

    let vars: HashMap<Key, CelValue> = variables
        .iter()
        .map(|(k, v)| {
            (
                Key::String(Arc::new(k.clone())),
                CelValue::String(Arc::new(v.clone())),
            )
        })
        .collect();
    context.add_variable_from_value(
        "variables",
        CelValue::Map(Map {
            map: Arc::new(vars),
        }),
    );
    context
}

pub fn encode(
    script: &str,
    f_port: u8,
    variables: &HashMap<String, String>,
    obj: &JsonValue,
) -> Result<Vec<u8>> {
    let program = compile(script)?;
    let mut context = base_context(f_port, variables);
    context.add_variable_from_value("obj", json_to_cel(obj.clone())?);

    let result = program
        .execute(&context)
        .map_err(|e| CodecError::ScriptExecution(e.to_string()))?;

    cel_to_bytes(result)
}

pub fn decode(
    script: &str,
    f_port: u8,
    variables: &HashMap<String, String>,
    bytes: &[u8],
) -> Result<JsonValue> {
    let program = compile(script)?;
    let mut context = base_context(f_port, variables);
    context.add_function(
        "cayenne_lpp_decode",
        |bytes: Arc<Vec<u8>>| -> std::result::Result<CelValue, ExecutionError> {
            cayenne_lpp::decode(&bytes)
                .and_then(json_to_cel)
                .map_err(|e| ExecutionError::FunctionError {
                    function: "cayenne_lpp_decode".to_string(),
                    message: e.to_string(),
                })
        },
    );
    context.add_variable_from_value("bytes", CelValue::Bytes(Arc::new(bytes.to_vec())));

    let result = program
        .execute(&context)
        .map_err(|e| CodecError::ScriptExecution(e.to_string()))?;

    cel_to_json(result)
}

fn cel_to_bytes(value: CelValue) -> Result<Vec<u8>> {
    match value {
        CelValue::Bytes(b) => Ok(b.as_ref().clone()),
        CelValue::List(items) => items
            .iter()
            .map(|item| {
                let n = match item {
                    CelValue::Int(i) => *i,
                    CelValue::UInt(u) => i64::try_from(*u).unwrap_or(i64::MAX),
                    other => {
                        return Err(CodecError::InvalidScriptOutput(format!(
                            "list element {other:?} is not an integer"
                        )))
                    }
                };
                u8::try_from(n).map_err(|_| {
                    CodecError::InvalidScriptOutput(format!("byte value {n} out of range"))
                })
            })
            .collect(),
        other => Err(CodecError::InvalidScriptOutput(format!(
            "expected bytes or list of ints, got {other:?}"
        ))),
    }
}

fn cel_to_json(value: CelValue) -> Result<JsonValue> {
    match value {
        CelValue::Null => Ok(JsonValue::Null),
        CelValue::Bool(b) => Ok(JsonValue::Bool(b)),
        CelValue::Int(i) => Ok(JsonValue::Number(i.into())),
        CelValue::UInt(u) => Ok(JsonValue::Number(u.into())),
        CelValue::Float(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| CodecError::InvalidScriptOutput(format!("non-finite float {f}"))),
        CelValue::String(s) => Ok(JsonValue::String(s.to_string())),
        CelValue::Bytes(b) => Ok(JsonValue::Array(
            b.iter().map(|byte| JsonValue::from(*byte)).collect(),
        )),
        CelValue::List(items) => items
            .iter()
            .cloned()
            .map(cel_to_json)
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array),
        CelValue::Map(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map.map.iter() {
                let key = match key {
                    Key::String(s) => s.to_string(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                out.insert(key, cel_to_json(value.clone())?);
            }
            Ok(JsonValue::Object(out))
        }
        other => Err(CodecError::InvalidScriptOutput(format!("{other:?}"))),
    }
}

fn json_to_cel(json: JsonValue) -> Result<CelValue> {
    match json {
        JsonValue::Null => Ok(CelValue::Null),
        JsonValue::Bool(b) => Ok(CelValue::Bool(b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(CelValue::Int(i))
            } else if let Some(u) = n.as_u64() {
                Ok(CelValue::UInt(u))
            } else {
                n.as_f64()
                    .map(CelValue::Float)
                    .ok_or_else(|| CodecError::InvalidScriptOutput(n.to_string()))
            }
        }
        JsonValue::String(s) => Ok(CelValue::String(Arc::new(s))),
        JsonValue::Array(arr) => {
            let items = arr.into_iter().map(json_to_cel).collect::<Result<Vec<_>>>()?;
            Ok(CelValue::List(Arc::new(items)))
        }
        JsonValue::Object(obj) => {
            let mut map: HashMap<Key, CelValue> = HashMap::new();
            for (key, value) in obj {
                map.insert(Key::String(Arc::new(key)), json_to_cel(value)?);
            }
            Ok(CelValue::Map(Map { map: Arc::new(map) }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> HashMap<String, String> {
        HashMap::from([("interval".to_string(), "30".to_string())])
    }

    #[test]
    fn test_encode_list_of_ints() {
        let bytes = encode(
            "[obj.mode == 'on' ? 1 : 0, f_port]",
            10,
            &vars(),
            &json!({"mode": "on"}),
        )
        .unwrap();
        assert_eq!(bytes, vec![1, 10]);
    }

    #[test]
    fn test_encode_reads_variables() {
        let bytes = encode("[int(variables.interval)]", 1, &vars(), &json!({})).unwrap();
        assert_eq!(bytes, vec![30]);
    }

    #[test]
    fn test_encode_rejects_out_of_range_byte() {
        let result = encode("[256]", 1, &vars(), &json!({}));
        assert!(matches!(result, Err(CodecError::InvalidScriptOutput(_))));
    }

    #[test]
    fn test_encode_rejects_non_byte_output() {
        let result = encode("'hello'", 1, &vars(), &json!({}));
        assert!(matches!(result, Err(CodecError::InvalidScriptOutput(_))));
    }

    #[test]
    fn test_compile_error() {
        let result = encode("invalid syntax here!", 1, &vars(), &json!({}));
        assert!(matches!(result, Err(CodecError::ScriptCompilation(_))));
    }

    #[test]
    fn test_execution_error() {
        let result = encode("[undefined_var]", 1, &vars(), &json!({}));
        assert!(matches!(result, Err(CodecError::ScriptExecution(_))));
    }

    #[test]
    fn test_decode_with_cayenne_helper() {
        let result = decode(
            "cayenne_lpp_decode(bytes)",
            2,
            &vars(),
            &[0x01, 0x67, 0x01, 0x10],
        )
        .unwrap();
        assert_eq!(result, json!({"temperature_1": 27.2}));
    }

    #[test]
    fn test_decode_map_output() {
        let result = decode("{'port': f_port}", 5, &vars(), &[]).unwrap();
        assert_eq!(result, json!({"port": 5}));
    }
}
