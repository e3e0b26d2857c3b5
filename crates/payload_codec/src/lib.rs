//! Converts structured device payloads to raw frame bytes and back.

pub mod cayenne_lpp;
mod error;
pub mod script;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

pub use error::*;

/// Codec configured on a device profile or application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    None,
    CayenneLpp,
    CustomScript {
        encode_script: String,
        decode_script: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    None,
    CayenneLpp,
    CustomScript,
}

impl CodecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::None => "NONE",
            CodecKind::CayenneLpp => "CAYENNE_LPP",
            CodecKind::CustomScript => "CUSTOM_SCRIPT",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "NONE" => Ok(CodecKind::None),
            "CAYENNE_LPP" => Ok(CodecKind::CayenneLpp),
            "CUSTOM_SCRIPT" | "CUSTOM_JS" => Ok(CodecKind::CustomScript),
            other => Err(CodecError::UnknownKind(other.to_string())),
        }
    }
}

impl Codec {
    /// Builds a codec from its stored representation.
    pub fn from_kind(kind: &str, encode_script: &str, decode_script: &str) -> Result<Self> {
        Ok(match kind.parse::<CodecKind>()? {
            CodecKind::None => Codec::None,
            CodecKind::CayenneLpp => Codec::CayenneLpp,
            CodecKind::CustomScript => Codec::CustomScript {
                encode_script: encode_script.to_string(),
                decode_script: decode_script.to_string(),
            },
        })
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            Codec::None => CodecKind::None,
            Codec::CayenneLpp => CodecKind::CayenneLpp,
            Codec::CustomScript { .. } => CodecKind::CustomScript,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Codec::None)
    }

    /// Returns `self`, or `fallback` when no codec is configured.
    pub fn or(self, fallback: Codec) -> Codec {
        if self.is_none() {
            fallback
        } else {
            self
        }
    }

    pub fn encode(
        &self,
        f_port: u8,
        variables: &HashMap<String, String>,
        obj: &Value,
    ) -> Result<Vec<u8>> {
        match self {
            Codec::None => Err(CodecError::NoCodec),
            Codec::CayenneLpp => cayenne_lpp::encode(obj),
            Codec::CustomScript { encode_script, .. } => {
                script::encode(encode_script, f_port, variables, obj)
            }
        }
    }

    pub fn decode(
        &self,
        f_port: u8,
        variables: &HashMap<String, String>,
        bytes: &[u8],
    ) -> Result<Value> {
        match self {
            Codec::None => Err(CodecError::NoCodec),
            Codec::CayenneLpp => cayenne_lpp::decode(bytes),
            Codec::CustomScript { decode_script, .. } => {
                script::decode(decode_script, f_port, variables, bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_kind() {
        assert_eq!(Codec::from_kind("", "", "").unwrap(), Codec::None);
        assert_eq!(Codec::from_kind("CAYENNE_LPP", "", "").unwrap(), Codec::CayenneLpp);
        assert_eq!(
            Codec::from_kind("CUSTOM_SCRIPT", "[1]", "{}").unwrap(),
            Codec::CustomScript {
                encode_script: "[1]".to_string(),
                decode_script: "{}".to_string(),
            }
        );
        assert!(matches!(
            Codec::from_kind("LUA", "", ""),
            Err(CodecError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_none_cannot_encode() {
        let result = Codec::None.encode(1, &HashMap::new(), &json!({"a": 1}));
        assert!(matches!(result, Err(CodecError::NoCodec)));
    }

    #[test]
    fn test_fallback_only_replaces_none() {
        assert_eq!(Codec::None.or(Codec::CayenneLpp), Codec::CayenneLpp);
        let script = Codec::CustomScript {
            encode_script: "[0]".to_string(),
            decode_script: String::new(),
        };
        assert_eq!(script.clone().or(Codec::CayenneLpp), script);
    }

    #[test]
    fn test_dispatch_cayenne() {
        let bytes = Codec::CayenneLpp
            .encode(1, &HashMap::new(), &json!({"digital_output_2": 1}))
            .unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x01]);
        assert_eq!(
            Codec::CayenneLpp.decode(1, &HashMap::new(), &bytes).unwrap(),
            json!({"digital_output_2": 1})
        );
    }

    #[test]
    fn test_dispatch_script() {
        let codec = Codec::CustomScript {
            encode_script: "[f_port, obj.level]".to_string(),
            decode_script: "{'first': bytes[0]}".to_string(),
        };
        assert_eq!(
            codec.encode(7, &HashMap::new(), &json!({"level": 3})).unwrap(),
            vec![7, 3]
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(Codec::CayenneLpp.kind().to_string(), "CAYENNE_LPP");
    }
}
