use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{LorawanError, Result};

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; $len] =
                    bytes
                        .try_into()
                        .map_err(|_| LorawanError::InvalidLength {
                            expected: $len,
                            actual: bytes.len(),
                        })?;
                Ok(Self(arr))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl FromStr for $name {
            type Err = LorawanError;

            fn from_str(s: &str) -> Result<Self> {
                let invalid = || LorawanError::InvalidHex {
                    kind: $kind,
                    expected: $len,
                    value: s.to_string(),
                };
                let bytes = hex::decode(s.trim()).map_err(|_| invalid())?;
                Self::from_slice(&bytes).map_err(|_| invalid())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// 64-bit extended unique identifier (DevEUI, JoinEUI).
    Eui64,
    8,
    "EUI64"
);

fixed_bytes!(
    /// 32-bit device (or multicast) address. Bytes are kept in the order they are
    /// displayed, big-endian; the air interface uses little-endian.
    DevAddr,
    4,
    "DevAddr"
);

fixed_bytes!(
    /// AES-128 key.
    Aes128Key,
    16,
    "AES128 key"
);

impl DevAddr {
    /// Address bytes in over-the-air (little-endian) order.
    pub fn to_le_bytes(&self) -> [u8; 4] {
        let mut out = self.0;
        out.reverse();
        out
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        let mut be = bytes;
        be.reverse();
        Self(be)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl Aes128Key {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eui64_parse_and_display() {
        let eui: Eui64 = "0102030405060708".parse().unwrap();
        assert_eq!(eui.0, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(eui.to_string(), "0102030405060708");
    }

    #[test]
    fn test_eui64_rejects_wrong_length() {
        let result = "01020304".parse::<Eui64>();
        assert!(matches!(result, Err(LorawanError::InvalidHex { kind: "EUI64", .. })));
    }

    #[test]
    fn test_eui64_rejects_non_hex() {
        assert!("zz02030405060708".parse::<Eui64>().is_err());
    }

    #[test]
    fn test_dev_addr_le_bytes() {
        let addr: DevAddr = "01020304".parse().unwrap();
        assert_eq!(addr.to_le_bytes(), [4, 3, 2, 1]);
        assert_eq!(DevAddr::from_le_bytes([4, 3, 2, 1]), addr);
    }

    #[test]
    fn test_key_from_slice_length_checked() {
        assert!(Aes128Key::from_slice(&[0u8; 15]).is_err());
        assert!(Aes128Key::from_slice(&[0u8; 16]).unwrap().is_zero());
    }
}
