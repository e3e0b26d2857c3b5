//! Regional band parameters.
//!
//! Tables follow the LoRaWAN Regional Parameters for the default channel plan
//! (no repeater compatibility, no uplink/downlink dwell-time limit). `None`
//! marks a data rate the region leaves undefined (RFU).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{LorawanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Eu868,
    Us915,
    Cn779,
    Eu433,
    Au915,
    Cn470,
    As923,
    Kr920,
    In865,
    Ru864,
}

impl Region {
    pub const ALL: [Region; 10] = [
        Region::Eu868,
        Region::Us915,
        Region::Cn779,
        Region::Eu433,
        Region::Au915,
        Region::Cn470,
        Region::As923,
        Region::Kr920,
        Region::In865,
        Region::Ru864,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Eu868 => "EU868",
            Region::Us915 => "US915",
            Region::Cn779 => "CN779",
            Region::Eu433 => "EU433",
            Region::Au915 => "AU915",
            Region::Cn470 => "CN470",
            Region::As923 => "AS923",
            Region::Kr920 => "KR920",
            Region::In865 => "IN865",
            Region::Ru864 => "RU864",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = LorawanError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        Region::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| LorawanError::UnsupportedRegion(s.to_string()))
    }
}

/// Maximum payload sizes for one data rate.
///
/// `m` is the maximum MACPayload size, `n` the maximum FRMPayload size when no
/// FOpts are present (`m - 8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPayloadSize {
    pub m: usize,
    pub n: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rx2Defaults {
    pub frequency: u32,
    pub data_rate: u8,
}

const EU_LIKE: &[Option<usize>] = &[
    Some(59),
    Some(59),
    Some(59),
    Some(123),
    Some(250),
    Some(250),
    Some(250),
    Some(250),
];

const US915: &[Option<usize>] = &[
    Some(19),
    Some(61),
    Some(133),
    Some(250),
    Some(250),
    None,
    None,
    None,
    Some(61),
    Some(137),
    Some(250),
    Some(250),
    Some(250),
    Some(250),
];

const AU915: &[Option<usize>] = &[
    Some(59),
    Some(59),
    Some(59),
    Some(123),
    Some(250),
    Some(250),
    Some(250),
    None,
    Some(61),
    Some(137),
    Some(250),
    Some(250),
    Some(250),
    Some(250),
];

const SIX_DR: &[Option<usize>] = &[
    Some(59),
    Some(59),
    Some(59),
    Some(123),
    Some(250),
    Some(250),
];

const IN865: &[Option<usize>] = &[
    Some(59),
    Some(59),
    Some(59),
    Some(123),
    Some(250),
    Some(250),
    None,
    Some(250),
];

fn mac_payload_table(region: Region) -> &'static [Option<usize>] {
    match region {
        Region::Eu868 | Region::Cn779 | Region::Eu433 | Region::As923 | Region::Ru864 => EU_LIKE,
        Region::Us915 => US915,
        Region::Au915 => AU915,
        Region::Cn470 | Region::Kr920 => SIX_DR,
        Region::In865 => IN865,
    }
}

/// Maximum payload size for `dr` under the region's default channel plan.
pub fn max_payload_size(region: Region, dr: u8) -> Result<MaxPayloadSize> {
    mac_payload_table(region)
        .get(dr as usize)
        .copied()
        .flatten()
        .map(|m| MaxPayloadSize { m, n: m - 8 })
        .ok_or_else(|| LorawanError::InvalidDataRate {
            region: region.to_string(),
            dr,
        })
}

pub fn rx2_defaults(region: Region) -> Rx2Defaults {
    let (frequency, data_rate) = match region {
        Region::Eu868 => (869_525_000, 0),
        Region::Us915 => (923_300_000, 8),
        Region::Cn779 => (786_000_000, 0),
        Region::Eu433 => (434_665_000, 0),
        Region::Au915 => (923_300_000, 8),
        Region::Cn470 => (505_300_000, 0),
        Region::As923 => (923_200_000, 2),
        Region::Kr920 => (921_900_000, 0),
        Region::In865 => (866_550_000, 2),
        Region::Ru864 => (869_100_000, 0),
    };
    Rx2Defaults {
        frequency,
        data_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_region_case_insensitive() {
        assert_eq!("eu868".parse::<Region>().unwrap(), Region::Eu868);
        assert_eq!("US915".parse::<Region>().unwrap(), Region::Us915);
    }

    #[test]
    fn test_parse_unknown_region() {
        let result = "XX123".parse::<Region>();
        assert_eq!(
            result,
            Err(LorawanError::UnsupportedRegion("XX123".to_string()))
        );
    }

    #[test]
    fn test_region_display_round_trips() {
        for region in Region::ALL {
            assert_eq!(region.to_string().parse::<Region>().unwrap(), region);
        }
    }

    #[test]
    fn test_eu868_dr0() {
        let size = max_payload_size(Region::Eu868, 0).unwrap();
        assert_eq!(size, MaxPayloadSize { m: 59, n: 51 });
    }

    #[test]
    fn test_us915_dr0_is_small() {
        assert_eq!(max_payload_size(Region::Us915, 0).unwrap().m, 19);
    }

    #[test]
    fn test_rfu_data_rate_rejected() {
        assert!(matches!(
            max_payload_size(Region::Us915, 5),
            Err(LorawanError::InvalidDataRate { dr: 5, .. })
        ));
    }

    #[test]
    fn test_out_of_table_data_rate_rejected() {
        assert!(max_payload_size(Region::Kr920, 6).is_err());
        assert!(max_payload_size(Region::Eu868, 15).is_err());
    }

    #[test]
    fn test_every_region_defines_dr0() {
        for region in Region::ALL {
            assert!(max_payload_size(region, 0).is_ok(), "{region}");
        }
    }

    #[test]
    fn test_rx2_defaults() {
        assert_eq!(
            rx2_defaults(Region::Eu868),
            Rx2Defaults {
                frequency: 869_525_000,
                data_rate: 0
            }
        );
    }
}
