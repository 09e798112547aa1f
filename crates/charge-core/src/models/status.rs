//! Station status events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StationId;

/// Status snapshot decoded from an inbound station frame
///
/// The three bitfields are published as 8-character binary strings
/// (`"00000001"`), which is what back-office consumers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    pub station_id: StationId,
    #[serde(with = "bitfield")]
    pub status: u8,
    #[serde(with = "bitfield")]
    pub error: u8,
    #[serde(with = "bitfield")]
    pub other: u8,
    /// When the frame was received
    pub timestamp: DateTime<Utc>,
}

impl StationStatus {
    pub fn new(station_id: StationId, status: u8, error: u8, other: u8) -> Self {
        Self {
            station_id,
            status,
            error,
            other,
            timestamp: Utc::now(),
        }
    }

    /// Whether any error bit is raised
    pub fn has_error(&self) -> bool {
        self.error != 0
    }
}

mod bitfield {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u8, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:08b}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
        let s = String::deserialize(deserializer)?;
        u8::from_str_radix(&s, 2).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bitfields_serialize_as_binary_strings() {
        let status = StationStatus::new(StationId::from("01"), 0b0000_0001, 0, 0b1000_0000);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["stationId"], "01");
        assert_eq!(json["status"], "00000001");
        assert_eq!(json["error"], "00000000");
        assert_eq!(json["other"], "10000000");
    }

    #[test]
    fn bitfields_deserialize_from_binary_strings() {
        let status = StationStatus::new(StationId::from("07"), 3, 4, 5);
        let json = serde_json::to_string(&status).unwrap();
        let back: StationStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn has_error() {
        assert!(!StationStatus::new("01".into(), 1, 0, 0).has_error());
        assert!(StationStatus::new("01".into(), 1, 2, 0).has_error());
    }
}
