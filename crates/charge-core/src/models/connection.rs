//! Connectivity events and the TCP status query

use serde::{Deserialize, Serialize};

use crate::StationId;

/// Live connectivity of one station link
///
/// Published whenever a link comes up or goes down, and returned as the
/// answer to a [`TcpStatusRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub station_id: StationId,
    pub is_connect: bool,
    pub msg: String,
}

impl ConnectionStatus {
    pub fn connected(station_id: StationId) -> Self {
        Self {
            station_id,
            is_connect: true,
            msg: "connected".to_string(),
        }
    }

    pub fn disconnected(station_id: StationId, msg: impl Into<String>) -> Self {
        Self {
            station_id,
            is_connect: false,
            msg: msg.into(),
        }
    }
}

/// Query for the live connection state of a station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpStatusRequest {
    pub station_id: StationId,
}

impl TcpStatusRequest {
    pub fn new(station_id: impl Into<StationId>) -> Self {
        Self {
            station_id: station_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_status_uses_camel_case_keys() {
        let json = serde_json::to_value(ConnectionStatus::connected("01".into())).unwrap();
        assert_eq!(json["stationId"], "01");
        assert_eq!(json["isConnect"], true);
        assert_eq!(json["msg"], "connected");
    }
}
