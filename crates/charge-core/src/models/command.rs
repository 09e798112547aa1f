//! Command events

use serde::{Deserialize, Serialize};

use crate::StationId;

/// Request to send a named command to a station
///
/// `cmd` is the symbolic command name (`"start"`, `"stop"`, `"read"`);
/// validation happens in the command codec, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub station_id: StationId,
    pub cmd: String,
}

impl Command {
    pub fn new(station_id: impl Into<StationId>, cmd: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            cmd: cmd.into(),
        }
    }
}
