//! Link observer that feeds the status and connectivity buses

use charge_bus::EventBus;
use charge_core::{ConnectionStatus, StationStatus};
use charge_link::LinkObserver;
use tracing::debug;

use crate::bus_manager::BusManager;

pub struct StationPublisher {
    status: EventBus<StationStatus>,
    connectivity: EventBus<ConnectionStatus>,
}

impl StationPublisher {
    pub fn new(buses: &BusManager) -> Self {
        Self {
            status: buses.status.clone(),
            connectivity: buses.connectivity.clone(),
        }
    }
}

impl LinkObserver for StationPublisher {
    fn on_status(&self, status: StationStatus) {
        let station_id = status.station_id.clone();
        if let Err(e) = self.status.publish_async(status) {
            debug!(%station_id, error = %e, "Status event dropped");
        }
    }

    fn on_connection_change(&self, status: ConnectionStatus) {
        let station_id = status.station_id.clone();
        if let Err(e) = self.connectivity.publish_async(status) {
            debug!(%station_id, error = %e, "Connectivity event dropped");
        }
    }
}
