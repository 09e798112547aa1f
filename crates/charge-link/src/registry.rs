//! Station id -> connection map

use std::collections::HashMap;
use std::sync::Arc;

use charge_core::StationId;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::codec::CommandCodec;
use crate::config::{ConnectionOptions, StationConfig};
use crate::connection::DeviceConnection;
use crate::error::LinkError;
use crate::observer::LinkObserver;
use crate::transport::{create_connector, Connector};

/// Concurrency-safe registry of open station connections
///
/// Every connection opened here reports to the registry's observer.
pub struct DeviceRegistry {
    connections: RwLock<HashMap<StationId, Arc<DeviceConnection>>>,
    observer: Arc<dyn LinkObserver>,
}

impl DeviceRegistry {
    pub fn new(observer: Arc<dyn LinkObserver>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            observer,
        }
    }

    /// Open a connection for a configured station
    pub fn add(&self, config: &StationConfig) -> Result<Arc<DeviceConnection>, LinkError> {
        let connector = create_connector(&config.transport)?;
        Ok(self.add_with_connector(
            config.id.clone(),
            connector,
            CommandCodec::new(config.frame_format),
            config.options(),
        ))
    }

    /// Open a connection over an explicit connector
    ///
    /// An existing entry for the same id is replaced, not closed; remove it
    /// first if it should be shut down.
    pub fn add_with_connector(
        &self,
        station_id: StationId,
        connector: Arc<dyn Connector>,
        codec: CommandCodec,
        options: ConnectionOptions,
    ) -> Arc<DeviceConnection> {
        let connection = Arc::new(DeviceConnection::open(
            station_id.clone(),
            connector,
            codec,
            options,
            self.observer.clone(),
        ));

        let replaced = self
            .connections
            .write()
            .insert(station_id.clone(), connection.clone());
        if replaced.is_some() {
            warn!(station_id = %station_id, "Replaced existing station connection");
        }
        connection
    }

    pub fn get(&self, station_id: &str) -> Option<Arc<DeviceConnection>> {
        self.connections.read().get(station_id).cloned()
    }

    /// Snapshot of all entries
    pub fn get_all(&self) -> HashMap<StationId, Arc<DeviceConnection>> {
        self.connections.read().clone()
    }

    pub fn station_ids(&self) -> Vec<StationId> {
        let mut ids: Vec<StationId> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Delete and close one connection
    pub async fn remove(&self, station_id: &str) -> Result<(), LinkError> {
        let removed = self.connections.write().remove(station_id);
        match removed {
            Some(connection) => {
                connection.close().await;
                info!(station_id, "Station removed");
                Ok(())
            }
            None => Err(LinkError::StationNotFound(StationId::from(station_id))),
        }
    }

    /// Delete and close every connection
    pub async fn close_all(&self) {
        let drained: Vec<Arc<DeviceConnection>> =
            self.connections.write().drain().map(|(_, c)| c).collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        join_all(drained.iter().map(|c| c.close())).await;
        info!(count, "All station connections closed");
    }
}
