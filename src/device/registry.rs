//! Device connection registry
//!
//! One [`DeviceConnection`] exists per configured device id. It pairs the
//! device client with the request queue that serialises on-demand requests,
//! and every node that references the device shares both. The registry is an
//! explicit object owned by the bridge and handed to node constructors.

use super::DeviceApi;
use crate::queue::{OverflowPolicy, RequestQueue};
use crate::types::FlowMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Client and queue shared by every node using one device
#[derive(Clone)]
pub struct DeviceConnection {
    pub id: String,
    pub address: String,
    pub client: Arc<dyn DeviceApi>,
    pub queue: Arc<RequestQueue<FlowMessage>>,
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("queue", &self.queue)
            .finish()
    }
}

/// Device id to connection map
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<DeviceConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the connection for `id`
    ///
    /// A replaced connection has its waiting requests dumped; nodes still
    /// holding it finish their in-flight request against the old client.
    pub fn create_connection(
        &self,
        id: &str,
        address: &str,
        client: Arc<dyn DeviceApi>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Arc<DeviceConnection> {
        let connection = Arc::new(DeviceConnection {
            id: id.to_string(),
            address: address.to_string(),
            client,
            queue: RequestQueue::new(capacity, policy),
        });

        let previous = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), Arc::clone(&connection));

        if let Some(previous) = previous {
            tracing::info!("Replacing connection for device {}", id);
            previous.queue.dump();
        } else {
            tracing::info!("Created connection for device {} at {}", id, address);
        }
        connection
    }

    /// Look up the connection for `id`
    pub fn get_connection(&self, id: &str) -> Option<Arc<DeviceConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Remove a connection, dumping its waiting requests
    pub fn remove_connection(&self, id: &str) -> Option<Arc<DeviceConnection>> {
        let removed = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(connection) = &removed {
            let dropped = connection.queue.dump();
            tracing::info!("Closed device {} ({} queued requests dropped)", id, dropped);
        }
        removed
    }

    /// Remove every connection
    pub fn close_all(&self) {
        let drained: Vec<_> = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, connection) in drained {
            let dropped = connection.queue.dump();
            tracing::debug!("Closed device {} ({} queued requests dropped)", id, dropped);
        }
    }

    /// Ids of all registered devices, sorted
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
