//! Scan session coordinator: device registry, per-division rooms and
//! occupancy broadcasts.
//!
//! Delivery is at most once. A device that reconnects binds again and gets
//! the current count; nothing missed while it was away is replayed.
//!
//! Counts of one division are read and queued under that division's lock,
//! so every device sees them in the order the store produced them and the
//! last update a device receives is never older than the store.

use crate::core::auth::AuthContext;
use crate::core::engine::Engine;
use crate::errors::{AppError, AppResult};
use crate::models::division::DivisionId;
use crate::server::protocol::{ClientMessage, ServerMessage};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One connected scanning device, bound to a single division.
#[derive(Debug)]
pub struct Device {
    pub id: Uuid,
    pub division: DivisionId,
    pub auth: AuthContext,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Device {
    /// Queue a message for the device. A closed socket is not an error.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}

pub struct ScanCoordinator {
    engine: Arc<Engine>,
    devices: DashMap<Uuid, Arc<Device>>,
    rooms: DashMap<DivisionId, Vec<Uuid>>,
    count_locks: DashMap<DivisionId, Arc<Mutex<()>>>,
}

impl fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanCoordinator")
            .field("device_count", &self.devices.len())
            .field("room_count", &self.rooms.len())
            .finish()
    }
}

impl ScanCoordinator {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            devices: DashMap::new(),
            rooms: DashMap::new(),
            count_locks: DashMap::new(),
        }
    }

    fn count_lock(&self, division: DivisionId) -> Arc<Mutex<()>> {
        self.count_locks.entry(division).or_default().clone()
    }

    /// Register a device on `division`. The caller must be allowed to
    /// operate there. The device immediately receives the current count.
    pub async fn bind(
        &self,
        auth: AuthContext,
        division: usize,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> AppResult<Arc<Device>> {
        let division = self.engine.divisions().resolve(division)?;
        auth.require_division(division)?;

        let device = Arc::new(Device {
            id: Uuid::new_v4(),
            division,
            auth,
            tx,
        });
        let lock = self.count_lock(division);
        let _serial = lock.lock().await;
        let initial = self.count_message(division)?;
        self.devices.insert(device.id, device.clone());
        self.rooms.entry(division).or_default().push(device.id);

        info!(device = %device.id, division = %division, "device bound");
        device.send(initial);
        Ok(device)
    }

    pub fn unbind(&self, device_id: Uuid) {
        let Some((_, device)) = self.devices.remove(&device_id) else {
            return;
        };
        if let Some(mut room) = self.rooms.get_mut(&device.division) {
            room.retain(|id| *id != device_id);
        }
        self.rooms.remove_if(&device.division, |_, room| room.is_empty());
        info!(device = %device_id, division = %device.division, "device unbound");
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn room_size(&self, division: DivisionId) -> usize {
        self.rooms.get(&division).map(|r| r.len()).unwrap_or(0)
    }

    fn count_message(&self, division: DivisionId) -> AppResult<ServerMessage> {
        let count = self.engine.ledger().count_active(division)?;
        Ok(self.count_update(division, count))
    }

    fn count_update(&self, division: DivisionId, count: usize) -> ServerMessage {
        ServerMessage::CountUpdate {
            division,
            name: self
                .engine
                .divisions()
                .name(division)
                .unwrap_or_default()
                .to_string(),
            count,
        }
    }

    /// Send the current count of `division` to every device bound to it.
    pub async fn broadcast_count(&self, division: DivisionId) -> AppResult<usize> {
        let lock = self.count_lock(division);
        let _serial = lock.lock().await;
        let count = self.engine.ledger().count_active(division)?;
        Ok(self.send_to_room(division, count))
    }

    /// Refresh every division, e.g. after a forced checkout emptied them.
    pub async fn broadcast_all(&self) -> usize {
        let mut delivered = 0;
        for division in self.engine.divisions().ids() {
            match self.broadcast_count(division).await {
                Ok(n) => delivered += n,
                Err(e) => warn!(division = %division, error = %e, "count broadcast failed"),
            }
        }
        delivered
    }

    /// Caller holds the division's count lock.
    fn send_to_room(&self, division: DivisionId, count: usize) -> usize {
        let msg = self.count_update(division, count);
        let members: Vec<Arc<Device>> = self
            .rooms
            .get(&division)
            .map(|room| {
                room.iter()
                    .filter_map(|id| self.devices.get(id).map(|d| d.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for device in members {
            if device.send(msg.clone()) {
                delivered += 1;
            } else {
                debug!(device = %device.id, "dropping update for closed device");
            }
        }
        delivered
    }

    /// Handle one inbound message from `device` and return the reply for it.
    pub async fn handle(&self, device: &Device, msg: ClientMessage) -> ServerMessage {
        match msg {
            ClientMessage::Scan { guid } => self.handle_scan(device, guid).await,
            ClientMessage::Status { guid } => self.handle_status(guid),
            ClientMessage::Ping => ServerMessage::Pong,
        }
    }

    async fn handle_scan(&self, device: &Device, guid: String) -> ServerMessage {
        let ledger = self.engine.ledger();

        let outcome = match ledger.resolve_scanned(&guid) {
            Ok(guest) => ledger.scan(&device.auth, &guest, device.division).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                let division = outcome.visit.division;
                let lock = self.count_lock(division);
                let serial = lock.lock().await;
                let count = match ledger.count_active(division) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(division = %division, error = %e, "count broadcast failed");
                        drop(serial);
                        return self.scan_failed(device, guid, e);
                    }
                };
                self.send_to_room(division, count);
                drop(serial);
                ServerMessage::ScanResult {
                    guid,
                    status: outcome.direction.into(),
                    count,
                    error: None,
                    message: None,
                }
            }
            Err(e) => self.scan_failed(device, guid, e),
        }
    }

    fn scan_failed(&self, device: &Device, guid: String, err: AppError) -> ServerMessage {
        if err.is_recoverable() {
            debug!(device = %device.id, error = %err, "scan rejected");
        } else {
            error!(device = %device.id, error = %err, "scan failed");
        }
        let count = self
            .engine
            .ledger()
            .count_active(device.division)
            .unwrap_or_default();
        ServerMessage::scan_failed(guid, count, &err)
    }

    fn handle_status(&self, guid: String) -> ServerMessage {
        let ledger = self.engine.ledger();
        match ledger
            .resolve_scanned(&guid)
            .and_then(|guest| ledger.guest_status(&guest))
        {
            Ok(status) => ServerMessage::GuestStatus { guid, status },
            Err(e) => ServerMessage::error(&e),
        }
    }
}
