//! Device registry and emitting-device election.
//!
//! Guarantees at most one device with `is_emitting = true`. Election keeps
//! the current emitter while it is present and otherwise picks the
//! most-recently-joined remaining device, deterministic given join order.

use chrono::{DateTime, Utc};

use crate::geo::Position;

/// A physical device admitted to a room.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub owner_user_id: String,
    pub position: Option<Position>,
    pub position_at: Option<DateTime<Utc>>,
    pub is_emitting: bool,
    joined_seq: u64,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    next_seq: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.iter().any(|d| d.id == device_id)
    }

    pub fn owner_of(&self, device_id: &str) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.owner_user_id.as_str())
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Admit a device. A rejoining device keeps its identity but refreshes
    /// its position and join recency.
    pub fn admit(
        &mut self,
        device_id: &str,
        owner_user_id: &str,
        position: Option<Position>,
        now: DateTime<Utc>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(device) = self.devices.iter_mut().find(|d| d.id == device_id) {
            device.owner_user_id = owner_user_id.to_string();
            device.position = position;
            device.position_at = position.map(|_| now);
            device.joined_seq = seq;
            return;
        }
        self.devices.push(Device {
            id: device_id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            position,
            position_at: position.map(|_| now),
            is_emitting: false,
            joined_seq: seq,
        });
    }

    /// Refresh a device's last-known position. Returns `false` if the
    /// device is not in the room.
    pub fn update_position(
        &mut self,
        device_id: &str,
        position: Position,
        now: DateTime<Utc>,
    ) -> bool {
        match self.devices.iter_mut().find(|d| d.id == device_id) {
            Some(device) => {
                device.position = Some(position);
                device.position_at = Some(now);
                true
            }
            None => false,
        }
    }

    /// The freshest last-known position among a user's devices.
    pub fn latest_position(&self, user_id: &str) -> Option<Position> {
        self.devices
            .iter()
            .filter(|d| d.owner_user_id == user_id)
            .filter_map(|d| d.position_at.zip(d.position))
            .max_by_key(|(at, _)| *at)
            .map(|(_, position)| position)
    }

    pub fn emitting_device_id(&self) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.is_emitting)
            .map(|d| d.id.as_str())
    }

    /// Make `device_id` the sole emitter. Returns `false` if it is absent.
    pub fn set_emitting(&mut self, device_id: &str) -> bool {
        if !self.contains(device_id) {
            return false;
        }
        for device in &mut self.devices {
            device.is_emitting = device.id == device_id;
        }
        true
    }

    /// Remove every device owned by a user.
    ///
    /// Returns the removed device ids and whether the emitter was among them.
    pub fn remove_user(&mut self, user_id: &str) -> (Vec<String>, bool) {
        let mut removed = Vec::new();
        let mut emitter_removed = false;
        self.devices.retain(|d| {
            if d.owner_user_id == user_id {
                emitter_removed |= d.is_emitting;
                removed.push(d.id.clone());
                false
            } else {
                true
            }
        });
        (removed, emitter_removed)
    }

    /// Re-establish the single-emitter invariant after a membership change.
    ///
    /// Keeps the current emitter if still present; otherwise elects the
    /// most-recently-joined remaining device. Returns the new emitter id
    /// when the emitter changed.
    pub fn elect(&mut self) -> Option<String> {
        if self.emitting_device_id().is_some() {
            return None;
        }
        let elected = self
            .devices
            .iter()
            .max_by_key(|d| d.joined_seq)?
            .id
            .clone();
        self.set_emitting(&elected);
        Some(elected)
    }

    /// Invariant check: more than one emitter is an internal error.
    pub fn check_single_emitter(&self) -> Result<(), String> {
        let emitting = self.devices.iter().filter(|d| d.is_emitting).count();
        if emitting > 1 {
            return Err(format!("{emitting} devices are marked emitting"));
        }
        Ok(())
    }
}
