//! Domain event definitions

use crate::types::Device;

/// Change in the set of attachable devices, produced by diffing two
/// registry snapshots. Devices present in both snapshots produce nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Added(Device),
    Removed(Device),
}

impl DeviceEvent {
    pub fn device(&self) -> &Device {
        match self {
            DeviceEvent::Added(d) | DeviceEvent::Removed(d) => d,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, DeviceEvent::Added(_))
    }
}
