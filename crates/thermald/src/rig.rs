//! Wiring-level state that outlives any single queued command: the FCU
//! inventory paired with one wire-level [`FcuBus`] per address, and the
//! glycol thermocouple readout the glycol-control task's `mirrorLoopAverage`
//! is computed from.

use ts_devices::fcu::{FcuBus, FcuInventory};
use ts_devices::thermocouple::CHANNELS_PER_UNIT;
use ts_settings::FcuSettings;

/// The FCU bus side of the inventory: one [`FcuBus`] per configured address,
/// index-aligned with `FcuInventory`'s units.
pub struct FcuRig {
    pub inventory: FcuInventory,
    pub buses: Vec<FcuBus>,
}

impl FcuRig {
    pub fn new(settings: &FcuSettings) -> Self {
        let inventory = FcuInventory::new(settings.unit_count, settings.auto_disable, settings.failures_to_disable);
        let buses = (0..settings.unit_count as u8).map(|addr| FcuBus::new(addr, settings.failures_to_disable)).collect();
        Self { inventory, buses }
    }
}

/// The glycol thermocouple unit's last full eight-channel reading, shared
/// between the device-poll thread that produces it and the glycol-control
/// task factory that consumes it on its own, slower cadence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThermocoupleReadout {
    pub channels_c: Option<[f64; CHANNELS_PER_UNIT]>,
}
