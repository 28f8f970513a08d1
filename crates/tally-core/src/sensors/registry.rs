//! Static table of supported sensor types, keyed by the persisted type code

use log::warn;

/// Metadata for one supported sensor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorInfo {
    pub code: u8,
    pub name: &'static str,
    /// Detections arrive as a GPIO interrupt rather than by polling
    pub uses_interrupt: bool,
    /// Able to hold a presence state for occupancy mode
    pub supports_occupancy: bool,
}

pub const DEFAULT_SENSOR_CODE: u8 = 1;

pub static SENSOR_TABLE: [SensorInfo; 4] = [
    SensorInfo {
        code: 1,
        name: "PIR",
        uses_interrupt: true,
        supports_occupancy: true,
    },
    SensorInfo {
        code: 2,
        name: "Pressure tube",
        uses_interrupt: true,
        supports_occupancy: false,
    },
    SensorInfo {
        code: 3,
        name: "Radar",
        uses_interrupt: false,
        supports_occupancy: true,
    },
    SensorInfo {
        code: 4,
        name: "Magnetometer",
        uses_interrupt: false,
        supports_occupancy: true,
    },
];

pub fn lookup(code: u8) -> Option<&'static SensorInfo> {
    SENSOR_TABLE.iter().find(|info| info.code == code)
}

/// Entry for `code`, or the default entry when the code is unknown.
pub fn lookup_or_default(code: u8) -> &'static SensorInfo {
    match lookup(code) {
        Some(info) => info,
        None => {
            warn!(" Unknown sensor type {}, using default", code);
            &SENSOR_TABLE[0]
        }
    }
}
