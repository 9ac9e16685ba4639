//! Host audio hardware seam
//!
//! `AudioHost` mirrors the handful of host calls the rest of the crate needs:
//! object property queries on devices and the system object, property
//! listeners, and output unit lifecycle. Every call answers with the raw host
//! status on failure so the layers above decide what is fatal.
//!
//! Hosts never hold pointers into our objects. Render callbacks and property
//! listeners are registered with an opaque 64-bit token, and the host invokes
//! exactly two fixed entry points with it:
//!
//! - [`crate::audio::dispatch::render_entry`] for every render request
//! - [`crate::audio::dispatch::listener_entry`] for every property change
//!
//! # Implementations
//!
//! - `CoreAudioHost` (macOS only) talks to the HAL through `coreaudio-sys`
//! - [`SimulatedHost`] is a software host with real render threads, used for
//!   tests and for running the demo on machines without CoreAudio

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::error::Result;
use crate::audio::types::{DeviceId, Scope, StreamDescription};

#[cfg(target_os = "macos")]
pub mod coreaudio;
pub mod simulated;

#[cfg(target_os = "macos")]
pub use coreaudio::CoreAudioHost;
pub use simulated::{SimulatedDevice, SimulatedHost, SimulatedHostConfig, UnitStep};

/// Raw host status code (OSStatus)
pub type HostStatus = i32;

pub const NO_ERROR: HostStatus = 0;
/// 'what'
pub const UNSPECIFIED_ERROR: HostStatus = 0x7768_6174;
/// 'who?'
pub const UNKNOWN_PROPERTY_ERROR: HostStatus = 0x7768_6F3F;
/// '!obj'
pub const BAD_OBJECT_ERROR: HostStatus = 0x216F_626A;
/// 'nope'
pub const ILLEGAL_OPERATION_ERROR: HostStatus = 0x6E6F_7065;
pub const CANNOT_DO_IN_CURRENT_CONTEXT: HostStatus = -10863;
pub const UNINITIALIZED_ERROR: HostStatus = -10867;
pub const FORMAT_NOT_SUPPORTED: HostStatus = -10868;
pub const INVALID_PARAMETER: HostStatus = -10878;

/// Object id of the host's system object (kAudioObjectSystemObject)
pub const SYSTEM_OBJECT: u32 = 1;

/// The single output bus (element 0) of an output unit
pub const OUTPUT_BUS: u32 = 0;

/// System-object properties the notifier listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostProperty {
    Devices,
    DefaultInputDevice,
    DefaultOutputDevice,
}

impl HostProperty {
    pub fn default_device(scope: Scope) -> Self {
        match scope {
            Scope::Input => HostProperty::DefaultInputDevice,
            Scope::Output => HostProperty::DefaultOutputDevice,
        }
    }
}

/// Handle to one host output unit, owned by exactly one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitHandle(pub u64);

/// Host audio hardware layer
pub trait AudioHost: Send + Sync {
    // === Object queries ===

    /// All devices currently known to the host
    fn device_ids(&self) -> std::result::Result<Vec<DeviceId>, HostStatus>;

    /// Number of streams the device exposes in `scope`
    fn stream_count(&self, device: DeviceId, scope: Scope) -> std::result::Result<u32, HostStatus>;

    fn device_name(&self, device: DeviceId) -> std::result::Result<String, HostStatus>;

    /// Current default device; may be `DeviceId::UNKNOWN` when none is configured
    fn default_device(&self, scope: Scope) -> std::result::Result<DeviceId, HostStatus>;

    /// Request a new default device.
    ///
    /// Hosts are permissive here: success is reported for unknown ids, ids
    /// lacking the capability and ids that are already the default.
    fn set_default_device(&self, device: DeviceId, scope: Scope) -> std::result::Result<(), HostStatus>;

    /// Currently selected data source of the device in `scope`
    fn data_source(&self, device: DeviceId, scope: Scope) -> std::result::Result<u32, HostStatus>;

    fn data_source_name(
        &self,
        device: DeviceId,
        scope: Scope,
        source: u32,
    ) -> std::result::Result<String, HostStatus>;

    // === Property listeners ===

    /// Register `token` for change notifications of `property` on the system object
    fn add_property_listener(&self, property: HostProperty, token: u64) -> std::result::Result<(), HostStatus>;

    fn remove_property_listener(&self, property: HostProperty, token: u64) -> std::result::Result<(), HostStatus>;

    // === Output units ===

    /// Create an output unit bound to the current default output device
    fn new_default_output_unit(&self) -> std::result::Result<UnitHandle, HostStatus>;

    fn set_stream_format(
        &self,
        unit: UnitHandle,
        bus: u32,
        description: &StreamDescription,
    ) -> std::result::Result<(), HostStatus>;

    /// Route render requests for `bus` to the render entry point with `token`
    fn set_render_callback(&self, unit: UnitHandle, bus: u32, token: u64) -> std::result::Result<(), HostStatus>;

    fn initialize_unit(&self, unit: UnitHandle) -> std::result::Result<(), HostStatus>;

    /// Begin periodic render requests
    fn start_unit(&self, unit: UnitHandle) -> std::result::Result<(), HostStatus>;

    /// Halt render requests; returns after any in-flight request finished
    fn stop_unit(&self, unit: UnitHandle) -> std::result::Result<(), HostStatus>;

    fn uninitialize_unit(&self, unit: UnitHandle) -> std::result::Result<(), HostStatus>;

    fn dispose_unit(&self, unit: UnitHandle) -> std::result::Result<(), HostStatus>;

    // === Info ===

    /// Backend name (e.g. "CoreAudio", "Simulated")
    fn name(&self) -> &'static str;
}

/// Which host implementation to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The platform's native host (CoreAudio on macOS)
    #[default]
    Native,
    Simulated,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(BackendKind::Native),
            "simulated" => Ok(BackendKind::Simulated),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Factory function to create the requested host for the current platform
pub fn create_host(kind: BackendKind, simulated: &SimulatedHostConfig) -> Result<Arc<dyn AudioHost>> {
    match kind {
        BackendKind::Simulated => Ok(Arc::new(SimulatedHost::new(simulated.clone()))),
        BackendKind::Native => {
            #[cfg(target_os = "macos")]
            {
                Ok(Arc::new(CoreAudioHost::new()))
            }

            #[cfg(not(target_os = "macos"))]
            {
                Err(crate::audio::error::AudioError::BackendUnavailable(
                    "No native audio host for this platform".to_string(),
                ))
            }
        }
    }
}
