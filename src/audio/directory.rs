//! Device directory
//!
//! Stateless, synchronous queries against the host. Failures are never
//! reported as errors: unknown devices or failed host calls produce empty
//! lists, empty strings, empty capability sets or `DeviceId::UNKNOWN`.
//!
//! `set_default_device` inherits the host's permissiveness and reports success
//! for requests that have no effect. [`change_default_device`] validates the
//! request first and reads the result back.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::audio::error::{AudioError, Result};
use crate::audio::host::AudioHost;
use crate::audio::types::{DeviceId, DeviceRecord, Scope, ScopeSet};

/// Query surface consumed by the stream and notifier layers
#[cfg_attr(test, mockall::automock)]
pub trait DeviceDirectory: Send + Sync {
    /// All devices currently known to the host; empty on failure
    fn list_device_ids(&self) -> Vec<DeviceId>;

    /// Scopes the device can stream in; empty for unknown ids
    fn capability_of(&self, id: DeviceId) -> ScopeSet;

    /// Current default device, or `DeviceId::UNKNOWN`
    fn default_device_id(&self, scope: Scope) -> DeviceId;

    /// Display name; empty when unknown
    fn name_of(&self, id: DeviceId) -> String;

    /// Ask the host to change the default device.
    ///
    /// `true` means the host accepted the request, not that anything changed.
    /// The host accepts unknown ids, ids without the capability and ids that
    /// are already the default.
    fn set_default_device(&self, id: DeviceId, scope: Scope) -> bool;
}

/// Directory backed by an [`AudioHost`]
#[derive(Clone)]
pub struct HostDeviceDirectory {
    host: Arc<dyn AudioHost>,
}

impl HostDeviceDirectory {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self { host }
    }

    /// Selected data source id of the device in `scope`; 0 when unavailable
    pub fn device_source(&self, id: DeviceId, scope: Scope) -> u32 {
        self.host.data_source(id, scope).unwrap_or(0)
    }

    /// Name of data source `source`; empty when unavailable
    pub fn device_source_name(&self, id: DeviceId, scope: Scope, source: u32) -> String {
        self.host.data_source_name(id, scope, source).unwrap_or_default()
    }

    /// Human label for the device in `scope`: the data source name, else the device name
    pub fn device_label(&self, id: DeviceId, scope: Scope) -> String {
        let source = self.device_source(id, scope);
        let label = self.device_source_name(id, scope, source);
        if label.is_empty() {
            self.name_of(id)
        } else {
            label
        }
    }
}

impl DeviceDirectory for HostDeviceDirectory {
    fn list_device_ids(&self) -> Vec<DeviceId> {
        match self.host.device_ids() {
            Ok(ids) => ids,
            Err(status) => {
                warn!("Device list query failed (status {})", status);
                Vec::new()
            }
        }
    }

    fn capability_of(&self, id: DeviceId) -> ScopeSet {
        if id.is_unknown() {
            return ScopeSet::EMPTY;
        }
        Scope::ALL
            .into_iter()
            .filter(|scope| self.host.stream_count(id, *scope).map(|n| n > 0).unwrap_or(false))
            .collect()
    }

    fn default_device_id(&self, scope: Scope) -> DeviceId {
        self.host.default_device(scope).unwrap_or(DeviceId::UNKNOWN)
    }

    fn name_of(&self, id: DeviceId) -> String {
        if id.is_unknown() {
            return String::new();
        }
        self.host.device_name(id).unwrap_or_default()
    }

    fn set_default_device(&self, id: DeviceId, scope: Scope) -> bool {
        match self.host.set_default_device(id, scope) {
            Ok(()) => true,
            Err(status) => {
                debug!("Host refused default {} device {} (status {})", scope, id, status);
                false
            }
        }
    }
}

/// Devices able to stream in `scope`
pub fn device_ids_in_scope(directory: &dyn DeviceDirectory, scope: Scope) -> Vec<DeviceId> {
    directory
        .list_device_ids()
        .into_iter()
        .filter(|id| directory.capability_of(*id).contains(scope))
        .collect()
}

/// Fresh records for every device; never cached
pub fn device_records(directory: &dyn DeviceDirectory) -> Vec<DeviceRecord> {
    let default_input = directory.default_device_id(Scope::Input);
    let default_output = directory.default_device_id(Scope::Output);

    directory
        .list_device_ids()
        .into_iter()
        .map(|id| DeviceRecord {
            id,
            name: directory.name_of(id),
            capability: directory.capability_of(id),
            is_default_input: !id.is_unknown() && id == default_input,
            is_default_output: !id.is_unknown() && id == default_output,
        })
        .collect()
}

/// First device capable of `scope` other than the current default
pub fn alternate_device(directory: &dyn DeviceDirectory, scope: Scope) -> Option<DeviceId> {
    let current = directory.default_device_id(scope);
    device_ids_in_scope(directory, scope)
        .into_iter()
        .find(|id| *id != current)
}

/// Outcome of a validated default-device change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DefaultDeviceChange {
    /// The id is not in the device list
    UnknownDevice,
    /// The device cannot stream in the requested scope
    MissingCapability,
    /// Already the default; the host was not asked
    AlreadyDefault,
    /// The host accepted and the default now reads back as the id
    Requested,
    /// The host reported success but the default did not change
    NotApplied,
}

impl DefaultDeviceChange {
    pub fn is_effective(self) -> bool {
        matches!(self, DefaultDeviceChange::Requested | DefaultDeviceChange::AlreadyDefault)
    }
}

/// Change the default device only when the request is meaningful.
///
/// The host call itself cannot be trusted to report meaningless requests, so
/// the id and capability are checked first and the default is read back
/// afterwards. A refusal from the host surfaces as `HostOperationFailed`.
pub fn change_default_device(
    directory: &dyn DeviceDirectory,
    id: DeviceId,
    scope: Scope,
) -> Result<DefaultDeviceChange> {
    if id.is_unknown() || !directory.list_device_ids().contains(&id) {
        return Ok(DefaultDeviceChange::UnknownDevice);
    }
    if !directory.capability_of(id).contains(scope) {
        return Ok(DefaultDeviceChange::MissingCapability);
    }
    if directory.default_device_id(scope) == id {
        return Ok(DefaultDeviceChange::AlreadyDefault);
    }

    if !directory.set_default_device(id, scope) {
        return Err(AudioError::HostOperationFailed {
            operation: "set default device",
            status: crate::audio::host::UNSPECIFIED_ERROR,
        });
    }

    if directory.default_device_id(scope) == id {
        Ok(DefaultDeviceChange::Requested)
    } else {
        warn!("Host accepted default {} device {} but the default did not change", scope, id);
        Ok(DefaultDeviceChange::NotApplied)
    }
}
