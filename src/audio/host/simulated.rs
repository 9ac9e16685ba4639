//! Software audio host
//!
//! Behaves like the native host where it matters for lifecycle and locking:
//!
//! - every started unit gets its own render thread that requests one buffer
//!   per period through [`dispatch::render_entry`]
//! - a single host-internal lock is held for each render invocation and is
//!   also taken by unit creation, start, stop and disposal
//! - property notifications are delivered by a small pool of worker threads,
//!   so notifications for different properties may overlap or reorder
//! - `set_default_device` reports success for requests it ignores
//!
//! Faults can be injected per listener property and per unit step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    AudioHost, HostProperty, HostStatus, UnitHandle, BAD_OBJECT_ERROR, FORMAT_NOT_SUPPORTED,
    ILLEGAL_OPERATION_ERROR, INVALID_PARAMETER, OUTPUT_BUS, SYSTEM_OBJECT, UNINITIALIZED_ERROR,
    UNKNOWN_PROPERTY_ERROR, UNSPECIFIED_ERROR,
};
use crate::audio::dispatch;
use crate::audio::types::{DeviceId, FormatFlags, Scope, StreamDescription};

type HostResult<T> = std::result::Result<T, HostStatus>;

/// Sample rate assumed for a unit whose format was never set
const FALLBACK_SAMPLE_RATE: f64 = 44_100.0;

/// Named data source of a simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedSource {
    pub scope: Scope,
    pub id: u32,
    pub name: String,
}

/// A device known to the simulated host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub input_streams: u32,
    #[serde(default)]
    pub output_streams: u32,
    #[serde(default)]
    pub sources: Vec<SimulatedSource>,
}

impl SimulatedDevice {
    pub fn new(id: u32, name: impl Into<String>, input_streams: u32, output_streams: u32) -> Self {
        Self {
            id: DeviceId(id),
            name: name.into(),
            input_streams,
            output_streams,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, scope: Scope, id: u32, name: impl Into<String>) -> Self {
        self.sources.push(SimulatedSource {
            scope,
            id,
            name: name.into(),
        });
        self
    }

    fn streams(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Input => self.input_streams,
            Scope::Output => self.output_streams,
        }
    }

    fn supports(&self, scope: Scope) -> bool {
        self.streams(scope) > 0
    }
}

/// Device set used when the configuration lists none
pub fn builtin_devices() -> Vec<SimulatedDevice> {
    vec![
        SimulatedDevice::new(41, "Built-in Microphone", 1, 0).with_source(
            Scope::Input,
            0x696D_6963, // 'imic'
            "Internal Microphone",
        ),
        SimulatedDevice::new(42, "Built-in Output", 0, 1).with_source(
            Scope::Output,
            0x6973_706B, // 'ispk'
            "Internal Speakers",
        ),
        SimulatedDevice::new(43, "USB Audio Interface", 2, 2),
        SimulatedDevice::new(44, "Null Device", 0, 0),
    ]
}

/// Simulated host settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedHostConfig {
    /// Frames requested per render invocation
    pub buffer_frames: u32,
    /// Threads delivering property notifications
    pub notification_workers: usize,
    pub devices: Vec<SimulatedDevice>,
    pub default_input: Option<DeviceId>,
    pub default_output: Option<DeviceId>,
}

impl Default for SimulatedHostConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 512,
            notification_workers: 2,
            devices: Vec::new(),
            default_input: None,
            default_output: None,
        }
    }
}

/// Unit operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStep {
    Create,
    SetFormat,
    SetCallback,
    Initialize,
    Start,
    Stop,
    Uninitialize,
    Dispose,
}

#[derive(Default)]
struct Faults {
    listeners: HashMap<HostProperty, HostStatus>,
    unit_steps: HashMap<UnitStep, HostStatus>,
    no_output_hardware: bool,
}

struct Unit {
    description: Option<StreamDescription>,
    render_token: Option<u64>,
    initialized: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

struct HostState {
    devices: Vec<SimulatedDevice>,
    default_input: DeviceId,
    default_output: DeviceId,
    listeners: Vec<(HostProperty, u64)>,
    units: HashMap<u64, Unit>,
    next_unit: u64,
}

impl HostState {
    fn device(&self, id: DeviceId) -> Option<&SimulatedDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    fn default_slot(&mut self, scope: Scope) -> &mut DeviceId {
        match scope {
            Scope::Input => &mut self.default_input,
            Scope::Output => &mut self.default_output,
        }
    }

    fn first_capable(&self, scope: Scope) -> DeviceId {
        self.devices
            .iter()
            .find(|d| d.supports(scope))
            .map(|d| d.id)
            .unwrap_or(DeviceId::UNKNOWN)
    }

    fn tokens_for(&self, property: HostProperty) -> Vec<u64> {
        self.listeners
            .iter()
            .filter(|(p, _)| *p == property)
            .map(|(_, token)| *token)
            .collect()
    }
}

/// Change notification queued for the worker pool
struct Notice {
    property: HostProperty,
    token: u64,
}

struct Shared {
    render_lock: Arc<Mutex<()>>,
    state: Mutex<HostState>,
    faults: Mutex<Faults>,
    notices: Sender<Notice>,
    buffer_frames: u32,
}

impl Shared {
    fn fault(&self, step: UnitStep) -> HostResult<()> {
        match self.faults.lock().unit_steps.get(&step) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    /// Queue one notice per registered listener of `property`
    fn notify(&self, state: &HostState, property: HostProperty) {
        for token in state.tokens_for(property) {
            if self.notices.send(Notice { property, token }).is_err() {
                warn!("Notification workers are gone; dropping {:?}", property);
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock();
            state
                .units
                .values_mut()
                .filter_map(|unit| {
                    unit.running.store(false, Ordering::Release);
                    unit.thread.take()
                })
                .collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// In-process host with real render threads and injectable faults
pub struct SimulatedHost {
    shared: Arc<Shared>,
}

impl SimulatedHost {
    pub fn new(config: SimulatedHostConfig) -> Self {
        let devices = if config.devices.is_empty() {
            builtin_devices()
        } else {
            config.devices
        };

        let mut state = HostState {
            devices,
            default_input: DeviceId::UNKNOWN,
            default_output: DeviceId::UNKNOWN,
            listeners: Vec::new(),
            units: HashMap::new(),
            next_unit: 1,
        };
        state.default_input = config
            .default_input
            .unwrap_or_else(|| state.first_capable(Scope::Input));
        state.default_output = config
            .default_output
            .unwrap_or_else(|| state.first_capable(Scope::Output));

        let (sender, receiver) = channel::unbounded();
        for index in 0..config.notification_workers.max(1) {
            spawn_notification_worker(index, receiver.clone());
        }

        debug!(
            "Simulated host ready: {} devices, default input {}, default output {}",
            state.devices.len(),
            state.default_input,
            state.default_output
        );

        Self {
            shared: Arc::new(Shared {
                render_lock: Arc::new(Mutex::new(())),
                state: Mutex::new(state),
                faults: Mutex::new(Faults::default()),
                notices: sender,
                buffer_frames: config.buffer_frames.max(1),
            }),
        }
    }

    // === Topology control ===

    /// Add or replace a device and announce the device list change
    pub fn add_device(&self, device: SimulatedDevice) {
        let mut state = self.shared.state.lock();
        state.devices.retain(|d| d.id != device.id);
        state.devices.push(device);
        self.shared.notify(&state, HostProperty::Devices);
    }

    /// Remove a device; a default that disappears moves to the next capable device
    pub fn remove_device(&self, id: DeviceId) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.devices.len();
        state.devices.retain(|d| d.id != id);
        if state.devices.len() == before {
            return false;
        }

        self.shared.notify(&state, HostProperty::Devices);
        for scope in Scope::ALL {
            if *state.default_slot(scope) == id {
                let replacement = state.first_capable(scope);
                *state.default_slot(scope) = replacement;
                self.shared.notify(&state, HostProperty::default_device(scope));
            }
        }
        true
    }

    pub fn devices(&self) -> Vec<SimulatedDevice> {
        self.shared.state.lock().devices.clone()
    }

    // === Fault injection ===

    /// Make listener registration for `property` fail with `status`
    pub fn fail_listener(&self, property: HostProperty, status: HostStatus) {
        self.shared.faults.lock().listeners.insert(property, status);
    }

    /// Make every later `step` fail with `status`
    pub fn fail_unit_step(&self, step: UnitStep, status: HostStatus) {
        self.shared.faults.lock().unit_steps.insert(step, status);
    }

    /// Pretend no output hardware is attached
    pub fn set_no_output_hardware(&self, missing: bool) {
        self.shared.faults.lock().no_output_hardware = missing;
    }

    pub fn clear_faults(&self) {
        *self.shared.faults.lock() = Faults::default();
    }

    // === Observability ===

    /// Units created and not yet disposed
    pub fn live_units(&self) -> usize {
        self.shared.state.lock().units.len()
    }

    pub fn running_units(&self) -> usize {
        self.shared
            .state
            .lock()
            .units
            .values()
            .filter(|u| u.running.load(Ordering::Acquire))
            .count()
    }

    /// Registered property listeners across all properties
    pub fn listener_count(&self) -> usize {
        self.shared.state.lock().listeners.len()
    }

    pub fn listeners_for(&self, property: HostProperty) -> usize {
        self.shared.state.lock().tokens_for(property).len()
    }

    fn with_unit<T>(&self, unit: UnitHandle, f: impl FnOnce(&mut Unit) -> HostResult<T>) -> HostResult<T> {
        let mut state = self.shared.state.lock();
        let unit = state.units.get_mut(&unit.0).ok_or(BAD_OBJECT_ERROR)?;
        f(unit)
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new(SimulatedHostConfig::default())
    }
}

fn spawn_notification_worker(index: usize, receiver: Receiver<Notice>) {
    let spawned = thread::Builder::new()
        .name(format!("sim-host-notify-{}", index))
        .spawn(move || {
            // Ends when the host (the only sender) is dropped
            for notice in receiver.iter() {
                dispatch::listener_entry(SYSTEM_OBJECT, &[notice.property], notice.token);
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to spawn notification worker {}: {}", index, e);
    }
}

struct RenderPlan {
    token: u64,
    frames: u32,
    bytes_per_frame: usize,
    period: Duration,
}

fn render_loop(render_lock: Arc<Mutex<()>>, running: Arc<AtomicBool>, plan: RenderPlan) {
    let mut buffer = vec![0u8; plan.frames as usize * plan.bytes_per_frame];
    loop {
        thread::sleep(plan.period);
        let _host = render_lock.lock();
        if !running.load(Ordering::Acquire) {
            break;
        }
        dispatch::render_entry(plan.token, OUTPUT_BUS, plan.frames, &mut [&mut buffer[..]]);
    }
}

fn check_description(description: &StreamDescription) -> HostResult<()> {
    let bits = description.bits_per_channel;
    let flags = description.format_flags;
    let sample_bytes = bits / 8;

    let encoding_ok = if flags.contains(FormatFlags::IS_FLOAT) {
        bits == 32
    } else {
        flags.contains(FormatFlags::IS_SIGNED_INTEGER) && bits == 16
    };
    let layout_ok = description.channels_per_frame > 0
        && description.frames_per_packet == 1
        && description.bytes_per_frame == sample_bytes * description.channels_per_frame
        && description.bytes_per_packet == description.bytes_per_frame;
    let rate_ok = description.sample_rate.is_finite() && description.sample_rate > 0.0;

    if encoding_ok && layout_ok && rate_ok {
        Ok(())
    } else {
        Err(FORMAT_NOT_SUPPORTED)
    }
}

impl AudioHost for SimulatedHost {
    fn device_ids(&self) -> HostResult<Vec<DeviceId>> {
        Ok(self.shared.state.lock().devices.iter().map(|d| d.id).collect())
    }

    fn stream_count(&self, device: DeviceId, scope: Scope) -> HostResult<u32> {
        let state = self.shared.state.lock();
        state
            .device(device)
            .map(|d| d.streams(scope))
            .ok_or(BAD_OBJECT_ERROR)
    }

    fn device_name(&self, device: DeviceId) -> HostResult<String> {
        let state = self.shared.state.lock();
        state
            .device(device)
            .map(|d| d.name.clone())
            .ok_or(BAD_OBJECT_ERROR)
    }

    fn default_device(&self, scope: Scope) -> HostResult<DeviceId> {
        Ok(*self.shared.state.lock().default_slot(scope))
    }

    fn set_default_device(&self, device: DeviceId, scope: Scope) -> HostResult<()> {
        let mut state = self.shared.state.lock();
        let capable = state.device(device).map(|d| d.supports(scope)).unwrap_or(false);
        if !capable || *state.default_slot(scope) == device {
            debug!("Ignoring default {} request for {}", scope, device);
            return Ok(());
        }

        *state.default_slot(scope) = device;
        self.shared.notify(&state, HostProperty::default_device(scope));
        Ok(())
    }

    fn data_source(&self, device: DeviceId, scope: Scope) -> HostResult<u32> {
        let state = self.shared.state.lock();
        let device = state.device(device).ok_or(BAD_OBJECT_ERROR)?;
        device
            .sources
            .iter()
            .find(|s| s.scope == scope)
            .map(|s| s.id)
            .ok_or(UNKNOWN_PROPERTY_ERROR)
    }

    fn data_source_name(&self, device: DeviceId, scope: Scope, source: u32) -> HostResult<String> {
        let state = self.shared.state.lock();
        let device = state.device(device).ok_or(BAD_OBJECT_ERROR)?;
        device
            .sources
            .iter()
            .find(|s| s.scope == scope && s.id == source)
            .map(|s| s.name.clone())
            .ok_or(UNKNOWN_PROPERTY_ERROR)
    }

    fn add_property_listener(&self, property: HostProperty, token: u64) -> HostResult<()> {
        if let Some(status) = self.shared.faults.lock().listeners.get(&property) {
            return Err(*status);
        }
        self.shared.state.lock().listeners.push((property, token));
        Ok(())
    }

    fn remove_property_listener(&self, property: HostProperty, token: u64) -> HostResult<()> {
        let mut state = self.shared.state.lock();
        let position = state
            .listeners
            .iter()
            .position(|entry| *entry == (property, token))
            .ok_or(ILLEGAL_OPERATION_ERROR)?;
        state.listeners.remove(position);
        Ok(())
    }

    fn new_default_output_unit(&self) -> HostResult<UnitHandle> {
        self.shared.fault(UnitStep::Create)?;
        if self.shared.faults.lock().no_output_hardware {
            return Err(UNSPECIFIED_ERROR);
        }

        let _host = self.shared.render_lock.lock();
        let mut state = self.shared.state.lock();
        let output = state.default_output;
        if !state.device(output).map(|d| d.supports(Scope::Output)).unwrap_or(false) {
            return Err(UNSPECIFIED_ERROR);
        }

        let id = state.next_unit;
        state.next_unit += 1;
        state.units.insert(
            id,
            Unit {
                description: None,
                render_token: None,
                initialized: false,
                running: Arc::new(AtomicBool::new(false)),
                thread: None,
            },
        );
        debug!("Created output unit {} on device {}", id, output);
        Ok(UnitHandle(id))
    }

    fn set_stream_format(&self, unit: UnitHandle, bus: u32, description: &StreamDescription) -> HostResult<()> {
        self.shared.fault(UnitStep::SetFormat)?;
        if bus != OUTPUT_BUS {
            return Err(INVALID_PARAMETER);
        }
        check_description(description)?;
        self.with_unit(unit, |u| {
            u.description = Some(*description);
            Ok(())
        })
    }

    fn set_render_callback(&self, unit: UnitHandle, bus: u32, token: u64) -> HostResult<()> {
        self.shared.fault(UnitStep::SetCallback)?;
        if bus != OUTPUT_BUS {
            return Err(INVALID_PARAMETER);
        }
        self.with_unit(unit, |u| {
            u.render_token = Some(token);
            Ok(())
        })
    }

    fn initialize_unit(&self, unit: UnitHandle) -> HostResult<()> {
        self.shared.fault(UnitStep::Initialize)?;
        self.with_unit(unit, |u| {
            u.initialized = true;
            Ok(())
        })
    }

    fn start_unit(&self, unit: UnitHandle) -> HostResult<()> {
        self.shared.fault(UnitStep::Start)?;
        let _host = self.shared.render_lock.lock();
        let frames = self.shared.buffer_frames;
        let render_lock = self.shared.render_lock.clone();

        self.with_unit(unit, |u| {
            if !u.initialized {
                return Err(UNINITIALIZED_ERROR);
            }
            if u.running.load(Ordering::Acquire) {
                return Ok(());
            }
            u.running.store(true, Ordering::Release);

            let Some(token) = u.render_token else {
                return Ok(());
            };
            let (rate, bytes_per_frame) = u
                .description
                .map(|d| (d.sample_rate, d.bytes_per_frame as usize))
                .unwrap_or((FALLBACK_SAMPLE_RATE, 8));
            let period = Duration::from_secs_f64(frames as f64 / rate).max(Duration::from_millis(1));
            let plan = RenderPlan {
                token,
                frames,
                bytes_per_frame,
                period,
            };

            let running = u.running.clone();
            let spawned = thread::Builder::new()
                .name(format!("sim-host-render-{}", unit.0))
                .spawn(move || render_loop(render_lock, running, plan));
            match spawned {
                Ok(handle) => {
                    u.thread = Some(handle);
                    Ok(())
                }
                Err(e) => {
                    warn!("Failed to spawn render thread: {}", e);
                    u.running.store(false, Ordering::Release);
                    Err(UNSPECIFIED_ERROR)
                }
            }
        })
    }

    fn stop_unit(&self, unit: UnitHandle) -> HostResult<()> {
        self.shared.fault(UnitStep::Stop)?;
        let handle = {
            // Holding the render lock means no invocation is in flight
            let _host = self.shared.render_lock.lock();
            self.with_unit(unit, |u| {
                u.running.store(false, Ordering::Release);
                Ok(u.thread.take())
            })?
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        Ok(())
    }

    fn uninitialize_unit(&self, unit: UnitHandle) -> HostResult<()> {
        self.shared.fault(UnitStep::Uninitialize)?;
        self.with_unit(unit, |u| {
            u.initialized = false;
            Ok(())
        })
    }

    fn dispose_unit(&self, unit: UnitHandle) -> HostResult<()> {
        self.shared.fault(UnitStep::Dispose)?;
        let removed = {
            let _host = self.shared.render_lock.lock();
            self.shared.state.lock().units.remove(&unit.0)
        };
        let mut removed = removed.ok_or(BAD_OBJECT_ERROR)?;
        removed.running.store(false, Ordering::Release);
        if let Some(handle) = removed.thread.take() {
            let _ = handle.join();
        }
        debug!("Disposed output unit {}", unit.0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Simulated"
    }
}
