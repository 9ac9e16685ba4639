// Audio module - device directory, change notification and real-time output
//
// - types: device ids, scopes, stream formats and records
// - host: the host audio layer seam (CoreAudio, simulated)
// - dispatch: token registry and the fixed host entry points
// - discipline: render-context rules shared by stream and notifier
// - directory: device queries and validated default changes
// - notifier: device change subscriptions
// - output_stream: one real-time output session
// - synth: test tone generator

pub mod types;
pub mod error;
pub mod host;
pub mod dispatch;
pub mod discipline;
pub mod directory;
pub mod notifier;
pub mod output_stream;
pub mod synth;

// Re-export commonly used types for easier imports
pub use types::{
    DeviceChangeKind, DeviceId, DeviceRecord, FormatFlags, RenderStats, SampleEncoding, Scope,
    ScopeSet, StreamDescription, StreamFormat, StreamState, MAX_CHANNELS,
};

pub use error::{AudioError, Result};

pub use host::{
    create_host, AudioHost, BackendKind, HostProperty, HostStatus, SimulatedDevice, SimulatedHost,
    SimulatedHostConfig, UnitStep,
};

#[cfg(target_os = "macos")]
pub use host::CoreAudioHost;

pub use dispatch::{listener_entry, render_entry, DispatchToken, RenderCallback};
pub use discipline::in_render_context;

pub use directory::{
    alternate_device, change_default_device, device_ids_in_scope, device_records,
    DefaultDeviceChange, DeviceDirectory, HostDeviceDirectory,
};

pub use notifier::{device_change_channel, DeviceChangeNotifier};
pub use output_stream::OutputStream;
pub use synth::SineSynth;
