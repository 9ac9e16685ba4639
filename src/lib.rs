pub mod audio;
pub mod config;
pub mod log;

// Re-export the main API for the binary and integration tests
pub use audio::{
    AudioError, AudioHost, BackendKind, DeviceChangeKind, DeviceChangeNotifier, DeviceDirectory,
    DeviceId, HostDeviceDirectory, OutputStream, SampleEncoding, Scope, SimulatedHost,
    SimulatedHostConfig, StreamFormat,
};
pub use config::AudioIoConfig;
