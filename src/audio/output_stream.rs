//! Real-time output stream
//!
//! One `OutputStream` owns one host output unit bound to the default output
//! device. The host calls the render entry point on its own thread; the
//! stream's slot in the dispatch table forwards to the client callback only
//! while the stream is running.
//!
//! Lifecycle: `new` (Constructed) -> `start` (Running) -> `stop` (Constructed)
//! -> drop or `close` (Destroyed). Teardown releases host resources in reverse
//! order of acquisition.
//!
//! The client callback must not block on anything a thread creating or
//! destroying a stream could be holding. See [`crate::audio::discipline`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::audio::discipline::{ensure_control_context, in_render_context};
use crate::audio::dispatch::{self, DispatchToken, RenderSlot};
use crate::audio::error::{AudioError, Result};
use crate::audio::host::{AudioHost, UnitHandle, OUTPUT_BUS};
use crate::audio::types::{RenderStats, StreamDescription, StreamFormat, StreamState};

/// Host resources acquired so far during construction; released on drop
/// unless the construction completes.
struct PendingUnit<'a> {
    host: &'a dyn AudioHost,
    unit: UnitHandle,
    token: Option<DispatchToken>,
    initialized: bool,
    committed: bool,
}

impl PendingUnit<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingUnit<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.initialized {
            if let Err(status) = self.host.uninitialize_unit(self.unit) {
                warn!("Rollback: failed to uninitialize output unit (status {})", status);
            }
        }
        if let Err(status) = self.host.dispose_unit(self.unit) {
            warn!("Rollback: failed to dispose output unit (status {})", status);
        }
        if let Some(token) = self.token.take() {
            dispatch::unregister_render(token);
        }
    }
}

/// A running or runnable PCM output session
pub struct OutputStream {
    host: Arc<dyn AudioHost>,
    unit: UnitHandle,
    format: StreamFormat,
    description: StreamDescription,
    slot: Arc<RenderSlot>,
    token: DispatchToken,
    state: StreamState,
}

impl OutputStream {
    /// Create a stream on the current default output device.
    ///
    /// `callback` receives the interleaved buffer and the frame count. The
    /// buffer is exactly `frames * format.bytes_per_frame()` bytes long.
    pub fn new<F>(host: Arc<dyn AudioHost>, format: StreamFormat, callback: F) -> Result<Self>
    where
        F: FnMut(&mut [u8], u32) + Send + 'static,
    {
        ensure_control_context("create an output stream")?;
        format.validate().map_err(AudioError::InvalidStreamFormat)?;
        let description = format.description();

        let unit = host
            .new_default_output_unit()
            .map_err(|status| AudioError::HostResourceUnavailable { status })?;
        let mut pending = PendingUnit {
            host: host.as_ref(),
            unit,
            token: None,
            initialized: false,
            committed: false,
        };

        host.set_stream_format(unit, OUTPUT_BUS, &description)
            .map_err(|status| AudioError::HostConfigurationRejected {
                step: "stream format",
                status,
            })?;

        let slot = Arc::new(RenderSlot::new(Box::new(callback), description.bytes_per_frame));
        let token = dispatch::register_render(slot.clone());
        pending.token = Some(token);

        host.set_render_callback(unit, OUTPUT_BUS, token.as_raw())
            .map_err(|status| AudioError::HostConfigurationRejected {
                step: "render callback",
                status,
            })?;

        host.initialize_unit(unit)
            .map_err(|status| AudioError::HostResourceUnavailable { status })?;
        pending.initialized = true;
        pending.commit();

        info!(
            "Created output stream: {} x{} @ {} Hz on {}",
            format.encoding,
            format.channels,
            format.sample_rate,
            host.name()
        );

        Ok(Self {
            host,
            unit,
            format,
            description,
            slot,
            token,
            state: StreamState::Constructed,
        })
    }

    /// Begin periodic callback invocation; a running stream is left as is
    pub fn start(&mut self) -> Result<()> {
        ensure_control_context("start")?;
        if self.state == StreamState::Running {
            return Ok(());
        }

        self.host
            .start_unit(self.unit)
            .map_err(|status| AudioError::HostOperationFailed {
                operation: "start",
                status,
            })?;
        // Armed only once the host accepted the start
        self.slot.arm();
        self.state = StreamState::Running;
        debug!("Output stream started");
        Ok(())
    }

    /// Halt callback invocation.
    ///
    /// When this returns no new invocation of the callback begins. A stream
    /// that is not running is left as is.
    pub fn stop(&mut self) -> Result<()> {
        ensure_control_context("stop")?;
        if self.state != StreamState::Running {
            return Ok(());
        }

        self.slot.disarm();
        if let Err(status) = self.host.stop_unit(self.unit) {
            // Host keeps rendering, so keep forwarding
            self.slot.arm();
            return Err(AudioError::HostOperationFailed {
                operation: "stop",
                status,
            });
        }
        self.state = StreamState::Constructed;
        debug!("Output stream stopped");
        Ok(())
    }

    /// Tear the stream down, reporting the first failure.
    ///
    /// Teardown continues past a failed step; every resource is attempted.
    pub fn close(mut self) -> Result<()> {
        ensure_control_context("close")?;
        self.teardown()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == StreamState::Running
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn description(&self) -> StreamDescription {
        self.description
    }

    pub fn render_stats(&self) -> RenderStats {
        self.slot.stats()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.state == StreamState::Destroyed {
            return Ok(());
        }

        let mut first_error: Option<AudioError> = None;
        let mut record = |operation: &'static str, outcome: std::result::Result<(), i32>| {
            if let Err(status) = outcome {
                warn!("Output stream teardown: {} failed (status {})", operation, status);
                first_error.get_or_insert(AudioError::HostOperationFailed { operation, status });
            }
        };

        if self.state == StreamState::Running {
            self.slot.disarm();
            record("stop", self.host.stop_unit(self.unit));
        }
        record("uninitialize", self.host.uninitialize_unit(self.unit));
        record("dispose", self.host.dispose_unit(self.unit));

        dispatch::unregister_render(self.token);
        self.state = StreamState::Destroyed;
        debug!("Output stream destroyed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        if self.state == StreamState::Destroyed {
            return;
        }

        if in_render_context() {
            // Host calls would wait on the lock this thread already holds
            error!("Output stream dropped inside a render callback; leaking its output unit");
            self.slot.disarm();
            dispatch::unregister_render(self.token);
            self.state = StreamState::Destroyed;
            return;
        }

        if let Err(e) = self.teardown() {
            warn!("Output stream teardown incomplete: {}", e);
        }
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("backend", &self.host.name())
            .field("unit", &self.unit)
            .field("format", &self.format)
            .field("state", &self.state)
            .finish()
    }
}
