//! Device change notifier
//!
//! Subscribes to the three system-object properties that describe device
//! topology and defaults, and forwards every change to one client callback.
//! Each subscription is independent: one that the host refuses is logged and
//! skipped, and the notifier still works for the others.
//!
//! The callback runs on a host thread, possibly concurrently with itself and
//! with render callbacks. Delivery order between event classes is not
//! defined, so callbacks should re-query the directory instead of trusting
//! the order they were called in.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::discipline::ensure_control_context;
use crate::audio::dispatch::{self, ChangeCallback, DispatchToken, ListenerSlot};
use crate::audio::error::{AudioError, Result};
use crate::audio::host::{AudioHost, HostProperty};
use crate::audio::types::DeviceChangeKind;

impl DeviceChangeKind {
    /// Host property whose change signals this event class
    pub fn host_property(self) -> HostProperty {
        match self {
            DeviceChangeKind::DefaultInputChanged => HostProperty::DefaultInputDevice,
            DeviceChangeKind::DefaultOutputChanged => HostProperty::DefaultOutputDevice,
            DeviceChangeKind::DeviceListChanged => HostProperty::Devices,
        }
    }
}

struct Subscription {
    kind: DeviceChangeKind,
    token: DispatchToken,
}

/// Holds the device change subscriptions for one client callback
pub struct DeviceChangeNotifier {
    host: Arc<dyn AudioHost>,
    subscriptions: Vec<Subscription>,
}

impl DeviceChangeNotifier {
    /// Subscribe `callback` to every device change event class
    pub fn new<F>(host: Arc<dyn AudioHost>, callback: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_events(host, move |_| callback())
    }

    /// Like [`DeviceChangeNotifier::new`], telling the callback which class fired
    pub fn with_events<F>(host: Arc<dyn AudioHost>, callback: F) -> Result<Self>
    where
        F: Fn(DeviceChangeKind) + Send + Sync + 'static,
    {
        ensure_control_context("create a device change notifier")?;
        let callback: ChangeCallback = Arc::new(callback);

        let mut subscriptions = Vec::with_capacity(DeviceChangeKind::ALL.len());
        for kind in DeviceChangeKind::ALL {
            match subscribe(host.as_ref(), kind, callback.clone()) {
                Ok(token) => subscriptions.push(Subscription { kind, token }),
                Err(e) => warn!("{}", e),
            }
        }

        debug!(
            "Device change notifier holding {} of {} subscriptions",
            subscriptions.len(),
            DeviceChangeKind::ALL.len()
        );
        Ok(Self { host, subscriptions })
    }

    /// Event classes this notifier is actually subscribed to
    pub fn active_subscriptions(&self) -> Vec<DeviceChangeKind> {
        self.subscriptions.iter().map(|s| s.kind).collect()
    }
}

fn subscribe(host: &dyn AudioHost, kind: DeviceChangeKind, callback: ChangeCallback) -> Result<DispatchToken> {
    let property = kind.host_property();
    let token = dispatch::register_listener(Arc::new(ListenerSlot::new(kind, property, callback)));
    match host.add_property_listener(property, token.as_raw()) {
        Ok(()) => Ok(token),
        Err(status) => {
            dispatch::unregister_listener(token);
            Err(AudioError::SubscriptionUnavailable { event: kind, status })
        }
    }
}

impl Drop for DeviceChangeNotifier {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            let property = subscription.kind.host_property();
            // Stale after this, even if the host still delivers
            dispatch::unregister_listener(subscription.token);
            if let Err(status) = self.host.remove_property_listener(property, subscription.token.as_raw()) {
                warn!(
                    "Failed to remove {:?} listener (status {}); ignoring",
                    subscription.kind, status
                );
            }
        }
    }
}

impl std::fmt::Debug for DeviceChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceChangeNotifier")
            .field("backend", &self.host.name())
            .field("subscriptions", &self.active_subscriptions())
            .finish()
    }
}

/// Notifier that forwards events into an async channel.
///
/// Sending never blocks the host thread. Events stop when the notifier is
/// dropped; the receiver then drains and closes.
pub fn device_change_channel(
    host: Arc<dyn AudioHost>,
) -> Result<(DeviceChangeNotifier, mpsc::UnboundedReceiver<DeviceChangeKind>)> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let notifier = DeviceChangeNotifier::with_events(host, move |kind| {
        // Receiver gone: nobody is listening any more
        let _ = sender.send(kind);
    })?;
    Ok((notifier, receiver))
}
