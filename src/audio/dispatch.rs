//! Host callback dispatch
//!
//! Hosts know nothing about our objects. A stream or notifier registers a
//! slot here and receives a [`DispatchToken`]; the token is what the host
//! stores as its opaque per-registration reference. When the host calls one of
//! the two fixed entry points, the token is looked up again. A token whose
//! slot has been unregistered, or whose index was reused by a later
//! registration, simply fails to resolve.
//!
//! Registry write locks are only taken on registration and removal, both of
//! which happen on control threads and never while calling into the host.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::audio::discipline::RenderScope;
use crate::audio::host::{
    HostProperty, HostStatus, BAD_OBJECT_ERROR, INVALID_PARAMETER, NO_ERROR, OUTPUT_BUS,
    SYSTEM_OBJECT,
};
use crate::audio::types::{DeviceChangeKind, RenderStats};

/// Client render callback: fill `buffer` with `frames` interleaved frames
pub type RenderCallback = Box<dyn FnMut(&mut [u8], u32) + Send + 'static>;

/// Client change callback, told which event class fired
pub(crate) type ChangeCallback = Arc<dyn Fn(DeviceChangeKind) + Send + Sync + 'static>;

/// Generation-checked handle into a dispatch registry
///
/// Layout: generation in the high 32 bits, slot index in the low 32 bits.
/// Generations start at 1, so a valid token is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchToken(u64);

impl DispatchToken {
    fn new(index: u32, generation: u32) -> Self {
        DispatchToken(((generation as u64) << 32) | index as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        DispatchToken(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

struct Slots<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
}

/// Arena of registered targets addressed by [`DispatchToken`]
pub(crate) struct HandleRegistry<T> {
    slots: RwLock<Slots<T>>,
}

impl<T: Clone> HandleRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    pub(crate) fn insert(&self, value: T) -> DispatchToken {
        let mut slots = self.slots.write();
        if let Some(index) = slots.free.pop() {
            let entry = &mut slots.entries[index as usize];
            entry.value = Some(value);
            return DispatchToken::new(index, entry.generation);
        }

        let index = slots.entries.len() as u32;
        slots.entries.push(Entry {
            generation: 1,
            value: Some(value),
        });
        DispatchToken::new(index, 1)
    }

    pub(crate) fn get(&self, token: DispatchToken) -> Option<T> {
        let slots = self.slots.read();
        let entry = slots.entries.get(token.index())?;
        if entry.generation != token.generation() {
            return None;
        }
        entry.value.clone()
    }

    pub(crate) fn remove(&self, token: DispatchToken) -> Option<T> {
        let mut slots = self.slots.write();
        let entry = slots.entries.get_mut(token.index())?;
        if entry.generation != token.generation() {
            return None;
        }
        let value = entry.value.take()?;
        // Retire the generation so outstanding copies of the token go stale
        entry.generation = match entry.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        slots.free.push(token.index() as u32);
        Some(value)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        let slots = self.slots.read();
        slots.entries.iter().filter(|e| e.value.is_some()).count()
    }
}

static RENDER_TARGETS: Lazy<HandleRegistry<Arc<RenderSlot>>> = Lazy::new(HandleRegistry::new);
static LISTENER_TARGETS: Lazy<HandleRegistry<Arc<ListenerSlot>>> = Lazy::new(HandleRegistry::new);

/// Per-stream render state shared between the stream and the dispatch table
pub(crate) struct RenderSlot {
    callback: Mutex<RenderCallback>,
    bytes_per_frame: usize,
    armed: AtomicBool,
    forwarded: AtomicU64,
    silenced: AtomicU64,
    rejected: AtomicU64,
    contended: AtomicU64,
    panicked: AtomicU64,
}

impl RenderSlot {
    pub(crate) fn new(callback: RenderCallback, bytes_per_frame: u32) -> Self {
        Self {
            callback: Mutex::new(callback),
            bytes_per_frame: bytes_per_frame as usize,
            armed: AtomicBool::new(false),
            forwarded: AtomicU64::new(0),
            silenced: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        }
    }

    /// Allow forwarding to the client callback
    pub(crate) fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Stop forwarding; later invocations are answered with silence
    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub(crate) fn stats(&self) -> RenderStats {
        RenderStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            silenced: self.silenced.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }

    fn render(&self, bus: u32, frames: u32, buffers: &mut [&mut [u8]]) -> HostStatus {
        if bus != OUTPUT_BUS || buffers.len() != 1 {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            silence(buffers);
            return INVALID_PARAMETER;
        }

        let buffer: &mut [u8] = &mut *buffers[0];
        if buffer.len() != frames as usize * self.bytes_per_frame {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            buffer.fill(0);
            return INVALID_PARAMETER;
        }

        if !self.armed.load(Ordering::Acquire) {
            self.silenced.fetch_add(1, Ordering::Relaxed);
            buffer.fill(0);
            return NO_ERROR;
        }

        // Never wait here: a waiting render thread is the start of a lock cycle
        let Some(mut guard) = self.callback.try_lock() else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            buffer.fill(0);
            return NO_ERROR;
        };

        let _scope = RenderScope::enter();
        let callback = &mut *guard;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&mut *buffer, frames)));
        match outcome {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                buffer.fill(0);
            }
        }
        NO_ERROR
    }
}

/// One subscription of a notifier: event class, host property and callback
pub(crate) struct ListenerSlot {
    kind: DeviceChangeKind,
    property: HostProperty,
    callback: ChangeCallback,
}

impl ListenerSlot {
    pub(crate) fn new(kind: DeviceChangeKind, property: HostProperty, callback: ChangeCallback) -> Self {
        Self {
            kind,
            property,
            callback,
        }
    }
}

fn silence(buffers: &mut [&mut [u8]]) {
    for buffer in buffers.iter_mut() {
        buffer.fill(0);
    }
}

pub(crate) fn register_render(slot: Arc<RenderSlot>) -> DispatchToken {
    RENDER_TARGETS.insert(slot)
}

pub(crate) fn unregister_render(token: DispatchToken) -> bool {
    RENDER_TARGETS.remove(token).is_some()
}

pub(crate) fn register_listener(slot: Arc<ListenerSlot>) -> DispatchToken {
    LISTENER_TARGETS.insert(slot)
}

pub(crate) fn unregister_listener(token: DispatchToken) -> bool {
    LISTENER_TARGETS.remove(token).is_some()
}

/// Whether `token` currently resolves to a live render target
pub fn is_render_target(token: DispatchToken) -> bool {
    RENDER_TARGETS.get(token).is_some()
}

/// Fixed render entry point shared by every output stream.
///
/// Called by hosts on their render thread with the token registered through
/// `set_render_callback`. Stale tokens get silence and `BAD_OBJECT_ERROR`.
/// This path never blocks and never logs.
pub fn render_entry(token: u64, bus: u32, frames: u32, buffers: &mut [&mut [u8]]) -> HostStatus {
    match RENDER_TARGETS.get(DispatchToken::from_raw(token)) {
        Some(slot) => slot.render(bus, frames, buffers),
        None => {
            silence(buffers);
            BAD_OBJECT_ERROR
        }
    }
}

/// Fixed property-listener entry point shared by every notifier.
///
/// `properties` is the batch of system-object properties the host reports as
/// changed. The slot's callback runs once if its property is in the batch.
pub fn listener_entry(object: u32, properties: &[HostProperty], token: u64) {
    if object != SYSTEM_OBJECT {
        return;
    }
    let Some(slot) = LISTENER_TARGETS.get(DispatchToken::from_raw(token)) else {
        return;
    };
    if !properties.contains(&slot.property) {
        return;
    }

    let callback = &slot.callback;
    let kind = slot.kind;
    if panic::catch_unwind(AssertUnwindSafe(|| callback(kind))).is_err() {
        tracing::error!("Device change callback panicked for {:?}", kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_slot(bytes_per_frame: u32) -> (Arc<RenderSlot>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let slot = RenderSlot::new(
            Box::new(move |buffer: &mut [u8], _frames: u32| {
                seen.fetch_add(1, Ordering::SeqCst);
                buffer.fill(0x7F);
            }),
            bytes_per_frame,
        );
        (Arc::new(slot), calls)
    }

    #[test]
    fn test_registry_rejects_stale_tokens() {
        let registry = HandleRegistry::new();
        let first = registry.insert("first");
        assert_eq!(registry.get(first), Some("first"));

        assert_eq!(registry.remove(first), Some("first"));
        assert_eq!(registry.get(first), None);
        assert_eq!(registry.remove(first), None);

        // Index is reused with a new generation
        let second = registry.insert("second");
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert_eq!(registry.get(first), None);
        assert_eq!(registry.get(second), Some("second"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_tokens_are_never_zero() {
        let registry = HandleRegistry::new();
        for _ in 0..4 {
            let token = registry.insert(());
            assert_ne!(token.as_raw(), 0);
            registry.remove(token);
        }
    }

    #[test]
    fn test_unarmed_slot_renders_silence() {
        let (slot, calls) = counting_slot(8);
        let token = register_render(slot.clone());

        let mut data = vec![0xAAu8; 64];
        let status = render_entry(token.as_raw(), OUTPUT_BUS, 8, &mut [&mut data[..]]);

        assert_eq!(status, NO_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(data.iter().all(|b| *b == 0));
        assert_eq!(slot.stats().silenced, 1);
        unregister_render(token);
    }

    #[test]
    fn test_armed_slot_forwards() {
        let (slot, calls) = counting_slot(8);
        slot.arm();
        let token = register_render(slot.clone());

        let mut data = vec![0u8; 64];
        let status = render_entry(token.as_raw(), OUTPUT_BUS, 8, &mut [&mut data[..]]);

        assert_eq!(status, NO_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(data.iter().all(|b| *b == 0x7F));
        assert_eq!(slot.stats().forwarded, 1);
        unregister_render(token);
    }

    #[test]
    fn test_addressing_violations_are_rejected() {
        let (slot, calls) = counting_slot(8);
        slot.arm();
        let token = register_render(slot.clone());

        let mut a = vec![1u8; 64];
        let mut b = vec![1u8; 64];

        // Wrong bus
        let status = render_entry(token.as_raw(), 1, 8, &mut [&mut a[..]]);
        assert_eq!(status, INVALID_PARAMETER);

        // Two buffers
        let status = render_entry(token.as_raw(), OUTPUT_BUS, 8, &mut [&mut a[..], &mut b[..]]);
        assert_eq!(status, INVALID_PARAMETER);

        // Size mismatch
        let status = render_entry(token.as_raw(), OUTPUT_BUS, 4, &mut [&mut a[..]]);
        assert_eq!(status, INVALID_PARAMETER);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(slot.stats().rejected, 3);
        assert!(a.iter().chain(b.iter()).all(|x| *x == 0));
        unregister_render(token);
    }

    #[test]
    fn test_stale_render_token_gets_silence() {
        let (slot, calls) = counting_slot(4);
        slot.arm();
        let token = register_render(slot);
        assert!(is_render_target(token));
        assert!(unregister_render(token));
        assert!(!is_render_target(token));

        let mut data = vec![9u8; 16];
        let status = render_entry(token.as_raw(), OUTPUT_BUS, 4, &mut [&mut data[..]]);
        assert_eq!(status, BAD_OBJECT_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let slot = Arc::new(RenderSlot::new(
            Box::new(|buffer: &mut [u8], _frames: u32| {
                buffer.fill(3);
                panic!("render failure");
            }),
            2,
        ));
        slot.arm();
        let token = register_render(slot.clone());

        let mut data = vec![0u8; 8];
        let status = render_entry(token.as_raw(), OUTPUT_BUS, 4, &mut [&mut data[..]]);
        assert_eq!(status, NO_ERROR);
        assert!(data.iter().all(|b| *b == 0));
        assert_eq!(slot.stats().panicked, 1);
        unregister_render(token);
    }

    #[test]
    fn test_callback_runs_inside_render_scope() {
        let inside = Arc::new(AtomicBool::new(false));
        let flag = inside.clone();
        let slot = Arc::new(RenderSlot::new(
            Box::new(move |_buffer: &mut [u8], _frames: u32| {
                flag.store(crate::audio::discipline::in_render_context(), Ordering::SeqCst);
            }),
            1,
        ));
        slot.arm();
        let token = register_render(slot);

        let mut data = vec![0u8; 4];
        render_entry(token.as_raw(), OUTPUT_BUS, 4, &mut [&mut data[..]]);
        assert!(inside.load(Ordering::SeqCst));
        assert!(!crate::audio::discipline::in_render_context());
        unregister_render(token);
    }

    #[test]
    fn test_listener_entry_matches_property_and_object() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let slot = Arc::new(ListenerSlot::new(
            DeviceChangeKind::DefaultOutputChanged,
            HostProperty::DefaultOutputDevice,
            Arc::new(move |kind: DeviceChangeKind| {
                assert_eq!(kind, DeviceChangeKind::DefaultOutputChanged);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        let token = register_listener(slot);

        listener_entry(SYSTEM_OBJECT, &[HostProperty::Devices], token.as_raw());
        listener_entry(42, &[HostProperty::DefaultOutputDevice], token.as_raw());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        listener_entry(
            SYSTEM_OBJECT,
            &[HostProperty::Devices, HostProperty::DefaultOutputDevice],
            token.as_raw(),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(unregister_listener(token));
        listener_entry(SYSTEM_OBJECT, &[HostProperty::DefaultOutputDevice], token.as_raw());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
