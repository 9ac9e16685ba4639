use audio_hal_io::audio::*;
use crossbeam::channel;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

fn simulated() -> (Arc<SimulatedHost>, Arc<dyn AudioHost>) {
    let sim = Arc::new(SimulatedHost::default());
    let host: Arc<dyn AudioHost> = sim.clone();
    (sim, host)
}

#[cfg(test)]
mod delivery_tests {
    use super::*;

    #[test]
    fn test_default_change_notifies_and_requery_sees_it() {
        let (_sim, host) = simulated();
        let directory = HostDeviceDirectory::new(host.clone());
        let (tx, rx) = channel::unbounded();

        let callback_directory = directory.clone();
        let _notifier = DeviceChangeNotifier::new(host, move || {
            // Re-query instead of trusting the event
            let _ = tx.send(callback_directory.default_device_id(Scope::Output));
        })
        .unwrap();

        let alternate = alternate_device(&directory, Scope::Output).expect("no alternate output device");
        assert!(directory.set_default_device(alternate, Scope::Output));

        let seen = rx.recv_timeout(WAIT).expect("change callback never fired");
        assert_eq!(seen, alternate);
        assert_eq!(directory.default_device_id(Scope::Output), alternate);
    }

    #[test]
    fn test_partial_subscription_still_delivers() {
        let (sim, host) = simulated();
        sim.fail_listener(HostProperty::DefaultInputDevice, -1);
        let (tx, rx) = channel::unbounded();

        let notifier = DeviceChangeNotifier::with_events(host.clone(), move |kind| {
            let _ = tx.send(kind);
        })
        .expect("a failed subscription must not fail construction");
        assert_eq!(notifier.active_subscriptions().len(), 2);
        assert!(!notifier
            .active_subscriptions()
            .contains(&DeviceChangeKind::DefaultInputChanged));

        let directory = HostDeviceDirectory::new(host);
        assert!(directory.set_default_device(DeviceId(43), Scope::Output));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), DeviceChangeKind::DefaultOutputChanged);

        sim.add_device(SimulatedDevice::new(60, "Bluetooth Headphones", 0, 1));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), DeviceChangeKind::DeviceListChanged);

        // The missing class stays silent
        assert!(directory.set_default_device(DeviceId(43), Scope::Input));
        assert_eq!(directory.default_device_id(Scope::Input), DeviceId(43));
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_device_removal_emits_both_classes_in_any_order() {
        let (sim, host) = simulated();
        let (tx, rx) = channel::unbounded();
        let _notifier = DeviceChangeNotifier::with_events(host, move |kind| {
            let _ = tx.send(kind);
        })
        .unwrap();

        // 42 is the default output
        assert!(sim.remove_device(DeviceId(42)));

        let mut seen = HashSet::new();
        for _ in 0..2 {
            seen.insert(rx.recv_timeout(WAIT).expect("missing notification"));
        }
        let expected: HashSet<_> = [
            DeviceChangeKind::DeviceListChanged,
            DeviceChangeKind::DefaultOutputChanged,
        ]
        .into_iter()
        .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_ignored_request_emits_nothing() {
        let (_sim, host) = simulated();
        let (tx, rx) = channel::unbounded();
        let _notifier = DeviceChangeNotifier::new(host.clone(), move || {
            let _ = tx.send(());
        })
        .unwrap();

        let directory = HostDeviceDirectory::new(host);
        assert!(directory.set_default_device(DeviceId::UNKNOWN, Scope::Output));
        assert!(directory.set_default_device(DeviceId(42), Scope::Output));
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_panicking_callback_keeps_delivering() {
        let (_sim, host) = simulated();
        let (tx, rx) = channel::unbounded();
        let _notifier = DeviceChangeNotifier::with_events(host.clone(), move |kind| {
            if kind == DeviceChangeKind::DefaultInputChanged {
                panic!("listener failure");
            }
            let _ = tx.send(kind);
        })
        .unwrap();

        let directory = HostDeviceDirectory::new(host);
        directory.set_default_device(DeviceId(43), Scope::Input);
        directory.set_default_device(DeviceId(43), Scope::Output);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), DeviceChangeKind::DefaultOutputChanged);
    }
}

#[cfg(test)]
mod teardown_tests {
    use super::*;

    #[test]
    fn test_drop_removes_every_held_subscription() {
        let (sim, host) = simulated();
        sim.fail_listener(HostProperty::Devices, -1);
        let notifier = DeviceChangeNotifier::new(host, || {}).unwrap();
        assert_eq!(sim.listener_count(), 2);

        drop(notifier);
        assert_eq!(sim.listener_count(), 0);
    }

    #[test]
    fn test_no_events_after_drop() {
        let (sim, host) = simulated();
        let (tx, rx) = channel::unbounded();
        let notifier = DeviceChangeNotifier::new(host.clone(), move || {
            let _ = tx.send(());
        })
        .unwrap();
        drop(notifier);

        sim.add_device(SimulatedDevice::new(61, "USB Mic", 1, 0));
        // The callback (and its sender) is gone with the notifier
        assert!(matches!(
            rx.recv_timeout(WAIT),
            Err(channel::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_independent_notifiers() {
        let (sim, host) = simulated();
        let (tx_a, rx_a) = channel::unbounded();
        let (tx_b, rx_b) = channel::unbounded();
        let a = DeviceChangeNotifier::new(host.clone(), move || {
            let _ = tx_a.send(());
        })
        .unwrap();
        let _b = DeviceChangeNotifier::new(host, move || {
            let _ = tx_b.send(());
        })
        .unwrap();
        assert_eq!(sim.listener_count(), 6);

        drop(a);
        assert_eq!(sim.listener_count(), 3);
        sim.add_device(SimulatedDevice::new(62, "Line Out", 0, 2));
        assert!(rx_b.recv_timeout(WAIT).is_ok());
        assert!(rx_a.recv_timeout(QUIET).is_err());
    }
}

#[cfg(test)]
mod channel_tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_async_receiver() {
        let (sim, host) = simulated();
        let (notifier, mut events) = device_change_channel(host).unwrap();

        sim.add_device(SimulatedDevice::new(70, "AirPlay", 0, 2));
        let kind = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(kind, DeviceChangeKind::DeviceListChanged);

        drop(notifier);
        let drained = tokio::time::timeout(WAIT, async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "receiver stayed open after the notifier was dropped");
    }
}
