use audio_hal_io::audio::*;
use crossbeam::channel;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn simulated(buffer_frames: u32) -> (Arc<SimulatedHost>, Arc<dyn AudioHost>) {
    let sim = Arc::new(SimulatedHost::new(SimulatedHostConfig {
        buffer_frames,
        ..Default::default()
    }));
    let host: Arc<dyn AudioHost> = sim.clone();
    (sim, host)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_stereo_float_stream_renders_within_200ms() {
        let (sim, host) = simulated(512);
        let (tx, rx) = channel::bounded::<u32>(1);

        let format = StreamFormat::new(SampleEncoding::F32LE, 2, 44_100.0);
        let mut stream = OutputStream::new(host, format, move |buffer, frames| {
            buffer.fill(0);
            let _ = tx.try_send(frames);
        })
        .expect("stream creation failed");

        stream.start().expect("start failed");
        let frames = rx
            .recv_timeout(Duration::from_millis(200))
            .expect("no render callback within 200 ms");
        assert_eq!(frames, 512);

        stream.stop().expect("stop failed");
        stream.close().expect("close failed");
        assert_eq!(sim.live_units(), 0);
    }

    #[test]
    fn test_no_callback_before_start_or_after_stop() {
        // ~46 ms period keeps the window between host start and our check far from the first tick
        let (sim, host) = simulated(2048);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let format = StreamFormat::stereo_f32(44_100.0);
        let period = Duration::from_secs_f64(2048.0 / 44_100.0);
        let mut stream = OutputStream::new(host, format, move |_buffer, _frames| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::thread::sleep(period * 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "callback ran before start");

        stream.start().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0, "callback ran during start");
        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 2));

        stream.stop().unwrap();
        let at_stop = calls.load(Ordering::SeqCst);
        std::thread::sleep(period * 4);
        assert_eq!(calls.load(Ordering::SeqCst), at_stop, "callback ran after stop");
        assert_eq!(sim.running_units(), 0);

        // Restart resumes delivery
        stream.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) > at_stop));
        drop(stream);
        assert_eq!(sim.live_units(), 0);
    }

    #[test]
    fn test_stop_waits_for_in_flight_callback() {
        let (_sim, host) = simulated(64);
        let inside = Arc::new(AtomicBool::new(false));
        let flag = inside.clone();

        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), move |_b, _f| {
            flag.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            flag.store(false, Ordering::SeqCst);
        })
        .unwrap();

        stream.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || inside.load(Ordering::SeqCst)));
        stream.stop().unwrap();
        assert!(!inside.load(Ordering::SeqCst), "stop returned with a callback in flight");
    }

    #[test]
    fn test_single_buffer_of_exact_size() {
        let frames_per_buffer = 256;
        for encoding in SampleEncoding::ALL {
            for channels in [1u32, 2, 6] {
                let (_sim, host) = simulated(frames_per_buffer);
                let format = StreamFormat::new(encoding, channels, 48_000.0);
                let expected_bpf = format.bytes_per_frame() as usize;

                let calls = Arc::new(AtomicUsize::new(0));
                let mismatches = Arc::new(AtomicUsize::new(0));
                let (c, m) = (calls.clone(), mismatches.clone());

                let mut stream = OutputStream::new(host, format, move |buffer, frames| {
                    c.fetch_add(1, Ordering::SeqCst);
                    if buffer.len() != frames as usize * expected_bpf {
                        m.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap();

                stream.start().unwrap();
                assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 3));
                stream.stop().unwrap();

                assert_eq!(mismatches.load(Ordering::SeqCst), 0, "{} x{}", encoding, channels);
                assert_eq!(stream.render_stats().rejected, 0);
                assert!(stream.render_stats().forwarded >= 3);
            }
        }
    }

    #[test]
    fn test_render_stats_and_accessors() {
        let (_sim, host) = simulated(128);
        let format = StreamFormat::new(SampleEncoding::S16BE, 1, 22_050.0);
        let stream = OutputStream::new(host, format, |_b, _f| {}).unwrap();

        assert_eq!(stream.format(), format);
        assert_eq!(stream.description().bytes_per_frame, 2);
        assert!(stream.description().format_flags.contains(FormatFlags::IS_BIG_ENDIAN));
        assert_eq!(stream.state(), StreamState::Constructed);
        assert_eq!(stream.render_stats(), RenderStats::default());
    }

    #[test]
    fn test_callback_panic_does_not_stop_stream() {
        let (_sim, host) = simulated(64);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), move |_b, _f| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first buffer failed");
            }
        })
        .unwrap();

        stream.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 3));
        stream.stop().unwrap();
        assert_eq!(stream.render_stats().panicked, 1);
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    const STATUS: HostStatus = -50;

    #[test]
    fn test_each_construction_step_rolls_back() {
        let cases = [
            (UnitStep::Create, AudioError::HostResourceUnavailable { status: STATUS }),
            (
                UnitStep::SetFormat,
                AudioError::HostConfigurationRejected {
                    step: "stream format",
                    status: STATUS,
                },
            ),
            (
                UnitStep::SetCallback,
                AudioError::HostConfigurationRejected {
                    step: "render callback",
                    status: STATUS,
                },
            ),
            (UnitStep::Initialize, AudioError::HostResourceUnavailable { status: STATUS }),
        ];

        for (step, expected) in cases {
            let (sim, host) = simulated(512);
            sim.fail_unit_step(step, STATUS);
            let err = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), |_b, _f| {}).unwrap_err();
            assert_eq!(err, expected, "{:?}", step);
            assert_eq!(err.status(), Some(STATUS));
            assert_eq!(sim.live_units(), 0, "{:?} leaked a unit", step);
        }
    }

    #[test]
    fn test_no_output_hardware() {
        let (sim, host) = simulated(512);
        sim.set_no_output_hardware(true);
        let err = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), |_b, _f| {}).unwrap_err();
        assert!(matches!(err, AudioError::HostResourceUnavailable { .. }));
    }

    #[test]
    fn test_start_failure_leaves_stream_startable() {
        let (sim, host) = simulated(512);
        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), |_b, _f| {}).unwrap();

        sim.fail_unit_step(UnitStep::Start, STATUS);
        let err = stream.start().unwrap_err();
        assert_eq!(
            err,
            AudioError::HostOperationFailed {
                operation: "start",
                status: STATUS
            }
        );
        assert_eq!(stream.state(), StreamState::Constructed);

        sim.clear_faults();
        stream.start().unwrap();
        assert!(stream.is_running());
    }

    #[test]
    fn test_stop_failure_keeps_stream_running() {
        let (sim, host) = simulated(64);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), move |_b, _f| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        stream.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 2));

        sim.fail_unit_step(UnitStep::Stop, STATUS);
        let err = stream.stop().unwrap_err();
        assert_eq!(
            err,
            AudioError::HostOperationFailed {
                operation: "stop",
                status: STATUS
            }
        );
        assert_eq!(stream.state(), StreamState::Running);

        // The host keeps rendering and the callback keeps receiving buffers
        let after_failure = calls.load(Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(2), || {
            calls.load(Ordering::SeqCst) >= after_failure + 3
        }));

        sim.clear_faults();
        stream.stop().unwrap();
        assert_eq!(stream.state(), StreamState::Constructed);
        assert_eq!(sim.running_units(), 0);
        stream.close().unwrap();
        assert_eq!(sim.live_units(), 0);
    }

    #[test]
    fn test_close_after_failed_stop_still_releases_unit() {
        let (sim, host) = simulated(64);
        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), |_b, _f| {}).unwrap();
        stream.start().unwrap();

        sim.fail_unit_step(UnitStep::Stop, STATUS);
        let err = stream.close().unwrap_err();
        assert_eq!(
            err,
            AudioError::HostOperationFailed {
                operation: "stop",
                status: STATUS
            }
        );
        // Uninitialize and dispose ran regardless
        assert_eq!(sim.live_units(), 0);
        assert_eq!(sim.running_units(), 0);
    }

    #[test]
    fn test_oversized_channel_count_is_an_error() {
        let (sim, host) = simulated(512);
        for channels in [MAX_CHANNELS + 1, u32::MAX / 2] {
            let format = StreamFormat::new(SampleEncoding::F32LE, channels, 44_100.0);
            let err = OutputStream::new(host.clone(), format, |_b, _f| {}).unwrap_err();
            assert!(matches!(err, AudioError::InvalidStreamFormat(_)), "{:?}", err);
        }
        assert_eq!(sim.live_units(), 0);
    }

    #[test]
    fn test_close_reports_first_error_and_finishes_teardown() {
        let (sim, host) = simulated(512);
        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), |_b, _f| {}).unwrap();
        stream.start().unwrap();

        sim.fail_unit_step(UnitStep::Uninitialize, STATUS);
        let err = stream.close().unwrap_err();
        assert_eq!(
            err,
            AudioError::HostOperationFailed {
                operation: "uninitialize",
                status: STATUS
            }
        );
        assert_eq!(sim.running_units(), 0);
        assert_eq!(sim.live_units(), 0, "dispose skipped after failed uninitialize");
    }

    #[test]
    fn test_drop_logs_teardown_failure() {
        let (sim, host) = simulated(512);
        let stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), |_b, _f| {}).unwrap();
        sim.fail_unit_step(UnitStep::Dispose, STATUS);
        drop(stream);
        // Dispose refused: the unit stays with the host, nothing panicked
        assert_eq!(sim.live_units(), 1);
    }
}

#[cfg(test)]
mod reentrancy_tests {
    use super::*;

    #[test]
    fn test_control_calls_from_render_callback_are_refused() {
        let (_sim, host) = simulated(128);
        let inner_host = host.clone();
        let (tx, rx) = channel::bounded(1);
        let mut done = false;

        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), move |_b, _f| {
            if done {
                return;
            }
            done = true;
            let stream = OutputStream::new(inner_host.clone(), StreamFormat::stereo_f32(44_100.0), |_b, _f| {})
                .map(|_| ());
            let notifier = DeviceChangeNotifier::new(inner_host.clone(), || {}).map(|_| ());
            let _ = tx.try_send((stream, notifier, in_render_context()));
        })
        .unwrap();

        stream.start().unwrap();
        let (stream_result, notifier_result, in_render) =
            rx.recv_timeout(Duration::from_secs(2)).expect("callback never ran");
        stream.stop().unwrap();

        assert!(in_render);
        assert!(matches!(stream_result, Err(AudioError::RenderContextViolation { .. })));
        assert!(matches!(notifier_result, Err(AudioError::RenderContextViolation { .. })));
        assert!(!in_render_context());
    }

    #[test]
    fn test_drop_inside_render_callback_leaks_instead_of_deadlocking() {
        let (sim, host) = simulated(128);
        let victim = OutputStream::new(host.clone(), StreamFormat::stereo_f32(44_100.0), |_b, _f| {}).unwrap();
        let mut victim = Some(victim);
        let (tx, rx) = channel::bounded(1);

        let mut stream = OutputStream::new(host, StreamFormat::stereo_f32(44_100.0), move |_b, _f| {
            if let Some(inner) = victim.take() {
                drop(inner);
                let _ = tx.try_send(());
            }
        })
        .unwrap();

        stream.start().unwrap();
        rx.recv_timeout(Duration::from_secs(2))
            .expect("render thread deadlocked dropping a stream");
        stream.close().unwrap();

        // The dropped stream's unit was leaked rather than torn down on the render thread
        assert_eq!(sim.live_units(), 1);
    }
}
