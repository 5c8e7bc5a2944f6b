// src/coordinator/tests.rs

use super::*;
use crate::compositor::fake::{Call, FakeBackend};
use crate::display::{DrawOp, MockSurface};
use std::fs;
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tempfile::TempDir;

static NEXT_NAME: AtomicUsize = AtomicUsize::new(0);

fn unique_handoff_name() -> Vec<u8> {
    let n = NEXT_NAME.fetch_add(1, Ordering::SeqCst);
    format!("fbsplash-coordinator-test-{}-{}\0", std::process::id(), n).into_bytes()
}

struct Fixture {
    dir: TempDir,
    surface: MockSurface,
    backend: FakeBackend,
    handoff_name: Vec<u8>,
    config: Config,
}

impl Fixture {
    fn new(config: Config) -> Self {
        Self::with_backend(config, FakeBackend::default())
    }

    fn with_backend(mut config: Config, backend: FakeBackend) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["a.png", "b.png"] {
            fs::write(dir.path().join(name), b"").expect("image file");
        }
        config.images_dir = dir.path().to_path_buf();
        Self {
            dir,
            surface: MockSurface::new(),
            backend,
            handoff_name: unique_handoff_name(),
            config,
        }
    }

    fn bus_socket(&self) -> PathBuf {
        self.dir.path().join("system_bus_socket")
    }

    fn coordinator_with(&self, notifier: ReadinessNotifier) -> Coordinator {
        let env = Environment {
            surface: Box::new(self.surface.clone()),
            backend: Box::new(self.backend.clone()),
            notifier,
            handoff_name: self.handoff_name.clone(),
            bus_socket: self.bus_socket(),
        };
        Coordinator::new(self.config.clone(), self.config.resolve_images(), env)
            .expect("coordinator")
    }

    fn coordinator(&self) -> Coordinator {
        self.coordinator_with(ReadinessNotifier::new(false))
    }
}

#[test_log::test]
fn it_should_draw_every_progress_step_then_release_the_display() {
    let fx = Fixture::new(Config {
        progress_ms: 200,
        ..Config::default()
    });
    let started = Instant::now();
    fx.coordinator().run();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(fx.surface.flip_count(), 101);
    let ops = fx.surface.ops();
    assert_eq!(ops.first(), Some(&DrawOp::Init { reset_panel: true }));
    assert_eq!(ops.last(), Some(&DrawOp::Exit));
}

#[test_log::test]
fn it_should_alternate_animation_frames_until_the_stop_timer() {
    let fx = Fixture::new(Config {
        animate_ms: 100,
        stop_after_ms: 100,
        images: vec!["a".into(), "b".into()],
        ..Config::default()
    });
    let started = Instant::now();
    fx.coordinator().run();
    assert!(started.elapsed() >= Duration::from_millis(100));

    let a = fx.dir.path().join("a.png");
    let b = fx.dir.path().join("b.png");
    let frames = fx.surface.blitted();
    assert!(frames.len() >= 2, "{:?}", frames);
    for (i, frame) in frames.iter().enumerate() {
        let expected = if i % 2 == 0 { &a } else { &b };
        assert_eq!(frame, expected);
    }
}

#[test]
fn it_should_stop_on_an_invalid_mode_and_still_clean_up() {
    let fx = Fixture::new(Config {
        animate_ms: 100,
        images: vec!["a".into()],
        ..Config::default()
    });
    let mut coordinator = fx.coordinator();
    coordinator.run();

    assert!(coordinator.control().stop_requested());
    assert_eq!(fx.surface.flip_count(), 0);
    assert_eq!(fx.surface.ops().last(), Some(&DrawOp::Exit));
    // The handoff address is free again.
    assert_eq!(
        handoff::terminate_running_instance(&fx.handoff_name).expect("client"),
        TerminateOutcome::NoInstance
    );
}

#[test]
fn it_should_leave_the_display_alone_when_cleanup_is_skipped() {
    let fx = Fixture::new(Config {
        text: Some("hello".into()),
        stop_after_ms: 30,
        skip_cleanup: true,
        ..Config::default()
    });
    fx.coordinator().run();

    let ops = fx.surface.ops();
    assert!(ops.contains(&DrawOp::Flip));
    assert!(!ops.contains(&DrawOp::Exit));
}

#[test_log::test]
fn it_should_exit_when_a_newer_instance_asks_over_the_handoff_socket() {
    let fx = Fixture::new(Config {
        text: Some("old instance".into()),
        stop_after_ms: 5000,
        ..Config::default()
    });
    let name = fx.handoff_name.clone();
    let client = thread::spawn(move || {
        let started = Instant::now();
        loop {
            match handoff::terminate_running_instance(&name) {
                Ok(TerminateOutcome::NoInstance) if started.elapsed() < Duration::from_secs(4) => {
                    thread::sleep(Duration::from_millis(20));
                }
                other => return other,
            }
        }
    });

    let started = Instant::now();
    let mut coordinator = fx.coordinator();
    coordinator.run();
    assert!(started.elapsed() < Duration::from_secs(4));

    // Exiting would close the held connection; do it by hand here.
    coordinator
        .handoff
        .as_mut()
        .expect("handoff server")
        .close_held_peers();
    let outcome = client.join().expect("client thread").expect("client");
    assert_eq!(outcome, TerminateOutcome::Terminated);
}

#[test_log::test]
fn it_should_wait_for_bus_permission_when_the_bus_is_already_up() -> Result<()> {
    let fx = Fixture::with_backend(
        Config {
            text: Some("hi".into()),
            stop_after_ms: 300,
            ..Config::default()
        },
        FakeBackend::granting(),
    );
    fs::write(fx.bus_socket(), b"")?;
    let notify_path = fx.dir.path().join("notify");
    let supervisor = UnixDatagram::bind(&notify_path)?;
    supervisor.set_read_timeout(Some(Duration::from_secs(1)))?;

    let _guard = crate::supervisor::notify_socket_lock();
    std::env::set_var("NOTIFY_SOCKET", &notify_path);
    let mut coordinator = fx.coordinator_with(ReadinessNotifier::new(true));
    coordinator.run();
    std::env::remove_var("NOTIFY_SOCKET");

    assert!(coordinator.handoff.is_none());
    let calls = fx.backend.calls();
    assert_eq!(
        &calls[..3],
        &[Call::Connect(1), Call::RegisterObject, Call::RequestName]
    );
    assert_eq!(calls.last(), Some(&Call::Disconnect));

    // Nothing is drawn before the grant; the grant triggers a full repaint.
    let ops = fx.surface.ops();
    assert_eq!(ops.first(), Some(&DrawOp::Init { reset_panel: true }));
    assert!(ops.contains(&DrawOp::Text {
        text: "hi".into(),
        x: 20,
        y: 20
    }));

    let mut buf = [0u8; 16];
    let len = supervisor.recv(&mut buf)?;
    assert_eq!(String::from_utf8_lossy(&buf[..len]).trim_end(), "READY=1");
    Ok(())
}

#[test_log::test]
fn it_should_stop_when_the_bus_socket_disappears() -> Result<()> {
    let fx = Fixture::new(Config {
        text: Some("hi".into()),
        stop_after_ms: 5000,
        ..Config::default()
    });
    let socket = fx.bus_socket();
    fs::write(&socket, b"")?;
    let remover = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        fs::remove_file(socket)
    });

    let started = Instant::now();
    let mut coordinator = fx.coordinator();
    coordinator.run();
    remover.join().expect("remover thread")?;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(fx.backend.calls().contains(&Call::Disconnect));
    // Never granted, never drawn.
    assert_eq!(fx.surface.flip_count(), 0);
    Ok(())
}
