// tests/cli.rs
//! Black-box checks of the binary's exit statuses. None of these reach the
//! main loop, so no display or bus is needed.

use std::os::unix::process::CommandExt;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use fbsplash::os::handoff::{terminate_running_instance, TerminateOutcome};

fn fbsplash(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fbsplash"))
        .args(args)
        .env("RUST_LOG", "debug")
        .output()
        .expect("failed to run fbsplash")
}

#[test]
fn it_should_refuse_to_start_without_images_or_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    let images_dir = dir.path().to_str().expect("utf-8 path");
    let output = fbsplash(&["-i", images_dir, "missing-logo"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No text or images specified"), "{}", stderr);
}

#[test]
fn it_should_print_help_and_succeed() {
    let output = fbsplash(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--progressbar"));
    assert!(stdout.contains("--skip-cleanup"));
}

#[test]
fn it_should_reject_malformed_durations() {
    let output = fbsplash(&["-p", "soon", "-t", "hello"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn it_should_report_success_when_terminating_with_nothing_running() {
    let name = format!("fbsplash-cli-terminate-{}", std::process::id());
    let started = Instant::now();
    let output = fbsplash(&["-x", "--handoff-name", &name]);
    assert!(output.status.success());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn it_should_exit_successfully_when_the_main_loop_cannot_be_set_up() {
    let name = format!("fbsplash-cli-setup-{}", std::process::id());
    let mut command = Command::new(env!("CARGO_BIN_EXE_fbsplash"));
    command
        .args(["-t", "hello", "-s", "100", "--handoff-name", &name])
        .env("RUST_LOG", "debug");
    // Leaves room for the dynamic loader but not for the epoll and eventfd
    // descriptors.
    unsafe {
        command.pre_exec(|| {
            let limit = libc::rlimit {
                rlim_cur: 4,
                rlim_max: 4,
            };
            if libc::setrlimit(libc::RLIMIT_NOFILE, &limit) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let output = command.output().expect("failed to run fbsplash");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{}", stderr);
    assert!(stderr.contains("Main loop setup failed"), "{}", stderr);
}

#[test]
fn it_should_not_block_when_no_instance_listens() {
    let name = format!("fbsplash-cli-test-{}\0", std::process::id());
    let started = Instant::now();
    let outcome = terminate_running_instance(name.as_bytes()).expect("client");
    assert_eq!(outcome, TerminateOutcome::NoInstance);
    assert!(started.elapsed() < Duration::from_secs(1));
}
