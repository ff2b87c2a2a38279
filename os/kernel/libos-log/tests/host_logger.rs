use libos_log::{HostLogger, LoggerError, install_console_sink};
use log::LevelFilter;
use std::fmt::Write;
use std::sync::Mutex;

static CAPTURED: Mutex<String> = Mutex::new(String::new());

fn capture(args: core::fmt::Arguments<'_>) {
    let mut out = CAPTURED.lock().unwrap();
    out.write_fmt(args).unwrap();
}

#[test]
fn records_reach_the_console_sink() {
    assert!(install_console_sink(capture).is_ok());
    assert!(install_console_sink(capture).is_err());

    HostLogger::new(LevelFilter::Info).init().unwrap();
    assert_eq!(
        HostLogger::new(LevelFilter::Trace).init(),
        Err(LoggerError::AlreadyInstalled)
    );
    assert_eq!(log::max_level(), LevelFilter::Info);

    log::info!(target: "zone", "created {} pages", 4);
    log::debug!(target: "zone", "filtered");
    libos_log::host_trace!("raw {}\n", 1);

    let out = CAPTURED.lock().unwrap().clone();
    assert!(out.contains("[INFO] zone: created 4 pages\n"));
    assert!(!out.contains("filtered"));
    assert!(out.ends_with("raw 1\n"));
}
