//! Console bridge GPIO test.
//!
//! Takes no flags. Settings come from the file named by
//! `STLINK_BRIDGE_CONFIG` and the environment overrides described in
//! `stlink_bridge::config`. The outcome is reported as text; the exit code
//! is always 0.

use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use stlink_bridge::backend::BackendRegistry;
use stlink_bridge::bridge_test::{self, TestOptions};
use stlink_bridge::config::Config;
use stlink_bridge::session::BridgeSession;
use stlink_bridge::tracing::{self, prelude::*};

#[tokio::main]
async fn main() {
    tracing::init_journald_or_stdout();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration, using defaults: {e:#}");
            Config::default()
        }
    };

    let interface = match BackendRegistry.create(&config) {
        Ok(interface) => interface,
        Err(e) => {
            error!(error = %e, "Cannot create probe interface.");
            println!("TEST FAIL (Bridge error: {})", e.status_code());
            return;
        }
    };

    let session = BridgeSession::new(interface);
    let options = TestOptions::from(&config);

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    let test = tracker.spawn(bridge_test::run(session, options, running.clone()));
    tracker.close();
    info!("Started.");

    let signal = async {
        if let Err(e) = shutdown_signal().await {
            warn!(
                error = %e,
                "Cannot watch for signals; GPIO toggling stops only after its configured cycles."
            );
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = signal => {
            trace!("Shutting down.");
            running.cancel();
        }
        _ = tracker.wait() => {}
    }

    tracker.wait().await;
    match test.await {
        Ok(report) => println!("{}", report.verdict()),
        Err(e) => error!(error = %e, "Bridge test task failed."),
    }
    info!("Exiting.");
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}
