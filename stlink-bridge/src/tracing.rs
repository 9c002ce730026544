//! Log output of the bridge test.
//!
//! The console test reports through log lines rather than a UI: enumerated
//! probes (`Bridge 0 PID: 0X374f SN:...`), the selected serial number,
//! target voltage, one clock line per com channel and the `set`/`reset`
//! phases of the GPIO toggle. These are INFO. Each individual pin write and
//! handle release is DEBUG or TRACE, so `RUST_LOG=stlink_bridge=trace`
//! shows the full driver conversation.
//!
//! Library code logs through `use crate::tracing::prelude::*`; only the
//! binary installs a subscriber.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Install the subscriber for the console test.
///
/// Under systemd (`JOURNAL_STREAM` set) lines go to the journal with their
/// structured fields; from a terminal they go to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
        } else {
            use_stdout();
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        use_stdout();
    }
}

// RUST_LOG overrides the INFO default, which keeps the console down to the
// status lines and the verdict.
fn use_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// hh:mm:ss in local time, falling back to UTC when the offset is unknown.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
