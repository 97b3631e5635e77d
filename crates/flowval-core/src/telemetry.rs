//! Centralised tracing initialisation for flowval binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! since the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "FLOWVAL_LOG";

/// Crate targets that follow the requested level; everything else stays at `warn`.
const FLOWVAL_TARGETS: [&str; 2] = ["flowval_core", "flowval"];

/// Filter directives used when no log environment variable is set.
///
/// `default_directives(Level::DEBUG)` is `"warn,flowval_core=debug,flowval=debug"`.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = String::from("warn");
    for target in FLOWVAL_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: verbosity of flowval's own targets when neither
///   `FLOWVAL_LOG` nor `RUST_LOG` is set. Dependencies log at `warn`.
///
/// Logs go to stderr so stdout stays free for command output.
pub fn init_tracing(json: bool, level: Level) {
    let filter = env_filter(level);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
