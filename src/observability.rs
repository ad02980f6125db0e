//! Logging setup and structured metric hooks.
//!
//! Library code only talks to the `log` facade. `init_logging` is for binaries,
//! benches and tests that want output; calling it more than once is harmless.

use std::fs::OpenOptions;
use std::sync::Once;

use log::LevelFilter;

use crate::error::SplayError;

/// Logs a structured key-value metric line at debug level under the
/// `splay_core::metric` target.
///
/// # Example
/// ```
/// use splay_core::log_metric;
/// let rows = 4;
/// log_metric!("event"="flush", "rows"=rows);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        if $crate::__log::log_enabled!(target: "splay_core::metric", $crate::__log::Level::Debug) {
            let mut parts = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+
            $crate::__log::debug!(target: "splay_core::metric", "SPLAY_METRIC: {{ {} }}", parts.join(", "));
        }
    };
}

static INIT_LOGGER: Once = Once::new();

/// Installs an `env_logger` printing `[LEVEL] message`, to stderr or appended to
/// `log_file`.
pub fn init_logging(level: LevelFilter, log_file: Option<&str>) -> Result<(), SplayError> {
    let target = match log_file {
        Some(filename) => Some(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(filename)?,
        ),
        None => None,
    };

    INIT_LOGGER.call_once(move || {
        let mut builder = env_logger::Builder::new();

        builder.is_test(false);
        builder.filter_level(level);

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = target {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });
    Ok(())
}
