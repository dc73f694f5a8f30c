//! Routes the core's `log` records to a logger supplied by the host application.

use std::sync::{Arc, OnceLock};

/// Receives log messages from the wallet core.
///
/// Host applications implement this to route core logs into their own pipeline
/// (`os_log`, Logcat, a file). With the `ffi` feature the trait can be implemented
/// in Swift or Kotlin.
///
/// ```rust
/// use std::sync::Arc;
/// use khalkos_core::logger::{set_logger, LogLevel, Logger};
///
/// struct Stderr;
///
/// impl Logger for Stderr {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
///
/// set_logger(Arc::new(Stderr), LogLevel::Info);
/// ```
///
/// Messages never carry the private key, the PIN or the identity token.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Logs `message` at `level`.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a forwarded message, most verbose first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Step by step detail.
    Trace,
    /// Diagnostics: retries, skipped records, probe results.
    Debug,
    /// Lifecycle: wallet stored, unlocked, deployed, logged out.
    Info,
    /// Degraded but recoverable: a price feed or token read failed.
    Warn,
    /// An operation failed.
    Error,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

impl LogLevel {
    const fn filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

struct HostLogger {
    logger: Arc<dyn Logger>,
    max_level: LogLevel,
}

static HOST_LOGGER: OnceLock<HostLogger> = OnceLock::new();

/// Whether a record is passed to the host logger.
///
/// Debug and trace records from dependencies (reqwest, hyper, rustls) are dropped
/// whatever `max_level` says.
fn forwards(metadata: &log::Metadata<'_>, max_level: LogLevel) -> bool {
    let level = LogLevel::from(metadata.level());
    if level < max_level {
        return false;
    }
    level >= LogLevel::Info || metadata.target().starts_with("khalkos")
}

struct Bridge;

impl log::Log for Bridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        HOST_LOGGER
            .get()
            .is_some_and(|host| forwards(metadata, host.max_level))
    }

    fn log(&self, record: &log::Record<'_>) {
        let Some(host) = HOST_LOGGER.get() else {
            return;
        };
        if forwards(record.metadata(), host.max_level) {
            host.logger
                .log(record.level().into(), record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Installs the host logger, forwarding messages at `max_level` or above.
///
/// Only the first call takes effect; later calls are reported on stderr and ignored.
#[cfg_attr(feature = "ffi", uniffi::export)]
pub fn set_logger(logger: Arc<dyn Logger>, max_level: LogLevel) {
    if HOST_LOGGER.set(HostLogger { logger, max_level }).is_err() {
        eprintln!("khalkos logger already set");
        return;
    }

    static BRIDGE: Bridge = Bridge;
    match log::set_logger(&BRIDGE) {
        Ok(()) => log::set_max_level(max_level.filter()),
        Err(err) => eprintln!("failed to install khalkos logger: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn metadata(level: log::Level, target: &str) -> log::Metadata<'_> {
        log::Metadata::builder().level(level).target(target).build()
    }

    #[test_case(log::Level::Debug, "khalkos_core::session", LogLevel::Debug => true)]
    #[test_case(log::Level::Debug, "khalkos_core::session", LogLevel::Info => false)]
    #[test_case(log::Level::Debug, "hyper::client", LogLevel::Trace => false)]
    #[test_case(log::Level::Warn, "hyper::client", LogLevel::Info => true)]
    #[test_case(log::Level::Info, "khalkos_core::balance", LogLevel::Error => false)]
    #[test_case(log::Level::Error, "reqwest", LogLevel::Error => true)]
    fn test_forwarding_rule(level: log::Level, target: &str, max_level: LogLevel) -> bool {
        forwards(&metadata(level, target), max_level)
    }

    #[test]
    fn test_levels_are_ordered_by_severity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::from(log::Level::Warn), LogLevel::Warn);
    }
}
