//! Stderr logger for the `unwarp` tools.
//!
//! Lines look like `[  0.412s  INFO unwarp_calib] message`. Records from the
//! `unwarp*` crates pass at the configured level; everything else (image
//! codecs, the ChESS corner detector) is capped at `warn`.

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted by [`resolve_level`].
pub const LOG_ENV_VAR: &str = "UNWARP_LOG";

const WORKSPACE_PREFIX: &str = "unwarp";

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl StderrLogger {
    fn threshold(&self, target: &str) -> LevelFilter {
        if target.starts_with(WORKSPACE_PREFIX) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.threshold(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let krate = record.target().split("::").next().unwrap_or("");
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{:7.3}s {:>5} {krate}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Level name (`off`, `error` .. `trace`), case-insensitive.
pub fn parse_level(raw: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(raw.trim()).ok()
}

/// Level for a run: the explicit choice, else [`LOG_ENV_VAR`], else `info`.
pub fn resolve_level(explicit: Option<LevelFilter>) -> LevelFilter {
    explicit
        .or_else(|| {
            std::env::var(LOG_ENV_VAR)
                .ok()
                .as_deref()
                .and_then(parse_level)
        })
        .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger. Later calls keep the first level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| StderrLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing` subscriber on stderr; `RUST_LOG` selects the filter.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
