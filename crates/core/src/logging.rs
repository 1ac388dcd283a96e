//! Process-wide tracing setup and panic crash artifacts.
//!
//! The bridge is loaded into someone else's process, so nothing here is
//! installed implicitly: hosts opt in through [`init_logging`] and keep their
//! own subscriber otherwise.

use std::{
    any::Any,
    backtrace::{Backtrace, BacktraceStatus},
    fs,
    io::Write,
    panic::{self, PanicHookInfo},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, OnceLock,
    },
    thread,
};

use chrono::{DateTime, Utc};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::LoggingConfig;

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_LOG_RETENTION_FILES: usize = 14;
pub const DEFAULT_LOG_DIR_NAME: &str = "logs";
pub const DEFAULT_CRASH_DIR_NAME: &str = "crash";
pub const DEFAULT_LOG_FILE_PREFIX: &str = "rife-bridge";

/// Per-frame timing target: `info` on the console, `debug` in the file.
const FRAME_TIMING_TARGET: &str = "rife_bridge_core::gateway";

static CRASH_DIR: OnceLock<PathBuf> = OnceLock::new();
static CRASH_HOOK_INSTALL: Mutex<()> = Mutex::new(());
static CRASH_WRITE_ACTIVE: AtomicBool = AtomicBool::new(false);
static CRASH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitOptions {
    /// Root for `logs/` and `logs/crash/`; `None` logs to stderr only.
    pub data_dir: Option<PathBuf>,
    /// 1 selects `debug`, 2 or more `trace`.
    pub verbose: u8,
    pub filter: Option<String>,
    pub rust_log_env: Option<String>,
    pub retention_files: usize,
}

impl Default for LoggingInitOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            verbose: 0,
            filter: None,
            rust_log_env: None,
            retention_files: DEFAULT_LOG_RETENTION_FILES,
        }
    }
}

impl LoggingInitOptions {
    pub fn from_config(config: &LoggingConfig, data_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir,
            filter: config.filter.clone(),
            retention_files: config.retention_files,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilters {
    pub console: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanicHookInstallPlan {
    Installed {
        crash_dir: PathBuf,
    },
    AlreadyInstalled {
        crash_dir: PathBuf,
    },
    Fallback {
        attempted_crash_dir: Option<PathBuf>,
        reason: String,
    },
}

/// Outcome of [`init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingInitReport {
    ConsoleAndFile { log_dir: PathBuf },
    ConsoleOnly { reason: String },
    /// The host already installed a global subscriber.
    AlreadyInitialized,
}

/// Install the global subscriber: stderr always, plus a daily rolling file
/// under `<data_dir>/logs` when it can be created. Also installs the crash
/// hook when `data_dir` is set.
pub fn init_logging(options: &LoggingInitOptions) -> LoggingInitReport {
    if let Some(data_dir) = options.data_dir.as_deref() {
        if let PanicHookInstallPlan::Fallback { reason, .. } = install_panic_hook(Some(data_dir)) {
            eprintln!("Warning: panic crash artifacts disabled: {reason}");
        }
    }

    let filters = log_filters(options);
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(&filters.console));

    let (installed, report) = match open_file_sink(options) {
        Ok((log_dir, appender)) => {
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender)
                .with_filter(env_filter(&filters.file));
            let subscriber = tracing_subscriber::registry().with(console).with(file);
            (
                tracing::subscriber::set_global_default(subscriber),
                LoggingInitReport::ConsoleAndFile { log_dir },
            )
        }
        Err(reason) => {
            let subscriber = tracing_subscriber::registry().with(console);
            (
                tracing::subscriber::set_global_default(subscriber),
                LoggingInitReport::ConsoleOnly { reason },
            )
        }
    };

    if installed.is_err() {
        return LoggingInitReport::AlreadyInitialized;
    }
    match &report {
        LoggingInitReport::ConsoleOnly { reason } => {
            tracing::warn!(%reason, "File logging disabled; logging to stderr only");
        }
        LoggingInitReport::ConsoleAndFile { log_dir } => {
            tracing::info!(log_dir = %log_dir.display(), "Logging initialized");
        }
        LoggingInitReport::AlreadyInitialized => {}
    }
    report
}

/// Explicit filter, then `verbose`, then `RUST_LOG`, then `info`. Frame
/// timing directives are only added when nothing was chosen explicitly.
pub fn log_filters(options: &LoggingInitOptions) -> LogFilters {
    let explicit = options.filter.is_some() || options.verbose > 0;
    let user = match (&options.filter, options.verbose) {
        (Some(filter), _) => filter.clone(),
        (None, 0) => options
            .rust_log_env
            .clone()
            .filter(|env| !env.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        (None, 1) => "debug".to_string(),
        (None, _) => "trace".to_string(),
    };

    if explicit {
        return LogFilters {
            console: user.clone(),
            file: user,
        };
    }
    LogFilters {
        console: format!("{user},{FRAME_TIMING_TARGET}=info"),
        file: format!("{user},{FRAME_TIMING_TARGET}=debug"),
    }
}

fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|error| {
        eprintln!(
            "Warning: invalid log filter '{directives}' ({error}); using '{DEFAULT_LOG_FILTER}'."
        );
        EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn open_file_sink(options: &LoggingInitOptions) -> Result<(PathBuf, RollingFileAppender), String> {
    let data_dir = options
        .data_dir
        .as_deref()
        .ok_or_else(|| "no data directory configured".to_string())?;
    let log_dir = data_dir.join(DEFAULT_LOG_DIR_NAME);
    fs::create_dir_all(&log_dir)
        .map_err(|e| format!("failed to create log directory {}: {e}", log_dir.display()))?;

    let retention = match options.retention_files {
        0 => DEFAULT_LOG_RETENTION_FILES,
        n => n,
    };
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(DEFAULT_LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(retention)
        .build(&log_dir)
        .map_err(|e| format!("failed to open rolling log file: {e}"))?;
    Ok((log_dir, appender))
}

/// Chain a hook that writes one file per panic under
/// `<data_dir>/logs/crash`. The first successful install wins.
pub fn install_panic_hook(data_dir: Option<&Path>) -> PanicHookInstallPlan {
    if let Some(crash_dir) = CRASH_DIR.get() {
        return PanicHookInstallPlan::AlreadyInstalled {
            crash_dir: crash_dir.clone(),
        };
    }
    let Some(data_dir) = data_dir else {
        return PanicHookInstallPlan::Fallback {
            attempted_crash_dir: None,
            reason: "no data directory configured".to_string(),
        };
    };

    let crash_dir = data_dir
        .join(DEFAULT_LOG_DIR_NAME)
        .join(DEFAULT_CRASH_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&crash_dir) {
        return PanicHookInstallPlan::Fallback {
            reason: format!("failed to create {}: {error}", crash_dir.display()),
            attempted_crash_dir: Some(crash_dir),
        };
    }

    let _guard = CRASH_HOOK_INSTALL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = CRASH_DIR.get() {
        return PanicHookInstallPlan::AlreadyInstalled {
            crash_dir: existing.clone(),
        };
    }

    let previous = panic::take_hook();
    let hook_dir = crash_dir.clone();
    panic::set_hook(Box::new(move |info| {
        record_crash(&hook_dir, info);
        previous(info);
    }));
    let _ = CRASH_DIR.set(crash_dir.clone());
    PanicHookInstallPlan::Installed { crash_dir }
}

fn record_crash(crash_dir: &Path, info: &PanicHookInfo<'_>) {
    // A panic while writing the report must not recurse into this hook.
    if CRASH_WRITE_ACTIVE.swap(true, Ordering::AcqRel) {
        return;
    }

    let written = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        CrashReport::capture(info).write_to(crash_dir)
    }));
    match written {
        Ok(Ok(_)) => {}
        Ok(Err(error)) => eprintln!(
            "Warning: failed to write panic crash artifact under '{}': {error}",
            crash_dir.display()
        ),
        Err(_) => eprintln!(
            "Warning: panic while writing crash artifact under '{}'.",
            crash_dir.display()
        ),
    }

    CRASH_WRITE_ACTIVE.store(false, Ordering::Release);
}

#[derive(Debug)]
struct CrashReport {
    timestamp: DateTime<Utc>,
    thread: String,
    location: String,
    payload: String,
    backtrace_policy: &'static str,
    backtrace: String,
}

impl CrashReport {
    fn capture(info: &PanicHookInfo<'_>) -> Self {
        let backtrace = Backtrace::capture();
        let backtrace_policy = match backtrace.status() {
            BacktraceStatus::Captured => "captured",
            BacktraceStatus::Disabled => "disabled (set RUST_BACKTRACE=1 to enable)",
            BacktraceStatus::Unsupported => "unsupported",
            _ => "unknown",
        };
        Self {
            timestamp: Utc::now(),
            thread: thread::current().name().unwrap_or("<unnamed>").to_string(),
            location: info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "<unknown>".to_string()),
            payload: panic_payload_to_string(info.payload()),
            backtrace_policy,
            backtrace: backtrace.to_string(),
        }
    }

    fn write_to(&self, crash_dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(crash_dir)?;
        let sequence = CRASH_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let path = crash_dir.join(format!(
            "panic-{}-{sequence:04}.log",
            self.timestamp.format("%Y%m%d-%H%M%S-%3f")
        ));

        let mut file = fs::File::create(&path)?;
        writeln!(file, "timestamp_utc={}", self.timestamp.to_rfc3339())?;
        writeln!(file, "thread={}", self.thread)?;
        writeln!(file, "location={}", self.location)?;
        writeln!(file, "payload={}", self.payload)?;
        writeln!(file, "backtrace_policy={}", self.backtrace_policy)?;
        writeln!(file, "backtrace:\n{}", self.backtrace)?;
        file.flush()?;
        Ok(path)
    }
}

/// Text of a panic payload, for crash files and the C boundary.
pub fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_string())
}
