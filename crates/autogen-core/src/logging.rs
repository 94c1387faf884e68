use crate::config::LoggingConfig;
use crate::constants::{dirs, env_vars};
use crate::errors::ConfigError;
use chrono::Local;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::FormattedFields;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SESSION_PREFIX: &str = "autogen_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<u8> for LogLevel {
    fn from(val: u8) -> Self {
        match val {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl LogLevel {
    /// `-v` raises info to debug, `-vv` to trace.
    pub fn from_verbosity(verbose: u8) -> Self {
        LogLevel::from((LogLevel::Info as u8).saturating_add(verbose))
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

static DEFAULT_LOG_LEVEL: Mutex<LogLevel> = Mutex::new(LogLevel::Info);

pub fn set_log_level(level: LogLevel) {
    if let Ok(mut default_level) = DEFAULT_LOG_LEVEL.lock() {
        *default_level = level;
    }
}

pub fn set_log_level_from_env() {
    if let Some(level) = env::var(env_vars::LOG_LEVEL)
        .ok()
        .and_then(|s| LogLevel::parse(&s))
    {
        set_log_level(level);
    }
}

fn default_level() -> Level {
    DEFAULT_LOG_LEVEL
        .lock()
        .map(|level| (*level).into())
        .unwrap_or(Level::INFO)
}

fn env_filter() -> EnvFilter {
    let level = default_level().to_string().to_lowercase();
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Prefixes each event with the spans it happened in, so a line logged while
/// a task ticks names that task and its directory.
struct ContextFormatter {
    with_location: bool,
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ContextFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        write!(writer, "[")?;
        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, "] [{:5}] ", metadata.level())?;

        if self.with_location {
            if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
                write!(writer, "{}:{} ", file, line)?;
            }
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn rotate_logs(log_dir: &Path, prefix: &str, config: &LoggingConfig) -> Result<(), ConfigError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".log"))
        })
        .collect();

    entries.sort();

    if config.max_files > 0 && entries.len() > config.max_files {
        let to_delete = entries.len() - config.max_files;
        for path in entries.drain(0..to_delete) {
            let _ = fs::remove_file(path);
        }
    }

    if config.max_age_days > 0 {
        let max_age = Duration::from_secs(config.max_age_days * 24 * 60 * 60);
        let now = SystemTime::now();
        for path in entries {
            let Some(created) = session_date(&path, prefix) else {
                continue;
            };
            if now.duration_since(created).is_ok_and(|age| age > max_age) {
                let _ = fs::remove_file(&path);
            }
        }
    }

    Ok(())
}

/// Session files are named `<prefix><date>_<time>_<pid>.log`.
fn session_date(path: &Path, prefix: &str) -> Option<SystemTime> {
    let name = path.file_name()?.to_str()?;
    let date_part = name.strip_prefix(prefix)?.split('_').next()?;
    let date = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let local = date
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()?;
    Some(SystemTime::from(local))
}

fn init_tracing_subscriber(log_path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .event_format(ContextFormatter {
            with_location: true,
        });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .event_format(ContextFormatter {
            with_location: env::var(env_vars::TEST_LOG_TEE).is_ok(),
        });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ConfigError::General(format!("Failed to install logger: {}", e)))?;

    tracing::debug!("Session log at '{}'", log_path.display());
    Ok(())
}

/// Logs to stderr and to a rotated per-invocation file under the XDG cache home.
pub fn init_session_logger(config: &LoggingConfig) -> Result<(), ConfigError> {
    let cache_home = xdg::BaseDirectories::with_prefix(dirs::AUTOGEN)
        .get_cache_home()
        .ok_or(ConfigError::HomeDirectoryNotFound)?;
    let logs_dir = cache_home.join(dirs::LOGS);

    rotate_logs(&logs_dir, SESSION_PREFIX, config)?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let filename = format!("{}{}_{}.log", SESSION_PREFIX, timestamp, std::process::id());
    let log_path = logs_dir.join(&filename);

    init_tracing_subscriber(&log_path)?;

    let symlink_path = cache_home.join("autogen.log");
    let _ = fs::remove_file(&symlink_path);
    #[cfg(unix)]
    {
        use std::os::unix::fs::symlink;
        let target = Path::new(dirs::LOGS).join(filename);
        let _ = symlink(&target, &symlink_path);
    }

    Ok(())
}

pub fn init_stderr_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .event_format(ContextFormatter {
            with_location: false,
        })
        .try_init();
}

fn format_command_for_display(command: &Command) -> String {
    let program = command.get_program().to_string_lossy();
    let args = command
        .get_args()
        .map(|arg| {
            let s = arg.to_string_lossy();
            if s.contains(char::is_whitespace) || s.is_empty() {
                format!("'{}'", s)
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    match command.get_current_dir() {
        Some(dir) => format!("(cd {}) {} {}", dir.display(), program, args),
        None => format!("{} {}", program, args),
    }
}

pub fn log_and_print_command(command: &Command) {
    tracing::debug!("[CMD] {}", format_command_for_display(command));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_rotate_logs_max_files() {
        let dir = tempdir().unwrap();
        let path = dir.path();

        let filenames = [
            "autogen_2023-01-01_10-00-00_1.log",
            "autogen_2023-01-02_10-00-00_1.log",
            "autogen_2023-01-03_10-00-00_1.log",
            "autogen_2023-01-04_10-00-00_1.log",
        ];
        for name in &filenames {
            File::create(path.join(name)).unwrap();
        }
        File::create(path.join("notes.txt")).unwrap();

        let config = LoggingConfig {
            max_files: 2,
            max_age_days: 0,
        };
        rotate_logs(path, SESSION_PREFIX, &config).unwrap();

        assert!(!path.join(filenames[0]).exists());
        assert!(!path.join(filenames[1]).exists());
        assert!(path.join(filenames[2]).exists());
        assert!(path.join(filenames[3]).exists());
        assert!(path.join("notes.txt").exists());
    }

    #[test]
    fn test_rotate_logs_max_age() {
        let dir = tempdir().unwrap();
        let path = dir.path();

        let now = Local::now();
        let recent = format!(
            "autogen_{}_10-00-00_1.log",
            (now - ChronoDuration::days(1)).format("%Y-%m-%d")
        );
        let stale = format!(
            "autogen_{}_10-00-00_1.log",
            (now - ChronoDuration::days(9)).format("%Y-%m-%d")
        );
        File::create(path.join(&recent)).unwrap();
        File::create(path.join(&stale)).unwrap();

        let config = LoggingConfig {
            max_files: 0,
            max_age_days: 7,
        };
        rotate_logs(path, SESSION_PREFIX, &config).unwrap();

        assert!(path.join(&recent).exists());
        assert!(!path.join(&stale).exists());
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(5), LogLevel::Trace);
    }

    #[test]
    fn test_command_display_quotes_spaces() {
        let mut cmd = Command::new("qsub");
        cmd.arg("my script.pbs").current_dir("/scratch/h2");
        assert_eq!(
            format_command_for_display(&cmd),
            "(cd /scratch/h2) qsub 'my script.pbs'"
        );
    }
}
