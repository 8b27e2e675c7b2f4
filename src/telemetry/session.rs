//! Log file placement
//!
//! Without an aircraft name the log goes where `--logfile` says. With one,
//! every run gets its own `<aircraft>/logs/<date>/flightN` directory.

use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ProxyError, Result};

/// Default tagged log file name
pub const DEFAULT_LOG_NAME: &str = "mav.tlog";

/// Tagged log name inside a flight directory
pub const FLIGHT_LOG_NAME: &str = "flight.tlog";

/// Highest flight directory number tried per day
const MAX_FLIGHTS_PER_DAY: u32 = 9999;

/// Where this session's logs live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// Directory holding both files
    pub dir: PathBuf,
    /// Tagged (timestamped) log
    pub tlog: PathBuf,
    /// Raw byte stream of the primary link
    pub raw: PathBuf,
}

/// How to pick the log location
#[derive(Debug, Clone)]
pub struct SessionOptions<'a> {
    /// Log file path used when no aircraft is named
    pub logfile: &'a str,
    /// Aircraft directory, enabling per-flight subdirectories
    pub aircraft: Option<&'a str>,
    /// Reuse the newest flight directory instead of starting another
    pub continue_mode: bool,
    /// Date used for the day directory
    pub date: NaiveDate,
}

/// Resolve (and create) the log directory for this run
///
/// # Errors
///
/// Returns [`ProxyError::Io`] if a directory cannot be created, or
/// [`ProxyError::InvalidConfig`] when every flight number for the day is
/// already taken.
///
/// # Examples
///
/// ```no_run
/// use mav_proxy::telemetry::session::{resolve_log_paths, SessionOptions};
///
/// let paths = resolve_log_paths(&SessionOptions {
///     logfile: "mav.tlog",
///     aircraft: Some("Skyhunter"),
///     continue_mode: false,
///     date: chrono::Local::now().date_naive(),
/// })?;
/// println!("logging to {}", paths.tlog.display());
/// # Ok::<(), mav_proxy::error::ProxyError>(())
/// ```
pub fn resolve_log_paths(options: &SessionOptions<'_>) -> Result<LogPaths> {
    let (dir, name) = match options.aircraft {
        Some(aircraft) => {
            let day_dir = Path::new(aircraft)
                .join("logs")
                .join(options.date.format("%Y-%m-%d").to_string());
            fs::create_dir_all(&day_dir)?;
            (flight_dir(&day_dir, options.continue_mode)?, FLIGHT_LOG_NAME.to_string())
        }
        None => {
            let path = Path::new(options.logfile);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_LOG_NAME.to_string());
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (dir, name)
        }
    };

    fs::create_dir_all(&dir)?;
    info!("Logging to {}", dir.join(&name).display());

    Ok(LogPaths {
        tlog: dir.join(&name),
        raw: dir.join(format!("{}.raw", name)),
        dir,
    })
}

fn flight_dir(day_dir: &Path, continue_mode: bool) -> Result<PathBuf> {
    let mut highest = None;
    for n in 1..=MAX_FLIGHTS_PER_DAY {
        let candidate = day_dir.join(format!("flight{}", n));
        if !candidate.exists() {
            return Ok(match (continue_mode, highest) {
                (true, Some(existing)) => existing,
                _ => candidate,
            });
        }
        highest = Some(candidate);
    }

    match (continue_mode, highest) {
        (true, Some(existing)) => Ok(existing),
        _ => Err(ProxyError::InvalidConfig(format!(
            "Flight logs full in {}",
            day_dir.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    #[test]
    fn test_plain_logfile_location() {
        let tmp = TempDir::new().unwrap();
        let logfile = tmp.path().join("sub").join("test.tlog");
        let logfile = logfile.to_string_lossy().into_owned();

        let paths = resolve_log_paths(&SessionOptions {
            logfile: &logfile,
            aircraft: None,
            continue_mode: false,
            date: date(),
        })
        .unwrap();

        assert_eq!(paths.tlog, tmp.path().join("sub").join("test.tlog"));
        assert_eq!(paths.raw, tmp.path().join("sub").join("test.tlog.raw"));
        assert!(paths.dir.is_dir());
    }

    #[test]
    fn test_aircraft_sessions_are_numbered() {
        let tmp = TempDir::new().unwrap();
        let aircraft = tmp.path().join("Skyhunter");
        let aircraft = aircraft.to_string_lossy().into_owned();
        let options = SessionOptions {
            logfile: DEFAULT_LOG_NAME,
            aircraft: Some(&aircraft),
            continue_mode: false,
            date: date(),
        };

        let first = resolve_log_paths(&options).unwrap();
        let second = resolve_log_paths(&options).unwrap();

        let day = tmp.path().join("Skyhunter").join("logs").join("2024-05-17");
        assert_eq!(first.dir, day.join("flight1"));
        assert_eq!(second.dir, day.join("flight2"));
        assert_eq!(second.tlog, day.join("flight2").join("flight.tlog"));
    }

    #[test]
    fn test_continue_reuses_highest_flight() {
        let tmp = TempDir::new().unwrap();
        let aircraft = tmp.path().join("Cub");
        let aircraft = aircraft.to_string_lossy().into_owned();
        let mut options = SessionOptions {
            logfile: DEFAULT_LOG_NAME,
            aircraft: Some(&aircraft),
            continue_mode: false,
            date: date(),
        };

        resolve_log_paths(&options).unwrap();
        let second = resolve_log_paths(&options).unwrap();

        options.continue_mode = true;
        let resumed = resolve_log_paths(&options).unwrap();
        assert_eq!(resumed.dir, second.dir);
    }

    #[test]
    fn test_continue_without_previous_flight_starts_first() {
        let tmp = TempDir::new().unwrap();
        let aircraft = tmp.path().join("New");
        let aircraft = aircraft.to_string_lossy().into_owned();

        let paths = resolve_log_paths(&SessionOptions {
            logfile: DEFAULT_LOG_NAME,
            aircraft: Some(&aircraft),
            continue_mode: true,
            date: date(),
        })
        .unwrap();
        assert!(paths.dir.ends_with("flight1"));
    }
}
