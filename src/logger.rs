//! File logging with daily rotation in the local timezone.

use anyhow::Result;
use logroller::{LogRollerBuilder, Rotation, RotationAge, TimeZone};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use time::macros::format_description;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;

use crate::config::Config;

/// Log files are named `autograder-analysis.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "autograder-analysis";

/// Environment variable overriding the log filter (`EnvFilter` syntax).
pub const LOG_ENV: &str = "AUTOGRADER_ANALYSIS_LOG";

const LOG_RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Initialize file logging under `config.log_path`.
pub fn init(config: &Config) -> Result<()> {
    if !config.log_path.exists() {
        fs::create_dir_all(&config.log_path)?;
    }

    cleanup_old_logs(&config.log_path, LOG_RETENTION)?;

    let appender = LogRollerBuilder::new(config.log_path.as_path(), Path::new(LOG_FILE_PREFIX))
        .rotation(Rotation::AgeBased(RotationAge::Daily))
        .time_zone(TimeZone::Local)
        .max_keep_files(3)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create log roller: {}", e))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let time_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = OffsetTime::new(local_offset, time_format);

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("autograder_analysis=debug,info"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_timer(timer),
    );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))?;

    // The writer thread must outlive main.
    std::mem::forget(guard);

    Ok(())
}

/// Remove this tool's log files last modified more than `retention` ago.
pub fn cleanup_old_logs(log_path: &Path, retention: Duration) -> Result<usize> {
    if !log_path.exists() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;

    for entry in fs::read_dir(log_path)? {
        let entry = entry?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !filename.starts_with(LOG_FILE_PREFIX) {
            continue;
        }

        if let Ok(metadata) = entry.metadata()
            && let Ok(modified) = metadata.modified()
            && modified < cutoff
            && fs::remove_file(&path).is_ok()
        {
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_file_modified_time(path: &Path, time: SystemTime) -> std::io::Result<()> {
        let since_epoch = time.duration_since(SystemTime::UNIX_EPOCH).unwrap();
        let secs = since_epoch.as_secs();
        let atime = libc::timespec {
            tv_sec: secs as libc::time_t,
            tv_nsec: 0,
        };
        let mtime = libc::timespec {
            tv_sec: secs as libc::time_t,
            tv_nsec: 0,
        };
        let times = [atime, mtime];
        let c_path = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
        let ret = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
        if ret == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    fn days_ago(days: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60)
    }

    #[test]
    fn cleanup_removes_expired_logs_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_path = dir.path();

        let old_file = log_path.join("autograder-analysis.2020-01-01");
        fs::write(&old_file, "old log").unwrap();
        set_file_modified_time(&old_file, days_ago(4)).unwrap();

        let recent_file = log_path.join("autograder-analysis.2026-10-18");
        fs::write(&recent_file, "recent log").unwrap();

        assert_eq!(cleanup_old_logs(log_path, LOG_RETENTION).unwrap(), 1);
        assert!(!old_file.exists(), "expired log should be deleted");
        assert!(recent_file.exists(), "recent log should be kept");
    }

    #[test]
    fn cleanup_leaves_other_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let other_file = dir.path().join("other-app.log");
        fs::write(&other_file, "other log").unwrap();
        set_file_modified_time(&other_file, days_ago(10)).unwrap();

        let subdir = dir.path().join("autograder-analysis.subdir");
        fs::create_dir(&subdir).unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), LOG_RETENTION).unwrap(), 0);
        assert!(other_file.exists());
        assert!(subdir.exists());
    }

    #[test]
    fn cleanup_tolerates_missing_dir() {
        let removed = cleanup_old_logs(
            Path::new("/tmp/nonexistent_autograder_analysis_log_dir"),
            LOG_RETENTION,
        )
        .unwrap();
        assert_eq!(removed, 0);
    }
}
