//! Logging host function implementation.
//!
//! Guest engine messages are stored on the job's [`EngineContext`] and
//! re-emitted through `tracing`. Outside verbose mode they go out at `trace`
//! so a chatty engine does not flood the service log.

use toolkit_media_core::store::{EngineContext, LogLevel};
use tracing::{debug, error, info, trace, warn};

/// Host implementation of `env::log`.
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    pub fn log(ctx: &mut EngineContext, level: LogLevel, message: &str) {
        ctx.log(level, message.to_string());

        let job_id = ctx.job_id.as_str();
        if !ctx.verbose {
            trace!(job_id, guest_log = true, level = %level, "{}", message);
            return;
        }
        match level {
            LogLevel::Debug => debug!(job_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(job_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(job_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(job_id, guest_log = true, "{}", message),
        }
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error; unknown values default to info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use toolkit_media_core::{MemFs, ProgressSink};

    use super::*;

    fn context(verbose: bool) -> EngineContext {
        EngineContext::new(
            "job-1".into(),
            &["ffmpeg".to_string()],
            Arc::new(MemFs::new()),
            ProgressSink::new(),
            verbose,
            16 * 1024 * 1024,
        )
    }

    #[test]
    fn test_logging_stores_in_context() {
        let mut ctx = context(false);

        LoggingHost::log(&mut ctx, LogLevel::Info, "Input #0, png_pipe");
        LoggingHost::log(&mut ctx, LogLevel::Error, "Invalid data found when processing input");

        assert_eq!(ctx.logs.len(), 2);
        assert_eq!(ctx.logs[0].message, "Input #0, png_pipe");
        assert_eq!(ctx.logs[1].level, LogLevel::Error);
        assert_eq!(ctx.last_error(), Some("Invalid data found when processing input"));
    }

    #[test]
    fn test_verbose_logging_stores_in_context() {
        let mut ctx = context(true);

        LoggingHost::log(&mut ctx, LogLevel::Warn, "deprecated pixel format");
        assert_eq!(ctx.logs.len(), 1);
        assert_eq!(ctx.logs[0].level, LogLevel::Warn);
    }

    #[test]
    fn test_level_from_i32() {
        assert_eq!(level_from_i32(0), LogLevel::Debug);
        assert_eq!(level_from_i32(1), LogLevel::Info);
        assert_eq!(level_from_i32(2), LogLevel::Warn);
        assert_eq!(level_from_i32(3), LogLevel::Error);
        assert_eq!(level_from_i32(99), LogLevel::Info);
    }
}
