use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use castcorder::config::AppConfig;
use castcorder::logging::Verbosity;

/// Watch TwitCasting channels and record every broadcast.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (TOML)
    #[arg(short, long, env = "CASTCORDER_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Channel to watch; repeat for several
    #[arg(short = 'n', long = "channel", value_name = "NAME")]
    pub channels: Vec<String>,

    /// File listing channels, used when no channel is given
    #[arg(long, env = "CASTCORDER_STREAMERS_FILE", value_name = "PATH")]
    pub streamers_file: Option<PathBuf>,

    /// Capture this URL instead of resolving the channel page
    #[arg(long, env = "CASTCORDER_URL")]
    pub url: Option<String>,

    /// Directory recordings are saved under
    #[arg(short, long, env = "CASTCORDER_SAVE_DIR", value_name = "DIR")]
    pub save_dir: Option<PathBuf>,

    /// Directory for log files
    #[arg(long, env = "CASTCORDER_LOG_DIR", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Streamlink quality selector
    #[arg(long, env = "CASTCORDER_QUALITY")]
    pub quality: Option<String>,

    /// Stop each capture after this many seconds
    #[arg(short, long, env = "CASTCORDER_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Seconds without file growth before a capture counts as stalled
    #[arg(long, env = "CASTCORDER_STALL_THRESHOLD", value_name = "SECS")]
    pub stall_threshold: Option<u64>,

    /// Seconds to wait after a failed attempt
    #[arg(long, env = "CASTCORDER_RETRY_DELAY", value_name = "SECS")]
    pub retry_delay: Option<u64>,

    /// Give up after this many consecutive failures (0 = never)
    #[arg(long, env = "CASTCORDER_MAX_RETRIES", value_name = "N")]
    pub max_retries: Option<u32>,

    /// Kill captures immediately on the first interrupt
    #[arg(long, env = "CASTCORDER_FAST_EXIT")]
    pub fast_exit: bool,

    /// Stop watching a channel after its first recording
    #[arg(long, env = "CASTCORDER_STOP_AFTER_SUCCESS")]
    pub stop_after_success: bool,

    /// Disable the stall watchdog
    #[arg(long, env = "CASTCORDER_NO_WATCHDOG")]
    pub no_watchdog: bool,

    /// Keep raw recordings instead of converting them to MKV
    #[arg(long, env = "CASTCORDER_NO_CONVERT")]
    pub no_convert: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }

    /// Layer command-line values over the loaded config.
    pub fn apply(&self, config: &mut AppConfig) {
        if !self.channels.is_empty() {
            config.channels = self.channels.clone();
        }
        if let Some(path) = &self.streamers_file {
            config.streamers_file = path.clone();
        }
        if let Some(dir) = &self.save_dir {
            config.save_dir = dir.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(quality) = &self.quality {
            config.capture.quality = quality.clone();
        }
        if let Some(secs) = self.timeout {
            config.capture.max_duration = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = self.stall_threshold {
            config.watchdog.stall_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = self.retry_delay {
            config.retry.retry_delay = Duration::from_secs(secs);
        }
        if let Some(n) = self.max_retries {
            config.retry.max_consecutive_failures = n;
        }
        config.fast_exit |= self.fast_exit;
        config.stop_after_success |= self.stop_after_success;
        if self.no_watchdog {
            config.watchdog.enabled = false;
        }
        if self.no_convert {
            config.postprocess.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "castcorder",
            "--channel",
            "alice",
            "-n",
            "bob",
            "--timeout",
            "3600",
            "--max-retries",
            "0",
            "--no-watchdog",
            "--fast-exit",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.channels, vec!["alice", "bob"]);
        assert_eq!(config.capture.max_duration, Some(Duration::from_secs(3600)));
        assert_eq!(config.retry.max_consecutive_failures, 0);
        assert!(!config.watchdog.enabled);
        assert!(config.fast_exit);
        assert!(config.postprocess.enabled);
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::parse_from(["castcorder"]);
        let mut config = AppConfig::default();
        config.channels = vec!["carol".into()];
        config.stop_after_success = true;
        cli.apply(&mut config);

        assert_eq!(config.channels, vec!["carol"]);
        assert!(config.stop_after_success);
        assert_eq!(cli.verbosity(), Verbosity::Normal);
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["castcorder", "-v", "-q"]).is_err());
    }
}
