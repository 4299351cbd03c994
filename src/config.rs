use crate::core::delegate::DEFAULT_ACTOR_ID;
use crate::core::gemini::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::core::input::Secret;
use crate::core::pipeline::RunOptions;
use crate::core::poller::PollPolicy;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables shared by every command. Each can come from a flag, the
/// environment, or a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Gemini model used for every analysis pass
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL, global = true)]
    pub model: String,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_API_BASE, global = true)]
    pub gemini_api_base: String,

    /// Key used when an input sets `use_default_key`
    #[arg(long, env = "GEMINI_DEFAULT_API_KEY", hide_env_values = true, global = true)]
    pub default_api_key: Option<String>,

    /// Seconds between readiness checks of an uploaded file
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 15, global = true)]
    pub poll_interval_secs: u64,

    /// Give up waiting for an uploaded file after this many seconds
    #[arg(long, env = "POLL_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub poll_timeout_secs: u64,

    /// yt-dlp executable
    #[arg(long, env = "YTDLP_BIN", default_value = "yt-dlp", global = true)]
    pub ytdlp_bin: String,

    /// Actor that downloads videos into object storage
    #[arg(long, env = "DELEGATE_ACTOR_ID", default_value = DEFAULT_ACTOR_ID, global = true)]
    pub delegate_actor: String,

    /// Where local records and reports are written
    #[arg(long, env = "VIDLENS_DATA_DIR", default_value = ".", global = true)]
    pub data_dir: PathBuf,

    /// Parent directory for temporary media (defaults to the system temp dir)
    #[arg(long, env = "VIDLENS_WORK_DIR", global = true)]
    pub work_dir: Option<PathBuf>,
}

impl Settings {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            ceiling: Duration::from_secs(self.poll_timeout_secs),
        }
    }

    pub fn default_key(&self) -> Option<Secret> {
        self.default_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(Secret::new)
    }

    pub fn work_root(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            model: self.model.clone(),
            poll: self.poll_policy(),
            default_key: self.default_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        settings: Settings,
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = Harness::parse_from(["vidlens"]).settings;
        let policy = settings.poll_policy();

        assert_eq!(policy.interval, Duration::from_secs(15));
        assert_eq!(policy.ceiling, Duration::from_secs(300));
        assert_eq!(settings.ytdlp_bin, "yt-dlp");
    }

    #[test]
    fn blank_default_key_counts_as_missing() {
        let settings =
            Harness::parse_from(["vidlens", "--default-api-key", "  ", "--model", "m"]).settings;
        assert!(settings.default_key().is_none());
        assert_eq!(settings.run_options().model, "m");
    }
}
