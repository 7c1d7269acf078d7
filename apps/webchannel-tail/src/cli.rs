use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser};

use crate::logging::{LogConfig, LogLevel};

#[derive(Debug, Parser)]
#[command(
    name = "webchannel-tail",
    version,
    about = "Follow a chat account's live event stream and print one JSON line per event"
)]
pub struct Cli {
    /// Cookie header copied from a signed-in browser (`SID=...; HSID=...`).
    #[arg(long, env = "WEBCHANNEL_COOKIES", hide_env_values = true)]
    pub cookies: Option<String>,

    /// Read the cookie header from a file instead.
    #[arg(long, value_name = "PATH", conflicts_with = "cookies")]
    pub cookies_file: Option<PathBuf>,

    /// Domain the cookies are scoped to.
    #[arg(long, env = "WEBCHANNEL_COOKIE_DOMAIN", default_value = "google.com")]
    pub cookie_domain: String,

    /// Proxy URL; overrides WEBCHANNEL_PROXY.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Browser user agent; overrides WEBCHANNEL_USER_AGENT.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Lifetime of one channel before it is replaced.
    #[arg(long, env = "WEBCHANNEL_MAX_AGE_SECS", default_value_t = 1800)]
    pub max_age_secs: u64,

    /// Consecutive failed long-polls tolerated before a channel gives up.
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    /// Pause before reconnecting after a channel gives up.
    #[arg(long, default_value_t = 10)]
    pub reconnect_delay_secs: u64,

    /// Exit when the first channel ends instead of reconnecting.
    #[arg(long, default_value_t = false)]
    pub once: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn cookie_header(&self) -> Result<String> {
        let raw = match (&self.cookies, &self.cookies_file) {
            (Some(cookies), _) => cookies.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read cookies from {}", path.display()))?,
            (None, None) => bail!("no cookies given; pass --cookies, --cookies-file or WEBCHANNEL_COOKIES"),
        };
        let header = raw.trim().trim_start_matches("Cookie:").trim().to_string();
        if header.is_empty() {
            bail!("cookie header is empty");
        }
        Ok(header)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "WEBCHANNEL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "WEBCHANNEL_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("webchannel-tail").chain(args.iter().copied())).unwrap()
    }

    #[test_timeout::timeout]
    fn cookie_header_prefix_is_stripped() {
        let cli = parse(&["--cookies", "Cookie: SID=a; HSID=b\n"]);
        assert_eq!(cli.cookie_header().unwrap(), "SID=a; HSID=b");
    }

    #[test_timeout::timeout]
    fn logging_flags_flatten_into_config() {
        let cli = parse(&["--cookies", "SID=a", "--log-level", "debug", "--max-age-secs", "60"]);
        let config = cli.logging.to_config();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.file.is_none());
        assert_eq!(cli.max_age(), Duration::from_secs(60));
    }

    #[test_timeout::timeout]
    fn cookies_and_cookie_file_conflict() {
        let result = Cli::try_parse_from(["webchannel-tail", "--cookies", "SID=a", "--cookies-file", "c.txt"]);
        assert!(result.is_err());
    }
}
