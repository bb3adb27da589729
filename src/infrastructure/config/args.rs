use super::app_config::LogLevel;
use clap::Parser;
use std::path::PathBuf;

/// Level used for a resource given without `=LEVEL`.
pub const DEFAULT_CLI_LEVEL: u32 = 1;

#[derive(Debug, Parser)]
#[command(
    name = "imgtier",
    version,
    about = "Tiered image loader with deduplicated, cancellable fetches",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Decode bound in pixels.
    #[arg(long, value_name = "PX")]
    pub target_size: Option<u32>,

    /// Share of available memory for decoded images, in percent.
    #[arg(long, value_name = "PERCENT")]
    pub memory_percent: Option<u8>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Network timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Clear both caches before loading.
    #[arg(long)]
    pub clear_cache: bool,

    /// How long to wait for loads to finish, in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub wait: u64,

    /// Resources to load as `URL[=LEVEL]`; lower levels are better.
    #[arg(value_name = "URL[=LEVEL]", value_parser = parse_resource)]
    pub resources: Vec<(String, u32)>,
}

/// Splits `URL=LEVEL`. A suffix that is not a number stays part of the URL.
///
/// # Errors
/// Returns error for an empty URL.
pub fn parse_resource(raw: &str) -> Result<(String, u32), String> {
    let (url, level) = match raw.rsplit_once('=') {
        Some((url, level)) => match level.parse::<u32>() {
            Ok(level) => (url, level),
            Err(_) => (raw, DEFAULT_CLI_LEVEL),
        },
        None => (raw, DEFAULT_CLI_LEVEL),
    };
    if url.is_empty() {
        return Err(format!("missing URL in '{raw}'"));
    }
    Ok((url.to_string(), level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://x/a.png", "https://x/a.png", 1 ; "bare_url")]
    #[test_case("https://x/a.png=2", "https://x/a.png", 2 ; "explicit_level")]
    #[test_case("https://x/a.png?s=big", "https://x/a.png?s=big", 1 ; "query_string")]
    fn test_parse_resource(raw: &str, url: &str, level: u32) {
        assert_eq!(parse_resource(raw), Ok((url.to_string(), level)));
    }

    #[test]
    fn test_parse_resource_rejects_empty_url() {
        assert!(parse_resource("=2").is_err());
    }

    #[test]
    fn test_positional_resources() {
        let args = CliArgs::parse_from(["imgtier", "https://x/full.png=1", "https://x/thumb.png=2"]);
        assert_eq!(args.resources.len(), 2);
        assert_eq!(args.resources[1].1, 2);
        assert_eq!(args.wait, 60);
    }
}
