//! Command-line surface and input handling.

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";

const BANNER: &str = r"
  ____ _ _         ____
 / ___(_) |_      |  _ \ _   _ _ __ ___  _ __
| |  _| | __|_____| | | | | | | '_ ` _ \| '_ \
| |_| | | ||______| |_| | |_| | | | | | | |_) |
 \____|_|\__|     |____/ \__,_|_| |_| |_| .__/
                                        |_|
";

/// Fetches exposed Git repository files from a list of URLs and
/// restores the working trees locally.
#[derive(Parser, Debug, Clone)]
#[command(name = "git-dump", version, about)]
pub struct Config {
    /// Path to the file containing a list of URLs to dump (`-` reads stdin)
    #[arg(short = 'i', long = "input", default_value = "-")]
    pub input_file: String,

    /// Directory to store the dumped files
    #[arg(short = 'o', long = "output", default_value = "output")]
    pub output_dir: PathBuf,

    /// Logging level
    #[arg(long = "log", default_value = "fatal",
          value_parser = ["debug", "info", "warn", "error", "fatal", "panic"])]
    pub log_level: String,

    /// User-Agent string to use in HTTP requests
    #[arg(long = "ua", default_value = CHROME_USER_AGENT)]
    pub user_agent: String,

    /// Connection timeout
    #[arg(long = "connect-timeout", default_value = "10s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,

    /// Response header read timeout
    #[arg(long = "header-timeout", default_value = "5s", value_parser = humantime::parse_duration)]
    pub header_timeout: Duration,

    /// Keep-alive timeout for idle connections
    #[arg(long = "keepalive-timeout", default_value = "90s", value_parser = humantime::parse_duration)]
    pub keepalive_timeout: Duration,

    /// Total per-request timeout
    #[arg(long = "request-timeout", default_value = "60s", value_parser = humantime::parse_duration)]
    pub request_timeout: Duration,

    /// Maximum number of retries for each request
    #[arg(long = "retries", default_value_t = 3)]
    pub max_retries: u32,

    /// Maximum number of errors per host before skipping it
    #[arg(long = "maxhe", default_value_t = 5)]
    pub max_host_errors: u32,

    /// Number of concurrent workers
    #[arg(short = 'w', long = "workers", default_value_t = 50)]
    pub workers_num: usize,

    /// Maximum number of requests per second across all hosts
    #[arg(long = "rps", default_value_t = 150)]
    pub max_rps: u32,

    /// Proxy URL (e.g., socks5://localhost:1080)
    #[arg(long = "proxy")]
    pub proxy_url: Option<String>,

    /// Force fetch URLs, even if files already exist
    #[arg(short = 'f', long = "force")]
    pub force_fetch: bool,

    /// Disable banner output
    #[arg(long = "no-banner")]
    pub no_banner: bool,
}

pub fn print_banner() {
    println!("{BANNER}");
    println!("{}", "-".repeat(40));
    println!("This tool fetches Git repository files from a list of URLs and stores them locally.");
    println!("It supports rate limiting, retries, and parallel processing.");
    println!();
}

/// Maps the accepted log level names onto a `tracing` filter
/// directive. `fatal` and `panic` have no `tracing` equivalent;
/// fatal conditions abort the process through `main`, so those levels
/// silence the subscriber entirely.
pub fn level_filter(level: &str) -> &'static str {
    match level {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "off",
    }
}

/// Reads the URL list, one per line, from a file or stdin (`-`).
/// Blank lines are skipped.
pub fn read_lines(input_file: &str) -> io::Result<Vec<String>> {
    let content = if input_file == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(input_file)?
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
