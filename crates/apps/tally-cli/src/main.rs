//! Tally - sender statistics from a mailbox
//!
//! Usage:
//!   tally init
//!   tally archive <path> <start> <end> [--max N] [--clear-cache]
//!   tally api <start> <end> [--max N] [--clear-cache]
//!   tally protocol <user> <start> <end> [--max N] [--clear-cache]
//!
//! Dates are `YYYY/MM/DD` or `YYYY-MM-DD`; both ends are inclusive. The `api`
//! command reads a pre-issued OAuth access token from `TALLY_ACCESS_TOKEN`.
//! The `protocol` command logs in to `imap_host` with `TALLY_IMAP_PASSWORD`
//! when set, otherwise with the `TALLY_ACCESS_TOKEN` over XOAUTH2.

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use tally::config::SETTINGS_FILE;
use tally::{
    CancelToken, ConfigError, FetchWindow, GmailClient, ImapCredentials, ImapSession,
    IngestConfig, IngestOptions, IngestReport, JsonFileCache, RecordCache, Source, StaticToken,
};

const USAGE: &str = "usage:
  tally init
  tally archive <path> <start> <end> [--max N] [--clear-cache]
  tally api <start> <end> [--max N] [--clear-cache]
  tally protocol <user> <start> <end> [--max N] [--clear-cache]";

const TOP_SENDERS: usize = 10;

enum Command {
    Init,
    Archive { path: PathBuf, window: FetchWindow },
    Api { window: FetchWindow },
    Protocol { user: String, window: FetchWindow },
}

struct Args {
    command: Command,
    max: Option<usize>,
    clear_cache: bool,
}

fn parse_args(raw: Vec<String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut max = None;
    let mut clear_cache = false;

    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--max" => {
                let value = iter.next().context("--max needs a number")?;
                max = Some(value.parse().with_context(|| format!("invalid --max '{}'", value))?);
            }
            "--clear-cache" => clear_cache = true,
            "-h" | "--help" => bail!("{}", USAGE),
            _ => positional.push(arg),
        }
    }

    let command = match positional.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["init"] => Command::Init,
        ["archive", path, start, end] => Command::Archive {
            path: PathBuf::from(path),
            window: FetchWindow::parse(start, end)?,
        },
        ["api", start, end] => Command::Api {
            window: FetchWindow::parse(start, end)?,
        },
        ["protocol", user, start, end] => Command::Protocol {
            user: user.to_string(),
            window: FetchWindow::parse(start, end)?,
        },
        _ => bail!("{}", USAGE),
    };

    Ok(Args {
        command,
        max,
        clear_cache,
    })
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    let settings = IngestConfig::load()?;

    let (source, window) = match args.command {
        Command::Init => {
            let path = config::save_json(SETTINGS_FILE, &settings)?;
            info!("Wrote settings to {}", path.display());
            return Ok(());
        }
        Command::Archive { path, window } => (Source::local_archive(&path, &settings)?, window),
        Command::Api { window } => {
            let token = env_secret("TALLY_ACCESS_TOKEN")
                .ok_or_else(|| ConfigError::Credentials("TALLY_ACCESS_TOKEN is not set".to_string()))?;
            let client = GmailClient::new(Arc::new(StaticToken::new(token)));
            (Source::paginated_api(Arc::new(client), &settings)?, window)
        }
        Command::Protocol { user, window } => {
            let credentials = imap_credentials(user)?;
            let session = ImapSession::connect(&settings.imap_host, settings.imap_port, &credentials)?;
            (Source::bulk_protocol(Box::new(session), &settings), window)
        }
    };

    let cache_path = settings
        .cache_path()
        .context("No cache location; set TALLY_CACHE_FILE")?;
    let cache = JsonFileCache::new(&cache_path);
    if args.clear_cache {
        cache.clear()?;
        info!("Cleared cache at {}", cache_path.display());
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Ctrl-C will not stop ingestion cleanly: {}", e);
    }

    info!("Ingesting {} to {} from {} source", window.start, window.end, source.kind());
    let options = IngestOptions::from_config(window, &settings)
        .with_limit(args.max)
        .with_cancel(cancel);
    let report = tally::ingest(&source, &cache, &options);
    if let Err(e) = source.close() {
        warn!("{:#}", e);
    }
    let report = report?;

    print_report(&report);
    Ok(())
}

fn env_secret(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn imap_credentials(user: String) -> Result<ImapCredentials, ConfigError> {
    if let Some(password) = env_secret("TALLY_IMAP_PASSWORD") {
        return Ok(ImapCredentials::Password { user, password });
    }
    match env_secret("TALLY_ACCESS_TOKEN") {
        Some(access_token) => Ok(ImapCredentials::OAuth2 { user, access_token }),
        None => Err(ConfigError::Credentials(
            "set TALLY_IMAP_PASSWORD or TALLY_ACCESS_TOKEN".to_string(),
        )),
    }
}

fn print_report(report: &IngestReport) {
    let senders = report.senders();

    println!(
        "{:<40} {:<28} {:>6} {:>6} {:>9}",
        "Sender", "Name", "Count", "Days", "Per month"
    );
    for stats in senders.iter().take(TOP_SENDERS) {
        println!(
            "{:<40} {:<28} {:>6} {:>6} {:>9.1}",
            stats.address,
            stats.display_name.chars().take(28).collect::<String>(),
            stats.total_count,
            stats.span_days,
            stats.monthly_rate
        );
    }

    println!();
    println!(
        "{} senders, {} records ({} restored from cache, {} new)",
        senders.len(),
        report.emails.len(),
        report.restored,
        report.added
    );
    println!(
        "attempted {}, succeeded {}, failed {}, outside window {}, {:.0} records/min",
        report.tally.attempted,
        report.tally.succeeded,
        report.tally.failed,
        report.filtered,
        report.records_per_minute()
    );
    if report.cancelled {
        println!("Cancelled: rerun the same command to resume.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_parse_archive_command() {
        let parsed = args(&["archive", "mail.mbox", "2025/01/01", "2025/06/30", "--max", "500"]).unwrap();
        assert_eq!(parsed.max, Some(500));
        assert!(!parsed.clear_cache);
        match parsed.command {
            Command::Archive { path, window } => {
                assert_eq!(path, PathBuf::from("mail.mbox"));
                assert_eq!(window, FetchWindow::parse("2025-01-01", "2025-06-30").unwrap());
            }
            _ => panic!("expected archive command"),
        }
    }

    #[test]
    fn test_parse_flags_anywhere() {
        let parsed = args(&["--clear-cache", "api", "2025/01/01", "2025/01/31"]).unwrap();
        assert!(parsed.clear_cache);
        assert!(matches!(parsed.command, Command::Api { .. }));
    }

    #[test]
    fn test_parse_protocol_command() {
        let parsed = args(&["protocol", "me@example.com", "2025/06/01", "2025/06/30"]).unwrap();
        match parsed.command {
            Command::Protocol { user, window } => {
                assert_eq!(user, "me@example.com");
                assert_eq!(window, FetchWindow::parse("2025-06-01", "2025-06-30").unwrap());
            }
            _ => panic!("expected protocol command"),
        }
        assert!(args(&["protocol", "2025/06/01", "2025/06/30"]).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(args(&[]).is_err());
        assert!(args(&["api", "2025/02/01", "2025/01/01"]).is_err());
        assert!(args(&["archive", "x.mbox", "2025/01/01", "2025/01/31", "--max"]).is_err());
    }
}
