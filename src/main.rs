pub mod models {
    pub mod touchline;
}

pub mod client;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod diagnose;
pub mod zones;

use crate::config::Config;
use crate::coordinator::Coordinator;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::mpsc;

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    diagnose: bool,
}

fn set_env_file(cli: &mut CliArgs, path: &str) -> Result<(), String> {
    if cli.env_file.is_some() {
        return Err("`--env-file` provided more than once".to_string());
    }
    if path.is_empty() {
        return Err("`--env-file` requires a path argument".to_string());
    }
    cli.env_file = Some(PathBuf::from(path));
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = std::ffi::OsString>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut cli = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                let value = value
                    .to_str()
                    .ok_or_else(|| "argument contains invalid UTF-8".to_string())?
                    .to_string();
                set_env_file(&mut cli, &value)?;
            }
            Some(s) if s.starts_with("--env-file=") => set_env_file(&mut cli, &s["--env-file=".len()..])?,
            Some("--diagnose") => cli.diagnose = true,
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }
    Ok(cli)
}

/// Load the explicit env file, or `./.env` if one exists.
fn load_env(cli: &CliArgs) -> Result<Option<(PathBuf, bool)>, String> {
    if let Some(path) = cli.env_file.as_ref() {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        config::load_env_file(path)?;
        return Ok(Some((path.clone(), true)));
    }
    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        config::load_env_file(&default_path)?;
        Ok(Some((default_path, false)))
    } else {
        Ok(None)
    }
}

pub fn run(diagnose_only: bool) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env().map_err(|e| e.to_string())?;
    info!(
        "Config loaded (host={}, port={}, max_zones={}, update_interval={}s, timeout={}s)",
        cfg.host,
        cfg.port,
        cfg.max_zones,
        cfg.update_interval.as_secs(),
        cfg.request_timeout.as_secs()
    );

    // 2) Attach to the controller
    let client = client::attach(&cfg);

    if diagnose_only {
        let answered = diagnose::run(&client);
        client.shutdown();
        if !answered? {
            return Err("controller rejected the diagnostic read request".to_string());
        }
        return Ok(());
    }

    // 3) Connectivity check; unreachable is fatal, a rejected request is not
    match client.test_connection() {
        Ok(true) => info!("Connected to Roth Touchline at {}:{}", cfg.host, cfg.port),
        Ok(false) => warn!("Roth Touchline at {}:{} rejected the connection test; continuing", cfg.host, cfg.port),
        Err(e) => {
            client.shutdown();
            return Err(format!("Unable to connect to Roth Touchline at {}:{}: {}", cfg.host, cfg.port, e));
        }
    }

    // 4) Initial refresh, then the periodic worker
    let coordinator = Coordinator::new(client, cfg.update_interval);
    coordinator.on_snapshot_updated(|snapshot| {
        for zone in snapshot.zones.values() {
            info!(
                "Zone {} ({}): current={:?} target={:?}",
                zone.id, zone.name, zone.current_temperature, zone.target_temperature
            );
        }
    });
    coordinator.on_update_failed(|e| warn!("Zone data unavailable until the next successful refresh: {}", e));

    if let Err(e) = coordinator.first_refresh() {
        coordinator.shutdown();
        return Err(format!("initial refresh failed: {}", e));
    }

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| format!("failed to install signal handler: {}", e))?;

    coordinator.start();
    info!("Polling every {}s; press Ctrl-C to stop", cfg.update_interval.as_secs());

    // 5) Wait for a termination signal
    let _ = stop_rx.recv();
    info!("Shutdown requested");
    coordinator.shutdown();
    Ok(())
}

/// Exit status for every fatal startup error, bad arguments included.
const EXIT_FATAL: i32 = 1;

fn main() {
    let cli = match parse_args(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            eprintln!("usage: touchline-poller [--env-file PATH] [--diagnose]");
            std::process::exit(EXIT_FATAL);
        }
    };
    let loaded_env = match load_env(&cli) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(EXIT_FATAL);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some((path, explicit)) = loaded_env.as_ref() {
        let origin = if *explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, path.display());
    }

    info!(
        "touchline-poller {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.diagnose) {
        error!("fatal: {}", e);
        std::process::exit(EXIT_FATAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn parses_flags() {
        assert_eq!(parse_args(args(&[])).unwrap(), CliArgs::default());
        let cli = parse_args(args(&["--env-file", "prod.env", "--diagnose"])).unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
        assert!(cli.diagnose);
        let cli = parse_args(args(&["--env-file=x.env", "--", "--ignored"])).unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("x.env")));
        assert!(!cli.diagnose);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(args(&["--verbose"])).is_err());
        assert!(parse_args(args(&["--env-file"])).is_err());
        assert!(parse_args(args(&["--env-file="])).is_err());
        assert!(parse_args(args(&["--env-file=a", "--env-file=b"])).is_err());
    }
}
