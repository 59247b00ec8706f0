//! Backend liveness probing: a one-shot check, or continuous
//! monitoring that prints reachability transitions as JSON lines.

use std::time::Duration;

use parkwatch_api::probe::{self, ProbeConfig, Reachability, ReachabilityMonitor};

use crate::cli::{GlobalOpts, HealthArgs};
use crate::config;
use crate::error::CliError;

pub async fn handle(args: HealthArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config()?;
    let mut probe_config = config::resolve_probe(&cfg, global)?;
    probe_config.timeout = Duration::from_secs(args.timeout);
    if let Some(secs) = args.interval {
        probe_config.interval = Duration::from_secs(secs);
    }

    if args.monitor {
        return monitor(probe_config, args.duration).await;
    }

    let client = reqwest::Client::builder()
        .timeout(probe_config.timeout)
        .build()
        .map_err(|e| CliError::HttpClient {
            source: Box::new(e),
        })?;

    if probe::check_once(&client, &probe_config.health_url).await {
        println!("online");
        Ok(())
    } else {
        Err(CliError::Unreachable {
            url: probe_config.health_url.to_string(),
        })
    }
}

/// Run a [`ReachabilityMonitor`] and print each transition until
/// interrupted or until `--duration` elapses. The exit code reflects
/// the final belief.
async fn monitor(probe_config: ProbeConfig, duration: Option<u64>) -> Result<(), CliError> {
    let url = probe_config.health_url.clone();
    let monitor = ReachabilityMonitor::spawn(probe_config).map_err(|e| CliError::HttpClient {
        source: Box::new(e),
    })?;
    let mut rx = monitor.subscribe();
    // Report the seeded belief as the first line.
    rx.mark_changed();

    let deadline = async move {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                eprintln!("interrupted");
                break;
            }
            () = &mut deadline => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", serde_json::to_string(&*rx.borrow_and_update())?);
            }
        }
    }

    let last = monitor.current();
    monitor.shutdown();
    if last == Reachability::Offline {
        return Err(CliError::Unreachable {
            url: url.to_string(),
        });
    }
    Ok(())
}
