//! Tail the detection event stream.
//!
//! Events go to stdout as JSON lines; connection state transitions go
//! to stderr, so the output can be piped into `jq` or a file.

use tokio::sync::broadcast::error::RecvError;

use parkwatch_api::StreamClient;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config()?;
    let stream_config = config::resolve_stream(&cfg, global, &args)?;
    let url = stream_config.url.clone();

    let mut client = StreamClient::new(stream_config);
    let mut events = client.events();
    let mut state = client.state();

    client
        .connect()
        .await
        .map_err(|e| CliError::ConnectionFailed {
            url: url.to_string(),
            source: Box::new(e),
        })?;
    eprintln!("connected to {url}");

    let mut printed: u64 = 0;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                eprintln!("interrupted");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                eprintln!("stream {current:?}");
            }
            // Terminal: the connection task gave up reconnecting.
            () = client.closed() => {
                return Err(CliError::ConnectionFailed {
                    url: url.to_string(),
                    source: "reconnect budget exhausted".into(),
                });
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(event.as_ref())?);
                    printed += 1;
                    if args.limit.is_some_and(|limit| printed >= limit) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "falling behind the stream, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect();
    Ok(())
}
