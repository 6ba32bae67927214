use std::sync::Arc;

use nulrpc_client::{Client, ConnectionEvent};
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::{parse_addr, runtime, WatchArgs};
use crate::exit::{client_error, CliError, CliResult, FAILURE, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_message, OutputFormat};

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let (host, port) = parse_addr(&args.addr)?;
    let options = args.client.options()?;
    let reconnect = options.reconnect;

    runtime()?.block_on(async move {
        let client = Client::new();
        let (lifecycle_tx, mut lifecycle) = mpsc::unbounded_channel();
        client.on_connection_event(Arc::new(move |event: &ConnectionEvent| {
            let _ = lifecycle_tx.send(event.clone());
        }));

        let mut events = client.event_stream();
        client
            .start(host, port, options)
            .await
            .map_err(|err| client_error("connect failed", err))?;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut printed = 0usize;
        let outcome = loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break Ok(SUCCESS);
                    };
                    print_message(&event, format);
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        break Ok(SUCCESS);
                    }
                }
                Some(change) = lifecycle.recv() => match change {
                    ConnectionEvent::Closed { addr } if !reconnect => {
                        break Err(CliError::new(FAILURE, format!("connection to {addr} closed")));
                    }
                    ConnectionEvent::ReconnectExhausted { attempts } => {
                        break Err(CliError::new(
                            TRANSPORT_ERROR,
                            format!("gave up after {attempts} reconnect attempts"),
                        ));
                    }
                    _ => {}
                },
                _ = &mut shutdown => {
                    info!(printed, "interrupted");
                    break Ok(SUCCESS);
                }
            }
        };

        client.close();
        outcome
    })
}
