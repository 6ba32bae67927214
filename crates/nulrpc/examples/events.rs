//! Print pushed events, reconnecting forever if the peer goes away.
//!
//! Start a peer that pushes events:
//!   cargo run --features cli -- serve 127.0.0.1:5201 --events 1s
//!
//! Then:
//!   cargo run --example events -- 127.0.0.1 5201

use std::sync::Arc;

use nulrpc::client::ConnectionEvent;
use nulrpc::{Client, ClientOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(5201);

    let client = Client::new();
    client.on_connection_event(Arc::new(|event: &ConnectionEvent| {
        eprintln!("connection: {event:?}");
    }));

    let options = ClientOptions {
        reconnect: true,
        reconnect_max_retries: -1,
        heartbeat_check: true,
        ..ClientOptions::default()
    };
    let mut events = client.event_stream();
    client.start(host, port, options).await?;

    while let Some(event) = events.recv().await {
        println!("{} {:?}", event.id, event.value);
    }
    Ok(())
}
