//! Send one request and print the reply.
//!
//! Start a peer first:
//!   cargo run --features cli -- serve 127.0.0.1:5201
//!
//! Then:
//!   cargo run --example ping -- 127.0.0.1 5201

use nulrpc::client::Request;
use nulrpc::{Client, ClientOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.next().map(|p| p.parse::<u16>()).transpose()?.unwrap_or(5201);

    let client = Client::new();
    client.start(host, port, ClientOptions::default()).await?;

    let reply = client.send_request(&Request::new("ping"), None).await?;
    println!("{} -> {:?}", reply.id, reply.value);

    let reply = client
        .send_request(&Request::new("sum").with_args("[1,2,3]"), None)
        .await?;
    println!("{} -> {:?}", reply.id, reply.value);

    client.close();
    Ok(())
}
