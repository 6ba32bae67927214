use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nulrpc_frame::{DecodedMessage, FrameCodec, FrameError, Request, HEARTBEAT_MARKER};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::cmd::{parse_duration, runtime, ServeArgs};
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

type Peer = Framed<TcpStream, FrameCodec>;

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let heartbeat = parse_duration(&args.heartbeat)?;
    let events = args.events.as_deref().map(parse_duration).transpose()?;

    runtime()?.block_on(async move {
        let listener = TcpListener::bind(&args.addr)
            .await
            .map_err(|err| io_error(&format!("bind {} failed", args.addr), err))?;
        let local = listener
            .local_addr()
            .map_err(|err| io_error("bind failed", err))?;
        info!(addr = %local, heartbeat_ms = heartbeat.as_millis() as u64, "serving");
        print_listening(local, format);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|err| io_error("accept failed", err))?;
                    tokio::spawn(serve_peer(stream, peer, heartbeat, events));
                }
                _ = &mut shutdown => {
                    info!("interrupted");
                    return Ok(SUCCESS);
                }
            }
        }
    })
}

async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    heartbeat: Duration,
    events: Option<Duration>,
) {
    info!(peer = %addr, "peer connected");
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut heartbeats = ticker(heartbeat);
    let mut ticks = events.map(ticker);
    let mut beat = 0u64;
    let mut seq = 0u64;

    loop {
        let result = tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(frame)) if frame.starts_with(HEARTBEAT_MARKER) => {
                    trace!(peer = %addr, "heartbeat echoed back");
                    Ok(())
                }
                Some(Ok(frame)) => match answer(&frame) {
                    Some(reply) => send_json(&mut framed, &reply).await,
                    None => Ok(()),
                },
                Some(Err(err)) => Err(err),
                None => break,
            },
            _ = heartbeats.tick() => {
                beat += 1;
                framed.send(format!("hb-{beat}")).await
            }
            _ = next_tick(&mut ticks) => {
                seq += 1;
                send_json(&mut framed, &DecodedMessage::event("tick", json!({ "seq": seq }))).await
            }
        };
        if let Err(err) = result {
            warn!(peer = %addr, error = %err, "peer connection failed");
            break;
        }
    }
    info!(peer = %addr, "peer disconnected");
}

/// Reply for one request frame; `None` leaves the request unanswered.
///
/// `ping` answers `"pong"`, `silent` is never answered, and anything else
/// echoes the endpoint and parsed args.
fn answer(frame: &[u8]) -> Option<DecodedMessage> {
    let request: Request = match serde_json::from_slice(frame) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "unparseable request");
            return Some(DecodedMessage::error_response("", format!("bad request: {err}")));
        }
    };
    debug!(id = %request.id, endpoint = %request.endpoint, "request received");

    match request.endpoint.as_str() {
        "ping" => Some(DecodedMessage::response(request.id, json!("pong"))),
        "silent" => None,
        _ => {
            let value = json!({
                "endpoint": request.endpoint,
                "args": request.args_value(),
            });
            Some(DecodedMessage::response(request.id, value))
        }
    }
}

async fn send_json(framed: &mut Peer, message: &DecodedMessage) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(message)?;
    framed.send(payload).await
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
