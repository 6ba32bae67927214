use nulrpc_client::{Client, Request};
use tracing::debug;

use crate::cmd::{parse_addr, parse_duration, runtime, RequestArgs};
use crate::exit::{client_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let (host, port) = parse_addr(&args.addr)?;
    let mut options = args.client.options()?;
    if let Some(timeout) = &args.timeout {
        options.request_timeout = parse_duration(timeout)?;
    }
    let request = build_request(&args);

    runtime()?.block_on(async move {
        let client = Client::new();
        client
            .start(host, port, options)
            .await
            .map_err(|err| client_error("connect failed", err))?;

        debug!(id = %request.id, endpoint = %request.endpoint, "sending request");
        let result = client.send_request(&request, None).await;
        client.close();

        let reply = result.map_err(|err| client_error("request failed", err))?;
        print_message(&reply, format);
        Ok(if reply.is_okay() { SUCCESS } else { FAILURE })
    })
}

fn build_request(args: &RequestArgs) -> Request {
    let mut request = Request::new(args.endpoint.as_str());
    if let Some(id) = &args.id {
        request = request.with_id(id.as_str());
    }
    if let Some(raw) = &args.args {
        request = request.with_args(raw.as_str());
    }
    request
}
