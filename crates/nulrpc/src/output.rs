use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nulrpc_client::{DecodedMessage, MessageKind, Status};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    #[serde(flatten)]
    message: &'a DecodedMessage,
    received_at: String,
}

#[derive(Serialize)]
struct ListeningOutput {
    listening: String,
}

pub fn print_message(message: &DecodedMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                message,
                received_at: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "TYPE", "STATUS", "VALUE"])
                .add_row(vec![
                    message.id.clone(),
                    kind_name(message.kind).to_string(),
                    status_name(message.status).to_string(),
                    body(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} type={} status={} {}={}",
                message.id,
                kind_name(message.kind),
                status_name(message.status),
                if message.error.is_some() { "error" } else { "value" },
                body(message)
            );
        }
        OutputFormat::Raw => {
            let mut line = body(message).into_bytes();
            line.push(b'\n');
            print_raw(&line);
        }
    }
}

/// Announce the bound address of `serve`; raw prints the bare address.
pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ListeningOutput {
                listening: addr.to_string(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Raw => println!("{addr}"),
        OutputFormat::Table | OutputFormat::Pretty => println!("listening on {addr}"),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn kind_name(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Response => "response",
        MessageKind::Event => "event",
    }
}

fn status_name(status: Status) -> &'static str {
    match status {
        Status::Okay => "okay",
        Status::Error => "error",
    }
}

/// The error text for failures, otherwise the value as JSON.
fn body(message: &DecodedMessage) -> String {
    if let Some(error) = &message.error {
        return error.clone();
    }
    match &message.value {
        Some(value) => value.to_string(),
        None => "null".to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn body_prefers_error_text() {
        let failed = DecodedMessage::error_response("x", "boom");
        assert_eq!(body(&failed), "boom");

        let ok = DecodedMessage::response("y", json!({"a": 1}));
        assert_eq!(body(&ok), r#"{"a":1}"#);
    }

    #[test]
    fn json_output_flattens_message() {
        let message = DecodedMessage::event("tick", json!(3));
        let out = MessageOutput {
            message: &message,
            received_at: "0".into(),
        };
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["_type"], "event");
        assert_eq!(value["id"], "tick");
        assert_eq!(value["value"], 3);
        assert_eq!(value["received_at"], "0");
    }
}
