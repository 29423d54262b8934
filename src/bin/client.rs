//! jsonframe-client: sends one request and prints the server's result.
//!
//! Usage: `jsonframe-client <host> <port> <action> <value>`

use clap::Parser;
use jsonframe::config::ClientArgs;
use jsonframe::runtime::{client, Limits};
use jsonframe::{Message, Payload};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let addr = args.socket_addr()?;
    let request = Message::json(json!({ "action": args.action, "value": args.value }));
    info!(peer = %addr, "Sending request");

    let response = client::exchange(addr, request, Limits::default())?;
    info!(
        content_type = %response.header.content_type,
        content_length = response.header.content_length,
        "Response received"
    );

    match &response.payload {
        Payload::Json(value) => match value.get("result").and_then(|r| r.as_str()) {
            Some(result) => println!("{result}"),
            None => println!("{value}"),
        },
        Payload::Binary(bytes) => println!("{bytes:?}"),
    }
    Ok(())
}
