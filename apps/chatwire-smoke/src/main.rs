use std::env;

use tracing::info;
use url::Url;

use chatwire_core::ChannelEvent;
use chatwire_platform::EnvCredentials;
use chatwire_transport::{ManagerConfig, spawn_manager};

mod logging;

#[tokio::main]
async fn main() {
    logging::init();

    let endpoint = env::var("CHATWIRE_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8000".to_owned());
    let conversation =
        env::var("CHATWIRE_CONVERSATION").unwrap_or_else(|_| "smoke-conversation".to_owned());

    let endpoint = match Url::parse(&endpoint) {
        Ok(url) => url,
        Err(err) => {
            eprintln!("Invalid CHATWIRE_WS_URL '{endpoint}': {err}");
            std::process::exit(1);
        }
    };

    println!("Connecting to {endpoint} (conversation: {conversation}).");
    println!("Required for live auth: CHATWIRE_TOKEN and CHATWIRE_USER_ID");

    let handle = spawn_manager(ManagerConfig::new(endpoint), EnvCredentials::default());
    let mut events = handle.subscribe();

    if let Err(err) = handle.activate(conversation).await {
        eprintln!("Failed to activate channel: {err}");
        std::process::exit(1);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = handle.deactivate().await;
                break;
            }
            event = events.recv() => match event {
                Ok(ChannelEvent::StateChanged { state }) => println!("state: {state:?}"),
                Ok(ChannelEvent::Message(message)) => println!(
                    "message {}: {}",
                    message.id.as_deref().unwrap_or("<no id>"),
                    message.content.as_deref().unwrap_or("<no content>"),
                ),
                Ok(ChannelEvent::Typing(payload)) => println!("typing: {payload}"),
                Ok(ChannelEvent::ReadReceipt(payload)) => println!("read receipt: {payload}"),
                Ok(ChannelEvent::Error(err)) => println!("error: {err}"),
                Err(err) => {
                    eprintln!("Event stream ended: {err}");
                    break;
                }
            },
        }
    }
}
