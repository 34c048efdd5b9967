//! Sign in to a relay server and print broadcasts.
//!
//! ```sh
//! cargo run -p hpx-relay --example sign_in -- ws://localhost:8080/relay bob
//! ```

use std::time::Duration;

use hpx_relay::{ConnectionState, Envelope, WsClient, WsConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:8080/relay".to_string());
    let user = args.next().unwrap_or_else(|| "guest".to_string());

    let config = WsConfig::new(url)
        .keepalive_interval(Duration::from_secs(15))
        .reconnect_max_attempts(None);
    let client = WsClient::connect(config).await?;

    client
        .subscribe("Broadcast", |envelope| {
            info!(
                from = envelope.get_str("user").unwrap_or("?"),
                text = envelope.get_str("text").unwrap_or_default(),
                "broadcast"
            );
        })
        .detach();

    client
        .wait_for_state(ConnectionState::Open, Duration::from_secs(10))
        .await?;

    match client
        .send_request(Envelope::new("SignIn").with("user", user), "SignInAck", None)
        .await
    {
        Ok(ack) => info!(ack = %ack.to_text(), "signed in"),
        Err(e) => {
            error!(error = %e, "sign-in failed");
            return Err(e.into());
        }
    }

    tokio::signal::ctrl_c().await?;
    client.close().await?;
    Ok(())
}
