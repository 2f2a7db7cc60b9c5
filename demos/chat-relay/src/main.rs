//! A chat server with a built-in observer.
//!
//! Starts a server with a few fixed accounts, then connects a `relay`
//! client of its own that sits in the `general` room and logs every line
//! it sees. Point any WebSocket client at `ws://<bind_addr>/ws?otp=...`
//! to join in.
//!
//! Set `CHATWIRE_CONFIG` to a TOML file to override the defaults and
//! `RUST_LOG` to change verbosity.

use std::env;

use chatwire::prelude::*;
use tracing_subscriber::EnvFilter;

const ACCOUNTS: &[(&str, &str)] = &[
    ("alice", "wonderland"),
    ("bob", "builder"),
    ("relay", "relay"),
];

fn load_config() -> Result<ServerConfig, ChatError> {
    match env::var("CHATWIRE_CONFIG") {
        Ok(path) => Ok(ServerConfig::load(path)?),
        Err(_) => Ok(ServerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let auth = ACCOUNTS
        .iter()
        .fold(StaticAuthenticator::new(), |auth, (user, pass)| {
            auth.with_user(*user, *pass)
        });

    let server = ChatServerBuilder::new().config(config).build(auth).await?;
    let addr = server.local_addr()?;
    let login = server.login();
    tracing::info!(%addr, "chat relay listening");

    let mut serving = tokio::spawn(server.run());

    let observer = ChatClient::connect(
        &ClientConfig::new(format!("ws://{addr}/ws")),
        &login,
        &Credentials::new("relay", "relay"),
        LogSink,
    )
    .await?;
    observer.change_room("general").await?;

    tokio::select! {
        ended = &mut serving => {
            match ended {
                Ok(result) => result?,
                Err(e) => tracing::error!(error = %e, "server task failed"),
            }
        }
        cause = observer.closed() => {
            tracing::warn!(%cause, "observer disconnected");
            serving.await??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            observer.close().await;
        }
    }
    Ok(())
}
