use crate::{
    config::ServerConfig,
    connection::{ConnectionId, ConnectionIdGenerator},
    gateway::{ServerState, SharedState},
};
use anyhow::Context;
use clap::Parser;
use futures::prelude::*;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warp::{
    ws::{Message, WebSocket},
    Filter,
};

mod config;
mod connection;
mod gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    // Setup the global logger.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let state: SharedState = Arc::new(Mutex::new(ServerState::new(&config)));
    let id_generator = Arc::new(ConnectionIdGenerator::new());

    let state_filter = {
        let state = state.clone();
        warp::any().map(move || state.clone())
    };

    let client = warp::path("client")
        .and(warp::ws())
        .and(state_filter)
        .map(move |ws: warp::ws::Ws, state: SharedState| {
            let id = id_generator.next();
            ws.on_upgrade(move |socket| handle_socket(socket, state, id))
        });

    // The client bundle is served as plain static files next to the
    // websocket endpoint.
    let static_files = warp::fs::dir(config.static_dir.clone());
    let routes = client.or(static_files);

    info!(host = %config.host, port = config.port, "starting server");
    warp::serve(routes).run((config.host, config.port)).await;
    Ok(())
}

/// Per-connection message pump: a writer task drains the outbound channel
/// into the socket while this task feeds inbound frames to the gateway.
async fn handle_socket(socket: WebSocket, state: SharedState, id: ConnectionId) {
    info!(%id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    gateway::lock_state(&state).connections.register(id, tx);

    while let Some(message) = stream.next().await {
        match message {
            Ok(message) => {
                if message.is_close() {
                    break;
                }

                if let Ok(text) = message.to_str() {
                    gateway::handle_frame(&state, id, text);
                }
            }

            Err(err) => {
                error!(%id, %err, "socket error, dropping connection");
                break;
            }
        }
    }

    // The seat (if any) stays reserved in the store so the player can
    // rejoin; only the live connection goes away.
    info!(%id, "client disconnected");
    gateway::lock_state(&state).connections.unregister(id);
}
