//! Server configuration from flags or environment variables.

use clap::Parser;
use parlor::engine::EngineConfig;
use std::net::IpAddr;

#[derive(Debug, Clone, Parser)]
#[command(name = "parlor-server", about = "Authoritative real-time mahjong server")]
pub struct ServerConfig {
    /// Address the websocket/HTTP listener binds to.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 3030)]
    pub port: u16,

    /// Include the flower and season tiles in the wall.
    #[arg(long, env = "INCLUDE_BONUS")]
    pub include_bonus: bool,

    #[arg(long, env = "MAX_PLAYERS_PER_GAME", default_value_t = 4)]
    pub max_players: usize,

    /// Claim window countdown shown to clients, in milliseconds.
    #[arg(long, env = "CLAIM_TIMEOUT_MS", default_value_t = 5000)]
    pub claim_timeout_ms: u64,

    /// Slack past the claim timeout before the server closes an unanswered
    /// claim window on the clients' behalf.
    #[arg(long, env = "CLAIM_GRACE_MS", default_value_t = 1000)]
    pub claim_grace_ms: u64,

    /// Directory holding the static client bundle.
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: String,
}

impl ServerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            include_bonus: self.include_bonus,
            max_players: self.max_players,
            claim_timeout_ms: self.claim_timeout_ms,
        }
    }
}
