// ============================
// crates/relay-lib/src/lib.rs
// ============================
//! Core server logic for the chat relay: a room-based publish/subscribe
//! fan-out over persistent WebSocket connections.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod rooms;
pub mod validation;
pub mod ws_router;

use std::sync::Arc;

use crate::auth::{AuthGate, JwtGate};
use crate::bridge::PersistenceBridge;
use crate::config::Settings;
use crate::relay::ChatRelay;

/// Application state shared across all handlers. Constructed once at
/// process start and passed by handle; there is no global server
/// instance.
#[derive(Clone)]
pub struct AppState {
    /// The relay orchestrator: registry, room directory, fan-out
    pub relay: Arc<ChatRelay>,
    /// Authentication gate consulted at connection admission
    pub gate: Arc<dyn AuthGate>,
    /// Settings manager
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create a new application state around a persistence bridge.
    pub fn new(bridge: Arc<dyn PersistenceBridge>, settings: Settings) -> Self {
        let gate: Arc<dyn AuthGate> = Arc::new(JwtGate::new(settings.auth.jwt_secret.clone()));
        let relay = Arc::new(ChatRelay::new(Arc::clone(&gate), bridge, &settings));

        Self {
            relay,
            gate,
            settings: Arc::new(settings),
        }
    }
}
