//! Runtime configuration.

use std::time::Duration;

use tether_core::ManagerConfig;

/// Participant runtime configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Rendezvous service address (e.g., "127.0.0.1:7400").
    pub rendezvous_address: String,
    /// Address to accept direct channels on.
    pub listen_address: String,
    /// Port advertised to the rendezvous service. Defaults to the bound port.
    pub advertise_port: Option<u16>,
    /// How often deadlines are evaluated.
    pub tick_interval: Duration,
    /// Lifecycle timeouts.
    pub manager: ManagerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rendezvous_address: "127.0.0.1:7400".to_string(),
            listen_address: "0.0.0.0:0".to_string(),
            advertise_port: None,
            tick_interval: Duration::from_millis(50),
            manager: ManagerConfig::default(),
        }
    }
}

/// Rendezvous service configuration.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Address to bind to.
    pub bind_address: String,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:7400".to_string() }
    }
}
