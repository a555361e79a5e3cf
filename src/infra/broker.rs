//! Embedded MQTT broker using rumqttd
//!
//! A single bus gateway carries its own broker so driver devices on the
//! vehicle LAN need no external infrastructure.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use tracing::{info, warn};

/// Spawn the broker on its own thread. Clients reconnect on their own,
/// so there is no need to wait for the listener to come up.
pub fn start_embedded_broker(app_config: &AppConfig) {
    let addr_str = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen_addr: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            return;
        }
    };

    let config = broker_config(listen_addr);
    thread::spawn(move || {
        // start() blocks for the broker lifetime
        let mut broker = Broker::new(config);
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    info!(addr = %addr_str, "broker_started");
}

fn broker_config(listen_addr: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 10485760,
        max_segment_count: 10,
        max_connections: 128,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let v4 = ServerSettings {
        name: "v4".to_string(),
        listen: listen_addr,
        tls: None,
        next_connection_delay_ms: 1,
        connections: ConnectionSettings {
            connection_timeout_ms: 5000,
            max_payload_size: 65536,
            max_inflight_count: 100,
            auth: None,
            dynamic_filters: false,
            external_auth: None,
        },
    };

    Config {
        id: 0,
        router,
        v4: Some(HashMap::from([("v4".to_string(), v4)])),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}
