pub mod adapter;
pub mod decoder;
pub mod event_stream;
pub mod pty_socket;
pub mod types;

pub use adapter::TransportAdapter;
pub use event_stream::EventStreamConnector;
pub use pty_socket::PtySocketConnector;
pub use types::*;

use crate::auth::error::AuthResult;
use crate::config::BridgeConfig;
use std::sync::Arc;

/// Picks the connector named by the configuration.
pub fn build_connector(config: &BridgeConfig) -> AuthResult<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.transport {
        TransportKind::EventStream => Arc::new(EventStreamConnector::new(config.base_url())),
        TransportKind::PtySocket => Arc::new(PtySocketConnector::new(
            &config.pty_socket_url(None)?,
            &config.meta_prefix,
        )),
    };
    Ok(connector)
}
