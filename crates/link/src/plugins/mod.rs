//! Link plugins shipped with the connector

pub mod gw_pull;
pub mod test_backend;
pub mod ws_backend;

pub use gw_pull::GwPullPlugin;
pub use test_backend::TestBackendPlugin;
pub use ws_backend::WsBackendPlugin;

use crate::plugin::LinkPlugin;
use crate::transport::RecordingTransport;
use std::sync::Arc;

/// The shipped plugins, all bound to `transport`
pub fn default_plugins(transport: Arc<RecordingTransport>) -> Vec<Arc<dyn LinkPlugin>> {
    vec![
        Arc::new(WsBackendPlugin::new(transport.clone())),
        Arc::new(GwPullPlugin::new(transport.clone(), transport)),
        Arc::new(TestBackendPlugin::new()),
    ]
}
