//! # Connector Link
//!
//! Hosting of link plugins.
//!
//! A link plugin knows how to reach one kind of link partner (a backend
//! system or the gateway). The [`LinkManager`] selects the plugin for every
//! link configuration, drives it through its lifecycle and dispatches
//! outbound messages to the active link partners.

mod active;
mod context;
mod manager;
mod plugin;
pub mod plugins;
pub mod transport;

pub use active::{ActiveLink, ActiveLinkPartner, PartnerState};
pub use context::LinkContext;
pub use manager::{LinkManager, PluginInfo};
pub use plugin::{
    ConfigClass, ConfigLevel, ConfigProperty, LinkPlugin, PullFromLinkPartner, SubmitReceipt,
    SubmitToConnector, SubmitToLinkPartner,
};
pub use plugins::default_plugins;
pub use transport::{PullTransport, PushTransport, PushedMessage, RecordingTransport};
