//! Well-known actor identifiers.
//!
//! Both sides of a connection build the same identifiers from the same
//! strings, so `get_proxy` on one side addresses `set` on the other.
//! [`PluginRpcContext`] names actors implemented by the main side and
//! called from the plugin host; [`MainRpcContext`] the reverse.

use crate::proxy::{create_proxy_identifier, ProxyIdentifier};

/// Actors implemented on the main side.
pub struct PluginRpcContext;

impl PluginRpcContext {
    pub const COMMAND_REGISTRY_MAIN: ProxyIdentifier = create_proxy_identifier("CommandRegistryMain");
    pub const QUICK_OPEN_MAIN: ProxyIdentifier = create_proxy_identifier("QuickOpenMain");
    pub const MESSAGE_REGISTRY_MAIN: ProxyIdentifier = create_proxy_identifier("MessageRegistryMain");
    pub const STATUS_BAR_MESSAGE_REGISTRY_MAIN: ProxyIdentifier =
        create_proxy_identifier("StatusBarMessageRegistryMain");
    pub const WINDOW_STATE_MAIN: ProxyIdentifier = create_proxy_identifier("WindowStateMain");
    pub const WORKSPACE_MAIN: ProxyIdentifier = create_proxy_identifier("WorkspaceMain");
    pub const DOCUMENTS_MAIN: ProxyIdentifier = create_proxy_identifier("DocumentsMain");

    pub fn all() -> &'static [ProxyIdentifier] {
        static ALL: [ProxyIdentifier; 7] = [
            PluginRpcContext::COMMAND_REGISTRY_MAIN,
            PluginRpcContext::QUICK_OPEN_MAIN,
            PluginRpcContext::MESSAGE_REGISTRY_MAIN,
            PluginRpcContext::STATUS_BAR_MESSAGE_REGISTRY_MAIN,
            PluginRpcContext::WINDOW_STATE_MAIN,
            PluginRpcContext::WORKSPACE_MAIN,
            PluginRpcContext::DOCUMENTS_MAIN,
        ];
        &ALL
    }
}

/// Actors implemented on the plugin host side.
pub struct MainRpcContext;

impl MainRpcContext {
    pub const HOSTED_PLUGIN_MANAGER_EXT: ProxyIdentifier =
        create_proxy_identifier("HostedPluginManagerExt");
    pub const COMMAND_REGISTRY_EXT: ProxyIdentifier = create_proxy_identifier("CommandRegistryExt");
    pub const QUICK_OPEN_EXT: ProxyIdentifier = create_proxy_identifier("QuickOpenExt");
    pub const WINDOW_STATE_EXT: ProxyIdentifier = create_proxy_identifier("WindowStateExt");
    pub const WORKSPACE_EXT: ProxyIdentifier = create_proxy_identifier("WorkspaceExt");
    pub const DOCUMENTS_EXT: ProxyIdentifier = create_proxy_identifier("DocumentsExt");

    pub fn all() -> &'static [ProxyIdentifier] {
        static ALL: [ProxyIdentifier; 6] = [
            MainRpcContext::HOSTED_PLUGIN_MANAGER_EXT,
            MainRpcContext::COMMAND_REGISTRY_EXT,
            MainRpcContext::QUICK_OPEN_EXT,
            MainRpcContext::WINDOW_STATE_EXT,
            MainRpcContext::WORKSPACE_EXT,
            MainRpcContext::DOCUMENTS_EXT,
        ];
        &ALL
    }
}

/// Find a well-known identifier by its id.
pub fn lookup(id: &str) -> Option<&'static ProxyIdentifier> {
    PluginRpcContext::all()
        .iter()
        .chain(MainRpcContext::all())
        .find(|identifier| identifier.id() == id)
}
