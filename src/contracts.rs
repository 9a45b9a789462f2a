//! Typed stubs for a few well-known contracts.
//!
//! Each stub wraps the [`Proxy`] for its identifier and exposes one async
//! method per remote `$`-method, converting arguments and results through
//! serde.

use lsp_types::Url;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::codec::Value;
use crate::error::{Result, RpcError};
use crate::identifiers::{MainRpcContext, PluginRpcContext};
use crate::protocol::SerializedError;
use crate::proxy::Proxy;
use crate::rpc::RpcProtocol;

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(Value::from_json(serde_json::to_value(value)?))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value.to_json())?)
}

/// Plugin description handed to the plugin host at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    pub publisher: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginsInitParams {
    pub plugins: Vec<PluginMetadata>,
}

/// Plugin host manager, called from the main side.
#[derive(Clone, Debug)]
pub struct HostedPluginManagerExt {
    proxy: Proxy,
}

impl HostedPluginManagerExt {
    pub fn new(protocol: &RpcProtocol) -> Self {
        Self {
            proxy: protocol.get_proxy(&MainRpcContext::HOSTED_PLUGIN_MANAGER_EXT),
        }
    }

    /// `$init`: start the given plugins.
    pub async fn init(&self, plugins: Vec<PluginMetadata>) -> Result<()> {
        let params = to_value(&PluginsInitParams { plugins })?;
        self.proxy.call("$init", vec![params]).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFolderPickOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_focus_out: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceFolder {
    pub uri: String,
    pub name: String,
    pub index: u32,
}

/// Workspace services of the main side.
#[derive(Clone, Debug)]
pub struct WorkspaceMain {
    proxy: Proxy,
}

impl WorkspaceMain {
    pub fn new(protocol: &RpcProtocol) -> Self {
        Self {
            proxy: protocol.get_proxy(&PluginRpcContext::WORKSPACE_MAIN),
        }
    }

    /// `$pickWorkspaceFolder`: `None` when the user dismissed the picker.
    pub async fn pick_workspace_folder(
        &self,
        options: &WorkspaceFolderPickOptions,
    ) -> Result<Option<WorkspaceFolder>> {
        let reply = self
            .proxy
            .call("$pickWorkspaceFolder", vec![to_value(options)?])
            .await?;
        decode(reply)
    }

    /// `$startFileSearch`: find files matching `include`.
    ///
    /// `exclude: None` disregards the default excludes. An already
    /// cancelled token yields no results without a round trip. A reply that
    /// is not an array reads as no results.
    pub async fn start_file_search(
        &self,
        include: &str,
        exclude: Option<&str>,
        max_results: Option<u32>,
        token: &CancellationToken,
    ) -> Result<Vec<Url>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }
        let args = vec![
            Value::from(include),
            exclude.map_or(Value::Bool(false), Value::from),
            max_results.map_or(Value::Undefined, Value::from),
        ];
        let reply = self
            .proxy
            .call_with_token("$startFileSearch", args, token)
            .await?;

        let Some(items) = reply.as_array() else {
            return Ok(Vec::new());
        };
        items.to_vec().iter().map(revive_url).collect()
    }
}

fn revive_url(value: &Value) -> Result<Url> {
    let text = match value {
        Value::Uri(url) => return Ok(url.clone()),
        Value::ForeignUri(uri) => uri.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(RpcError::Decode(format!("expected a URI, got {}", other.kind()))),
    };
    Url::parse(&text).map_err(|e| RpcError::Decode(format!("invalid URI {text:?}: {e}")))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_select_many: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_on_description: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_on_detail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_focus_lost: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickOpenItem {
    pub handle: u32,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picked: Option<bool>,
}

/// What the user picked: one handle, or several with multi-select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuickPickSelection {
    Single(u32),
    Many(Vec<u32>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_focus_out: Option<bool>,
}

/// Quick-open widget of the main side.
#[derive(Clone, Debug)]
pub struct QuickOpenMain {
    proxy: Proxy,
}

impl QuickOpenMain {
    pub fn new(protocol: &RpcProtocol) -> Self {
        Self {
            proxy: protocol.get_proxy(&PluginRpcContext::QUICK_OPEN_MAIN),
        }
    }

    /// `$show`: open the picker and wait for a selection.
    pub async fn show(&self, options: &PickOptions) -> Result<Option<QuickPickSelection>> {
        let reply = self.proxy.call("$show", vec![to_value(options)?]).await?;
        decode(reply)
    }

    /// `$setItems`: fill an open picker.
    pub async fn set_items(&self, items: &[PickOpenItem]) -> Result<()> {
        self.proxy.call("$setItems", vec![to_value(items)?]).await?;
        Ok(())
    }

    /// `$setError`: report that the items could not be produced.
    pub async fn set_error(&self, error: &SerializedError) -> Result<()> {
        self.proxy.call("$setError", vec![to_value(error)?]).await?;
        Ok(())
    }

    /// `$input`: ask for a line of text. `None` when dismissed.
    pub async fn input(&self, options: &InputOptions, validate_input: bool) -> Result<Option<String>> {
        let reply = self
            .proxy
            .call("$input", vec![to_value(options)?, Value::from(validate_input)])
            .await?;
        decode(reply)
    }
}
