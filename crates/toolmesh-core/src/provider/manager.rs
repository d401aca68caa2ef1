//! Aggregates every configured provider behind one flat tool namespace.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ProvidersConfig;
use crate::provider::ProviderConnection;
use toolmesh_tools::{ResultContent, ToolDescriptor, ToolError};

struct Route {
    original_name: String,
    connection: Arc<ProviderConnection>,
}

/// Owns the provider connections and the name-routing tables.
///
/// Built once during startup by `ready()` and read-mostly afterwards. Exposed
/// names are not deduplicated: when two providers announce tools that
/// normalize to the same exposed name, the later registration shadows the
/// earlier one in the routing table, while `get_tools()` still lists both
/// descriptors.
pub struct ToolManager {
    connections: RwLock<Vec<Arc<ProviderConnection>>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    routes: RwLock<HashMap<String, Route>>,
    is_ready: AtomicBool,
}

impl ToolManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            tools: RwLock::new(Vec::new()),
            routes: RwLock::new(HashMap::new()),
            is_ready: AtomicBool::new(false),
        }
    }

    /// Connect every configured provider and aggregate its tools.
    ///
    /// A provider that fails to connect or list tools is logged and skipped;
    /// its tools are simply absent. Returns the names of the providers that
    /// made it in. The manager is ready when at least one did.
    pub async fn ready(&self, config: &ProvidersConfig) -> Vec<String> {
        self.is_ready.store(false, Ordering::SeqCst);
        let mut ready_providers = Vec::new();

        for endpoint in &config.endpoints {
            let connection = match ProviderConnection::connect(endpoint).await {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "skipping provider: connect failed");
                    continue;
                }
            };

            let discovered = match connection.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "skipping provider: tool listing failed");
                    connection.close().await;
                    continue;
                }
            };

            let provider_name = connection.provider_name().to_string();
            let allowlist = config.allowlists.get(&provider_name);

            let mut routes = self.routes.write().await;
            let mut tools = self.tools.write().await;
            let mut kept = 0usize;
            for descriptor in discovered {
                if let Some(allowed) = allowlist {
                    if !allowed.iter().any(|name| name == &descriptor.original_name) {
                        continue;
                    }
                }
                routes.insert(
                    descriptor.name.clone(),
                    Route {
                        original_name: descriptor.original_name.clone(),
                        connection: Arc::clone(&connection),
                    },
                );
                tools.push(descriptor);
                kept += 1;
            }
            drop((routes, tools));

            self.connections.write().await.push(connection);
            info!(provider = %provider_name, tools = kept, "provider ready");
            ready_providers.push(provider_name);
        }

        if !ready_providers.is_empty() {
            self.is_ready.store(true, Ordering::SeqCst);
        }
        ready_providers
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    pub async fn get_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone()
    }

    pub async fn get_toolnames(&self) -> Vec<String> {
        self.routes.read().await.keys().cloned().collect()
    }

    /// Route a call by exposed name to the owning connection, translating
    /// back to the provider-native name.
    pub async fn call_tool(
        &self,
        exposed_name: &str,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<ResultContent>, ToolError> {
        let (original_name, connection) = {
            let routes = self.routes.read().await;
            let route = routes
                .get(exposed_name)
                .ok_or_else(|| ToolError::UnknownTool(exposed_name.to_string()))?;
            (route.original_name.clone(), Arc::clone(&route.connection))
        };
        connection.call_tool(&original_name, args).await
    }

    /// Close every connection, continuing past individual failures so no
    /// subprocess outlives the manager.
    pub async fn close(&self) {
        self.routes.write().await.clear();
        let connections: Vec<_> = self.connections.write().await.drain(..).collect();
        for connection in connections {
            connection.close().await;
        }
        self.is_ready.store(false, Ordering::SeqCst);
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}
