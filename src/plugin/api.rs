use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::runtime::Handle;
use tracing::debug;

use crate::bus::{AppEvent, CommandRegistry, EventBus};
use crate::error::ResourceError;
use crate::injection::InjectionRegistry;
use crate::k8s::ClusterClient;
use crate::model::{BuiltinKind, ResourceRow};
use crate::registry::ResourceRegistry;

/// Host object shared by every plugin and by the root controller.
pub struct PluginApi {
    registry: Arc<ResourceRegistry>,
    client: RwLock<Arc<dyn ClusterClient>>,
    runtime: Handle,
    namespace: RwLock<String>,
    status: Mutex<Option<String>>,
    config: RwLock<HashMap<String, Value>>,
    commands: CommandRegistry,
    events: EventBus,
    injections: InjectionRegistry,
}

impl PluginApi {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        client: Arc<dyn ClusterClient>,
        runtime: Handle,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            client: RwLock::new(client),
            runtime,
            namespace: RwLock::new(namespace.into()),
            status: Mutex::new(None),
            config: RwLock::new(HashMap::new()),
            commands: CommandRegistry::default(),
            events: EventBus::default(),
            injections: InjectionRegistry::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn client(&self) -> Arc<dyn ClusterClient> {
        Arc::clone(&self.client.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swaps the cluster connection after a context switch.
    pub fn set_client(&self, client: Arc<dyn ClusterClient>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    pub fn namespace(&self) -> String {
        self.namespace
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Updates the namespace and notifies `namespace-changed` subscribers when it
    /// actually changed. Returns the handler errors.
    pub fn set_namespace(&self, namespace: &str) -> Vec<String> {
        let previous = {
            let mut current = self.namespace.write().unwrap_or_else(PoisonError::into_inner);
            if *current == namespace {
                return Vec::new();
            }
            std::mem::replace(&mut *current, namespace.to_string())
        };

        self.events.trigger(
            AppEvent::NamespaceChanged,
            &json!({ "namespace": namespace, "previous": previous }),
        )
    }

    pub fn set_status(&self, message: impl Into<String>) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    pub fn take_status(&self) -> Option<String> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn config(&self, key: &str) -> Option<Value> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_config(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        debug!(key = %key, value = %value, "plugin config updated");
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn injections(&self) -> &InjectionRegistry {
        &self.injections
    }

    pub fn list_builtin(
        &self,
        kind: BuiltinKind,
        namespace: &str,
    ) -> Result<Vec<ResourceRow>, ResourceError> {
        let client = self.client();
        self.block_on(self.registry.list_builtin(client.as_ref(), kind, namespace))
    }

    pub fn delete_builtin(
        &self,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        let client = self.client();
        self.block_on(
            self.registry
                .delete_builtin(client.as_ref(), kind, namespace, name),
        )
    }

    pub fn describe_builtin(
        &self,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, ResourceError> {
        let client = self.client();
        self.block_on(
            self.registry
                .describe_builtin(client.as_ref(), kind, namespace, name),
        )
    }

    pub fn list_endpoints(&self, namespace: &str) -> Result<Vec<ResourceRow>, ResourceError> {
        let client = self.client();
        let namespace = Some(namespace.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        self.block_on(client.list_endpoints(namespace))
    }

    /// Plugin code is synchronous; cluster calls made from it park the calling thread.
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| self.runtime.block_on(future))
    }
}
