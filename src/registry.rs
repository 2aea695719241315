use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ResourceError;
use crate::k8s::ClusterClient;
use crate::model::{BuiltinKind, KindInfo, ResourceRow};

/// list/delete/describe for exactly one kind.
pub trait ResourceHandler: Send + Sync {
    fn info(&self) -> &KindInfo;

    fn list<'a>(
        &'a self,
        client: &'a dyn ClusterClient,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ResourceRow>, ResourceError>>;

    fn delete<'a>(
        &'a self,
        client: &'a dyn ClusterClient,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), ResourceError>>;

    fn describe<'a>(
        &'a self,
        client: &'a dyn ClusterClient,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<String, ResourceError>>;
}

/// Default handler: a thin adapter over the client's typed operations.
pub struct BuiltinHandler {
    kind: BuiltinKind,
    info: KindInfo,
}

impl BuiltinHandler {
    pub fn new(kind: BuiltinKind, refresh: Duration) -> Self {
        let mut info = kind.info();
        info.refresh = refresh;
        Self { kind, info }
    }

    /// Cluster-scoped kinds drop the namespace; an empty one means every namespace.
    fn scope(&self, namespace: &str) -> Option<String> {
        if !self.kind.namespaced() {
            return None;
        }
        let namespace = namespace.trim();
        (!namespace.is_empty()).then(|| namespace.to_string())
    }
}

impl ResourceHandler for BuiltinHandler {
    fn info(&self) -> &KindInfo {
        &self.info
    }

    fn list<'a>(
        &'a self,
        client: &'a dyn ClusterClient,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ResourceRow>, ResourceError>> {
        client.list(self.kind, self.scope(namespace))
    }

    fn delete<'a>(
        &'a self,
        client: &'a dyn ClusterClient,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), ResourceError>> {
        client.delete(self.kind, self.scope(namespace), name.to_string())
    }

    fn describe<'a>(
        &'a self,
        client: &'a dyn ClusterClient,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<String, ResourceError>> {
        client.describe(self.kind, self.scope(namespace), name.to_string())
    }
}

pub struct ResourceRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ResourceHandler>>>,
    builtins: HashMap<BuiltinKind, Arc<BuiltinHandler>>,
}

impl ResourceRegistry {
    pub fn new(refresh: Duration) -> Self {
        let builtins = BuiltinKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(BuiltinHandler::new(kind, refresh))))
            .collect::<HashMap<_, _>>();
        let handlers = builtins
            .iter()
            .map(|(kind, handler)| {
                (
                    kind.id().to_string(),
                    Arc::clone(handler) as Arc<dyn ResourceHandler>,
                )
            })
            .collect();

        Self {
            handlers: RwLock::new(handlers),
            builtins,
        }
    }

    /// Stores or replaces the handler for `kind`, returning the one it displaced.
    pub fn register(
        &self,
        kind: impl Into<String>,
        handler: Arc<dyn ResourceHandler>,
    ) -> Option<Arc<dyn ResourceHandler>> {
        let kind = kind.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.clone(), handler);
        if previous.is_some() {
            debug!(kind = %kind, "replaced resource handler");
        }
        previous
    }

    #[cfg(test)]
    pub fn supports(&self, kind: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    pub fn supported(&self) -> BTreeSet<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn handler(&self, kind: &str) -> Result<Arc<dyn ResourceHandler>, ResourceError> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownKind(kind.to_string()))
    }

    /// Descriptor for the UI. An overridden built-in keeps its column schema.
    pub fn kind_info(&self, kind: &str) -> Result<KindInfo, ResourceError> {
        let handler = self.handler(kind)?;
        let mut info = handler.info().clone();
        if let Some(builtin) = BuiltinKind::from_id(kind) {
            info.columns = builtin.info().columns;
            info.namespaced = builtin.namespaced();
        }
        Ok(info)
    }

    pub async fn list(
        &self,
        client: &dyn ClusterClient,
        kind: &str,
        namespace: &str,
    ) -> Result<Vec<ResourceRow>, ResourceError> {
        let handler = self.handler(kind)?;
        let width = self.kind_info(kind)?.columns.len();
        let mut rows = handler.list(client, namespace).await?;
        normalise_rows(kind, &mut rows, width);
        Ok(rows)
    }

    pub async fn delete(
        &self,
        client: &dyn ClusterClient,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        let handler = self.handler(kind)?;
        handler.delete(client, namespace, name).await
    }

    pub async fn describe(
        &self,
        client: &dyn ClusterClient,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<String, ResourceError> {
        let handler = self.handler(kind)?;
        handler.describe(client, namespace, name).await
    }

    pub async fn list_builtin(
        &self,
        client: &dyn ClusterClient,
        kind: BuiltinKind,
        namespace: &str,
    ) -> Result<Vec<ResourceRow>, ResourceError> {
        let handler = self.builtin(kind)?;
        let mut rows = handler.list(client, namespace).await?;
        normalise_rows(kind.id(), &mut rows, kind.columns().len());
        Ok(rows)
    }

    pub async fn delete_builtin(
        &self,
        client: &dyn ClusterClient,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ResourceError> {
        self.builtin(kind)?.delete(client, namespace, name).await
    }

    pub async fn describe_builtin(
        &self,
        client: &dyn ClusterClient,
        kind: BuiltinKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, ResourceError> {
        self.builtin(kind)?.describe(client, namespace, name).await
    }

    fn builtin(&self, kind: BuiltinKind) -> Result<Arc<BuiltinHandler>, ResourceError> {
        self.builtins
            .get(&kind)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownKind(kind.id().to_string()))
    }
}

fn normalise_rows(kind: &str, rows: &mut [ResourceRow], width: usize) {
    if width == 0 {
        return;
    }
    let mut reshaped = 0usize;
    for row in rows.iter_mut() {
        if row.columns.len() != width {
            row.fit_to(width);
            reshaped += 1;
        }
    }
    if reshaped > 0 {
        warn!(kind, reshaped, width, "rows did not match the column schema");
    }
}

#[cfg(test)]
mod tests {
    use super::{ResourceHandler, ResourceRegistry};
    use crate::error::ResourceError;
    use crate::k8s::ClusterClient;
    use crate::k8s::testing::{Call, FakeCluster};
    use crate::model::{BuiltinKind, ColumnDef, DisplayStyle, KindInfo, ResourceRow};
    use futures::future::BoxFuture;
    use std::sync::Arc;
    use std::time::Duration;

    struct StaticHandler {
        info: KindInfo,
        rows: Vec<ResourceRow>,
    }

    impl StaticHandler {
        fn new(kind: &str, columns: &[&str], rows: Vec<ResourceRow>) -> Self {
            Self {
                info: KindInfo {
                    id: kind.to_string(),
                    title: kind.to_string(),
                    icon: String::new(),
                    namespaced: true,
                    style: DisplayStyle::Table,
                    columns: columns.iter().map(|title| ColumnDef::new(*title, 0)).collect(),
                    refresh: Duration::from_secs(1),
                },
                rows,
            }
        }
    }

    impl ResourceHandler for StaticHandler {
        fn info(&self) -> &KindInfo {
            &self.info
        }

        fn list<'a>(
            &'a self,
            _client: &'a dyn ClusterClient,
            _namespace: &'a str,
        ) -> BoxFuture<'a, Result<Vec<ResourceRow>, ResourceError>> {
            Box::pin(async move { Ok(self.rows.clone()) })
        }

        fn delete<'a>(
            &'a self,
            _client: &'a dyn ClusterClient,
            _namespace: &'a str,
            _name: &'a str,
        ) -> BoxFuture<'a, Result<(), ResourceError>> {
            Box::pin(async { Ok(()) })
        }

        fn describe<'a>(
            &'a self,
            _client: &'a dyn ClusterClient,
            _namespace: &'a str,
            name: &'a str,
        ) -> BoxFuture<'a, Result<String, ResourceError>> {
            Box::pin(async move { Ok(format!("static {name}")) })
        }
    }

    fn row(name: &str, columns: &[&str]) -> ResourceRow {
        ResourceRow::new(
            name,
            Some("default".to_string()),
            columns.iter().map(|value| value.to_string()).collect(),
        )
    }

    #[test]
    fn construction_seeds_every_builtin_kind() {
        let registry = ResourceRegistry::new(Duration::from_secs(5));
        let supported = registry.supported();

        for kind in BuiltinKind::ALL {
            assert!(supported.contains(kind.id()));
        }
        assert_eq!(supported.len(), BuiltinKind::ALL.len());
    }

    #[tokio::test]
    async fn list_succeeds_iff_kind_is_supported() {
        let registry = ResourceRegistry::new(Duration::from_secs(5));
        let cluster = FakeCluster::new();

        assert!(registry.list(&cluster, "Pod", "default").await.is_ok());
        assert_eq!(
            registry.list(&cluster, "Widget", "default").await,
            Err(ResourceError::UnknownKind("Widget".to_string()))
        );

        registry.register(
            "Widget",
            Arc::new(StaticHandler::new("Widget", &["Name"], Vec::new())),
        );
        assert!(registry.supports("Widget"));
        assert!(registry.list(&cluster, "Widget", "default").await.is_ok());
    }

    #[tokio::test]
    async fn re_registration_is_idempotent_replacement() {
        let registry = ResourceRegistry::new(Duration::from_secs(5));
        let cluster = FakeCluster::new();

        let first = registry.register(
            "Widget",
            Arc::new(StaticHandler::new("Widget", &["Name"], vec![row("a", &["a"])])),
        );
        assert!(first.is_none());
        let second = registry.register(
            "Widget",
            Arc::new(StaticHandler::new("Widget", &["Name"], vec![row("b", &["b"])])),
        );
        assert!(second.is_some());

        let rows = registry
            .list(&cluster, "Widget", "")
            .await
            .expect("widget rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "b");
        assert_eq!(registry.supported().len(), BuiltinKind::ALL.len() + 1);
    }

    #[tokio::test]
    async fn cluster_scoped_kinds_ignore_the_namespace() {
        let registry = ResourceRegistry::new(Duration::from_secs(5));
        let cluster = FakeCluster::new();

        registry
            .list(&cluster, "Node", "kube-system")
            .await
            .expect("nodes");
        registry
            .list(&cluster, "Pod", "kube-system")
            .await
            .expect("pods");
        registry.list(&cluster, "Pod", "").await.expect("all pods");
        registry
            .delete(&cluster, "StorageClass", "shop", "fast")
            .await
            .expect("delete");

        assert_eq!(
            cluster.calls(),
            vec![
                Call::List(BuiltinKind::Node, None),
                Call::List(BuiltinKind::Pod, Some("kube-system".to_string())),
                Call::List(BuiltinKind::Pod, None),
                Call::Delete(BuiltinKind::StorageClass, None, "fast".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn plugin_override_with_short_rows_is_padded_to_pod_schema() {
        let registry = ResourceRegistry::new(Duration::from_secs(5));
        let cluster = FakeCluster::new();
        registry.register(
            "Pod",
            Arc::new(StaticHandler::new(
                "Pod",
                &["Namespace", "Name", "Ready", "Status", "Restarts"],
                vec![row("api", &["default", "api", "1/1", "Running", "0"])],
            )),
        );

        let rows = registry.list(&cluster, "Pod", "default").await.expect("rows");
        assert_eq!(rows[0].columns.len(), 6);
        assert_eq!(rows[0].columns[5], "-");
        assert_eq!(registry.kind_info("Pod").expect("info").columns.len(), 6);
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn builtin_dispatch_bypasses_overrides() {
        let registry = ResourceRegistry::new(Duration::from_secs(5));
        let cluster = FakeCluster::new();
        registry.register(
            "Pod",
            Arc::new(StaticHandler::new("Pod", &["Name"], Vec::new())),
        );

        registry
            .list_builtin(&cluster, BuiltinKind::Pod, "shop")
            .await
            .expect("builtin pods");
        let text = registry
            .describe(&cluster, "Pod", "shop", "api")
            .await
            .expect("describe");

        assert_eq!(text, "static api");
        assert_eq!(
            cluster.calls(),
            vec![Call::List(BuiltinKind::Pod, Some("shop".to_string()))]
        );
    }
}
