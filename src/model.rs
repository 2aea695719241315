use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(5);
pub const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum BuiltinKind {
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    Job,
    CronJob,
    Service,
    Ingress,
    NetworkPolicy,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    Event,
    Node,
    Namespace,
    PersistentVolume,
    StorageClass,
}

impl BuiltinKind {
    pub const ALL: [Self; 18] = [
        Self::Pod,
        Self::Deployment,
        Self::StatefulSet,
        Self::DaemonSet,
        Self::ReplicaSet,
        Self::Job,
        Self::CronJob,
        Self::Service,
        Self::Ingress,
        Self::NetworkPolicy,
        Self::ConfigMap,
        Self::Secret,
        Self::PersistentVolumeClaim,
        Self::Event,
        Self::Node,
        Self::Namespace,
        Self::PersistentVolume,
        Self::StorageClass,
    ];

    /// The kind identifier used by the registry.
    pub fn id(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::ReplicaSet => "ReplicaSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::NetworkPolicy => "NetworkPolicy",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Event => "Event",
            Self::Node => "Node",
            Self::Namespace => "Namespace",
            Self::PersistentVolume => "PersistentVolume",
            Self::StorageClass => "StorageClass",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Pod => "Pods",
            Self::Deployment => "Deployments",
            Self::StatefulSet => "StatefulSets",
            Self::DaemonSet => "DaemonSets",
            Self::ReplicaSet => "ReplicaSets",
            Self::Job => "Jobs",
            Self::CronJob => "CronJobs",
            Self::Service => "Services",
            Self::Ingress => "Ingresses",
            Self::NetworkPolicy => "NetworkPolicies",
            Self::ConfigMap => "ConfigMaps",
            Self::Secret => "Secrets",
            Self::PersistentVolumeClaim => "PVC",
            Self::Event => "Events",
            Self::Node => "Nodes",
            Self::Namespace => "Namespaces",
            Self::PersistentVolume => "PersistentVolumes",
            Self::StorageClass => "StorageClasses",
        }
    }

    /// Lowercase plural used for the `get_<kind>` / `delete_<kind>` plugin helpers.
    pub fn plural(self) -> &'static str {
        match self {
            Self::Pod => "pods",
            Self::Deployment => "deployments",
            Self::StatefulSet => "statefulsets",
            Self::DaemonSet => "daemonsets",
            Self::ReplicaSet => "replicasets",
            Self::Job => "jobs",
            Self::CronJob => "cronjobs",
            Self::Service => "services",
            Self::Ingress => "ingresses",
            Self::NetworkPolicy => "networkpolicies",
            Self::ConfigMap => "configmaps",
            Self::Secret => "secrets",
            Self::PersistentVolumeClaim => "persistentvolumeclaims",
            Self::Event => "events",
            Self::Node => "nodes",
            Self::Namespace => "namespaces",
            Self::PersistentVolume => "persistentvolumes",
            Self::StorageClass => "storageclasses",
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(
            self,
            Self::Node | Self::Namespace | Self::PersistentVolume | Self::StorageClass
        )
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Pod => "󰠳",
            Self::Deployment | Self::StatefulSet | Self::DaemonSet | Self::ReplicaSet => "󰹑",
            Self::Job | Self::CronJob => "󰔟",
            Self::Service | Self::Ingress | Self::NetworkPolicy => "󰛳",
            Self::ConfigMap | Self::Secret => "󰒓",
            Self::PersistentVolumeClaim | Self::PersistentVolume | Self::StorageClass => "󰋊",
            Self::Event => "󰃰",
            Self::Node => "󰒋",
            Self::Namespace => "󰉖",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Pod => &["Namespace", "Name", "Ready", "Status", "Restarts", "Age"],
            Self::Deployment => &[
                "Namespace",
                "Name",
                "Ready",
                "Up-to-date",
                "Available",
                "Age",
            ],
            Self::StatefulSet => &["Namespace", "Name", "Ready", "Age"],
            Self::DaemonSet | Self::ReplicaSet => {
                &["Namespace", "Name", "Desired", "Current", "Ready", "Age"]
            }
            Self::Job => &["Namespace", "Name", "Completions", "Duration", "Age"],
            Self::CronJob => &[
                "Namespace",
                "Name",
                "Schedule",
                "Suspend",
                "Active",
                "Last",
                "Age",
            ],
            Self::Service => &["Namespace", "Name", "Type", "Cluster-IP", "Ports", "Age"],
            Self::Ingress => &["Namespace", "Name", "Class", "Hosts", "Address", "Age"],
            Self::NetworkPolicy => &["Namespace", "Name", "Pod-Selector", "Age"],
            Self::ConfigMap => &["Namespace", "Name", "Data", "Age"],
            Self::Secret => &["Namespace", "Name", "Type", "Data", "Age"],
            Self::PersistentVolumeClaim => {
                &["Namespace", "Name", "Status", "Volume", "Capacity", "Age"]
            }
            Self::Event => &[
                "Namespace",
                "Name",
                "Type",
                "Reason",
                "Object",
                "Message",
                "Age",
            ],
            Self::Node => &["Name", "Status", "Roles", "Version", "Age"],
            Self::Namespace => &["Name", "Status", "Age"],
            Self::PersistentVolume => &["Name", "Capacity", "Reclaim", "Status", "Claim", "Age"],
            Self::StorageClass => &["Name", "Provisioner", "Reclaim", "Age"],
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Some(Self::Pod),
            "deploy" | "deployment" | "deployments" | "dp" => Some(Self::Deployment),
            "sts" | "statefulset" | "statefulsets" => Some(Self::StatefulSet),
            "ds" | "daemonset" | "daemonsets" | "daemon-set" | "daemon-sets" => {
                Some(Self::DaemonSet)
            }
            "rs" | "replicaset" | "replicasets" | "replica-set" | "replica-sets" => {
                Some(Self::ReplicaSet)
            }
            "job" | "jobs" => Some(Self::Job),
            "cj" | "cronjob" | "cronjobs" | "cron-job" | "cron-jobs" => Some(Self::CronJob),
            "svc" | "service" | "services" => Some(Self::Service),
            "ing" | "ingress" | "ingresses" => Some(Self::Ingress),
            "np" | "networkpolicy" | "networkpolicies" | "network-policy" | "network-policies" => {
                Some(Self::NetworkPolicy)
            }
            "cm" | "configmap" | "configmaps" | "config-map" | "config-maps" => {
                Some(Self::ConfigMap)
            }
            "secret" | "secrets" => Some(Self::Secret),
            "pvc"
            | "persistentvolumeclaim"
            | "persistentvolumeclaims"
            | "persistent-volume-claim"
            | "persistent-volume-claims" => Some(Self::PersistentVolumeClaim),
            "event" | "events" | "ev" => Some(Self::Event),
            "node" | "nodes" | "no" => Some(Self::Node),
            "ns" | "namespace" | "namespaces" => Some(Self::Namespace),
            "pv" | "persistentvolume" | "persistentvolumes" | "persistent-volume"
            | "persistent-volumes" => Some(Self::PersistentVolume),
            "sc" | "storageclass" | "storageclasses" | "storage-class" | "storage-classes" => {
                Some(Self::StorageClass)
            }
            _ => None,
        }
    }

    pub fn short_token(self) -> &'static str {
        match self {
            Self::Pod => "po",
            Self::Deployment => "deploy",
            Self::StatefulSet => "sts",
            Self::DaemonSet => "ds",
            Self::ReplicaSet => "rs",
            Self::Job => "job",
            Self::CronJob => "cj",
            Self::Service => "svc",
            Self::Ingress => "ing",
            Self::NetworkPolicy => "np",
            Self::ConfigMap => "cm",
            Self::Secret => "secret",
            Self::PersistentVolumeClaim => "pvc",
            Self::Event => "event",
            Self::Node => "node",
            Self::Namespace => "ns",
            Self::PersistentVolume => "pv",
            Self::StorageClass => "sc",
        }
    }

    pub fn info(self) -> KindInfo {
        KindInfo {
            id: self.id().to_string(),
            title: self.title().to_string(),
            icon: self.icon().to_string(),
            namespaced: self.namespaced(),
            style: DisplayStyle::Table,
            columns: self
                .columns()
                .iter()
                .map(|title| ColumnDef::new(*title, 0))
                .collect(),
            refresh: DEFAULT_REFRESH,
        }
    }
}

impl Display for BuiltinKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStyle {
    #[default]
    Table,
    Yaml,
    Chart,
    Text,
}

impl DisplayStyle {
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "yaml" => Self::Yaml,
            "chart" => Self::Chart,
            "text" => Self::Text,
            _ => Self::Table,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnDef {
    pub title: String,
    /// Preferred width in cells; 0 lets the renderer share space evenly.
    pub width: u16,
}

impl ColumnDef {
    pub fn new(title: impl Into<String>, width: u16) -> Self {
        Self {
            title: title.into(),
            width,
        }
    }
}

/// Everything the UI needs to present one kind, built-in or plugin-provided.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KindInfo {
    pub id: String,
    pub title: String,
    pub icon: String,
    pub namespaced: bool,
    pub style: DisplayStyle,
    pub columns: Vec<ColumnDef>,
    pub refresh: Duration,
}

impl KindInfo {
    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.title.clone()).collect()
    }
}

/// Identity of a row that survives re-fetching.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RowKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl Display for RowKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ResourceRow {
    pub name: String,
    pub namespace: Option<String>,
    pub columns: Vec<String>,
}

impl ResourceRow {
    pub fn new(name: impl Into<String>, namespace: Option<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            columns,
        }
    }

    pub fn key(&self) -> RowKey {
        RowKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Pads with the placeholder or truncates so the row matches a schema.
    pub fn fit_to(&mut self, len: usize) {
        self.columns.truncate(len);
        while self.columns.len() < len {
            self.columns.push(PLACEHOLDER.to_string());
        }
    }

    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }

        let query_lower = query.to_ascii_lowercase();

        if self.name.to_ascii_lowercase().contains(&query_lower) {
            return true;
        }

        if let Some(namespace) = &self.namespace
            && namespace.to_ascii_lowercase().contains(&query_lower)
        {
            return true;
        }

        self.columns
            .iter()
            .any(|column| column.to_ascii_lowercase().contains(&query_lower))
    }
}

/// Human label for a namespace argument; empty means every namespace.
pub fn namespace_label(namespace: &str) -> &str {
    if namespace.trim().is_empty() {
        "all"
    } else {
        namespace
    }
}
