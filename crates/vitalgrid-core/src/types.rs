//! Domain types for the health store.
//!
//! These types describe the tracked entities, the health reports sources
//! send about them, and the ledger entries that wrap accepted reports.
//! All types are serializable to/from JSON for persistence and transport.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HealthError, HealthResult};

/// Longest accepted entity name, source id, or property (bytes).
pub const MAX_NAME_LEN: usize = 1024;

/// Suffix appended to descriptions cut at the configured limit.
pub const TRUNCATED_SUFFIX: &str = " [Truncated]";

// ── Entities ──────────────────────────────────────────────────────

/// The kinds of entity the health store tracks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cluster,
    Node,
    Application,
    Service,
    Partition,
    Replica,
    DeployedApplication,
    DeployedServicePackage,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Cluster,
        EntityKind::Node,
        EntityKind::Application,
        EntityKind::Service,
        EntityKind::Partition,
        EntityKind::Replica,
        EntityKind::DeployedApplication,
        EntityKind::DeployedServicePackage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Cluster => "cluster",
            EntityKind::Node => "node",
            EntityKind::Application => "application",
            EntityKind::Service => "service",
            EntityKind::Partition => "partition",
            EntityKind::Replica => "replica",
            EntityKind::DeployedApplication => "deployed_application",
            EntityKind::DeployedServicePackage => "deployed_service_package",
        }
    }

    /// The kind an entity of this kind hangs under in the hierarchy.
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Cluster => None,
            EntityKind::Node | EntityKind::Application => Some(EntityKind::Cluster),
            EntityKind::Service => Some(EntityKind::Application),
            EntityKind::Partition => Some(EntityKind::Service),
            EntityKind::Replica => Some(EntityKind::Partition),
            EntityKind::DeployedApplication => Some(EntityKind::Application),
            EntityKind::DeployedServicePackage => Some(EntityKind::DeployedApplication),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a tracked entity. Each variant carries the identity
/// shape of its kind.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    Cluster,
    Node {
        node_name: String,
    },
    Application {
        application_name: String,
    },
    Service {
        service_name: String,
    },
    Partition {
        partition_id: Uuid,
    },
    Replica {
        partition_id: Uuid,
        replica_id: i64,
    },
    DeployedApplication {
        application_name: String,
        node_name: String,
    },
    DeployedServicePackage {
        application_name: String,
        service_manifest_name: String,
        node_name: String,
    },
}

impl EntityRef {
    pub fn node(node_name: impl Into<String>) -> Self {
        EntityRef::Node {
            node_name: node_name.into(),
        }
    }

    pub fn application(application_name: impl Into<String>) -> Self {
        EntityRef::Application {
            application_name: application_name.into(),
        }
    }

    pub fn service(service_name: impl Into<String>) -> Self {
        EntityRef::Service {
            service_name: service_name.into(),
        }
    }

    pub fn partition(partition_id: Uuid) -> Self {
        EntityRef::Partition { partition_id }
    }

    pub fn replica(partition_id: Uuid, replica_id: i64) -> Self {
        EntityRef::Replica {
            partition_id,
            replica_id,
        }
    }

    pub fn deployed_application(
        application_name: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        EntityRef::DeployedApplication {
            application_name: application_name.into(),
            node_name: node_name.into(),
        }
    }

    pub fn deployed_service_package(
        application_name: impl Into<String>,
        service_manifest_name: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        EntityRef::DeployedServicePackage {
            application_name: application_name.into(),
            service_manifest_name: service_manifest_name.into(),
            node_name: node_name.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Cluster => EntityKind::Cluster,
            EntityRef::Node { .. } => EntityKind::Node,
            EntityRef::Application { .. } => EntityKind::Application,
            EntityRef::Service { .. } => EntityKind::Service,
            EntityRef::Partition { .. } => EntityKind::Partition,
            EntityRef::Replica { .. } => EntityKind::Replica,
            EntityRef::DeployedApplication { .. } => EntityKind::DeployedApplication,
            EntityRef::DeployedServicePackage { .. } => EntityKind::DeployedServicePackage,
        }
    }

    /// Check that the identity matches the shape its kind expects.
    pub fn validate(&self) -> HealthResult<()> {
        match self {
            EntityRef::Cluster => Ok(()),
            EntityRef::Node { node_name } => validate_name("node name", node_name),
            EntityRef::Application { application_name } => {
                validate_name("application name", application_name)
            }
            EntityRef::Service { service_name } => validate_name("service name", service_name),
            EntityRef::Partition { partition_id } => validate_partition_id(partition_id),
            EntityRef::Replica { partition_id, .. } => validate_partition_id(partition_id),
            EntityRef::DeployedApplication {
                application_name,
                node_name,
            } => {
                validate_name("application name", application_name)?;
                validate_name("node name", node_name)
            }
            EntityRef::DeployedServicePackage {
                application_name,
                service_manifest_name,
                node_name,
            } => {
                validate_name("application name", application_name)?;
                validate_name("service manifest name", service_manifest_name)?;
                validate_name("node name", node_name)
            }
        }
    }

    /// The identity string chunk filters match against.
    pub fn filter_key(&self) -> String {
        match self {
            EntityRef::Cluster => String::new(),
            EntityRef::Node { node_name } => node_name.clone(),
            EntityRef::Application { application_name } => application_name.clone(),
            EntityRef::Service { service_name } => service_name.clone(),
            EntityRef::Partition { partition_id } => partition_id.to_string(),
            EntityRef::Replica { replica_id, .. } => replica_id.to_string(),
            EntityRef::DeployedApplication { node_name, .. } => node_name.clone(),
            EntityRef::DeployedServicePackage {
                service_manifest_name,
                ..
            } => service_manifest_name.clone(),
        }
    }

    /// Stable key used for persistence. JSON escapes control characters,
    /// so the result never contains the store's key separator.
    pub fn storage_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Cluster => write!(f, "Cluster"),
            EntityRef::Node { node_name } => write!(f, "Node({node_name})"),
            EntityRef::Application { application_name } => {
                write!(f, "Application({application_name})")
            }
            EntityRef::Service { service_name } => write!(f, "Service({service_name})"),
            EntityRef::Partition { partition_id } => write!(f, "Partition({partition_id})"),
            EntityRef::Replica {
                partition_id,
                replica_id,
            } => write!(f, "Replica({partition_id}/{replica_id})"),
            EntityRef::DeployedApplication {
                application_name,
                node_name,
            } => write!(f, "DeployedApplication({application_name}@{node_name})"),
            EntityRef::DeployedServicePackage {
                application_name,
                service_manifest_name,
                node_name,
            } => write!(
                f,
                "DeployedServicePackage({application_name}/{service_manifest_name}@{node_name})"
            ),
        }
    }
}

fn validate_name(what: &str, value: &str) -> HealthResult<()> {
    if value.trim().is_empty() {
        return Err(HealthError::InvalidArgument(format!("{what} is empty")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(HealthError::InvalidArgument(format!(
            "{what} exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(HealthError::InvalidArgument(format!(
            "{what} contains control characters"
        )));
    }
    Ok(())
}

fn validate_partition_id(id: &Uuid) -> HealthResult<()> {
    if id.is_nil() {
        return Err(HealthError::InvalidArgument("partition id is nil".to_string()));
    }
    Ok(())
}

// ── Health state ──────────────────────────────────────────────────

/// Evaluated health. Ordered `Unknown < Ok < Warning < Error` so that
/// aggregation can take the maximum.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Unknown,
    Ok,
    Warning,
    Error,
}

impl HealthState {
    /// Warning or Error.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthState::Warning | HealthState::Error)
    }

    /// Apply the "consider warning as error" policy knob.
    pub fn escalate(self, consider_warning_as_error: bool) -> HealthState {
        if consider_warning_as_error && self == HealthState::Warning {
            HealthState::Error
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Ok => "ok",
            HealthState::Warning => "warning",
            HealthState::Error => "error",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Reports ───────────────────────────────────────────────────────

/// How long a report stays valid after the ledger last accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeToLive {
    #[default]
    Infinite,
    After(Duration),
}

/// A sequenced assertion of health for one (entity, source, property).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub entity: EntityRef,
    /// Entity incarnation. A higher instance replaces everything known
    /// about the entity; a lower one is stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u64>,
    pub source_id: String,
    pub property: String,
    pub state: HealthState,
    #[serde(default)]
    pub description: String,
    pub sequence_number: u64,
    #[serde(default)]
    pub time_to_live: TimeToLive,
    #[serde(default)]
    pub remove_when_expired: bool,
    pub source_utc_timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report with an infinite TTL and an empty description.
    pub fn new(
        entity: EntityRef,
        source_id: impl Into<String>,
        property: impl Into<String>,
        state: HealthState,
        sequence_number: u64,
    ) -> Self {
        Self {
            entity,
            instance_id: None,
            source_id: source_id.into(),
            property: property.into(),
            state,
            description: String::new(),
            sequence_number,
            time_to_live: TimeToLive::Infinite,
            remove_when_expired: false,
            source_utc_timestamp: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = TimeToLive::After(ttl);
        self
    }

    pub fn remove_when_expired(mut self, remove: bool) -> Self {
        self.remove_when_expired = remove;
        self
    }

    pub fn with_instance(mut self, instance_id: u64) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn with_source_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.source_utc_timestamp = ts;
        self
    }

    /// The (entity, source, property) triple this report replaces.
    pub fn key(&self) -> EntryKey {
        EntryKey {
            entity: self.entity.clone(),
            source_id: self.source_id.clone(),
            property: self.property.clone(),
        }
    }

    /// Reject malformed reports before they reach the ledger.
    pub fn validate(&self) -> HealthResult<()> {
        self.entity.validate()?;
        validate_name("source id", &self.source_id)?;
        validate_name("property", &self.property)?;
        if self.state == HealthState::Unknown {
            return Err(HealthError::InvalidArgument(
                "report state must be ok, warning or error".to_string(),
            ));
        }
        if self.time_to_live == TimeToLive::After(Duration::ZERO) {
            return Err(HealthError::InvalidArgument(
                "time to live must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Cut the description to `max_len` bytes on a char boundary.
    pub fn truncate_description(&mut self, max_len: usize) -> bool {
        if self.description.len() <= max_len {
            return false;
        }
        // Too small for the marker: plain cut.
        let suffix = if max_len >= TRUNCATED_SUFFIX.len() {
            TRUNCATED_SUFFIX
        } else {
            ""
        };
        let mut cut = max_len - suffix.len();
        while cut > 0 && !self.description.is_char_boundary(cut) {
            cut -= 1;
        }
        self.description.truncate(cut);
        self.description.push_str(suffix);
        true
    }
}

/// Identity of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub entity: EntityRef,
    pub source_id: String,
    pub property: String,
}

/// Separator between the parts of a persisted entry key.
pub const KEY_SEPARATOR: char = '\u{1f}';

impl EntryKey {
    /// Build the composite key for the reports table.
    pub fn storage_key(&self) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.entity.storage_key(),
            self.source_id,
            self.property
        )
    }

    /// Prefix shared by every persisted entry of `entity`.
    pub fn entity_prefix(entity: &EntityRef) -> String {
        format!("{}{KEY_SEPARATOR}", entity.storage_key())
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}+{}", self.entity, self.source_id, self.property)
    }
}

// ── Ledger entries ────────────────────────────────────────────────

/// An accepted report plus the fields the ledger derives for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub report: HealthReport,
    /// Ledger receipt time of the last accepted write. Expiry is measured
    /// from here, never from the reporter's clock.
    pub last_modified_utc: DateTime<Utc>,
    #[serde(default)]
    pub is_expired: bool,
    /// When the key last entered each state. Only a state change moves
    /// these; a replacement in the same state keeps them.
    #[serde(default)]
    pub last_ok_transition_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_warning_transition_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error_transition_utc: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn new(report: HealthReport, now: DateTime<Utc>) -> Self {
        let mut entry = Self {
            report,
            last_modified_utc: now,
            is_expired: false,
            last_ok_transition_utc: None,
            last_warning_transition_utc: None,
            last_error_transition_utc: None,
        };
        entry.stamp_transition(now);
        entry
    }

    /// The entry that replaces `self` when `report` is accepted for the
    /// same key. Transition history carries forward.
    pub fn replaced_by(&self, report: HealthReport, now: DateTime<Utc>) -> Self {
        let changed = report.state != self.report.state;
        let mut entry = Self {
            report,
            last_modified_utc: now,
            is_expired: false,
            last_ok_transition_utc: self.last_ok_transition_utc,
            last_warning_transition_utc: self.last_warning_transition_utc,
            last_error_transition_utc: self.last_error_transition_utc,
        };
        if changed {
            entry.stamp_transition(now);
        }
        entry
    }

    /// Last time the key entered `state`.
    pub fn last_transition_to(&self, state: HealthState) -> Option<DateTime<Utc>> {
        match state {
            HealthState::Ok => self.last_ok_transition_utc,
            HealthState::Warning => self.last_warning_transition_utc,
            HealthState::Error => self.last_error_transition_utc,
            HealthState::Unknown => None,
        }
    }

    fn stamp_transition(&mut self, now: DateTime<Utc>) {
        match self.report.state {
            HealthState::Ok => self.last_ok_transition_utc = Some(now),
            HealthState::Warning => self.last_warning_transition_utc = Some(now),
            HealthState::Error => self.last_error_transition_utc = Some(now),
            HealthState::Unknown => {}
        }
    }

    pub fn key(&self) -> EntryKey {
        self.report.key()
    }

    /// When the entry expires, or `None` for an infinite TTL.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.report.time_to_live {
            TimeToLive::Infinite => None,
            TimeToLive::After(ttl) => chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|d| self.last_modified_utc.checked_add_signed(d)),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    /// The state this entry contributes under the given policy knob.
    pub fn evaluated_state(&self, consider_warning_as_error: bool) -> HealthState {
        self.report.state.escalate(consider_warning_as_error)
    }
}
