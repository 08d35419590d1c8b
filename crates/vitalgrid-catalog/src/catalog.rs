//! In-process entity catalog.
//!
//! Holds the hierarchy cluster → nodes/applications → services →
//! partitions → replicas, plus applications → deployed applications →
//! deployed service packages. Inserts are checked against the structural
//! parent kind of each entity and against identity consistency (a replica
//! must sit under its own partition, and so on).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;
use vitalgrid_core::{EntityRef, HealthError, HealthResult};

use crate::graph::EntityGraph;

#[derive(Debug, Default)]
struct CatalogNode {
    parent: Option<EntityRef>,
    children: BTreeSet<EntityRef>,
}

/// Thread-safe in-memory [`EntityGraph`].
#[derive(Debug)]
pub struct InMemoryCatalog {
    nodes: RwLock<HashMap<EntityRef, CatalogNode>>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    /// A catalog containing only the cluster.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(EntityRef::Cluster, CatalogNode::default());
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Insert `entity` under `parent`. Re-inserting an existing entity under
    /// the same parent is a no-op.
    pub fn insert(&self, entity: EntityRef, parent: EntityRef) -> HealthResult<()> {
        entity.validate()?;
        check_parent(&entity, &parent)?;

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = nodes.get(&entity) {
            if existing.parent.as_ref() == Some(&parent) {
                return Ok(());
            }
            return Err(HealthError::InvalidArgument(format!(
                "{entity} already exists under a different parent"
            )));
        }
        let Some(parent_node) = nodes.get_mut(&parent) else {
            return Err(HealthError::InvalidArgument(format!(
                "parent {parent} of {entity} is not in the catalog"
            )));
        };
        parent_node.children.insert(entity.clone());
        nodes.insert(
            entity.clone(),
            CatalogNode {
                parent: Some(parent),
                children: BTreeSet::new(),
            },
        );
        debug!(%entity, "catalog entity added");
        Ok(())
    }

    pub fn add_node(&self, node_name: &str) -> HealthResult<EntityRef> {
        let entity = EntityRef::node(node_name);
        self.insert(entity.clone(), EntityRef::Cluster)?;
        Ok(entity)
    }

    pub fn add_application(&self, application_name: &str) -> HealthResult<EntityRef> {
        let entity = EntityRef::application(application_name);
        self.insert(entity.clone(), EntityRef::Cluster)?;
        Ok(entity)
    }

    pub fn add_service(&self, application_name: &str, service_name: &str) -> HealthResult<EntityRef> {
        let entity = EntityRef::service(service_name);
        self.insert(entity.clone(), EntityRef::application(application_name))?;
        Ok(entity)
    }

    pub fn add_partition(&self, service_name: &str, partition_id: Uuid) -> HealthResult<EntityRef> {
        let entity = EntityRef::partition(partition_id);
        self.insert(entity.clone(), EntityRef::service(service_name))?;
        Ok(entity)
    }

    pub fn add_replica(&self, partition_id: Uuid, replica_id: i64) -> HealthResult<EntityRef> {
        let entity = EntityRef::replica(partition_id, replica_id);
        self.insert(entity.clone(), EntityRef::partition(partition_id))?;
        Ok(entity)
    }

    pub fn add_deployed_application(
        &self,
        application_name: &str,
        node_name: &str,
    ) -> HealthResult<EntityRef> {
        let entity = EntityRef::deployed_application(application_name, node_name);
        self.insert(entity.clone(), EntityRef::application(application_name))?;
        Ok(entity)
    }

    pub fn add_deployed_service_package(
        &self,
        application_name: &str,
        service_manifest_name: &str,
        node_name: &str,
    ) -> HealthResult<EntityRef> {
        let entity =
            EntityRef::deployed_service_package(application_name, service_manifest_name, node_name);
        self.insert(
            entity.clone(),
            EntityRef::deployed_application(application_name, node_name),
        )?;
        Ok(entity)
    }

    /// Remove `entity` and everything below it. Returns the removed
    /// entities, parents before children.
    pub fn remove(&self, entity: &EntityRef) -> HealthResult<Vec<EntityRef>> {
        if *entity == EntityRef::Cluster {
            return Err(HealthError::InvalidArgument(
                "the cluster cannot be removed".to_string(),
            ));
        }
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(node) = nodes.get(entity) else {
            return Ok(Vec::new());
        };
        let parent = node.parent.clone();
        if let Some(p) = parent.and_then(|parent| nodes.get_mut(&parent)) {
            p.children.remove(entity);
        }

        let mut removed = Vec::new();
        let mut pending = vec![entity.clone()];
        while let Some(next) = pending.pop() {
            if let Some(node) = nodes.remove(&next) {
                pending.extend(node.children.into_iter().rev());
                removed.push(next);
            }
        }
        debug!(%entity, count = removed.len(), "catalog subtree removed");
        Ok(removed)
    }

    /// Number of entities, the cluster included.
    pub fn entity_count(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load a catalog description:
    ///
    /// ```toml
    /// nodes = ["n1", "n2"]
    ///
    /// [[applications]]
    /// name = "fabric:/shop"
    ///
    /// [[applications.services]]
    /// name = "fabric:/shop/cart"
    /// partitions = [{ id = "5f0c…", replicas = [1, 2, 3] }]
    ///
    /// [[applications.deployed]]
    /// node = "n1"
    /// packages = ["CartPkg"]
    /// ```
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        let catalog = Self::new();
        for node in &file.nodes {
            catalog.add_node(node)?;
        }
        for app in &file.applications {
            catalog.add_application(&app.name)?;
            for svc in &app.services {
                catalog.add_service(&app.name, &svc.name)?;
                for partition in &svc.partitions {
                    catalog.add_partition(&svc.name, partition.id)?;
                    for replica in &partition.replicas {
                        catalog.add_replica(partition.id, *replica)?;
                    }
                }
            }
            for deployed in &app.deployed {
                catalog.add_deployed_application(&app.name, &deployed.node)?;
                for package in &deployed.packages {
                    catalog.add_deployed_service_package(&app.name, package, &deployed.node)?;
                }
            }
        }
        Ok(catalog)
    }
}

impl EntityGraph for InMemoryCatalog {
    fn contains(&self, entity: &EntityRef) -> bool {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(entity)
    }

    fn children(&self, entity: &EntityRef) -> Vec<EntityRef> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn parent(&self, entity: &EntityRef) -> Option<EntityRef> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity)
            .and_then(|n| n.parent.clone())
    }
}

/// Enforce the structural parent kind and identity consistency.
fn check_parent(entity: &EntityRef, parent: &EntityRef) -> HealthResult<()> {
    let Some(expected) = entity.kind().parent_kind() else {
        return Err(HealthError::InvalidArgument(
            "the cluster has no parent".to_string(),
        ));
    };
    if parent.kind() != expected {
        return Err(HealthError::InvalidArgument(format!(
            "{} must be placed under a {expected}, not a {}",
            entity.kind(),
            parent.kind()
        )));
    }
    let consistent = match (entity, parent) {
        (
            EntityRef::Replica { partition_id, .. },
            EntityRef::Partition {
                partition_id: parent_id,
            },
        ) => partition_id == parent_id,
        (
            EntityRef::DeployedApplication {
                application_name, ..
            },
            EntityRef::Application {
                application_name: parent_app,
            },
        ) => application_name == parent_app,
        (
            EntityRef::DeployedServicePackage {
                application_name,
                node_name,
                ..
            },
            EntityRef::DeployedApplication {
                application_name: parent_app,
                node_name: parent_node,
            },
        ) => application_name == parent_app && node_name == parent_node,
        _ => true,
    };
    if !consistent {
        return Err(HealthError::InvalidArgument(format!(
            "{entity} does not belong to {parent}"
        )));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    nodes: Vec<String>,
    applications: Vec<ApplicationEntry>,
}

#[derive(Debug, Deserialize)]
struct ApplicationEntry {
    name: String,
    #[serde(default)]
    services: Vec<ServiceEntry>,
    #[serde(default)]
    deployed: Vec<DeployedEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    name: String,
    #[serde(default)]
    partitions: Vec<PartitionEntry>,
}

#[derive(Debug, Deserialize)]
struct PartitionEntry {
    id: Uuid,
    #[serde(default)]
    replicas: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct DeployedEntry {
    node: String,
    #[serde(default)]
    packages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn shop() -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        catalog.add_node("n1").unwrap();
        catalog.add_node("n2").unwrap();
        catalog.add_application("shop").unwrap();
        catalog.add_service("shop", "cart").unwrap();
        catalog.add_partition("cart", pid(1)).unwrap();
        catalog.add_replica(pid(1), 1).unwrap();
        catalog.add_replica(pid(1), 2).unwrap();
        catalog.add_deployed_application("shop", "n1").unwrap();
        catalog
            .add_deployed_service_package("shop", "CartPkg", "n1")
            .unwrap();
        catalog
    }

    // ── Structure ──────────────────────────────────────────────────

    #[test]
    fn cluster_always_exists() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.contains(&EntityRef::Cluster));
        assert_eq!(catalog.parent(&EntityRef::Cluster), None);
        assert!(catalog.children(&EntityRef::Cluster).is_empty());
    }

    #[test]
    fn children_and_parents() {
        let catalog = shop();
        let cluster_children = catalog.children(&EntityRef::Cluster);
        assert_eq!(cluster_children.len(), 3);
        assert!(cluster_children.contains(&EntityRef::application("shop")));

        assert_eq!(
            catalog.children(&EntityRef::application("shop")),
            vec![
                EntityRef::service("cart"),
                EntityRef::deployed_application("shop", "n1"),
            ]
        );
        assert_eq!(
            catalog.parent(&EntityRef::replica(pid(1), 2)),
            Some(EntityRef::partition(pid(1)))
        );
    }

    #[test]
    fn children_order_is_stable() {
        let catalog = shop();
        let first = catalog.children(&EntityRef::partition(pid(1)));
        let second = catalog.children(&EntityRef::partition(pid(1)));
        assert_eq!(first, second);
    }

    #[test]
    fn subtree_walks_every_level() {
        let catalog = shop();
        let all = catalog.subtree(&EntityRef::Cluster, 16);
        assert_eq!(all.len(), catalog.entity_count());

        let shallow = catalog.subtree(&EntityRef::Cluster, 1);
        assert_eq!(shallow.len(), 4);
    }

    // ── Validation ─────────────────────────────────────────────────

    #[test]
    fn wrong_parent_kind_rejected() {
        let catalog = shop();
        let err = catalog
            .insert(EntityRef::service("orders"), EntityRef::Cluster)
            .unwrap_err();
        assert!(matches!(err, HealthError::InvalidArgument(_)));
    }

    #[test]
    fn missing_parent_rejected() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.add_service("ghost", "svc").is_err());
    }

    #[test]
    fn replica_must_match_partition() {
        let catalog = shop();
        catalog.add_partition("cart", pid(2)).unwrap();
        let err = catalog
            .insert(EntityRef::replica(pid(1), 9), EntityRef::partition(pid(2)))
            .unwrap_err();
        assert!(err.to_string().contains("does not belong"));
    }

    #[test]
    fn reinsert_is_idempotent_but_reparent_is_not() {
        let catalog = shop();
        assert!(catalog.add_service("shop", "cart").is_ok());
        catalog.add_application("other").unwrap();
        assert!(catalog.add_service("other", "cart").is_err());
    }

    // ── Removal ────────────────────────────────────────────────────

    #[test]
    fn remove_takes_whole_subtree() {
        let catalog = shop();
        let before = catalog.entity_count();
        let removed = catalog.remove(&EntityRef::application("shop")).unwrap();

        assert_eq!(removed[0], EntityRef::application("shop"));
        assert_eq!(removed.len(), 7);
        assert_eq!(catalog.entity_count(), before - 7);
        assert!(!catalog.contains(&EntityRef::replica(pid(1), 1)));
        assert_eq!(catalog.children(&EntityRef::Cluster).len(), 2);
        assert!(catalog.remove(&EntityRef::application("shop")).unwrap().is_empty());
    }

    #[test]
    fn cluster_cannot_be_removed() {
        assert!(InMemoryCatalog::new().remove(&EntityRef::Cluster).is_err());
    }

    // ── TOML ───────────────────────────────────────────────────────

    #[test]
    fn loads_from_toml() {
        let catalog = InMemoryCatalog::from_toml_str(
            r#"
nodes = ["n1", "n2"]

[[applications]]
name = "shop"

[[applications.services]]
name = "cart"
partitions = [{ id = "00000000-0000-0000-0000-000000000001", replicas = [1, 2] }]

[[applications.deployed]]
node = "n1"
packages = ["CartPkg"]
"#,
        )
        .unwrap();
        assert_eq!(catalog.entity_count(), shop().entity_count());
        assert!(catalog.contains(&EntityRef::deployed_service_package("shop", "CartPkg", "n1")));
    }

    #[test]
    fn toml_with_invalid_name_fails() {
        let result = InMemoryCatalog::from_toml_str(
            r#"
[[applications]]
name = ""
"#,
        );
        assert!(result.is_err());
    }
}
