//! The read-only graph seam between the catalog and the engine.

use vitalgrid_core::EntityRef;

/// Read-only view of which entities exist and how they nest.
///
/// The cluster always exists. Implementations must never report an
/// entity as its own ancestor; the evaluator still caps recursion depth.
pub trait EntityGraph: Send + Sync {
    fn contains(&self, entity: &EntityRef) -> bool;

    /// Direct children, in a stable order.
    fn children(&self, entity: &EntityRef) -> Vec<EntityRef>;

    fn parent(&self, entity: &EntityRef) -> Option<EntityRef>;

    /// `entity` followed by all of its descendants, breadth first, stopping
    /// `depth_limit` levels down.
    fn subtree(&self, entity: &EntityRef, depth_limit: usize) -> Vec<EntityRef> {
        let mut out = vec![entity.clone()];
        let mut level = vec![entity.clone()];
        for _ in 0..depth_limit {
            let next: Vec<EntityRef> = level.iter().flat_map(|e| self.children(e)).collect();
            if next.is_empty() {
                break;
            }
            out.extend(next.iter().cloned());
            level = next;
        }
        out
    }
}
