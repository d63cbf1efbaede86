//! Mount reconciliation: per-slot component identity across re-renders.
//!
//! Follows the general shape of a rebuild-the-tree-but-keep-existing-instances
//! re-render cycle, with a mark-and-sweep cache so components whose slot
//! didn't change survive a render pass instead of being torn down and rebuilt.

use crate::element::{Cleanup, Component, ElementId, ElementTree};
use crate::input::MouseEvent;
use crate::dispatch::KeyBinding;
use crate::state::{AppHandle, Watcher};
use std::collections::{HashMap, HashSet};

/// Identifies a mounted child by its full path from the tree root (a
/// sequence of child indices), rather than by the parent component's
/// identity directly — equivalent, since a child's position is exactly
/// `parent_path + [index]`, and avoids requiring `Component` to be hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountKey(Vec<usize>);

impl MountKey {
    pub fn root() -> Self {
        MountKey(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        MountKey(path)
    }
}

/// Caches mounted component instances across re-renders by [`MountKey`],
/// running `Init`/`Cleanup` exactly once per mount/unmount and routing
/// `UpdateProps` into already-live instances.
#[derive(Default)]
pub struct MountRegistry {
    cache: HashMap<MountKey, Box<dyn Component>>,
    cleanups: HashMap<MountKey, Cleanup>,
    active: HashSet<MountKey>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts (or reuses) the component at `parent.child(index)`, renders
    /// it, and tags the returned element with the mount key so later
    /// dispatch-table building and mouse hit-testing can look the component
    /// back up.
    pub fn mount(
        &mut self,
        app: &AppHandle,
        tree: &mut ElementTree,
        parent: &MountKey,
        index: usize,
        factory: impl FnOnce() -> Box<dyn Component>,
    ) -> ElementId {
        let key = parent.child(index);
        self.active.insert(key.clone());

        if let Some(existing) = self.cache.get_mut(&key) {
            existing.bind_app(app);
            let fresh = factory();
            existing.update_props(fresh.as_ref());
        } else {
            let mut component = factory();
            component.bind_app(app);
            if let Some(cleanup) = component.init(app) {
                self.cleanups.insert(key.clone(), cleanup);
            }
            self.cache.insert(key.clone(), component);
        }

        let component = self.cache.get_mut(&key).expect("just inserted or found above");
        let id = component.render(app, tree);
        if let Some(node) = tree.get_mut(id) {
            node.component = Some(key);
        }
        id
    }

    /// Drops every cached instance not marked active this frame, running
    /// its cleanup first, then resets the active set for the next frame.
    pub fn sweep(&mut self) {
        let stale: Vec<MountKey> =
            self.cache.keys().filter(|k| !self.active.contains(*k)).cloned().collect();
        for key in stale {
            if let Some(cleanup) = self.cleanups.remove(&key) {
                cleanup();
            }
            self.cache.remove(&key);
        }
        self.active.clear();
    }

    pub fn key_bindings_for(&self, key: &MountKey) -> Vec<KeyBinding> {
        self.cache.get(key).map(|c| c.key_map()).unwrap_or_default()
    }

    pub fn handle_mouse(&mut self, key: &MountKey, event: &MouseEvent) -> bool {
        self.cache.get_mut(key).map(|c| c.handle_mouse(event)).unwrap_or(false)
    }

    pub fn watchers_for(&self, key: &MountKey) -> Vec<Watcher> {
        self.cache.get(key).map(|c| c.watchers()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementBuilder;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        renders: Arc<AtomicUsize>,
        inits: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    }

    impl Component for Counter {
        fn render(&mut self, _app: &AppHandle, tree: &mut ElementTree) -> ElementId {
            self.renders.fetch_add(1, Ordering::SeqCst);
            ElementBuilder::new().build(tree)
        }

        fn init(&mut self, _app: &AppHandle) -> Option<Cleanup> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            let cleanups = Arc::clone(&self.cleanups);
            Some(Box::new(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            }))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn test_app() -> AppHandle {
        let (etx, _erx) = tokio::sync::mpsc::unbounded_channel();
        let (utx, _urx) = tokio::sync::mpsc::unbounded_channel();
        let (errtx, _errrx) = tokio::sync::mpsc::unbounded_channel();
        let (stx, _srx) = tokio::sync::watch::channel(false);
        AppHandle::new(etx, utx, errtx, stx)
    }

    #[test]
    fn same_slot_reuses_instance_across_frames() {
        let app = test_app();
        let mut registry = MountRegistry::new();
        let renders = Arc::new(AtomicUsize::new(0));
        let inits = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let mut tree = ElementTree::new();
            let r2 = Arc::clone(&renders);
            let i2 = Arc::clone(&inits);
            let c2 = Arc::clone(&cleanups);
            registry.mount(&app, &mut tree, &MountKey::root(), 0, move || {
                Box::new(Counter { renders: r2, inits: i2, cleanups: c2 })
            });
            registry.sweep();
        }

        assert_eq!(renders.load(Ordering::SeqCst), 3);
        assert_eq!(inits.load(Ordering::SeqCst), 1, "init must run exactly once");
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unmounted_slot_runs_cleanup_on_sweep() {
        let app = test_app();
        let mut registry = MountRegistry::new();
        let renders = Arc::new(AtomicUsize::new(0));
        let inits = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));

        let mut tree = ElementTree::new();
        registry.mount(&app, &mut tree, &MountKey::root(), 0, {
            let (r, i, c) = (Arc::clone(&renders), Arc::clone(&inits), Arc::clone(&cleanups));
            move || Box::new(Counter { renders: r, inits: i, cleanups: c })
        });
        registry.sweep();
        assert_eq!(registry.len(), 1);

        // Next frame mounts nothing at that slot.
        registry.sweep();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn mount_key_child_path_is_stable() {
        let root = MountKey::root();
        let a = root.child(2);
        let b = root.child(2);
        assert_eq!(a, b);
        assert_ne!(a, root.child(3));
    }
}
