//! The retained element tree: a generational arena of [`ElementNode`]s plus
//! the [`Component`] trait attached components implement.
//!
//! Layout itself stays an opaque collaborator (no flexbox engine lives here).
//! What's carried over is narrower: the hook vocabulary (`on_focus`/`on_blur`,
//! `on_key`, `on_mouse`) and a preference for index-based arena storage over
//! `Rc<RefCell<_>>` child ownership.

use crate::dispatch::KeyBinding;
use crate::input::{KeyEvent, MouseEvent};
use crate::mount::MountKey;
use crate::state::{AppHandle, Watcher};
use std::any::Any;

//--------------------------------------------------------------------------------------------------
// ElementId / arena
//--------------------------------------------------------------------------------------------------

/// A stable reference into an [`ElementTree`]'s arena. The generation field
/// detects use of an id from a tree that has since recycled its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    node: Option<ElementNode>,
}

/// Per-element hooks. Every field defaults to `None`; only the hooks an
/// element's builder call actually set are invoked.
#[derive(Default)]
pub struct Hooks {
    pub on_focus: Option<Box<dyn FnMut() + Send>>,
    pub on_blur: Option<Box<dyn FnMut() + Send>>,
    pub on_key: Option<Box<dyn FnMut(&KeyEvent) -> bool + Send>>,
    pub on_mouse: Option<Box<dyn FnMut(&MouseEvent) -> bool + Send>>,
    pub on_render: Option<Box<dyn FnMut() + Send>>,
    pub on_child_added: Option<Box<dyn FnMut(ElementId) + Send>>,
    pub on_focusable_added: Option<Box<dyn FnMut(ElementId) + Send>>,
}

/// A node of the retained tree, stored by value in the arena.
pub struct ElementNode {
    pub parent: Option<ElementId>,
    pub children: Vec<ElementId>,
    /// The component mounted at this node, if any — a key into the
    /// [`crate::mount::MountRegistry`] cache, not the component itself, so
    /// dispatch-table building and mouse hit-testing can look it up without
    /// this arena owning a second copy of it.
    pub component: Option<MountKey>,
    pub focusable: bool,
    pub focused: bool,
    pub dirty: bool,
    pub hooks: Hooks,
    /// Opaque to the core; an external painter may stash its own layout
    /// result here between the render pass and the paint pass.
    pub layout_cache: Option<Box<dyn Any + Send>>,
}

impl ElementNode {
    fn new() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            component: None,
            focusable: false,
            focused: false,
            dirty: false,
            hooks: Hooks::default(),
            layout_cache: None,
        }
    }
}

/// The arena backing one frame's element tree. Cleared and rebuilt every
/// re-render; the [`crate::mount::MountRegistry`] is what actually persists
/// component state across frames.
#[derive(Default)]
pub struct ElementTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: Option<ElementId>,
}

impl ElementTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every node and frees every slot, ready for the next render pass.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.root = None;
    }

    pub fn root(&self) -> Option<ElementId> {
        self.root
    }

    pub fn set_root(&mut self, id: ElementId) {
        self.root = Some(id);
    }

    fn insert(&mut self, node: ElementNode) -> ElementId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            ElementId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, node: Some(node) });
            ElementId { index, generation: 0 }
        }
    }

    pub fn get(&self, id: ElementId) -> Option<&ElementNode> {
        self.slots.get(id.index as usize).and_then(|slot| {
            if slot.generation == id.generation {
                slot.node.as_ref()
            } else {
                None
            }
        })
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut ElementNode> {
        self.slots.get_mut(id.index as usize).and_then(|slot| {
            if slot.generation == id.generation {
                slot.node.as_mut()
            } else {
                None
            }
        })
    }

    #[allow(dead_code)]
    fn remove(&mut self, id: ElementId) -> Option<ElementNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take();
        if node.is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
        }
        node
    }

    /// Depth-first, pre-order walk from `root`, yielding each visited id.
    /// This is the order `DispatchTable::build` and the focusable/watcher
    /// registration pass both rely on.
    pub fn dfs(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.get(id) {
                for &child in node.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Hit-tests the deepest element under `(x, y)` given a bounds lookup
    /// supplied by the external layout/paint collaborator (the arena itself
    /// has no notion of screen coordinates).
    pub fn hit_test(
        &self,
        root: ElementId,
        x: u16,
        y: u16,
        bounds_of: impl Fn(ElementId) -> Option<(u16, u16, u16, u16)>,
    ) -> Option<ElementId> {
        let mut best = None;
        for id in self.dfs(root) {
            if let Some((bx, by, bw, bh)) = bounds_of(id) {
                if x >= bx && x < bx + bw && y >= by && y < by + bh {
                    best = Some(id);
                }
            }
        }
        best
    }
}

//--------------------------------------------------------------------------------------------------
// ElementBuilder
//--------------------------------------------------------------------------------------------------

/// Builds one [`ElementNode`] and inserts it into a tree, returning its id.
/// Children must already be built (bottom-up), mirroring how a `Component`'s
/// `render` recursively renders its children before assembling itself.
#[derive(Default)]
pub struct ElementBuilder {
    children: Vec<ElementId>,
    component: Option<MountKey>,
    focusable: bool,
    hooks: Hooks,
}

impl ElementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(mut self, id: ElementId) -> Self {
        self.children.push(id);
        self
    }

    pub fn children(mut self, ids: impl IntoIterator<Item = ElementId>) -> Self {
        self.children.extend(ids);
        self
    }

    pub fn component(mut self, key: MountKey) -> Self {
        self.component = Some(key);
        self
    }

    pub fn focusable(mut self, yes: bool) -> Self {
        self.focusable = yes;
        self
    }

    pub fn on_focus(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.hooks.on_focus = Some(Box::new(f));
        self
    }

    pub fn on_blur(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.hooks.on_blur = Some(Box::new(f));
        self
    }

    pub fn on_key(mut self, f: impl FnMut(&KeyEvent) -> bool + Send + 'static) -> Self {
        self.hooks.on_key = Some(Box::new(f));
        self
    }

    pub fn on_mouse(mut self, f: impl FnMut(&MouseEvent) -> bool + Send + 'static) -> Self {
        self.hooks.on_mouse = Some(Box::new(f));
        self
    }

    pub fn on_render(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.hooks.on_render = Some(Box::new(f));
        self
    }

    pub fn on_child_added(mut self, f: impl FnMut(ElementId) + Send + 'static) -> Self {
        self.hooks.on_child_added = Some(Box::new(f));
        self
    }

    pub fn on_focusable_added(mut self, f: impl FnMut(ElementId) + Send + 'static) -> Self {
        self.hooks.on_focusable_added = Some(Box::new(f));
        self
    }

    /// Inserts the element, wires up `parent` back-references on its
    /// children, and fires `on_child_added`/`on_focusable_added` on the
    /// newly built node for each child already in place.
    pub fn build(self, tree: &mut ElementTree) -> ElementId {
        let mut node = ElementNode::new();
        node.children = self.children.clone();
        node.component = self.component;
        node.focusable = self.focusable;
        node.hooks = self.hooks;

        let id = tree.insert(node);

        for &child in &self.children {
            if let Some(child_node) = tree.get_mut(child) {
                child_node.parent = Some(id);
            }
        }
        if let Some(node) = tree.get_mut(id) {
            if let Some(on_render) = node.hooks.on_render.as_mut() {
                on_render();
            }
        }
        let children = self.children;
        if let Some(node) = tree.get_mut(id) {
            let mut on_child_added = node.hooks.on_child_added.take();
            let mut on_focusable_added = node.hooks.on_focusable_added.take();
            if on_child_added.is_some() || on_focusable_added.is_some() {
                for &child in &children {
                    if let Some(f) = on_child_added.as_mut() {
                        f(child);
                    }
                    let is_focusable = tree.get(child).map(|n| n.focusable).unwrap_or(false);
                    if is_focusable {
                        if let Some(f) = on_focusable_added.as_mut() {
                            f(child);
                        }
                    }
                }
            }
            if let Some(node) = tree.get_mut(id) {
                node.hooks.on_child_added = on_child_added;
                node.hooks.on_focusable_added = on_focusable_added;
            }
        }
        id
    }
}

//--------------------------------------------------------------------------------------------------
// Component
//--------------------------------------------------------------------------------------------------

/// Work a component's `Init` hook schedules for undo when it's unmounted.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// A mounted UI component. `render` is the only required capability; the
/// rest default to no-ops so implementors override only what they use.
pub trait Component: Any + Send {
    /// Builds this frame's subtree. `app` is the handle components use to
    /// create/read `State`, bind `EventBus`es, and queue events.
    fn render(&mut self, app: &AppHandle, tree: &mut ElementTree) -> ElementId;

    /// Runs once, the first time this component is mounted at its slot.
    /// The returned cleanup (if any) runs when the slot is later swept.
    fn init(&mut self, _app: &AppHandle) -> Option<Cleanup> {
        None
    }

    /// Called on an already-mounted instance when reconciliation finds a
    /// fresh instance from the same factory call site; `fresh` is that new
    /// instance, offered for prop extraction via [`Component::as_any`].
    fn update_props(&mut self, _fresh: &dyn Component) {}

    /// Key bindings this component contributes to the dispatch table.
    fn key_map(&self) -> Vec<KeyBinding> {
        Vec::new()
    }

    /// Handles a mouse event hit-tested to this component's element.
    /// Returns whether it was consumed.
    fn handle_mouse(&mut self, _event: &MouseEvent) -> bool {
        false
    }

    /// Scheduled producers to start against the current root's stop scope.
    fn watchers(&self) -> Vec<Watcher> {
        Vec::new()
    }

    /// Called once per mount with the owning app, before `render`.
    fn bind_app(&mut self, _app: &AppHandle) {}

    /// Paints this frame's tree into `buffer`. Layout is an opaque concern
    /// to the core: a component decides for itself how its subtree maps
    /// onto cells, given the buffer region it's handed. The default does
    /// nothing, matching the "render builds structure, paint renders it"
    /// split used by the root of a non-painting tree (e.g. a pure data
    /// component with no visual output of its own).
    fn paint(&self, _app: &AppHandle, _tree: &ElementTree, _buffer: &mut crate::buffer::Buffer) {}

    fn as_any(&self) -> &dyn Any;
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_reuses_slots_with_bumped_generation() {
        let mut tree = ElementTree::new();
        let a = ElementBuilder::new().build(&mut tree);
        assert!(tree.get(a).is_some());
        let removed = tree.remove(a);
        assert!(removed.is_some());
        assert!(tree.get(a).is_none(), "stale id must not resolve after removal");

        let b = ElementBuilder::new().build(&mut tree);
        assert_eq!(b.index, a.index, "freed slot should be reused");
        assert_ne!(b.generation, a.generation, "generation must bump on reuse");
    }

    #[test]
    fn builder_wires_parent_back_references() {
        let mut tree = ElementTree::new();
        let child = ElementBuilder::new().build(&mut tree);
        let parent = ElementBuilder::new().child(child).build(&mut tree);
        assert_eq!(tree.get(child).unwrap().parent, Some(parent));
        assert_eq!(tree.get(parent).unwrap().children, vec![child]);
    }

    #[test]
    fn dfs_visits_preorder() {
        let mut tree = ElementTree::new();
        let leaf_a = ElementBuilder::new().build(&mut tree);
        let leaf_b = ElementBuilder::new().build(&mut tree);
        let mid = ElementBuilder::new().child(leaf_a).child(leaf_b).build(&mut tree);
        let root = ElementBuilder::new().child(mid).build(&mut tree);

        let order = tree.dfs(root);
        assert_eq!(order, vec![root, mid, leaf_a, leaf_b]);
    }

    #[test]
    fn child_added_hooks_fire_for_each_child_once() {
        let mut tree = ElementTree::new();
        let focusable_child = ElementBuilder::new().focusable(true).build(&mut tree);
        let plain_child = ElementBuilder::new().build(&mut tree);

        let added = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let added2 = std::sync::Arc::clone(&added);
        let focusable_added = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let focusable_added2 = std::sync::Arc::clone(&focusable_added);

        ElementBuilder::new()
            .child(focusable_child)
            .child(plain_child)
            .on_child_added(move |id| added2.lock().unwrap().push(id))
            .on_focusable_added(move |id| focusable_added2.lock().unwrap().push(id))
            .build(&mut tree);

        assert_eq!(*added.lock().unwrap(), vec![focusable_child, plain_child]);
        assert_eq!(*focusable_added.lock().unwrap(), vec![focusable_child]);
    }

    #[test]
    fn hit_test_finds_deepest_matching_element() {
        let mut tree = ElementTree::new();
        let child = ElementBuilder::new().build(&mut tree);
        let root = ElementBuilder::new().child(child).build(&mut tree);

        let bounds = move |id: ElementId| -> Option<(u16, u16, u16, u16)> {
            if id == root {
                Some((0, 0, 10, 10))
            } else if id == child {
                Some((2, 2, 4, 4))
            } else {
                None
            }
        };

        assert_eq!(tree.hit_test(root, 3, 3, bounds), Some(child));
        assert_eq!(tree.hit_test(root, 8, 8, bounds), Some(root));
        assert_eq!(tree.hit_test(root, 20, 20, bounds), None);
    }
}
