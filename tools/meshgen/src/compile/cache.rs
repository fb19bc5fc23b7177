//! Compilation cache
//!
//! Memoization keys for translator results and converted meshes, plus the
//! scope guards that keep the context stacks balanced. Stacks live behind
//! `Rc<RefCell<..>>` so a guard holds its own handle and the generation
//! context stays free for the recursive call made inside the scope.

use super::nodes::{NodeColor, NodeImage, NodeMesh, NodeObject, NodeScalar, NodeSurface};
use crate::convert::MeshConversionFlags;
use crate::graph::{NodeId, PinId};
use hashbrown::HashSet;
use std::cell::RefCell;
use std::rc::Rc;

/// Translator family of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Translator {
    Mesh,
    Scalar,
    Color,
    Image,
    Surface,
    Object,
}

/// Morph stack entry as it takes part in cache keys
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MorphKey {
    pub node: NodeId,
    pub morph_name: String,
}

/// Key of one translator evaluation
///
/// Mesh-only state (flags, morph stack, connected-LOD restriction) is left
/// at its default for the other translators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneratedKey {
    pub translator: Translator,
    pub pin: PinId,
    /// Current LOD when the node depends on it, else 0
    pub lod: u32,
    pub macro_context: Vec<NodeId>,
    pub flags: MeshConversionFlags,
    pub morph_stack: Vec<MorphKey>,
    pub only_connected_lod: bool,
    pub component: Option<String>,
}

/// Cached translator result; failures are cached too
#[derive(Debug, Clone)]
pub enum GeneratedNode {
    Mesh(Option<Rc<NodeMesh>>),
    Scalar(Option<Rc<NodeScalar>>),
    Color(Option<Rc<NodeColor>>),
    Image(Option<Rc<NodeImage>>),
    Surface(Option<Rc<NodeSurface>>),
    Object(Option<Rc<NodeObject>>),
}

/// Key of one converted mesh section
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshCacheKey {
    pub mesh: String,
    /// `None` when no LOD/section of the asset matches
    pub lod: Option<u32>,
    pub current_lod: u32,
    pub section: Option<u32>,
    pub flags: MeshConversionFlags,
    /// Tags that make this conversion distinct from the same section elsewhere
    pub unique_tags: String,
    pub node: NodeId,
}

/// Pin currently being evaluated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleKey {
    pub pin: PinId,
    pub translator: Translator,
    pub macro_context: Option<NodeId>,
}

pub type SharedStack<T> = Rc<RefCell<Vec<T>>>;

/// Pushes on creation, pops exactly once on drop
#[must_use]
pub struct ScopedPush<T> {
    stack: SharedStack<T>,
}

impl<T> ScopedPush<T> {
    pub fn new(stack: &SharedStack<T>, value: T) -> Self {
        stack.borrow_mut().push(value);
        Self {
            stack: Rc::clone(stack),
        }
    }
}

impl<T> Drop for ScopedPush<T> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

/// Pops on creation, pushes the same value back on drop
#[must_use]
pub struct ScopedPop<T> {
    stack: SharedStack<T>,
    value: Option<T>,
}

impl<T> ScopedPop<T> {
    /// `None` when the stack is empty
    pub fn new(stack: &SharedStack<T>) -> Option<Self> {
        let value = stack.borrow_mut().pop()?;
        Some(Self {
            stack: Rc::clone(stack),
            value: Some(value),
        })
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

impl<T> Drop for ScopedPop<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.stack.borrow_mut().push(value);
        }
    }
}

/// Marks a key as being evaluated until dropped
#[must_use]
pub struct CycleGuard {
    visiting: Rc<RefCell<HashSet<CycleKey>>>,
    key: CycleKey,
}

impl CycleGuard {
    /// `None` when the key is already being evaluated higher up
    pub fn enter(visiting: &Rc<RefCell<HashSet<CycleKey>>>, key: CycleKey) -> Option<Self> {
        if !visiting.borrow_mut().insert(key.clone()) {
            return None;
        }
        Some(Self {
            visiting: Rc::clone(visiting),
            key,
        })
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.visiting.borrow_mut().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pin: u32) -> CycleKey {
        CycleKey {
            pin: PinId(pin),
            translator: Translator::Mesh,
            macro_context: None,
        }
    }

    #[test]
    fn test_scoped_push_pops_on_early_return() {
        let stack: SharedStack<u32> = Rc::new(RefCell::new(vec![1]));

        fn nested(stack: &SharedStack<u32>, fail: bool) -> Option<u32> {
            let _outer = ScopedPush::new(stack, 2);
            let _inner = ScopedPush::new(stack, 3);
            if fail {
                return None;
            }
            stack.borrow().last().copied()
        }

        assert_eq!(nested(&stack, false), Some(3));
        assert_eq!(nested(&stack, true), None);
        assert_eq!(*stack.borrow(), vec![1]);
    }

    #[test]
    fn test_scoped_pop_restores_value() {
        let stack: SharedStack<&str> = Rc::new(RefCell::new(vec!["outer", "inner"]));
        {
            let scope = ScopedPop::new(&stack).unwrap();
            assert_eq!(scope.value(), Some(&"inner"));
            assert_eq!(*stack.borrow(), vec!["outer"]);
        }
        assert_eq!(*stack.borrow(), vec!["outer", "inner"]);

        let empty: SharedStack<&str> = Rc::new(RefCell::new(Vec::new()));
        assert!(ScopedPop::new(&empty).is_none());
    }

    #[test]
    fn test_cycle_guard_rejects_reentry() {
        let visiting = Rc::new(RefCell::new(HashSet::new()));
        let outer = CycleGuard::enter(&visiting, key(1)).unwrap();
        assert!(CycleGuard::enter(&visiting, key(1)).is_none());
        assert!(CycleGuard::enter(&visiting, key(2)).is_some());

        let other_macro = CycleKey {
            macro_context: Some(NodeId(9)),
            ..key(1)
        };
        assert!(CycleGuard::enter(&visiting, other_macro).is_some());

        drop(outer);
        assert!(visiting.borrow().is_empty());
        assert!(CycleGuard::enter(&visiting, key(1)).is_some());
    }
}
