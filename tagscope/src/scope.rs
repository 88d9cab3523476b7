use bitflags::bitflags;

use crate::{EntityId, ObjectModel, RefinementSet, RefinementStore, RefinementsId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScopeFlags: u8 {
        const PUSHED_BY_EVAL = 1 << 0;
        /// the refinement handle is shared with another frame
        const REFINEMENT_SHARED = 1 << 1;
        /// `class << obj`: resolution goes through the singleton class
        const SINGLETON = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Protected,
}

/// Defaults applied to methods defined while a frame is innermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScopeVisibility {
    pub method: Visibility,
    pub module_function: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One lexical nesting level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFrame {
    entity: EntityId,
    next: Option<ScopeId>,
    flags: ScopeFlags,
    visibility: ScopeVisibility,
    refinements: Option<RefinementsId>,
}

impl ScopeFrame {
    #[inline]
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    #[inline]
    pub fn next(&self) -> Option<ScopeId> {
        self.next
    }

    #[inline]
    pub fn flags(&self) -> ScopeFlags {
        self.flags
    }

    #[inline]
    pub fn visibility(&self) -> ScopeVisibility {
        self.visibility
    }

    #[inline]
    pub fn refinements(&self) -> Option<RefinementsId> {
        self.refinements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionStats {
    pub scopes_freed: usize,
    pub refinements_freed: usize,
    pub live_scopes: usize,
}

/// Arena of scope frames. Chains share their tails, so frames are only
/// reclaimed by [`ScopeArena::collect`] once no root reaches them.
///
/// # Panics
///
/// Methods taking a [`ScopeId`] panic when handed a handle that `collect`
/// already freed. Callers holding handles across a collection must pass
/// them as roots; [`ScopeArena::get`] checks a handle without panicking.
#[derive(Debug)]
pub struct ScopeArena {
    frames: Vec<Option<ScopeFrame>>,
    free: Vec<u32>,
    refinements: RefinementStore,
    top: ScopeId,
}

impl ScopeArena {
    /// Creates the arena with its top-level frame for `toplevel`, whose
    /// methods default to private.
    pub fn new(toplevel: EntityId) -> Self {
        let top = ScopeFrame {
            entity: toplevel,
            next: None,
            flags: ScopeFlags::empty(),
            visibility: ScopeVisibility {
                method: Visibility::Private,
                module_function: false,
            },
            refinements: None,
        };
        Self {
            frames: vec![Some(top)],
            free: Vec::new(),
            refinements: RefinementStore::new(),
            top: ScopeId(0),
        }
    }

    #[inline]
    pub fn top(&self) -> ScopeId {
        self.top
    }

    pub fn len(&self) -> usize {
        self.frames.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn refinement_store(&self) -> &RefinementStore {
        &self.refinements
    }

    pub fn get(&self, id: ScopeId) -> Option<&ScopeFrame> {
        self.frames.get(id.index())?.as_ref()
    }

    fn frame(&self, id: ScopeId) -> &ScopeFrame {
        self.get(id).expect("dangling scope handle")
    }

    fn frame_mut(&mut self, id: ScopeId) -> &mut ScopeFrame {
        self.frames
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("dangling scope handle")
    }

    fn insert(&mut self, frame: ScopeFrame) -> ScopeId {
        match self.free.pop() {
            Some(index) => {
                self.frames[index as usize] = Some(frame);
                ScopeId(index)
            }
            None => {
                self.frames.push(Some(frame));
                ScopeId(self.frames.len() as u32 - 1)
            }
        }
    }

    /// Opens a lexical scope for `entity` nested in `parent`. The parent is
    /// left untouched; an inherited refinement handle becomes shared.
    pub fn push(&mut self, parent: ScopeId, entity: EntityId, is_eval: bool) -> ScopeId {
        let refinements = self.frame(parent).refinements;
        let mut flags = ScopeFlags::empty();
        flags.set(ScopeFlags::PUSHED_BY_EVAL, is_eval);
        if let Some(handle) = refinements {
            self.refinements.retain(handle);
            flags.insert(ScopeFlags::REFINEMENT_SHARED);
        }
        let id = self.insert(ScopeFrame {
            entity,
            next: Some(parent),
            flags,
            visibility: ScopeVisibility::default(),
            refinements,
        });
        log::trace!("push scope {} over {}", id.index(), parent.index());
        id
    }

    /// Copies `id` with its own refinement set. The copy keeps the
    /// original's `next`, so both chains share the same tail.
    pub fn duplicate(&mut self, id: ScopeId) -> ScopeId {
        let mut frame = self.frame(id).clone();
        frame.refinements = frame
            .refinements
            .map(|handle| self.refinements.duplicate(handle));
        frame.flags.remove(ScopeFlags::REFINEMENT_SHARED);
        let copy = self.insert(frame);
        log::debug!("duplicated scope {} as {}", id.index(), copy.index());
        copy
    }

    /// Returns a frame whose refinement set may be mutated: `id` itself when
    /// nothing else holds its set, a private copy otherwise.
    pub fn duplicate_if_shared(&mut self, id: ScopeId) -> ScopeId {
        let frame = self.frame(id);
        let shared = frame.flags.contains(ScopeFlags::REFINEMENT_SHARED)
            || frame
                .refinements
                .is_some_and(|handle| self.refinements.holders(handle) > 1);
        if shared { self.duplicate(id) } else { id }
    }

    // accessors

    pub fn entity(&self, id: ScopeId) -> EntityId {
        self.frame(id).entity
    }

    pub fn next(&self, id: ScopeId) -> Option<ScopeId> {
        self.frame(id).next
    }

    pub fn flags(&self, id: ScopeId) -> ScopeFlags {
        self.frame(id).flags
    }

    pub fn visibility(&self, id: ScopeId) -> ScopeVisibility {
        self.frame(id).visibility
    }

    pub fn set_visibility(&mut self, id: ScopeId, method: Visibility) {
        let frame = self.frame_mut(id);
        frame.visibility.method = method;
        frame.visibility.module_function = false;
    }

    /// `module_function` with no arguments: later definitions become private
    /// instance methods plus public singleton copies.
    pub fn set_module_function(&mut self, id: ScopeId) {
        self.frame_mut(id).visibility = ScopeVisibility {
            method: Visibility::Private,
            module_function: true,
        };
    }

    pub fn is_singleton(&self, id: ScopeId) -> bool {
        self.frame(id).flags.contains(ScopeFlags::SINGLETON)
    }

    pub fn set_singleton(&mut self, id: ScopeId) {
        self.frame_mut(id).flags.insert(ScopeFlags::SINGLETON);
    }

    pub fn pushed_by_eval(&self, id: ScopeId) -> bool {
        self.frame(id).flags.contains(ScopeFlags::PUSHED_BY_EVAL)
    }

    pub fn set_pushed_by_eval(&mut self, id: ScopeId) {
        self.frame_mut(id).flags.insert(ScopeFlags::PUSHED_BY_EVAL);
    }

    pub fn is_refinement_shared(&self, id: ScopeId) -> bool {
        self.frame(id).flags.contains(ScopeFlags::REFINEMENT_SHARED)
    }

    /// Marks `id` as one of several owners of its refinement set, so the
    /// next activation through it copies first.
    pub fn set_refinement_shared(&mut self, id: ScopeId) {
        self.frame_mut(id).flags.insert(ScopeFlags::REFINEMENT_SHARED);
    }

    pub fn unset_refinement_shared(&mut self, id: ScopeId) {
        self.frame_mut(id).flags.remove(ScopeFlags::REFINEMENT_SHARED);
    }

    pub fn refinements(&self, id: ScopeId) -> Option<RefinementsId> {
        self.frame(id).refinements
    }

    pub fn refinement_set(&self, id: ScopeId) -> Option<&RefinementSet> {
        self.refinements.get(self.refinements(id)?)
    }

    // resolution

    /// The entity methods and constants are looked up in while `id` is
    /// innermost: the frame's entity, or its singleton class for `class <<`.
    pub fn current_scope_entity(&self, id: ScopeId, model: &impl ObjectModel) -> EntityId {
        let frame = self.frame(id);
        if frame.flags.contains(ScopeFlags::SINGLETON) {
            model.class_of(frame.entity)
        } else {
            frame.entity
        }
    }

    /// Like [`Self::current_scope_entity`], but creates the singleton class
    /// when needed. Used when defining methods.
    pub fn class_for_definition(&self, id: ScopeId, model: &mut impl ObjectModel) -> EntityId {
        let frame = self.frame(id);
        if frame.flags.contains(ScopeFlags::SINGLETON) {
            model.singleton_class(frame.entity)
        } else {
            frame.entity
        }
    }

    /// Constant-definition base: the definition target of the first frame
    /// not pushed by eval.
    pub fn cbase(&self, id: ScopeId, model: &mut impl ObjectModel) -> EntityId {
        let base = self
            .walk(id)
            .find(|&scope| !self.pushed_by_eval(scope))
            .unwrap_or(self.top);
        self.class_for_definition(base, model)
    }

    /// Frames from `id` outward to the top.
    pub fn walk(&self, id: ScopeId) -> ScopeWalk<'_> {
        ScopeWalk {
            arena: self,
            cursor: Some(id),
            remaining: self.frames.len(),
        }
    }

    pub fn resolve(
        &self,
        id: ScopeId,
        mut predicate: impl FnMut(&ScopeFrame) -> bool,
    ) -> Option<ScopeId> {
        self.walk(id).find(|&scope| predicate(self.frame(scope)))
    }

    /// Entities visited by lexical constant lookup, innermost first. Leading
    /// eval frames are skipped and the top-level frame is never included.
    pub fn lexical_scopes<'a, M: ObjectModel>(
        &'a self,
        id: ScopeId,
        model: &'a M,
    ) -> impl Iterator<Item = EntityId> + 'a {
        self.walk(id)
            .skip_while(|&scope| self.pushed_by_eval(scope))
            .filter(|&scope| {
                self.frame(scope).next.is_some() && !self.pushed_by_eval(scope)
            })
            .map(move |scope| self.current_scope_entity(scope, model))
    }

    pub fn resolve_lexical(
        &self,
        id: ScopeId,
        model: &impl ObjectModel,
        mut predicate: impl FnMut(EntityId) -> bool,
    ) -> Option<EntityId> {
        self.lexical_scopes(id, model).find(|&entity| predicate(entity))
    }

    // refinements

    /// Activates `refinement` for `target` in the scope `id`. Returns the
    /// frame that now carries the change, a copy when `id` shared its set.
    pub fn activate_refinement(
        &mut self,
        id: ScopeId,
        target: EntityId,
        refinement: EntityId,
    ) -> ScopeId {
        let id = self.duplicate_if_shared(id);
        let handle = match self.frame(id).refinements {
            Some(handle) => handle,
            None => {
                let handle = self.refinements.allocate();
                self.frame_mut(id).refinements = Some(handle);
                handle
            }
        };
        if let Some(set) = self.refinements.get_mut(handle) {
            set.insert(target, refinement);
        }
        log::debug!(
            "scope {} refines {} with {}",
            id.index(),
            target.index(),
            refinement.index()
        );
        id
    }

    pub fn refinement_for(&self, id: ScopeId, target: EntityId) -> Option<EntityId> {
        self.refinement_set(id)?.get(&target).copied()
    }

    // reclamation

    /// Frees every frame not reachable from `roots` or the top frame, then
    /// every refinement set no surviving frame holds.
    pub fn collect(&mut self, roots: &[ScopeId]) -> CollectionStats {
        let mut marked = vec![false; self.frames.len()];
        for &root in roots.iter().chain(std::iter::once(&self.top)) {
            let mut cursor = Some(root);
            while let Some(scope) = cursor {
                if marked[scope.index()] {
                    break;
                }
                marked[scope.index()] = true;
                cursor = self.frame(scope).next;
            }
        }

        let mut stats = CollectionStats::default();
        for (index, entry) in self.frames.iter_mut().enumerate() {
            if entry.is_some() && !marked[index] {
                *entry = None;
                self.free.push(index as u32);
                stats.scopes_freed += 1;
            }
        }

        self.refinements.reset_holders();
        for frame in self.frames.iter().flatten() {
            if let Some(handle) = frame.refinements {
                self.refinements.add_holder(handle);
            }
        }
        stats.refinements_freed = self.refinements.sweep();
        stats.live_scopes = self.len();
        log::debug!("scope collection: {stats:?}");
        stats
    }
}

pub struct ScopeWalk<'a> {
    arena: &'a ScopeArena,
    cursor: Option<ScopeId>,
    remaining: usize,
}

impl Iterator for ScopeWalk<'_> {
    type Item = ScopeId;

    fn next(&mut self) -> Option<ScopeId> {
        let current = self.cursor?;
        debug_assert!(self.remaining > 0, "cycle in scope chain");
        self.remaining = self.remaining.saturating_sub(1);
        self.cursor = self.arena.frame(current).next;
        Some(current)
    }
}
