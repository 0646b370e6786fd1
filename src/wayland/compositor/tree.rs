use std::{any::Any, fmt, sync::Arc, sync::Mutex};

use tracing::trace;

use crate::{
    protocol::{wl_buffer::WlBuffer, wl_surface::WlSurface},
    server::{DisplayHandle, Resource},
    utils::{user_data::UserDataMap, Logical, Rectangle, Size},
    wayland::buffer::{self, BufferData},
};

use super::{
    cache::MultiCache, handlers::SubsurfaceState, AlreadyHasRole, BufferAssignment, Damage, SurfaceAttributes,
    SurfaceData, SurfaceUserData,
};

/// Identifier of a commit or destruction hook, used to remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

pub(crate) type CommitHook = dyn Fn(&mut dyn Any, &DisplayHandle, &Resource<WlSurface>) + Send + Sync;
pub(crate) type DestructionHook = dyn Fn(&mut dyn Any, &Resource<WlSurface>) + Send + Sync;

struct Hook<T: ?Sized> {
    id: HookId,
    cb: Arc<T>,
}

impl<T: ?Sized> Clone for Hook<T> {
    fn clone(&self) -> Self {
        Hook {
            id: self.id,
            cb: self.cb.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Hook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Node of a surface tree
///
/// The tree is bidirectional: a surface knows its parent and its children. Strong handles are
/// used in both directions, the links are broken when either side is destroyed so nothing
/// leaks. Cycles cannot be created, `wl_subcompositor.get_subsurface` refuses them.
#[derive(Debug)]
pub(crate) struct PrivateSurfaceData {
    parent: Option<Resource<WlSurface>>,
    /// Children in stacking order, as of the last applied state
    children: Vec<Resource<WlSurface>>,
    /// Children in stacking order, as requested by the client
    pending_children: Vec<Resource<WlSurface>>,
    public_data: SurfaceData,
    pre_commit_hooks: Vec<Hook<CommitHook>>,
    post_commit_hooks: Vec<Hook<CommitHook>>,
    destruction_hooks: Vec<Hook<DestructionHook>>,
    next_hook_id: u64,
    mapped: bool,
    size: Option<Size<i32, Logical>>,
    committed_buffer: Option<Resource<WlBuffer>>,
    /// A synchronized commit is waiting for the parent state to be applied
    cached_commit: bool,
}

/// Where to place a subsurface relative to another one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    Before,
    After,
}

/// Possible actions to do after handling a node during tree traversal
#[derive(Debug)]
pub enum TraversalAction<T> {
    /// Traverse its children as well, providing them the data T
    DoChildren(T),
    /// Skip its children
    SkipChildren,
    /// Stop traversal completely
    Break,
}

/// What changed when a surface state was applied
#[derive(Debug, Default)]
pub(crate) struct CommitOutcome {
    pub(crate) mapped: bool,
    pub(crate) unmapped: bool,
    pub(crate) damage: Vec<Rectangle<i32, Logical>>,
    pub(crate) size_changed: Option<Option<Size<i32, Logical>>>,
}

fn lock(surface: &Resource<WlSurface>) -> std::sync::MutexGuard<'_, PrivateSurfaceData> {
    surface
        .data::<SurfaceUserData>()
        .expect("Accessing the data of foreign surfaces is not supported.")
        .inner
        .lock()
        .unwrap()
}

impl PrivateSurfaceData {
    pub(crate) fn new() -> Mutex<PrivateSurfaceData> {
        Mutex::new(PrivateSurfaceData {
            parent: None,
            children: Vec::new(),
            pending_children: Vec::new(),
            public_data: SurfaceData {
                role: None,
                data_map: UserDataMap::new(),
                cached_state: MultiCache::new(),
            },
            pre_commit_hooks: Vec::new(),
            post_commit_hooks: Vec::new(),
            destruction_hooks: Vec::new(),
            next_hook_id: 0,
            mapped: false,
            size: None,
            committed_buffer: None,
            cached_commit: false,
        })
    }

    /// Unlink a destroyed surface from the tree and let go of its buffer
    pub(crate) fn cleanup(surface: &Resource<WlSurface>) {
        let (parent, children, buffer, callbacks) = {
            let mut my_data = lock(surface);
            let callbacks = std::mem::take(
                &mut my_data
                    .public_data
                    .cached_state
                    .current::<SurfaceAttributes>()
                    .frame_callbacks,
            );
            my_data.pending_children.clear();
            (
                my_data.parent.take(),
                std::mem::take(&mut my_data.children),
                my_data.committed_buffer.take(),
                callbacks,
            )
        };
        if let Some(parent) = parent {
            let mut parent_guard = lock(&parent);
            parent_guard.children.retain(|c| c != surface);
            parent_guard.pending_children.retain(|c| c != surface);
        }
        // orphan all our children
        for child in children {
            lock(&child).parent = None;
        }
        if let Some(buffer) = buffer {
            buffer::release(&buffer);
        }
        drop(callbacks);
    }

    /// Set the parent of a surface, giving it the subsurface role
    ///
    /// The surface only appears in the children of its parent once the parent state is applied.
    pub(crate) fn set_parent(child: &Resource<WlSurface>, parent: &Resource<WlSurface>) -> Result<(), AlreadyHasRole> {
        {
            let mut child_guard = lock(child);
            if child_guard.parent.is_some() {
                return Err(AlreadyHasRole);
            }
            match child_guard.public_data.role {
                Some(role) if role != super::SUBSURFACE_ROLE => return Err(AlreadyHasRole),
                _ => child_guard.public_data.role = Some(super::SUBSURFACE_ROLE),
            }
            child_guard.parent = Some(parent.clone());
        }
        lock(parent).pending_children.push(child.clone());
        Ok(())
    }

    /// Remove the parent of this surface, with immediate effect
    pub(crate) fn unset_parent(child: &Resource<WlSurface>) {
        let old_parent = lock(child).parent.take();
        if let Some(old_parent) = old_parent {
            let mut parent_guard = lock(&old_parent);
            parent_guard.children.retain(|c| c != child);
            parent_guard.pending_children.retain(|c| c != child);
        }
    }

    pub(crate) fn get_parent(child: &Resource<WlSurface>) -> Option<Resource<WlSurface>> {
        lock(child).parent.clone()
    }

    pub(crate) fn get_children(parent: &Resource<WlSurface>) -> Vec<Resource<WlSurface>> {
        lock(parent).children.clone()
    }

    /// Whether `ancestor` is `surface` or one of its ancestors
    pub(crate) fn is_ancestor(ancestor: &Resource<WlSurface>, surface: &Resource<WlSurface>) -> bool {
        let mut current = Some(surface.clone());
        while let Some(s) = current {
            if &s == ancestor {
                return true;
            }
            current = Self::get_parent(&s);
        }
        false
    }

    /// Reorder a subsurface relative to a sibling or to its parent
    ///
    /// Fails if `relative_to` is neither. The new order takes effect when the parent state is
    /// applied. Placing relative to the parent moves the subsurface to the bottom of the stack
    /// of its siblings.
    pub(crate) fn reorder(
        surface: &Resource<WlSurface>,
        to: Location,
        relative_to: &Resource<WlSurface>,
    ) -> Result<(), ()> {
        let parent = Self::get_parent(surface).ok_or(())?;
        let mut parent_guard = lock(&parent);
        let my_index = parent_guard
            .pending_children
            .iter()
            .position(|c| c == surface)
            .ok_or(())?;
        if &parent == relative_to {
            let me = parent_guard.pending_children.remove(my_index);
            parent_guard.pending_children.insert(0, me);
            return Ok(());
        }
        let mut other_index = parent_guard
            .pending_children
            .iter()
            .position(|c| c == relative_to)
            .ok_or(())?;
        let me = parent_guard.pending_children.remove(my_index);
        if my_index < other_index {
            other_index -= 1;
        }
        let new_index = match to {
            Location::Before => other_index,
            Location::After => other_index + 1,
        };
        parent_guard.pending_children.insert(new_index, me);
        Ok(())
    }

    pub(crate) fn give_role(surface: &Resource<WlSurface>, role: &'static str) -> Result<(), AlreadyHasRole> {
        let mut guard = lock(surface);
        match guard.public_data.role {
            Some(existing) if existing != role => Err(AlreadyHasRole),
            _ => {
                guard.public_data.role = Some(role);
                // the first commit with a role must reach the role logic
                guard.public_data.cached_state.mark_changed();
                Ok(())
            }
        }
    }

    pub(crate) fn get_role(surface: &Resource<WlSurface>) -> Option<&'static str> {
        lock(surface).public_data.role
    }

    pub(crate) fn is_mapped(surface: &Resource<WlSurface>) -> bool {
        lock(surface).mapped
    }

    pub(crate) fn surface_size(surface: &Resource<WlSurface>) -> Option<Size<i32, Logical>> {
        lock(surface).size
    }

    /// Access the public data of a surface
    ///
    /// An internal lock is held during the access, the tree cannot be manipulated at the same
    /// time.
    pub(crate) fn with_states<T, F>(surface: &Resource<WlSurface>, f: F) -> T
    where
        F: FnOnce(&SurfaceData) -> T,
    {
        let guard = lock(surface);
        f(&guard.public_data)
    }

    fn next_hook_id(&mut self) -> HookId {
        self.next_hook_id += 1;
        HookId(self.next_hook_id)
    }

    pub(crate) fn add_pre_commit_hook(surface: &Resource<WlSurface>, cb: Arc<CommitHook>) -> HookId {
        let mut guard = lock(surface);
        let id = guard.next_hook_id();
        guard.pre_commit_hooks.push(Hook { id, cb });
        id
    }

    pub(crate) fn add_post_commit_hook(surface: &Resource<WlSurface>, cb: Arc<CommitHook>) -> HookId {
        let mut guard = lock(surface);
        let id = guard.next_hook_id();
        guard.post_commit_hooks.push(Hook { id, cb });
        id
    }

    pub(crate) fn add_destruction_hook(surface: &Resource<WlSurface>, cb: Arc<DestructionHook>) -> HookId {
        let mut guard = lock(surface);
        let id = guard.next_hook_id();
        guard.destruction_hooks.push(Hook { id, cb });
        id
    }

    pub(crate) fn remove_hook(surface: &Resource<WlSurface>, hook_id: HookId) {
        let mut guard = lock(surface);
        guard.pre_commit_hooks.retain(|hook| hook.id != hook_id);
        guard.post_commit_hooks.retain(|hook| hook.id != hook_id);
        guard.destruction_hooks.retain(|hook| hook.id != hook_id);
    }

    pub(crate) fn invoke_pre_commit_hooks(state: &mut dyn Any, dh: &DisplayHandle, surface: &Resource<WlSurface>) {
        // the hooks may access the surface data, the lock must not be held
        let hooks = lock(surface).pre_commit_hooks.clone();
        for hook in hooks {
            (hook.cb)(state, dh, surface);
        }
    }

    pub(crate) fn invoke_post_commit_hooks(state: &mut dyn Any, dh: &DisplayHandle, surface: &Resource<WlSurface>) {
        let hooks = lock(surface).post_commit_hooks.clone();
        for hook in hooks {
            (hook.cb)(state, dh, surface);
        }
    }

    pub(crate) fn invoke_destruction_hooks(state: &mut dyn Any, surface: &Resource<WlSurface>) {
        let hooks = std::mem::take(&mut lock(surface).destruction_hooks);
        for hook in hooks {
            (hook.cb)(state, surface);
        }
    }

    /// Whether committing the surface now would change anything
    ///
    /// A commit changes nothing if no pending state was touched, the stacking order of the
    /// children is unchanged and none of them has a synchronized commit waiting.
    pub(crate) fn has_changes_to_commit(surface: &Resource<WlSurface>) -> bool {
        let children = {
            let guard = lock(surface);
            if guard.public_data.cached_state.has_pending_changes() || guard.children != guard.pending_children {
                return true;
            }
            guard.children.clone()
        };
        children.iter().any(|child| lock(child).cached_commit)
    }

    /// Commit the pending state of a surface
    ///
    /// For a synchronized subsurface the state is only cached. Otherwise it is applied, along
    /// with the cached state of the synchronized subsurfaces below it, parent first. The
    /// surfaces whose state was applied are returned in that order.
    pub(crate) fn commit(surface: &Resource<WlSurface>, dh: &DisplayHandle) -> Vec<(Resource<WlSurface>, CommitOutcome)> {
        let is_sync = is_effectively_sync(surface);
        let mut applied = Vec::new();
        {
            let mut guard = lock(surface);
            guard.public_data.cached_state.commit(is_sync, dh);
            guard.cached_commit = is_sync;
        }
        if is_sync {
            trace!(surface = ?surface, "caching state of synchronized subsurface");
            return applied;
        }
        Self::apply(surface, dh, false, &mut applied);
        applied
    }

    fn apply(
        surface: &Resource<WlSurface>,
        dh: &DisplayHandle,
        from_cache: bool,
        applied: &mut Vec<(Resource<WlSurface>, CommitOutcome)>,
    ) {
        let (outcome, children) = {
            let mut guard = lock(surface);
            if from_cache {
                guard.public_data.cached_state.apply_cached(dh);
                guard.cached_commit = false;
            }
            if guard.children != guard.pending_children {
                guard.children = guard.pending_children.clone();
            }
            let outcome = guard.process_current_state(surface);
            (outcome, guard.children.clone())
        };
        applied.push((surface.clone(), outcome));
        for child in children {
            let has_cached = lock(&child).cached_commit;
            if has_cached {
                Self::apply(&child, dh, true, applied);
            }
        }
    }

    /// Derive buffer usage, damage, mapping and size from the newly applied state
    fn process_current_state(&mut self, surface: &Resource<WlSurface>) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        let mut attrs = self.public_data.cached_state.current::<SurfaceAttributes>();

        let buffer = match &attrs.buffer {
            Some(BufferAssignment::NewBuffer(buffer)) => Some(buffer.clone()),
            _ => None,
        };
        if buffer != self.committed_buffer {
            if let Some(new) = &buffer {
                buffer::acquire(new);
                if let Some(data) = new.data::<BufferData>() {
                    data.track_surface(surface);
                }
            }
            if let Some(old) = self.committed_buffer.take() {
                buffer::release(&old);
            }
            self.committed_buffer = buffer.clone();
        }

        let scale = attrs.buffer_scale.max(1);
        let transform = attrs.buffer_transform;
        let buffer_size = buffer.as_ref().and_then(buffer::buffer_size);
        let size = buffer_size.map(|s| s.to_logical(scale, transform));
        let damage = std::mem::take(&mut attrs.damage);
        attrs.dirty = Default::default();
        drop(attrs);

        match (buffer_size, size) {
            (Some(buffer_size), Some(size)) => {
                let bounds = Rectangle::from_size(size);
                let damage = damage
                    .into_iter()
                    .map(|damage| match damage {
                        Damage::Surface(rect) => rect,
                        Damage::Buffer(rect) => rect.to_logical(scale, transform, &buffer_size),
                    })
                    .filter_map(|rect| rect.intersection(bounds))
                    .filter(|rect| !rect.is_empty())
                    .collect::<Vec<_>>();
                if !damage.is_empty() {
                    if !self.mapped {
                        self.mapped = true;
                        outcome.mapped = true;
                    }
                    outcome.damage = damage;
                }
            }
            _ => {
                if buffer.is_none() && self.mapped {
                    self.mapped = false;
                    outcome.unmapped = true;
                }
            }
        }

        if size != self.size {
            self.size = size;
            outcome.size_changed = Some(size);
        }
        outcome
    }

    /// Remove every reference a surface holds to a destroyed buffer
    pub(crate) fn buffer_destroyed(surface: &Resource<WlSurface>, destroyed: &Resource<WlBuffer>) {
        let mut guard = lock(surface);
        guard
            .public_data
            .cached_state
            .for_each_state::<SurfaceAttributes>(|attrs| {
                if matches!(&attrs.buffer, Some(BufferAssignment::NewBuffer(b)) if b == destroyed) {
                    attrs.buffer = Some(BufferAssignment::Removed);
                }
            });
        if guard.committed_buffer.as_ref() == Some(destroyed) {
            guard.committed_buffer = None;
            // the next commit has to notice the content is gone
            let mut pending = guard.public_data.cached_state.pending::<SurfaceAttributes>();
            if pending.buffer.is_none() {
                pending.buffer = Some(BufferAssignment::Removed);
                pending.dirty |= super::SurfaceDirty::BUFFER;
            }
        }
    }

    /// Access the data of a surface tree from top to bottom
    ///
    /// The closure is called on the surface then on its children, depth-first, topmost child
    /// first.
    pub(crate) fn map_tree<F, T>(surface: &Resource<WlSurface>, initial: &T, f: &mut F) -> bool
    where
        F: FnMut(&Resource<WlSurface>, &SurfaceData, &T) -> TraversalAction<T>,
    {
        let (action, children) = {
            let guard = lock(surface);
            (f(surface, &guard.public_data, initial), guard.children.clone())
        };
        match action {
            TraversalAction::DoChildren(t) => {
                for child in children.iter().rev() {
                    if !Self::map_tree(child, &t, f) {
                        return false;
                    }
                }
                true
            }
            TraversalAction::SkipChildren => true,
            TraversalAction::Break => false,
        }
    }
}

/// Check if a subsurface is synchronized, directly or through one of its ancestors
pub(crate) fn is_effectively_sync(surface: &Resource<WlSurface>) -> bool {
    let (parent, direct_sync) = {
        let guard = lock(surface);
        let direct_sync = guard
            .public_data
            .data_map
            .get::<SubsurfaceState>()
            .map(SubsurfaceState::is_sync)
            .unwrap_or(false);
        (guard.parent.clone(), direct_sync)
    };
    match parent {
        None => false,
        Some(_) if direct_sync => true,
        Some(parent) => is_effectively_sync(&parent),
    }
}
