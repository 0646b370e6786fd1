// The caching logic is used to process surface synchronization. It creates
// an effective decoupling between the moment the client sends wl_surface.commit
// and the moment where the state that was commited is actually applied.
//
// Every double-buffered type `T` of a surface lives in a `CachedState<T>`, the full
// state of a surface being the set of them, as modelled by the `MultiCache`:
//
// - The protocol handlers mutably access the `pending` state to modify it according to
//   the client requests
// - On commit, a snapshot of this pending state is created by invoking `Cacheable::commit`.
//   For a desynchronized surface it is merged right away into the `current` state. For a
//   synchronized subsurface it is merged into the `cached` slot instead, where successive
//   commits accumulate.
// - When the parent of a synchronized subsurface commits, the `cached` slot is merged into
//   the `current` state.

use std::cell::{Cell, RefCell, RefMut};

use downcast_rs::{impl_downcast, Downcast};

use crate::server::DisplayHandle;

/// Trait representing a value that can be used in double-buffered storage
///
/// The type needs to implement the [`Default`] trait, which will be used
/// to initialize. You further need to provide two methods:
/// [`Cacheable::commit`] and [`Cacheable::merge_into`].
///
/// Double-buffered state works by having a "pending" instance of your type,
/// into which new values provided by the client are inserted. When the client
/// sends `wl_surface.commit`, the [`Cacheable::commit`] method will be
/// invoked on your value. This method is expected to produce a new instance of
/// your type, that will eventually be merged into the current state.
///
/// Then the [`Cacheable::merge_into`] method of your type will be invoked. In this
/// method, `self` acts as the update that should be merged into the state provided as
/// argument. Only the values the client actually changed since the previous commit
/// should be carried over, the other ones must be left untouched.
pub trait Cacheable: Default {
    /// Produce a new state to be cached from the pending state
    fn commit(&mut self, dh: &DisplayHandle) -> Self;
    /// Merge a state update into another state
    fn merge_into(self, into: &mut Self, dh: &DisplayHandle);
}

struct CachedState<T> {
    pending: T,
    cached: Option<T>,
    current: T,
}

impl<T: Default> Default for CachedState<T> {
    fn default() -> Self {
        CachedState {
            pending: T::default(),
            cached: None,
            current: T::default(),
        }
    }
}

trait Cache: Downcast {
    fn commit(&self, to_cache: bool, dh: &DisplayHandle);
    fn apply_cached(&self, dh: &DisplayHandle);
    fn has_cached(&self) -> bool;
}

impl_downcast!(Cache);

impl<T: Cacheable + 'static> Cache for RefCell<CachedState<T>> {
    fn commit(&self, to_cache: bool, dh: &DisplayHandle) {
        let mut guard = self.borrow_mut();
        let me = &mut *guard;
        let new_state = me.pending.commit(dh);
        if to_cache {
            match me.cached {
                Some(ref mut cached) => new_state.merge_into(cached, dh),
                None => me.cached = Some(new_state),
            }
        } else {
            if let Some(cached) = me.cached.take() {
                cached.merge_into(&mut me.current, dh);
            }
            new_state.merge_into(&mut me.current, dh);
        }
    }

    fn apply_cached(&self, dh: &DisplayHandle) {
        let mut guard = self.borrow_mut();
        let me = &mut *guard;
        if let Some(cached) = me.cached.take() {
            cached.merge_into(&mut me.current, dh);
        }
    }

    fn has_cached(&self) -> bool {
        self.borrow().cached.is_some()
    }
}

/// A typemap-like container for double-buffered values
///
/// All values inserted into this container must implement the [`Cacheable`] trait,
/// which defines their buffering semantics. They furthermore must be `Send` as the surface state
/// can be accessed from multiple threads (but `Sync` is not required, the surface internally synchronizes
/// access to its state).
///
/// Consumers of surface state will mostly be concerned with the [`MultiCache::current`] method, which
/// gives access to the current state of the surface for a particular type.
///
/// Writers of protocol extensions logic will mostly be concerned with the [`MultiCache::pending`] method,
/// which provides access to the pending state of the surface, in which new state from clients will be
/// stored.
///
/// This container has [`RefCell`]-like semantics: values of multiple stored types can be accessed at the
/// same time. The stored values are initialized lazily the first time `current()` or `pending()` are
/// invoked with this type as argument.
pub struct MultiCache {
    caches: appendlist::AppendList<Box<dyn Cache + Send>>,
    // set by any access to a pending state, cleared on commit
    touched: Cell<bool>,
}

impl std::fmt::Debug for MultiCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCache").finish_non_exhaustive()
    }
}

impl MultiCache {
    pub(crate) fn new() -> Self {
        Self {
            caches: appendlist::AppendList::new(),
            touched: Cell::new(false),
        }
    }

    fn find_or_insert<T: Cacheable + Send + 'static>(&self) -> &RefCell<CachedState<T>> {
        for cache in &self.caches {
            if let Some(v) = (**cache).as_any().downcast_ref() {
                return v;
            }
        }
        // if we reach here, then the value is not yet in the list, insert it
        self.caches
            .push(Box::new(RefCell::new(CachedState::<T>::default())) as Box<_>);
        match (*self.caches[self.caches.len() - 1]).as_any().downcast_ref() {
            Some(cache) => cache,
            None => unreachable!("the cache was just inserted with this type"),
        }
    }

    /// Access the pending state associated with type `T`
    ///
    /// Accessing the pending state marks the container as having changes to commit.
    pub fn pending<T: Cacheable + Send + 'static>(&self) -> RefMut<'_, T> {
        self.touched.set(true);
        RefMut::map(self.find_or_insert::<T>().borrow_mut(), |cs| &mut cs.pending)
    }

    /// Access the current state associated with type `T`
    pub fn current<T: Cacheable + Send + 'static>(&self) -> RefMut<'_, T> {
        RefMut::map(self.find_or_insert::<T>().borrow_mut(), |cs| &mut cs.current)
    }

    /// Check if the container currently contains values for type `T`
    pub fn has<T: Cacheable + Send + 'static>(&self) -> bool {
        self.caches
            .iter()
            .any(|c| (**c).as_any().is::<RefCell<CachedState<T>>>())
    }

    /// Access every instance of `T`: pending, cached if any, and current
    pub(crate) fn for_each_state<T: Cacheable + Send + 'static>(&self, mut f: impl FnMut(&mut T)) {
        let mut guard = self.find_or_insert::<T>().borrow_mut();
        let me = &mut *guard;
        f(&mut me.pending);
        if let Some(cached) = me.cached.as_mut() {
            f(cached);
        }
        f(&mut me.current);
    }

    /// Whether a pending state was accessed since the last commit
    pub(crate) fn has_pending_changes(&self) -> bool {
        self.touched.get()
    }

    /// Force the next commit to go through even if no pending state was accessed
    pub(crate) fn mark_changed(&self) {
        self.touched.set(true);
    }

    /// Whether some committed state is waiting for the parent commit
    pub fn has_cached_state(&self) -> bool {
        self.caches.iter().any(|c| c.has_cached())
    }

    /// Commits the pending state, invoking Cacheable::commit()
    ///
    /// With `to_cache`, the committed state is accumulated in the cached slot instead of being
    /// applied. Otherwise any previously cached state is applied first, then the new one.
    pub(crate) fn commit(&mut self, to_cache: bool, dh: &DisplayHandle) {
        // none of the underlying borrow_mut() can panic, as we hold
        // a &mut reference to the container, non are borrowed.
        for cache in &self.caches {
            cache.commit(to_cache, dh);
        }
        self.touched.set(false);
    }

    /// Apply the cached state, if any, to the current one
    pub(crate) fn apply_cached(&mut self, dh: &DisplayHandle) {
        for cache in &self.caches {
            cache.apply_cached(dh);
        }
    }
}
