//! Type-indexed storage for data attached to protocol objects

use std::any::Any;

use once_cell::sync::OnceCell;

use self::list::AppendList;

/// A wrapper for a single value of any thread-safe type, set at most once
#[derive(Debug, Default)]
pub struct UserData {
    inner: OnceCell<Box<dyn Any + Send + Sync>>,
}

impl UserData {
    /// Create a new, empty UserData
    pub const fn new() -> UserData {
        UserData {
            inner: OnceCell::new(),
        }
    }

    /// Sets the UserData to a given value
    ///
    /// Does nothing if the UserData had already been set.
    pub fn set<T: Any + Send + Sync, F: FnOnce() -> T>(&self, f: F) {
        self.inner.get_or_init(|| Box::new(f()));
    }

    /// Attempt to access the wrapped user data
    ///
    /// Returns `None` if the requested type does not match the stored one.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.inner.get().and_then(|val| (**val).downcast_ref::<T>())
    }
}

/// A storage able to store several values of different types.
/// It behaves similarly to a `TypeMap`.
#[derive(Debug)]
pub struct UserDataMap {
    list: AppendList<UserData>,
}

impl Default for UserDataMap {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDataMap {
    /// Create a new map
    pub fn new() -> UserDataMap {
        UserDataMap {
            list: AppendList::new(),
        }
    }

    /// Attempt to access the wrapped user data of a given type
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.list.iter().find_map(|user_data| user_data.get::<T>())
    }

    /// Insert a value in the map if it was not already there
    ///
    /// Returns `true` if the value was inserted.
    pub fn insert_if_missing<T: Any + Send + Sync, F: FnOnce() -> T>(&self, init: F) -> bool {
        if self.get::<T>().is_some() {
            return false;
        }
        let data = UserData::new();
        data.set(init);
        self.list.append(data);
        true
    }

    /// Access the user data of a given type, initializing it if required
    pub fn get_or_insert<T: Any + Send + Sync, F: FnOnce() -> T>(&self, init: F) -> &T {
        self.insert_if_missing(init);
        match self.get::<T>() {
            Some(data) => data,
            // the value was inserted just above
            None => unreachable!(),
        }
    }
}

mod list {
    //! Lock-free append-only list
    //!
    //! Nodes are never removed before the list is dropped, so a reference obtained through
    //! `iter` lives as long as the borrow of the list.

    use std::{
        marker::PhantomData,
        ptr,
        sync::atomic::{AtomicPtr, Ordering},
    };

    #[derive(Debug)]
    struct Node<T> {
        value: T,
        next: AtomicPtr<Node<T>>,
    }

    #[derive(Debug)]
    pub struct AppendList<T> {
        head: AtomicPtr<Node<T>>,
        _owns: PhantomData<Box<Node<T>>>,
    }

    // Appending through a shared reference moves values across threads and every thread can
    // read them, hence both bounds for both traits.
    unsafe impl<T: Send + Sync> Send for AppendList<T> {}
    unsafe impl<T: Send + Sync> Sync for AppendList<T> {}

    impl<T> AppendList<T> {
        pub fn new() -> Self {
            AppendList {
                head: AtomicPtr::new(ptr::null_mut()),
                _owns: PhantomData,
            }
        }

        pub fn append(&self, value: T) {
            let node = Box::into_raw(Box::new(Node {
                value,
                next: AtomicPtr::new(ptr::null_mut()),
            }));
            let mut slot = &self.head;
            loop {
                match slot.compare_exchange_weak(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => return,
                    // SAFETY: published nodes are only freed when the list is dropped
                    Err(current) if !current.is_null() => slot = unsafe { &(*current).next },
                    Err(_) => {}
                }
            }
        }

        pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
            let mut slot = &self.head;
            std::iter::from_fn(move || {
                let node = slot.load(Ordering::Acquire);
                if node.is_null() {
                    return None;
                }
                // SAFETY: published nodes are only freed when the list is dropped
                let node = unsafe { &*node };
                slot = &node.next;
                Some(&node.value)
            })
        }
    }

    impl<T> Drop for AppendList<T> {
        fn drop(&mut self) {
            let mut node = std::mem::replace(self.head.get_mut(), ptr::null_mut());
            while !node.is_null() {
                // SAFETY: every node was created by `Box::into_raw` and is owned by the list
                let mut boxed = unsafe { Box::from_raw(node) };
                node = std::mem::replace(boxed.next.get_mut(), ptr::null_mut());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UserDataMap;

    #[test]
    fn insert_twice_keeps_first() {
        let map = UserDataMap::new();
        assert!(map.insert_if_missing(|| 17i32));
        assert!(!map.insert_if_missing(|| 42i32));
        assert_eq!(map.get::<i32>(), Some(&17));
    }

    #[test]
    fn distinct_types_coexist() {
        let map = UserDataMap::new();
        map.insert_if_missing(|| 1u8);
        let s = map.get_or_insert(|| String::from("seat0"));
        assert_eq!(s, "seat0");
        assert_eq!(map.get::<u8>(), Some(&1));
        assert!(map.get::<u16>().is_none());
    }

    #[test]
    fn shared_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<UserDataMap>();

        let map = std::sync::Arc::new(UserDataMap::new());
        let handles = (0..4u32)
            .map(|i| {
                let map = map.clone();
                std::thread::spawn(move || {
                    match i {
                        0 => map.insert_if_missing(|| 0u8),
                        1 => map.insert_if_missing(|| 1u16),
                        2 => map.insert_if_missing(|| 2u32),
                        _ => map.insert_if_missing(|| 3u64),
                    };
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.get::<u8>(), Some(&0));
        assert_eq!(map.get::<u16>(), Some(&1));
        assert_eq!(map.get::<u32>(), Some(&2));
        assert_eq!(map.get::<u64>(), Some(&3));
    }
}
