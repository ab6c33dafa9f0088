//! Ref-counted, lazily-built, dependency-aware singleton cache.
//!
//! Mirrors a construction graph where values depend on other values kept in
//! the same storage: acquiring one may recursively acquire others, and
//! releasing the last reference to one may cascade into releasing the ones
//! it depended on. Disposal happens in two phases — `dispose` only queues a
//! key, `garbage_collect` is the point where destruction actually runs — so
//! that a burst of short-lived acquisitions doesn't thrash construction.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Error, Debug)]
pub enum SingletonError {
    #[error("failed to construct singleton {key}: {source}")]
    Construction {
        key: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Implemented by a type that can live inside a `SingletonStorage`. The key
/// is the type's own `type_name`, stable for the process's lifetime.
#[async_trait::async_trait]
pub trait BuildSingleton: Any + Send + Sync + Sized + 'static {
    async fn create(storage: &SingletonStorage) -> Result<Self, anyhow::Error>;
}

struct SingletonEntry {
    key: &'static str,
    storage: Weak<SingletonStorageInner>,
    refcount: AtomicUsize,
    cell: OnceCell<Arc<dyn Any + Send + Sync>>,
}

impl SingletonEntry {
    fn new(key: &'static str, storage: Weak<SingletonStorageInner>) -> Self {
        Self {
            key,
            storage,
            refcount: AtomicUsize::new(0),
            cell: OnceCell::new(),
        }
    }

    /// Called when a `SingletonRef` is dropped. If this was the last
    /// reference, the entry moves into the disposed set rather than being
    /// destroyed immediately — actual destruction happens on `garbage_collect`.
    fn unref(&self) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(storage) = self.storage.upgrade() {
                storage.dispose(self.key);
            }
        }
    }
}

struct SingletonStorageInner {
    children: Mutex<HashMap<&'static str, Arc<SingletonEntry>>>,
    disposed: Mutex<HashSet<&'static str>>,
}

impl SingletonStorageInner {
    fn dispose(&self, key: &'static str) {
        self.disposed.lock().unwrap().insert(key);
    }

    fn recycle(&self, key: &'static str) {
        self.disposed.lock().unwrap().remove(key);
    }
}

/// Owns the cache of constructed singletons for one server instance.
#[derive(Clone)]
pub struct SingletonStorage {
    inner: Arc<SingletonStorageInner>,
}

impl Default for SingletonStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SingletonStorage {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SingletonStorageInner {
                children: Mutex::new(HashMap::new()),
                disposed: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Looks up or lazily constructs the singleton of type `T`, returning a
    /// ref-counted handle. Concurrent acquirers of a not-yet-built value
    /// share the same in-flight construction.
    pub async fn acquire<T: BuildSingleton>(&self) -> Result<SingletonRef<T>, SingletonError> {
        let key = std::any::type_name::<T>();

        let entry = {
            let mut children = self.inner.children.lock().unwrap();
            if let Some(entry) = children.get(key) {
                self.inner.recycle(key);
                entry.clone()
            } else {
                let entry = Arc::new(SingletonEntry::new(key, Arc::downgrade(&self.inner)));
                children.insert(key, entry.clone());
                entry
            }
        };
        entry.refcount.fetch_add(1, Ordering::AcqRel);

        let storage_for_build = self.clone();
        let built = entry
            .cell
            .get_or_try_init(|| async move {
                T::create(&storage_for_build)
                    .await
                    .map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>)
            })
            .await;

        let value = match built {
            Ok(v) => v.clone(),
            Err(source) => {
                entry.unref();
                return Err(SingletonError::Construction { key, source });
            }
        };

        let typed = value
            .downcast::<T>()
            .expect("singleton key collided with a different type");

        Ok(SingletonRef { entry, value: typed })
    }

    /// Number of keys queued for destruction but not yet collected.
    pub fn pending_garbage_collect(&self) -> usize {
        self.inner.disposed.lock().unwrap().len()
    }

    /// Destroys every disposed-and-still-unreferenced singleton, looping
    /// because destroying one may drop the last reference on another
    /// (dependency singletons disposing in turn).
    pub fn garbage_collect(&self) -> usize {
        let mut total = 0;
        loop {
            let keys = self.move_disposed_to_delete_keys();
            if keys.is_empty() {
                break;
            }
            let mut children = self.inner.children.lock().unwrap();
            for key in &keys {
                children.remove(key);
            }
            drop(children);
            total += keys.len();
        }
        total
    }

    fn move_disposed_to_delete_keys(&self) -> Vec<&'static str> {
        let mut disposed = self.inner.disposed.lock().unwrap();
        if disposed.is_empty() {
            return Vec::new();
        }
        let keys: Vec<&'static str> = disposed.drain().collect();
        keys
    }

    /// Full garbage collection followed by detaching any entries that are
    /// still externally referenced, so they free themselves independently
    /// once their last `SingletonRef` drops instead of leaking back into a
    /// storage that's going away.
    pub fn clear(&self) {
        self.garbage_collect();
        // Any entries still here are externally referenced. Dropping our
        // map's Arc clone doesn't destroy them — the caller's SingletonRef
        // keeps the Arc<SingletonEntry> alive, and its Weak<storage> link
        // still resolves (storage.inner stays alive independently of this
        // map), so it disposes normally once the caller drops it.
        self.inner.children.lock().unwrap().clear();
    }
}

/// A ref-counted handle to a constructed singleton value.
pub struct SingletonRef<T: BuildSingleton> {
    entry: Arc<SingletonEntry>,
    value: Arc<T>,
}

impl<T: BuildSingleton> SingletonRef<T> {
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn ref_count(&self) -> usize {
        self.entry.refcount.load(Ordering::Acquire)
    }
}

impl<T: BuildSingleton> Clone for SingletonRef<T> {
    fn clone(&self) -> Self {
        self.entry.refcount.fetch_add(1, Ordering::AcqRel);
        if let Some(storage) = self.entry.storage.upgrade() {
            storage.recycle(self.entry.key);
        }
        Self {
            entry: self.entry.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T: BuildSingleton> Drop for SingletonRef<T> {
    fn drop(&mut self) {
        self.entry.unref();
    }
}
