use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::helpers::{ObjectKind, RepoHelpers};
use crate::name::Name;

/// Memoizes stat results per `(root, treeish, path)`.
///
/// The lock is never held while a helper runs, so two windows asking about
/// different names do not wait on each other. A capacity of one reproduces a
/// single-slot cache exactly.
pub struct TypeCache {
    helpers: Arc<dyn RepoHelpers>,
    entries: Mutex<LruCache<Name, ObjectKind>>,
}

impl TypeCache {
    pub fn new(helpers: Arc<dyn RepoHelpers>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            helpers,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn lookup(&self, name: &Name) -> ObjectKind {
        let cached = self.entries.lock().get(name).copied();
        if let Some(kind) = cached {
            log::debug!(
                "stat {} {} {} => {} (cached)",
                name.root,
                name.treeish,
                name.path,
                kind
            );
            return kind;
        }

        let kind = match self.helpers.stat(name).await {
            Ok(output) => ObjectKind::from_stat(&output),
            Err(e) => {
                log::debug!("stat {} failed: {}", name, e);
                ObjectKind::Missing
            }
        };
        self.entries.lock().put(name.clone(), kind);

        log::debug!(
            "stat {} {} {} => {}",
            name.root,
            name.treeish,
            name.path,
            kind
        );
        kind
    }
}

/// Remembers the most recent name that resolved to nothing.
#[derive(Default)]
pub struct NegativeCache {
    last_failed: Mutex<Option<String>>,
}

impl NegativeCache {
    pub fn matches(&self, name: &str) -> bool {
        self.last_failed.lock().as_deref() == Some(name)
    }

    pub fn remember(&self, name: String) {
        *self.last_failed.lock() = Some(name);
    }
}
