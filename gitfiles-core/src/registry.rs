use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::window::WindowHandle;

/// All live window sessions, keyed by editor window id.
#[derive(Default)]
pub struct WindowRegistry {
    windows: Mutex<HashMap<u32, Arc<WindowHandle>>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(&self, id: u32) -> Option<Arc<WindowHandle>> {
        self.windows.lock().get(&id).cloned()
    }

    /// Find the window displaying `name`, or `name/` for directories.
    /// `name` is expected to be cleaned.
    pub fn by_name(&self, name: &str) -> Option<Arc<WindowHandle>> {
        self.windows
            .lock()
            .values()
            .find(|w| {
                let shown = w.name();
                shown == name || shown.strip_suffix('/') == Some(name)
            })
            .cloned()
    }

    pub(crate) fn insert(&self, window: Arc<WindowHandle>) {
        self.windows.lock().insert(window.id(), window);
    }

    pub(crate) fn remove(&self, id: u32) -> Option<Arc<WindowHandle>> {
        self.windows.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWindow;

    fn handle(id: u32, name: &str) -> Arc<WindowHandle> {
        Arc::new(WindowHandle::new(Arc::new(FakeWindow::new(id)), name))
    }

    #[test]
    fn lookup_by_id() {
        let registry = WindowRegistry::new();
        registry.insert(handle(3, "/r@v1/a"));
        assert_eq!(registry.by_id(3).map(|w| w.id()), Some(3));
        assert!(registry.by_id(4).is_none());
    }

    #[test]
    fn lookup_by_name_accepts_directory_slash() {
        let registry = WindowRegistry::new();
        registry.insert(handle(1, "/r@v1/dir/"));
        registry.insert(handle(2, "/r@v1/file"));

        assert_eq!(registry.by_name("/r@v1/dir").map(|w| w.id()), Some(1));
        assert_eq!(registry.by_name("/r@v1/dir/").map(|w| w.id()), Some(1));
        assert_eq!(registry.by_name("/r@v1/file").map(|w| w.id()), Some(2));
        assert!(registry.by_name("/r@v1/fil").is_none());
        assert!(registry.by_name("/r@v1").is_none());
    }

    #[test]
    fn remove_forgets_window() {
        let registry = WindowRegistry::new();
        registry.insert(handle(1, "/r@v1/a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(1).is_some());
        assert!(registry.is_empty());
        assert!(registry.by_name("/r@v1/a").is_none());
    }
}
