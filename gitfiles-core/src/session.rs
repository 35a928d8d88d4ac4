use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cache::{NegativeCache, TypeCache};
use crate::config::Config;
use crate::editor::Editor;
use crate::helpers::RepoHelpers;
use crate::registry::WindowRegistry;
use crate::window::{self, OpenRequest, WindowHandle};

/// Everything window sessions share: the editor connection, the helpers,
/// both caches and the registry of live windows.
pub struct Session {
    editor: Arc<dyn Editor>,
    helpers: Arc<dyn RepoHelpers>,
    config: Config,
    types: TypeCache,
    misses: NegativeCache,
    registry: WindowRegistry,
    /// Windows still on their first load, by requested name.
    opening: Mutex<HashMap<String, watch::Receiver<Option<OpenResult>>>>,
}

type OpenResult = Result<Arc<WindowHandle>, String>;

/// Clears a name from `Session::opening` once its first requester is done,
/// whether or not the open finished.
struct Opening<'a> {
    session: &'a Session,
    key: String,
    tx: watch::Sender<Option<OpenResult>>,
}

impl Drop for Opening<'_> {
    fn drop(&mut self) {
        self.session.opening.lock().remove(&self.key);
    }
}

fn opening_key(name: &str) -> &str {
    name.strip_suffix('/').unwrap_or(name)
}

impl Session {
    pub fn new(editor: Arc<dyn Editor>, helpers: Arc<dyn RepoHelpers>, config: Config) -> Arc<Self> {
        let types = TypeCache::new(helpers.clone(), config.type_cache_capacity);
        Arc::new(Self {
            editor,
            helpers,
            config,
            types,
            misses: NegativeCache::default(),
            registry: WindowRegistry::new(),
            opening: Mutex::new(HashMap::new()),
        })
    }

    pub fn editor(&self) -> &dyn Editor {
        self.editor.as_ref()
    }

    pub fn helpers(&self) -> &dyn RepoHelpers {
        self.helpers.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn types(&self) -> &TypeCache {
        &self.types
    }

    pub fn misses(&self) -> &NegativeCache {
        &self.misses
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    /// Start a session for a new window on `file` and wait for its first
    /// load to finish.
    pub async fn open_window(
        self: &Arc<Self>,
        file: &str,
        addr: Option<&str>,
    ) -> Result<Arc<WindowHandle>, String> {
        let (request, reply) = OpenRequest::new(file, addr);
        tokio::spawn(window::run(Arc::clone(self), request));
        reply
            .await
            .map_err(|_| format!("window session for {} ended before loading", file))?
    }

    /// Reuse the window showing `name`, or open one. The flag is true when
    /// an existing window was reused.
    ///
    /// A request arriving while another is still opening the same name
    /// waits for that window instead of creating a second one.
    pub async fn find_or_open(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<(Arc<WindowHandle>, bool), String> {
        let key = opening_key(name);
        loop {
            let slot = {
                let mut opening = self.opening.lock();
                if let Some(window) = self.registry.by_name(name) {
                    Slot::Shown(window)
                } else if let Some(rx) = opening.get(key) {
                    Slot::Wait(rx.clone())
                } else {
                    let (tx, rx) = watch::channel(None);
                    opening.insert(key.to_string(), rx);
                    Slot::Lead(tx)
                }
            };

            let mut waiting = match slot {
                Slot::Shown(window) => return Ok((window, true)),
                Slot::Lead(tx) => {
                    let guard = Opening {
                        session: self,
                        key: key.to_string(),
                        tx,
                    };
                    let result = self.open_window(name, None).await;
                    guard.tx.send_replace(Some(result.clone()));
                    return result.map(|window| (window, false));
                }
                Slot::Wait(rx) => rx,
            };

            log::debug!("{} is already opening; waiting", name);
            let outcome = match waiting.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                // the first requester gave up; try again from the top
                Err(_) => None,
            };
            match outcome {
                Some(Ok(window)) => return Ok((window, true)),
                Some(Err(e)) => return Err(e),
                None => continue,
            }
        }
    }
}

enum Slot {
    Shown(Arc<WindowHandle>),
    Wait(watch::Receiver<Option<OpenResult>>),
    Lead(watch::Sender<Option<OpenResult>>),
}
