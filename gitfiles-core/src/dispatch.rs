use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::name::clean_name;
use crate::session::Session;

/// A request to open a name, as delivered by the plumber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenMessage {
    pub data: Vec<u8>,
    pub attrs: Vec<(String, String)>,
}

impl OpenMessage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("insanely long file name ({len} bytes) in plumb message ({preview}...)")]
    Oversized { len: usize, preview: String },
    #[error("{0}")]
    Open(String),
}

/// Handle open requests until the sender goes away. Each message gets its
/// own task so a slow load never holds up the next request.
pub async fn run(session: Arc<Session>, mut messages: mpsc::Receiver<OpenMessage>) {
    while let Some(message) = messages.recv().await {
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_message(&session, message).await {
                log::warn!("Gitfiles: {}", e);
            }
        });
    }
    log::debug!("open request channel closed");
}

/// Show the named object, reusing its window when one is open.
pub async fn handle_message(session: &Arc<Session>, message: OpenMessage) -> Result<(), DispatchError> {
    let limit = session.config().max_message_bytes;
    if message.data.len() >= limit {
        let preview: String = String::from_utf8_lossy(&message.data).chars().take(32).collect();
        return Err(DispatchError::Oversized {
            len: message.data.len(),
            preview,
        });
    }

    let name = clean_name(&String::from_utf8_lossy(&message.data));
    let addr = message.attr("addr").filter(|a| !a.is_empty());
    log::debug!("plumb {} addr {:?}", name, addr);

    let (window, reused) = session.find_or_open(&name).await.map_err(DispatchError::Open)?;
    if reused {
        log::debug!("plumb {} => existing window {}", name, window.id());
    }
    window.show(addr).await.map_err(DispatchError::Open)
}
