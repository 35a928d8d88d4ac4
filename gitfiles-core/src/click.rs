//! Button-3 clicks inside a gitfiles window.
//!
//! Clicked text names another object relative to the window's own name.
//! Text starting with `/` is absolute and text starting with `:` addresses
//! the current window. Anything else is relative to the window's directory.
//! A trailing `:addr` selects inside the target.

use std::fmt;
use std::sync::Arc;

use crate::name::{clean_name, Name, NameError};
use crate::session::Session;
use crate::window::WindowHandle;

/// A click that found its target.
#[derive(Debug)]
pub struct Resolved {
    pub window: Arc<WindowHandle>,
    /// An existing window was brought forward instead of a new one opened.
    pub reused: bool,
}

/// Why a click is handed back to the editor.
#[derive(Debug)]
pub enum ClickMiss {
    /// Same name as the last click that found nothing.
    CachedFailure,
    BadName(NameError),
    NotFound,
    Spawn(String),
}

impl fmt::Display for ClickMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClickMiss::CachedFailure => f.write_str("cached failure"),
            ClickMiss::BadName(e) => write!(f, "bad name: {}", e),
            ClickMiss::NotFound => f.write_str("not found"),
            ClickMiss::Spawn(e) => write!(f, "cannot open window: {}", e),
        }
    }
}

/// Combine the window's name with the clicked text.
pub fn candidate_name(current: &str, text: &str) -> String {
    if text.starts_with('/') {
        return text.to_string();
    }
    if text.starts_with(':') {
        return format!("{}{}", current, text);
    }
    match current.rfind('/') {
        Some(i) => format!("{}{}", &current[..=i], text),
        None => text.to_string(),
    }
}

/// Split `name:addr` at the first colon. An empty address counts as none.
pub fn split_address(candidate: &str) -> (&str, Option<&str>) {
    match candidate.split_once(':') {
        Some((name, addr)) if !addr.is_empty() => (name, Some(addr)),
        Some((name, _)) => (name, None),
        None => (candidate, None),
    }
}

pub async fn resolve(
    session: &Arc<Session>,
    window: &WindowHandle,
    text: &str,
) -> Result<Resolved, ClickMiss> {
    let current = window.current_name().await;
    let candidate = candidate_name(&current, text);
    let (file, addr) = split_address(&candidate);
    let file = clean_name(file);
    if session.misses().matches(&file) {
        return Err(ClickMiss::CachedFailure);
    }

    let name = Name::parse(&file).map_err(ClickMiss::BadName)?;
    if !session.types().lookup(&name).await.is_found() {
        session.misses().remember(file);
        return Err(ClickMiss::NotFound);
    }

    let (target, reused) = session.find_or_open(&file).await.map_err(ClickMiss::Spawn)?;
    if let Err(e) = target.show(addr).await {
        log::warn!("Gitfiles: showing {}: {}", target.name(), e);
    }
    log::debug!("b3 {} => window {} (reused {})", candidate, target.id(), reused);
    Ok(Resolved {
        window: target,
        reused,
    })
}
