//! The editor seam: what a window session needs from the host editor.
//!
//! `gitfiles-acme` implements these traits on top of acme's 9P file server.
//! Tests use the in-memory fakes in `crate::testing`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A UI event reported by the editor for one window.
///
/// `q0`/`q1` hold the range after any editor expansion; `oq0`/`oq1` hold
/// the range the user actually swept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// Origin: `M` mouse, `K` keyboard, `E` body/tag file, `F` other file.
    pub c1: char,
    /// Action: `x`/`X` execute, `l`/`L` look; lower case means the tag.
    pub c2: char,
    pub q0: u32,
    pub q1: u32,
    pub oq0: u32,
    pub oq1: u32,
    pub flag: u32,
    pub text: String,
    /// Chorded argument, when the execute came with one.
    pub arg: String,
}

impl Event {
    pub fn in_tag(&self) -> bool {
        self.c2 == 'l' || self.c2 == 'x'
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {} {} ({} {}) {} {:?}",
            self.c1, self.c2, self.q0, self.q1, self.oq0, self.oq1, self.flag, self.text
        )?;
        if !self.arg.is_empty() {
            write!(f, " arg {:?}", self.arg)?;
        }
        Ok(())
    }
}

/// Events for a single window, in arrival order. The stream ends when the
/// editor closes the window.
pub type EventStream = mpsc::UnboundedReceiver<Event>;

/// Writable text files of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinFile {
    Tag,
    /// The body, written at the current address.
    Data,
}

#[async_trait]
pub trait Editor: Send + Sync {
    /// Create a fresh, empty window and subscribe to its events.
    async fn new_window(&self) -> Result<(Arc<dyn EditorWindow>, EventStream), String>;
}

#[async_trait]
pub trait EditorWindow: Send + Sync {
    fn id(&self) -> u32;

    /// Send a control message such as `name /x`, `dot=addr`, `show` or `clean`.
    async fn ctl(&self, message: &str) -> Result<(), String>;

    /// Set the window address from an address expression.
    async fn set_addr(&self, addr: &str) -> Result<(), String>;

    /// Read back the current address as character offsets.
    async fn read_addr(&self) -> Result<(u32, u32), String>;

    /// Write text. `Data` replaces the addressed range and leaves the
    /// address just past the inserted text.
    async fn write(&self, file: WinFile, data: &[u8]) -> Result<(), String>;

    /// Text inside the current address.
    async fn read_selection(&self) -> Result<String, String>;

    /// The window name as currently shown in its tag.
    async fn name(&self) -> Result<String, String>;

    /// Hand an event back to the editor for its default handling.
    async fn write_event(&self, event: &Event) -> Result<(), String>;
}
