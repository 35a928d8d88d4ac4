pub mod cache;
pub mod click;
pub mod config;
pub mod debug;
pub mod dispatch;
pub mod editor;
pub mod helpers;
pub mod name;
pub mod registry;
pub mod session;
pub mod window;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use dispatch::OpenMessage;
pub use editor::{Editor, EditorWindow, Event, EventStream, WinFile};
pub use helpers::{CommandHelpers, RepoHelpers};
pub use name::Name;
pub use session::Session;
