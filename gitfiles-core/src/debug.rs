//! Process-wide debug level, toggled at runtime by the `Debug` command.
//!
//! The level maps onto `log`'s global max level: `off` keeps warnings and
//! announcements, `minimal` adds debug lines, `chatty` adds every event.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use log::LevelFilter;

static LEVEL: AtomicU8 = AtomicU8::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLevel {
    Off,
    Minimal,
    Chatty,
}

impl DebugLevel {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DebugLevel::Off,
            1 => DebugLevel::Minimal,
            _ => DebugLevel::Chatty,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DebugLevel::Off => 0,
            DebugLevel::Minimal => 1,
            DebugLevel::Chatty => 2,
        }
    }

    pub fn next(self) -> Self {
        match self {
            DebugLevel::Off => DebugLevel::Minimal,
            DebugLevel::Minimal => DebugLevel::Chatty,
            DebugLevel::Chatty => DebugLevel::Off,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DebugLevel::Off => "off",
            DebugLevel::Minimal => "minimal",
            DebugLevel::Chatty => "chatty",
        }
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            DebugLevel::Off => LevelFilter::Info,
            DebugLevel::Minimal => LevelFilter::Debug,
            DebugLevel::Chatty => LevelFilter::Trace,
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn level() -> DebugLevel {
    DebugLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

pub fn set(level: DebugLevel) {
    LEVEL.store(level.as_u8(), Ordering::Relaxed);
    log::set_max_level(level.filter());
}

/// Advance `off -> minimal -> chatty -> off` and return the new level.
pub fn cycle() -> DebugLevel {
    let previous = LEVEL
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |raw| {
            Some(DebugLevel::from_u8(raw).next().as_u8())
        })
        .unwrap_or_default();
    let next = DebugLevel::from_u8(previous).next();
    log::set_max_level(next.filter());
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_wraps_around() {
        assert_eq!(DebugLevel::Off.next(), DebugLevel::Minimal);
        assert_eq!(DebugLevel::Minimal.next(), DebugLevel::Chatty);
        assert_eq!(DebugLevel::Chatty.next(), DebugLevel::Off);
    }

    #[test]
    fn levels_widen_the_log_filter() {
        assert_eq!(DebugLevel::Off.filter(), LevelFilter::Info);
        assert_eq!(DebugLevel::Minimal.filter(), LevelFilter::Debug);
        assert_eq!(DebugLevel::Chatty.filter(), LevelFilter::Trace);
        assert_eq!(DebugLevel::Chatty.to_string(), "chatty");
    }
}
