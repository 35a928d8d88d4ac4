//! Parsing of a window's `event` file.
//!
//! Acme writes each event as `c1 c2 q0 q1 flag nr text\n`, the numbers
//! separated by single spaces and `nr` counting runes of text. Some events
//! are followed by companions: flag 2 announces the expansion of a null
//! click, flag 8 on an execute announces the chorded argument and its
//! location. [`EventDecoder`] folds those into one [`Event`].

use std::collections::VecDeque;

use gitfiles_core::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawEvent {
    c1: char,
    c2: char,
    q0: u32,
    q1: u32,
    flag: u32,
    text: String,
}

#[derive(Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    raw: VecDeque<RawEvent>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The next complete event, if enough input has arrived.
    pub fn next_event(&mut self) -> Result<Option<Event>, String> {
        while let Some((raw, used)) = parse_raw(&self.buf)? {
            self.buf.drain(..used);
            self.raw.push_back(raw);
        }

        let Some(first) = self.raw.front() else {
            return Ok(None);
        };
        let expands = first.flag & 2 != 0;
        let chorded = first.flag & 8 != 0 && matches!(first.c2, 'x' | 'X');
        let needed = 1 + usize::from(expands) + 2 * usize::from(chorded);
        if self.raw.len() < needed {
            return Ok(None);
        }

        let mut parts = self.raw.drain(..needed);
        let Some(first) = parts.next() else {
            return Ok(None);
        };
        let mut event = Event {
            c1: first.c1,
            c2: first.c2,
            q0: first.q0,
            q1: first.q1,
            oq0: first.q0,
            oq1: first.q1,
            flag: first.flag,
            text: first.text,
            arg: String::new(),
        };
        if expands {
            if let Some(expansion) = parts.next() {
                event.q0 = expansion.q0;
                event.q1 = expansion.q1;
                event.text = expansion.text;
            }
        }
        if chorded {
            if let Some(arg) = parts.next() {
                event.arg = arg.text;
            }
            // the location event carries nothing a session needs
            parts.next();
        }
        Ok(Some(event))
    }
}

/// Parse one raw event from the front of `buf`, returning it with the
/// number of bytes it used.
fn parse_raw(buf: &[u8]) -> Result<Option<(RawEvent, usize)>, String> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let c1 = char::from(buf[0]);
    let c2 = char::from(buf[1]);
    let mut pos = 2;

    let mut numbers = [0u32; 4];
    for slot in numbers.iter_mut() {
        let Some(space) = buf[pos..].iter().position(|&b| b == b' ') else {
            return Ok(None);
        };
        let digits = std::str::from_utf8(&buf[pos..pos + space])
            .map_err(|_| "event number is not text".to_string())?;
        *slot = digits
            .parse()
            .map_err(|_| format!("bad number {:?} in event", digits))?;
        pos += space + 1;
    }
    let [q0, q1, flag, nr] = numbers;

    let start = pos;
    for _ in 0..nr {
        let Some(&lead) = buf.get(pos) else {
            return Ok(None);
        };
        pos += utf8_len(lead);
    }
    if pos >= buf.len() {
        return Ok(None);
    }
    if buf[pos] != b'\n' {
        return Err(format!("event text not followed by newline (c1 {:?})", c1));
    }
    let text = String::from_utf8_lossy(&buf[start..pos]).into_owned();

    let raw = RawEvent {
        c1,
        c2,
        q0,
        q1,
        flag,
        text,
    };
    Ok(Some((raw, pos + 1)))
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

/// The form acme accepts when an event is written back.
pub fn format_event(event: &Event) -> String {
    format!("{}{}{} {}\n", event.c1, event.c2, event.q0, event.q1)
}
