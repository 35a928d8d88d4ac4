//! In-memory editor and helpers for tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::editor::{Editor, EditorWindow, Event, EventStream, WinFile};
use crate::helpers::{ContentStream, ObjectKind, RepoHelpers};
use crate::name::Name;

pub(crate) fn event(c1: char, c2: char, q0: u32, q1: u32, text: &str) -> Event {
    Event {
        c1,
        c2,
        q0,
        q1,
        oq0: q0,
        oq1: q1,
        text: text.to_string(),
        ..Event::default()
    }
}

/// Let spawned tasks run until `done` holds.
pub(crate) async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
struct WindowState {
    body: String,
    tag: String,
    name: String,
    addr: (usize, usize),
    dot: (usize, usize),
    clean: bool,
    ctl: Vec<String>,
    echoed: Vec<Event>,
}

/// A window whose body is a plain string. Offsets are bytes, so tests stick
/// to ASCII text.
pub(crate) struct FakeWindow {
    id: u32,
    state: Mutex<WindowState>,
    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
}

impl FakeWindow {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: Mutex::new(WindowState::default()),
            events: Mutex::new(None),
        }
    }

    fn with_events(id: u32) -> (Arc<Self>, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let win = Self::new(id);
        *win.events.lock() = Some(tx);
        (Arc::new(win), rx)
    }

    /// Deliver an event as if the user had acted in this window.
    pub fn send(&self, event: Event) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn body(&self) -> String {
        self.state.lock().body.clone()
    }

    pub fn set_body(&self, body: &str) {
        let mut state = self.state.lock();
        state.body = body.to_string();
        state.clean = false;
    }

    pub fn tag(&self) -> String {
        self.state.lock().tag.clone()
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn dot(&self) -> (usize, usize) {
        self.state.lock().dot
    }

    pub fn set_dot(&self, q0: usize, q1: usize) {
        self.state.lock().dot = (q0, q1);
    }

    pub fn is_clean(&self) -> bool {
        self.state.lock().clean
    }

    pub fn ctl_log(&self) -> Vec<String> {
        self.state.lock().ctl.clone()
    }

    pub fn echoed(&self) -> Vec<Event> {
        self.state.lock().echoed.clone()
    }
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\n'
}

/// The non-blank run around `q0..q1`, as asked for by the click expansion.
fn word_range(body: &str, addr: &str) -> Option<(usize, usize)> {
    let (left, right) = addr.split_once(',')?;
    let q0: usize = left.strip_prefix('#')?.strip_suffix("+#1-/[^ \t\\n]*/")?.parse().ok()?;
    let q1: usize = right.strip_prefix('#')?.strip_suffix("-#1+/[^ \t\\n]*/")?.parse().ok()?;
    let bytes = body.as_bytes();
    let mut start = q0.min(bytes.len());
    while start > 0 && !is_blank(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = q1.min(bytes.len());
    while end < bytes.len() && !is_blank(bytes[end]) {
        end += 1;
    }
    Some((start, end))
}

fn line_range(body: &str, line: usize) -> (usize, usize) {
    if line == 0 {
        return (0, 0);
    }
    let mut start = 0;
    for (i, text) in body.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            return (start, start + text.len());
        }
        start += text.len();
    }
    (body.len(), body.len())
}

fn offset(body: &str, part: &str) -> Result<usize, String> {
    let n = match part {
        "$" => body.len(),
        _ => part
            .strip_prefix('#')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| format!("bad address {}", part))?,
    };
    Ok(n.min(body.len()))
}

fn eval_addr(body: &str, addr: &str) -> Result<(usize, usize), String> {
    if addr == "," {
        return Ok((0, body.len()));
    }
    if let Some(range) = word_range(body, addr) {
        return Ok(range);
    }
    if let Some((a, b)) = addr.split_once(',') {
        return Ok((offset(body, a)?, offset(body, b)?));
    }
    if let Ok(line) = addr.parse::<usize>() {
        return Ok(line_range(body, line));
    }
    let n = offset(body, addr)?;
    Ok((n, n))
}

#[async_trait]
impl EditorWindow for FakeWindow {
    fn id(&self) -> u32 {
        self.id
    }

    async fn ctl(&self, message: &str) -> Result<(), String> {
        let mut state = self.state.lock();
        state.ctl.push(message.to_string());
        if let Some(name) = message.strip_prefix("name ") {
            state.name = name.to_string();
            return Ok(());
        }
        match message {
            "dot=addr" => state.dot = state.addr,
            "addr=dot" => state.addr = state.dot,
            "clean" => state.clean = true,
            "show" => {}
            "del" | "delete" => {
                drop(state);
                self.events.lock().take();
            }
            other => return Err(format!("unknown ctl {}", other)),
        }
        Ok(())
    }

    async fn set_addr(&self, addr: &str) -> Result<(), String> {
        let mut state = self.state.lock();
        state.addr = eval_addr(&state.body, addr)?;
        Ok(())
    }

    async fn read_addr(&self) -> Result<(u32, u32), String> {
        let (q0, q1) = self.state.lock().addr;
        Ok((q0 as u32, q1 as u32))
    }

    async fn write(&self, file: WinFile, data: &[u8]) -> Result<(), String> {
        let text = String::from_utf8_lossy(data);
        let mut state = self.state.lock();
        match file {
            WinFile::Tag => state.tag.push_str(&text),
            WinFile::Data => {
                let (q0, q1) = state.addr;
                state.body.replace_range(q0..q1, &text);
                let end = q0 + text.len();
                state.addr = (end, end);
                state.clean = false;
            }
        }
        Ok(())
    }

    async fn read_selection(&self) -> Result<String, String> {
        let state = self.state.lock();
        let (q0, q1) = state.addr;
        Ok(state.body[q0..q1].to_string())
    }

    async fn name(&self) -> Result<String, String> {
        Ok(self.state.lock().name.clone())
    }

    async fn write_event(&self, event: &Event) -> Result<(), String> {
        self.state.lock().echoed.push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeEditor {
    next_id: AtomicU32,
    fail: AtomicBool,
    windows: Mutex<Vec<Arc<FakeWindow>>>,
}

impl FakeEditor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let editor = Self::default();
        editor.fail.store(true, Ordering::Relaxed);
        Arc::new(editor)
    }

    pub fn windows(&self) -> Vec<Arc<FakeWindow>> {
        self.windows.lock().clone()
    }

    pub fn window(&self, id: u32) -> Option<Arc<FakeWindow>> {
        self.windows.lock().iter().find(|w| w.id == id).cloned()
    }
}

#[async_trait]
impl Editor for FakeEditor {
    async fn new_window(&self) -> Result<(Arc<dyn EditorWindow>, EventStream), String> {
        if self.fail.load(Ordering::Relaxed) {
            return Err("no more windows".to_string());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (win, events) = FakeWindow::with_events(id);
        self.windows.lock().push(win.clone());
        Ok((win as Arc<dyn EditorWindow>, events))
    }
}

/// A repository held in a map.
#[derive(Default)]
pub(crate) struct FakeHelpers {
    objects: HashMap<Name, (ObjectKind, String)>,
    fail_stat: bool,
    delay: Option<Duration>,
    stat_calls: AtomicUsize,
}

impl FakeHelpers {
    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        let name = Name::parse(name).expect("test name");
        self.objects.insert(name, (ObjectKind::File, content.to_string()));
        self
    }

    pub fn with_dir(mut self, name: &str, listing: &str) -> Self {
        let name = Name::parse(name).expect("test name");
        self.objects.insert(name, (ObjectKind::Directory, listing.to_string()));
        self
    }

    pub fn failing_stat(mut self) -> Self {
        self.fail_stat = true;
        self
    }

    /// Make every helper call take `delay`, like a slow repository.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::Relaxed)
    }

    fn content(&self, name: &Name) -> Result<ContentStream, String> {
        let (_, content) = self
            .objects
            .get(name)
            .ok_or_else(|| format!("no such object {}", name))?;
        Ok(Box::pin(Cursor::new(content.clone().into_bytes())))
    }
}

#[async_trait]
impl RepoHelpers for FakeHelpers {
    async fn stat(&self, name: &Name) -> Result<String, String> {
        self.stat_calls.fetch_add(1, Ordering::Relaxed);
        self.pause().await;
        if self.fail_stat {
            return Err("stat helper failed".to_string());
        }
        Ok(self
            .objects
            .get(name)
            .map(|(kind, _)| format!("{}\n", kind))
            .unwrap_or_default())
    }

    async fn read_file(&self, name: &Name) -> Result<ContentStream, String> {
        self.pause().await;
        self.content(name)
    }

    async fn read_directory(&self, name: &Name, _window_id: u32) -> Result<ContentStream, String> {
        self.pause().await;
        self.content(name)
    }
}
