use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

use crate::click;
use crate::debug;
use crate::editor::{Event, EditorWindow, WinFile};
use crate::helpers::{ContentStream, ObjectKind};
use crate::name::{clean_name, Name};
use crate::session::Session;

const LOADING: &[u8] = b"[reading...]";
const CHUNK_SIZE: usize = 8192;

/// A live window: its editor id, the name it displays and the editor
/// object behind it.
pub struct WindowHandle {
    id: u32,
    name: Mutex<String>,
    win: Arc<dyn EditorWindow>,
    /// Serializes address-then-act sequences on this window.
    ops: tokio::sync::Mutex<()>,
}

impl WindowHandle {
    pub fn new(win: Arc<dyn EditorWindow>, name: &str) -> Self {
        Self {
            id: win.id(),
            name: Mutex::new(name.to_string()),
            win,
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The name this window was last given.
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn window(&self) -> &dyn EditorWindow {
        self.win.as_ref()
    }

    /// The name as the editor shows it now, which the user may have edited.
    pub(crate) async fn current_name(&self) -> String {
        match self.win.name().await {
            Ok(name) if !name.is_empty() => name,
            _ => self.name(),
        }
    }

    /// Select `addr`, if given, then bring the window into view.
    pub async fn show(&self, addr: Option<&str>) -> Result<(), String> {
        let _ops = self.ops.lock().await;
        if let Some(addr) = addr {
            self.win.set_addr(addr).await?;
            self.win.ctl("dot=addr").await?;
        }
        self.win.ctl("show").await
    }
}

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

type OpenReply = oneshot::Sender<Result<Arc<WindowHandle>, String>>;

/// A request for a new window, answered once its first load is done.
pub struct OpenRequest {
    pub file: String,
    pub addr: Option<String>,
    reply: Option<OpenReply>,
}

impl OpenRequest {
    pub fn new(
        file: &str,
        addr: Option<&str>,
    ) -> (Self, oneshot::Receiver<Result<Arc<WindowHandle>, String>>) {
        let (tx, rx) = oneshot::channel();
        let request = OpenRequest {
            file: file.to_string(),
            addr: addr.map(str::to_string),
            reply: Some(tx),
        };
        (request, rx)
    }

    fn reply(&mut self, result: Result<Arc<WindowHandle>, String>) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(result);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    AwaitingFirstLoad,
    Idle,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Get,
    Del,
    Delete,
    Debug,
}

impl Command {
    fn lookup(text: &str) -> Option<Self> {
        match text {
            "Get" => Some(Command::Get),
            "Del" => Some(Command::Del),
            "Delete" => Some(Command::Delete),
            "Debug" => Some(Command::Debug),
            _ => None,
        }
    }
}

pub(crate) type SessionTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Run one window for its whole life. Boxed so that sessions can open
/// further sessions from their click handlers.
pub(crate) fn run(session: Arc<Session>, request: OpenRequest) -> SessionTask {
    Box::pin(async move {
        let mut request = request;
        let (win, mut events) = match session.editor().new_window().await {
            Ok(created) => created,
            Err(e) => {
                log::warn!("Gitfiles: cannot create window for {}: {}", request.file, e);
                request.reply(Err(e));
                return;
            }
        };

        let handle = Arc::new(WindowHandle::new(win, &request.file));
        let mut controller = WindowController {
            session,
            handle,
            pending: Some(request),
            state: WindowState::AwaitingFirstLoad,
        };
        controller.start().await;

        while let Some(event) = events.recv().await {
            controller.handle_event(event).await;
        }
        controller.close();
    })
}

struct WindowController {
    session: Arc<Session>,
    handle: Arc<WindowHandle>,
    pending: Option<OpenRequest>,
    state: WindowState,
}

impl WindowController {
    async fn start(&mut self) {
        let win = self.handle.window();
        let file = self.handle.name();
        if let Err(e) = win.ctl(&format!("name {}", file)).await {
            log::warn!("Gitfiles: naming window {}: {}", self.handle.id(), e);
        }
        let tag = self.session.config().tag.clone();
        if let Err(e) = win.write(WinFile::Tag, tag.as_bytes()).await {
            log::warn!("Gitfiles: writing tag of {}: {}", file, e);
        }
        self.get().await;
    }

    fn close(&mut self) {
        self.state = WindowState::Closed;
        self.session.registry().remove(self.handle.id());
        log::debug!("window {} ({}) closed", self.handle.id(), self.handle.name());
    }

    async fn handle_event(&mut self, event: Event) {
        if event.c1 != 'K' {
            log::trace!("acme {} ({:?})", event, self.state);
        }
        if event.c1 != 'M' {
            return;
        }
        match event.c2 {
            'x' | 'X' => self.execute(&event).await,
            'l' | 'L' => self.look(&event).await,
            _ => {}
        }
    }

    async fn execute(&mut self, event: &Event) {
        match Command::lookup(event.text.trim()) {
            Some(Command::Get) => self.get().await,
            Some(Command::Del) => self.ctl("del").await,
            Some(Command::Delete) => self.ctl("delete").await,
            Some(Command::Debug) => {
                let level = debug::cycle();
                log::info!("Gitfiles debug {}", level);
            }
            None => self.pass_back(event).await,
        }
    }

    /// Load the window's content, then answer whoever asked for the window.
    async fn get(&mut self) {
        let addr = self.pending.as_ref().and_then(|r| r.addr.clone());
        if let Err(e) = self.load(addr.as_deref()).await {
            log::warn!("Gitfiles: loading {}: {}", self.handle.name(), e);
        }

        if let Some(mut request) = self.pending.take() {
            self.session.registry().insert(self.handle.clone());
            self.state = WindowState::Idle;
            request.reply(Ok(self.handle.clone()));
        }
    }

    async fn load(&self, addr: Option<&str>) -> Result<(), String> {
        let current = self.handle.current_name().await;
        let name = match Name::parse(&current) {
            Ok(name) => name,
            Err(e) => {
                log::warn!("Gitfiles: bad name {}: {}", current, e);
                return Ok(());
            }
        };

        let kind = self.session.types().lookup(&name).await;
        if !kind.is_found() {
            return Ok(());
        }

        let win = self.handle.window();
        let _ops = self.handle.ops.lock().await;
        win.set_addr(",").await?;
        win.write(WinFile::Data, LOADING).await?;
        win.set_addr(",").await?;

        log::debug!("get {} {}", kind, name);
        let helpers = self.session.helpers();
        let content = if kind == ObjectKind::Directory {
            helpers.read_directory(&name, self.handle.id()).await
        } else {
            helpers.read_file(&name).await
        };
        match content {
            Ok(stream) => match stream_into(win, stream).await {
                // still addressing the placeholder
                Ok(false) => win.write(WinFile::Data, b"").await?,
                Ok(true) => {}
                Err(e) => log::warn!("Gitfiles: {}: {}", name, e),
            },
            Err(e) => log::warn!("Gitfiles: {}: {}", name, e),
        }

        let mut shown = clean_name(&current);
        if kind == ObjectKind::Directory && !shown.ends_with('/') {
            shown.push('/');
        }
        win.ctl(&format!("name {}", shown)).await?;
        self.handle.set_name(&shown);

        win.set_addr("#0").await?;
        win.ctl("dot=addr").await?;
        win.ctl("show").await?;
        win.ctl("clean").await?;

        if let Some(addr) = addr.filter(|a| !a.is_empty()) {
            win.set_addr(addr).await?;
            win.ctl("dot=addr").await?;
            win.ctl("show").await?;
        }
        Ok(())
    }

    async fn look(&self, event: &Event) {
        let text = match self.expand(event).await {
            Ok(text) => text,
            Err(e) => {
                log::debug!("expanding click in {}: {}", self.handle.id(), e);
                self.pass_back(event).await;
                return;
            }
        };
        if text.is_empty() {
            self.pass_back(event).await;
            return;
        }
        if let Err(miss) = click::resolve(&self.session, &self.handle, &text).await {
            log::debug!("b3 {:?} => {}", text, miss);
            self.pass_back(event).await;
        }
    }

    /// Expand a click further than the editor does: any run of non-blank
    /// characters around a point click counts.
    async fn expand(&self, event: &Event) -> Result<String, String> {
        if event.in_tag() {
            return Ok(event.text.clone());
        }

        let win = self.handle.window();
        let _ops = self.handle.ops.lock().await;
        win.set_addr(",").await?;
        win.ctl("addr=dot").await?;
        let dot = win.read_addr().await?;
        log::debug!(
            "acme expanded {}-{} into {}-{} (dot {}-{})",
            event.oq0,
            event.oq1,
            event.q0,
            event.q1,
            dot.0,
            dot.1
        );

        if event.oq0 == event.oq1 && event.q0 != event.q1 && dot != (event.q0, event.q1) {
            win.set_addr(&word_address(event.q0, event.q1)).await?;
            let (q0, q1) = win.read_addr().await?;
            log::debug!("\tre-expand to {}-{}", q0, q1);
        } else {
            win.set_addr(&format!("#{},#{}", event.q0, event.q1)).await?;
        }
        win.read_selection().await
    }

    async fn ctl(&self, message: &str) {
        if let Err(e) = self.handle.window().ctl(message).await {
            log::warn!("Gitfiles: {} on window {}: {}", message, self.handle.id(), e);
        }
    }

    async fn pass_back(&self, event: &Event) {
        if let Err(e) = self.handle.window().write_event(event).await {
            log::debug!("returning event to window {}: {}", self.handle.id(), e);
        }
    }
}

/// Address of the widest non-blank run covering `q0..q1`.
pub(crate) fn word_address(q0: u32, q1: u32) -> String {
    format!("#{}+#1-/[^ \t\\n]*/,#{}-#1+/[^ \t\\n]*/", q0, q1)
}

/// Copy `content` into the window body. Returns whether anything was
/// written.
async fn stream_into(win: &dyn EditorWindow, mut content: ContentStream) -> Result<bool, String> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut wrote = false;
    loop {
        let n = content
            .read(&mut buf)
            .await
            .map_err(|e| format!("reading helper output: {}", e))?;
        if n == 0 {
            return Ok(wrote);
        }
        win.write(WinFile::Data, &buf[..n]).await?;
        wrote = true;
    }
}
