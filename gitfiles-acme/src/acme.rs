use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gitfiles_core::{Editor, EditorWindow, Event, EventStream, WinFile};
use tokio::sync::mpsc;

use crate::client::{Client, Fid, NinepError};
use crate::event::{format_event, EventDecoder};
use crate::fcall::{ORDWR, OREAD};

/// A connection to a running acme.
pub struct Acme {
    client: Client,
}

impl Acme {
    /// Dial acme's file server in namespace directory `ns`.
    pub async fn connect(ns: &Path, chatty: bool) -> Result<Self, NinepError> {
        let client = Client::connect(&ns.join("acme"), "", chatty).await?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn open_file(&self, id: u32, file: &str, mode: u8) -> Result<Fid, NinepError> {
        self.client.open(&format!("{}/{}", id, file), mode).await
    }

    async fn create_window(&self) -> Result<AcmeWindow, NinepError> {
        let ctl = self.client.open("new/ctl", ORDWR).await?;
        let id = parse_window_id(&ctl.read_all().await?)?;
        Ok(AcmeWindow {
            id,
            ctl,
            addr: self.open_file(id, "addr", ORDWR).await?,
            data: self.open_file(id, "data", ORDWR).await?,
            xdata: self.open_file(id, "xdata", OREAD).await?,
            tag: self.open_file(id, "tag", ORDWR).await?,
            event: Arc::new(self.open_file(id, "event", ORDWR).await?),
        })
    }
}

fn parse_window_id(status: &[u8]) -> Result<u32, NinepError> {
    let text = String::from_utf8_lossy(status);
    text.split_whitespace()
        .next()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| NinepError::Protocol(format!("bad window ctl line {:?}", text)))
}

#[async_trait]
impl Editor for Acme {
    async fn new_window(&self) -> Result<(Arc<dyn EditorWindow>, EventStream), String> {
        let win = self
            .create_window()
            .await
            .map_err(|e| format!("cannot create acme window: {}", e))?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(read_events(win.id, Arc::clone(&win.event), tx));
        log::debug!("acme window {} created", win.id);
        Ok((Arc::new(win) as Arc<dyn EditorWindow>, rx))
    }
}

/// Forward decoded events until the window goes away.
async fn read_events(id: u32, event: Arc<Fid>, tx: mpsc::UnboundedSender<Event>) {
    let mut decoder = EventDecoder::new();
    let mut offset = 0u64;
    loop {
        let chunk = match event.read(offset).await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("acme window {} event file: {}", id, e);
                break;
            }
        };
        offset += chunk.len() as u64;
        decoder.push(&chunk);
        loop {
            match decoder.next_event() {
                Ok(Some(ev)) => {
                    if tx.send(ev).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("acme window {}: {}", id, e);
                    return;
                }
            }
        }
    }
}

/// One acme window. Its files stay open for the window's life, since acme
/// resets the address whenever `addr` is opened afresh.
pub struct AcmeWindow {
    id: u32,
    ctl: Fid,
    addr: Fid,
    data: Fid,
    xdata: Fid,
    tag: Fid,
    event: Arc<Fid>,
}

fn io(e: NinepError) -> String {
    e.to_string()
}

#[async_trait]
impl EditorWindow for AcmeWindow {
    fn id(&self) -> u32 {
        self.id
    }

    async fn ctl(&self, message: &str) -> Result<(), String> {
        let mut line = message.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.ctl
            .write(line.as_bytes())
            .await
            .map_err(|e| format!("ctl {:?}: {}", message, e))
    }

    async fn set_addr(&self, addr: &str) -> Result<(), String> {
        self.addr
            .write(addr.as_bytes())
            .await
            .map_err(|e| format!("bad address {:?}: {}", addr, e))
    }

    async fn read_addr(&self) -> Result<(u32, u32), String> {
        let raw = self.addr.read_all().await.map_err(io)?;
        let text = String::from_utf8_lossy(&raw);
        let mut fields = text.split_whitespace().map(str::parse::<u32>);
        match (fields.next(), fields.next()) {
            (Some(Ok(q0)), Some(Ok(q1))) => Ok((q0, q1)),
            _ => Err(format!("bad addr file contents {:?}", text)),
        }
    }

    async fn write(&self, file: WinFile, data: &[u8]) -> Result<(), String> {
        let fid = match file {
            WinFile::Tag => &self.tag,
            WinFile::Data => &self.data,
        };
        fid.write(data).await.map_err(io)
    }

    async fn read_selection(&self) -> Result<String, String> {
        let raw = self.xdata.read_all().await.map_err(io)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    async fn name(&self) -> Result<String, String> {
        let raw = self.tag.read_all().await.map_err(io)?;
        let text = String::from_utf8_lossy(&raw);
        Ok(text.split_whitespace().next().unwrap_or_default().to_string())
    }

    async fn write_event(&self, event: &Event) -> Result<(), String> {
        self.event
            .write(format_event(event).as_bytes())
            .await
            .map_err(io)
    }
}
