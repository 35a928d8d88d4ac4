//! Reading messages from a plumber port.
//!
//! A message is six header lines (`src`, `dst`, `wdir`, `type`, `attr`,
//! `ndata`) followed by exactly `ndata` bytes of data.

use std::path::Path;

use gitfiles_core::OpenMessage;
use tokio::sync::mpsc;

use crate::client::{Client, Fid, NinepError};
use crate::fcall::OREAD;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlumbMessage {
    pub src: String,
    pub dst: String,
    pub wdir: String,
    pub kind: String,
    pub attrs: Vec<(String, String)>,
    pub data: Vec<u8>,
}

impl From<PlumbMessage> for OpenMessage {
    fn from(msg: PlumbMessage) -> Self {
        OpenMessage {
            data: msg.data,
            attrs: msg.attrs,
        }
    }
}

/// Largest data payload kept in memory. Bigger messages are skipped as
/// they arrive.
pub const MAX_DATA: usize = 16 * 1024;
/// Longest the six header lines may get.
const MAX_HEADER: usize = 8 * 1024;

/// Accumulates port reads and splits them into messages.
#[derive(Default)]
pub struct PlumbDecoder {
    buf: Vec<u8>,
    /// Data bytes of an oversized message still to be thrown away.
    skip: usize,
}

impl PlumbDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        let dropped = self.skip.min(bytes.len());
        self.skip -= dropped;
        self.buf.extend_from_slice(&bytes[dropped..]);
    }

    pub fn next_message(&mut self) -> Result<Option<PlumbMessage>, String> {
        loop {
            let mut fields: Vec<String> = Vec::with_capacity(6);
            let mut pos = 0;
            while fields.len() < 6 {
                let Some(nl) = self.buf[pos..].iter().position(|&b| b == b'\n') else {
                    if self.buf.len() > MAX_HEADER {
                        return Err(format!("plumb header over {} bytes", MAX_HEADER));
                    }
                    return Ok(None);
                };
                fields.push(String::from_utf8_lossy(&self.buf[pos..pos + nl]).into_owned());
                pos += nl + 1;
            }

            let ndata: usize = fields[5]
                .trim()
                .parse()
                .map_err(|_| format!("bad ndata {:?} in plumb message", fields[5]))?;
            if ndata > MAX_DATA {
                log::warn!(
                    "Gitfiles: skipping {} byte plumb message from {}",
                    ndata,
                    fields[0]
                );
                let here = (self.buf.len() - pos).min(ndata);
                self.buf.drain(..pos + here);
                self.skip = ndata - here;
                if self.skip > 0 {
                    return Ok(None);
                }
                continue;
            }
            if self.buf.len() < pos + ndata {
                return Ok(None);
            }
            return Ok(Some(self.take(fields, pos, ndata)));
        }
    }

    fn take(&mut self, fields: Vec<String>, pos: usize, ndata: usize) -> PlumbMessage {
        let data = self.buf[pos..pos + ndata].to_vec();
        self.buf.drain(..pos + ndata);

        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        PlumbMessage {
            src: next(),
            dst: next(),
            wdir: next(),
            kind: next(),
            attrs: parse_attrs(&next()),
            data,
        }
    }
}

/// Parse `name=value` pairs separated by blanks. Values may be quoted
/// with single quotes, `''` standing for a quote inside.
pub fn parse_attrs(line: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            return attrs;
        }

        let mut name = String::new();
        while let Some(c) = chars.next_if(|&c| c != '=' && !c.is_whitespace()) {
            name.push(c);
        }
        if chars.next_if_eq(&'=').is_none() {
            attrs.push((name, String::new()));
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.next_if_eq(&'\'').is_some() {
                        value.push('\'');
                        continue;
                    }
                    break;
                }
                value.push(c);
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                value.push(c);
            }
        }
        attrs.push((name, value));
    }
}

/// An open plumber port.
pub struct PlumbPort {
    name: String,
    fid: Fid,
}

impl PlumbPort {
    /// Open `port` on the plumber in namespace directory `ns`.
    pub async fn open(ns: &Path, port: &str, chatty: bool) -> Result<Self, NinepError> {
        let client = Client::connect(&ns.join("plumb"), "", chatty).await?;
        Self::open_on(&client, port).await
    }

    pub async fn open_on(client: &Client, port: &str) -> Result<Self, NinepError> {
        let fid = client.open(port, OREAD).await?;
        Ok(Self {
            name: port.to_string(),
            fid,
        })
    }

    /// Deliver every message on the port to `tx` until the port closes or
    /// the receiver goes away.
    pub async fn forward(self, tx: mpsc::Sender<OpenMessage>) -> Result<(), NinepError> {
        let mut decoder = PlumbDecoder::default();
        let mut offset = 0u64;
        loop {
            let chunk = self.fid.read(offset).await?;
            if chunk.is_empty() {
                log::debug!("plumb port {} closed", self.name);
                return Ok(());
            }
            offset += chunk.len() as u64;
            decoder.push(&chunk);
            while let Some(msg) = decoder.next_message().map_err(NinepError::Protocol)? {
                log::debug!(
                    "plumb {} from {}: {}",
                    self.name,
                    msg.src,
                    String::from_utf8_lossy(&msg.data)
                );
                if tx.send(msg.into()).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
