//! A multiplexed 9P2000 client.
//!
//! Any number of tasks may have requests in flight at once. Each request
//! parks a oneshot under its tag; a single reader task routes replies back
//! by tag, and drains every waiter with `Closed` when the connection ends.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex as TokioMutex};

use crate::fcall::{self, CodecError, Rmessage, Tmessage, IOHDRSZ, NOFID, NOTAG};

const MSIZE: u32 = 8192 + IOHDRSZ;
const ROOT_FID: u32 = 0;

#[derive(Debug, Error)]
pub enum NinepError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Remote(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed")]
    Closed,
}

type Reply = oneshot::Sender<Result<Rmessage, NinepError>>;
type Writer = WriteHalf<Box<dyn Stream>>;

pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

#[derive(Default)]
struct Pending {
    waiters: HashMap<u16, Reply>,
    closed: bool,
}

struct Inner {
    label: String,
    writer: TokioMutex<Writer>,
    pending: Mutex<Pending>,
    next_tag: AtomicU16,
    next_fid: AtomicU32,
    msize: AtomicU32,
    chatty: bool,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Dial the Unix socket at `path` and attach to `aname`.
    pub async fn connect(path: &Path, aname: &str, chatty: bool) -> Result<Self, NinepError> {
        let stream = UnixStream::connect(path).await?;
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::start(stream, &label, aname, chatty).await
    }

    pub async fn start<S>(stream: S, label: &str, aname: &str, chatty: bool) -> Result<Self, NinepError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: Box<dyn Stream> = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        let inner = Arc::new(Inner {
            label: label.to_string(),
            writer: TokioMutex::new(writer),
            pending: Mutex::new(Pending::default()),
            next_tag: AtomicU16::new(0),
            next_fid: AtomicU32::new(ROOT_FID + 1),
            msize: AtomicU32::new(MSIZE),
            chatty,
        });
        tokio::spawn(reader_task(reader, inner.clone()));

        let client = Client { inner };
        client.handshake(aname).await?;
        Ok(client)
    }

    async fn handshake(&self, aname: &str) -> Result<(), NinepError> {
        let version = Tmessage::Version {
            msize: MSIZE,
            version: fcall::VERSION.to_string(),
        };
        match self.rpc_tagged(NOTAG, version).await? {
            Rmessage::Version { msize, .. } if msize <= IOHDRSZ => {
                return Err(NinepError::Protocol(format!("msize {} is too small", msize)));
            }
            Rmessage::Version { msize, version } if version == fcall::VERSION => {
                self.inner.msize.store(msize.min(MSIZE), Ordering::Relaxed);
            }
            Rmessage::Version { version, .. } => {
                return Err(NinepError::Protocol(format!("server speaks {}", version)));
            }
            other => return Err(unexpected("Rversion", &other)),
        }

        let uname = std::env::var("USER").unwrap_or_else(|_| "none".to_string());
        let attach = Tmessage::Attach {
            fid: ROOT_FID,
            afid: NOFID,
            uname,
            aname: aname.to_string(),
        };
        match self.rpc(attach).await? {
            Rmessage::Attach { .. } => Ok(()),
            other => Err(unexpected("Rattach", &other)),
        }
    }

    pub fn msize(&self) -> u32 {
        self.inner.msize.load(Ordering::Relaxed)
    }

    /// Walk from the root to `path` and open it with `mode`.
    pub async fn open(&self, path: &str, mode: u8) -> Result<Fid, NinepError> {
        let newfid = self.inner.next_fid.fetch_add(1, Ordering::Relaxed);
        let wnames: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let want = wnames.len();
        let walk = Tmessage::Walk {
            fid: ROOT_FID,
            newfid,
            wnames,
        };
        match self.rpc(walk).await? {
            Rmessage::Walk { qids } if qids.len() == want => {}
            Rmessage::Walk { .. } => {
                return Err(NinepError::Remote(format!("{}: file does not exist", path)));
            }
            other => return Err(unexpected("Rwalk", &other)),
        }

        let iounit = match self.rpc(Tmessage::Open { fid: newfid, mode }).await {
            Ok(Rmessage::Open { iounit, .. }) => iounit,
            Ok(other) => {
                self.clunk(newfid).await;
                return Err(unexpected("Ropen", &other));
            }
            Err(e) => {
                self.clunk(newfid).await;
                return Err(e);
            }
        };
        let max = self.msize() - IOHDRSZ;
        let iounit = if iounit == 0 { max } else { iounit.min(max) };
        Ok(Fid {
            client: self.clone(),
            fid: newfid,
            iounit,
        })
    }

    async fn clunk(&self, fid: u32) {
        if let Err(e) = self.rpc(Tmessage::Clunk { fid }).await {
            log::debug!("{}: clunk fid {}: {}", self.inner.label, fid, e);
        }
    }

    async fn rpc(&self, msg: Tmessage) -> Result<Rmessage, NinepError> {
        self.rpc_tagged(self.alloc_tag(), msg).await
    }

    fn alloc_tag(&self) -> u16 {
        loop {
            let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
            if tag != NOTAG && !self.inner.pending.lock().waiters.contains_key(&tag) {
                return tag;
            }
        }
    }

    async fn rpc_tagged(&self, tag: u16, msg: Tmessage) -> Result<Rmessage, NinepError> {
        let frame = msg.encode(tag)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return Err(NinepError::Closed);
            }
            pending.waiters.insert(tag, tx);
        }

        if self.inner.chatty {
            log::info!("{} <- tag {} {}", self.inner.label, tag, msg);
        }
        let sent = {
            let mut writer = self.inner.writer.lock().await;
            writer.write_all(&frame).await
        };
        if let Err(e) = sent {
            self.inner.pending.lock().waiters.remove(&tag);
            return Err(NinepError::Io(e));
        }

        match rx.await.map_err(|_| NinepError::Closed)?? {
            Rmessage::Error { ename } => Err(NinepError::Remote(ename)),
            reply => Ok(reply),
        }
    }
}

fn unexpected(want: &str, got: &Rmessage) -> NinepError {
    NinepError::Protocol(format!("expected {}, got {}", want, got))
}

async fn read_frame(reader: &mut ReadHalf<Box<dyn Stream>>) -> Result<Vec<u8>, NinepError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let size = fcall::frame_len(header) as usize;
    if size < 7 || size > (MSIZE as usize) * 2 {
        return Err(NinepError::Protocol(format!("bad frame size {}", size)));
    }
    let mut frame = vec![0u8; size];
    frame[..4].copy_from_slice(&header);
    reader.read_exact(&mut frame[4..]).await?;
    Ok(frame)
}

async fn reader_task(mut reader: ReadHalf<Box<dyn Stream>>, inner: Arc<Inner>) {
    loop {
        let decoded = match read_frame(&mut reader).await {
            Ok(frame) => Rmessage::decode(&frame).map_err(NinepError::from),
            Err(e) => Err(e),
        };
        let (tag, reply) = match decoded {
            Ok(decoded) => decoded,
            Err(NinepError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::debug!("{}: connection closed", inner.label);
                break;
            }
            Err(e) => {
                log::warn!("{}: {}", inner.label, e);
                break;
            }
        };
        if inner.chatty {
            log::info!("{} -> tag {} {}", inner.label, tag, reply);
        }
        let waiter = inner.pending.lock().waiters.remove(&tag);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(reply));
            }
            None => log::debug!("{}: reply for unknown tag {}", inner.label, tag),
        }
    }

    let mut pending = inner.pending.lock();
    pending.closed = true;
    for (_, tx) in pending.waiters.drain() {
        let _ = tx.send(Err(NinepError::Closed));
    }
}

/// An open file on the server. Clunked when dropped.
pub struct Fid {
    client: Client,
    fid: u32,
    iounit: u32,
}

impl Fid {
    pub fn iounit(&self) -> u32 {
        self.iounit
    }

    /// One read of at most `iounit` bytes. Empty means end of file.
    pub async fn read(&self, offset: u64) -> Result<Vec<u8>, NinepError> {
        let msg = Tmessage::Read {
            fid: self.fid,
            offset,
            count: self.iounit,
        };
        match self.client.rpc(msg).await? {
            Rmessage::Read { data } => Ok(data),
            other => Err(unexpected("Rread", &other)),
        }
    }

    /// Read from the start until end of file.
    pub async fn read_all(&self) -> Result<Vec<u8>, NinepError> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(out.len() as u64).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// Write all of `data`, split into `iounit` pieces.
    pub async fn write(&self, data: &[u8]) -> Result<(), NinepError> {
        let mut chunks: Vec<&[u8]> = data.chunks(self.iounit.max(1) as usize).collect();
        if chunks.is_empty() {
            // still sent, so the server sees the write
            chunks.push(&[]);
        }
        let mut offset = 0u64;
        for chunk in chunks {
            let msg = Tmessage::Write {
                fid: self.fid,
                offset,
                data: chunk.to_vec(),
            };
            match self.client.rpc(msg).await? {
                Rmessage::Write { count } if count as usize == chunk.len() => {}
                Rmessage::Write { count } => {
                    return Err(NinepError::Protocol(format!(
                        "short write: {} of {} bytes",
                        count,
                        chunk.len()
                    )));
                }
                other => return Err(unexpected("Rwrite", &other)),
            }
            offset += chunk.len() as u64;
        }
        Ok(())
    }
}

impl Drop for Fid {
    fn drop(&mut self) {
        let client = self.client.clone();
        let fid = self.fid;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { client.clunk(fid).await });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::DuplexStream;

    /// A tiny in-memory 9P server: a tree of named files with fixed
    /// contents, recording every write.
    pub(crate) struct FakeServer {
        files: HashMap<String, Vec<u8>>,
        msize: Option<u32>,
        pub writes: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    }

    impl FakeServer {
        pub fn new(files: &[(&str, &[u8])]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(n, c)| (n.to_string(), c.to_vec()))
                    .collect(),
                msize: None,
                writes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Answer Tversion with `msize` instead of echoing the client's.
        pub fn with_msize(mut self, msize: u32) -> Self {
            self.msize = Some(msize);
            self
        }

        pub fn spawn(self) -> DuplexStream {
            let (client, server) = tokio::io::duplex(1 << 16);
            tokio::spawn(self.serve(server));
            client
        }

        async fn serve(self, mut stream: DuplexStream) {
            let mut fids: HashMap<u32, String> = HashMap::new();
            loop {
                let mut header = [0u8; 4];
                if stream.read_exact(&mut header).await.is_err() {
                    return;
                }
                let size = u32::from_le_bytes(header) as usize;
                let mut frame = header.to_vec();
                frame.resize(size, 0);
                if stream.read_exact(&mut frame[4..]).await.is_err() {
                    return;
                }
                let (tag, msg) = Tmessage::decode(&frame).unwrap();
                let reply = match msg {
                    Tmessage::Version { msize, .. } => Rmessage::Version {
                        msize: self.msize.unwrap_or(msize),
                        version: "9P2000".into(),
                    },
                    Tmessage::Attach { fid, .. } => {
                        fids.insert(fid, String::new());
                        Rmessage::Attach { qid: Qid::default() }
                    }
                    Tmessage::Walk { newfid, wnames, .. } => {
                        let path = wnames.join("/");
                        if self.files.contains_key(&path) {
                            fids.insert(newfid, path);
                            Rmessage::Walk {
                                qids: vec![Qid::default(); wnames.len()],
                            }
                        } else {
                            Rmessage::Walk { qids: Vec::new() }
                        }
                    }
                    Tmessage::Open { .. } => Rmessage::Open {
                        qid: Qid::default(),
                        iounit: 4,
                    },
                    Tmessage::Read { fid, offset, count } => {
                        let content = &self.files[&fids[&fid]];
                        let start = (offset as usize).min(content.len());
                        let end = (start + count as usize).min(content.len());
                        Rmessage::Read {
                            data: content[start..end].to_vec(),
                        }
                    }
                    Tmessage::Write { fid, data, .. } => {
                        let count = data.len() as u32;
                        self.writes.lock().push((fids[&fid].clone(), data));
                        Rmessage::Write { count }
                    }
                    Tmessage::Clunk { fid } => {
                        fids.remove(&fid);
                        Rmessage::Clunk
                    }
                };
                let frame = reply.encode(tag).unwrap();
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            }
        }
    }

    use crate::fcall::Qid;

    #[tokio::test]
    async fn open_and_read_whole_file() {
        let server = FakeServer::new(&[("3/tag", b"/r@v1/a Del Snarf | Look")]);
        let client = Client::start(server.spawn(), "test", "", false).await.unwrap();

        let fid = client.open("3/tag", fcall::OREAD).await.unwrap();
        assert_eq!(fid.iounit(), 4);
        assert_eq!(fid.read_all().await.unwrap(), b"/r@v1/a Del Snarf | Look");
    }

    #[tokio::test]
    async fn tiny_msize_is_refused() {
        let server = FakeServer::new(&[]).with_msize(IOHDRSZ);
        match Client::start(server.spawn(), "test", "", false).await {
            Err(NinepError::Protocol(msg)) => assert!(msg.contains("too small")),
            other => panic!("unexpected handshake result {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn smaller_msize_limits_the_iounit() {
        let server = FakeServer::new(&[("3/data", b"")]).with_msize(IOHDRSZ + 2);
        let client = Client::start(server.spawn(), "test", "", false).await.unwrap();
        assert_eq!(client.msize(), IOHDRSZ + 2);
        let fid = client.open("3/data", fcall::OWRITE).await.unwrap();
        assert_eq!(fid.iounit(), 2);
    }

    #[tokio::test]
    async fn empty_write_still_reaches_the_server() {
        let server = FakeServer::new(&[("3/data", b"")]);
        let writes = server.writes.clone();
        let client = Client::start(server.spawn(), "test", "", false).await.unwrap();

        let fid = client.open("3/data", fcall::OWRITE).await.unwrap();
        fid.write(b"").await.unwrap();
        assert_eq!(*writes.lock(), vec![("3/data".to_string(), Vec::new())]);
    }

    #[tokio::test]
    async fn writes_are_split_by_iounit() {
        let server = FakeServer::new(&[("3/data", b"")]);
        let writes = server.writes.clone();
        let client = Client::start(server.spawn(), "test", "", false).await.unwrap();

        let fid = client.open("3/data", fcall::OWRITE).await.unwrap();
        fid.write(b"hello world").await.unwrap();

        let chunks: Vec<Vec<u8>> = writes.lock().iter().map(|(_, d)| d.clone()).collect();
        assert_eq!(chunks, vec![b"hell".to_vec(), b"o wo".to_vec(), b"rld".to_vec()]);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let server = FakeServer::new(&[]);
        let client = Client::start(server.spawn(), "test", "", false).await.unwrap();
        match client.open("plumb/nope", fcall::OREAD).await {
            Err(NinepError::Remote(e)) => assert!(e.contains("does not exist")),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("open of a missing file succeeded"),
        }
    }

    #[tokio::test]
    async fn concurrent_requests_share_the_connection() {
        let server = FakeServer::new(&[("a", b"alpha"), ("b", b"bravo")]);
        let client = Client::start(server.spawn(), "test", "", true).await.unwrap();

        let a = client.open("a", fcall::OREAD).await.unwrap();
        let b = client.open("b", fcall::OREAD).await.unwrap();
        let (ra, rb) = tokio::join!(a.read_all(), b.read_all());
        assert_eq!(ra.unwrap(), b"alpha");
        assert_eq!(rb.unwrap(), b"bravo");
    }

    #[tokio::test]
    async fn closed_connection_fails_waiters() {
        let (client_end, server_end) = tokio::io::duplex(1024);
        let pending = tokio::spawn(Client::start(client_end, "test", "", false));
        drop(server_end);
        assert!(pending.await.unwrap().is_err());
    }
}
