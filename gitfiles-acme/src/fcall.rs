//! 9P2000 message encoding, limited to what a client of acme and the
//! plumber needs.

use std::fmt;

use thiserror::Error;

pub const NOTAG: u16 = 0xFFFF;
pub const NOFID: u32 = 0xFFFF_FFFF;
/// Bytes of header in a Twrite/Rread beyond the data itself.
pub const IOHDRSZ: u32 = 24;
pub const VERSION: &str = "9P2000";

pub const OREAD: u8 = 0;
pub const OWRITE: u8 = 1;
pub const ORDWR: u8 = 2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    Tversion = 100,
    Rversion = 101,
    Tattach = 104,
    Rattach = 105,
    Rerror = 107,
    Twalk = 110,
    Rwalk = 111,
    Topen = 112,
    Ropen = 113,
    Tread = 116,
    Rread = 117,
    Twrite = 118,
    Rwrite = 119,
    Tclunk = 120,
    Rclunk = 121,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match value {
            100 => Tversion,
            101 => Rversion,
            104 => Tattach,
            105 => Rattach,
            107 => Rerror,
            110 => Twalk,
            111 => Rwalk,
            112 => Topen,
            113 => Ropen,
            116 => Tread,
            117 => Rread,
            118 => Twrite,
            119 => Rwrite,
            120 => Tclunk,
            121 => Rclunk,
            other => return Err(CodecError::Unsupported(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("truncated message")]
    Truncated,
    #[error("unsupported message type {0}")]
    Unsupported(u8),
    #[error("unexpected message type {0}")]
    Unexpected(u8),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("field too long for the protocol")]
    TooLong,
    #[error("size field says {declared} bytes, frame has {actual}")]
    LengthMismatch { declared: u32, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Qid {
    pub ty: u8,
    pub version: u32,
    pub path: u64,
}

/// Requests a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tmessage {
    Version { msize: u32, version: String },
    Attach { fid: u32, afid: u32, uname: String, aname: String },
    Walk { fid: u32, newfid: u32, wnames: Vec<String> },
    Open { fid: u32, mode: u8 },
    Read { fid: u32, offset: u64, count: u32 },
    Write { fid: u32, offset: u64, data: Vec<u8> },
    Clunk { fid: u32 },
}

/// Replies a server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rmessage {
    Version { msize: u32, version: String },
    Attach { qid: Qid },
    Error { ename: String },
    Walk { qids: Vec<Qid> },
    Open { qid: Qid, iounit: u32 },
    Read { data: Vec<u8> },
    Write { count: u32 },
    Clunk,
}

impl Tmessage {
    pub fn encode(&self, tag: u16) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&tag.to_le_bytes());
        let ty = match self {
            Tmessage::Version { msize, version } => {
                payload.extend_from_slice(&msize.to_le_bytes());
                put_string(&mut payload, version)?;
                MessageType::Tversion
            }
            Tmessage::Attach {
                fid,
                afid,
                uname,
                aname,
            } => {
                payload.extend_from_slice(&fid.to_le_bytes());
                payload.extend_from_slice(&afid.to_le_bytes());
                put_string(&mut payload, uname)?;
                put_string(&mut payload, aname)?;
                MessageType::Tattach
            }
            Tmessage::Walk {
                fid,
                newfid,
                wnames,
            } => {
                payload.extend_from_slice(&fid.to_le_bytes());
                payload.extend_from_slice(&newfid.to_le_bytes());
                let count: u16 = wnames.len().try_into().map_err(|_| CodecError::TooLong)?;
                payload.extend_from_slice(&count.to_le_bytes());
                for name in wnames {
                    put_string(&mut payload, name)?;
                }
                MessageType::Twalk
            }
            Tmessage::Open { fid, mode } => {
                payload.extend_from_slice(&fid.to_le_bytes());
                payload.push(*mode);
                MessageType::Topen
            }
            Tmessage::Read { fid, offset, count } => {
                payload.extend_from_slice(&fid.to_le_bytes());
                payload.extend_from_slice(&offset.to_le_bytes());
                payload.extend_from_slice(&count.to_le_bytes());
                MessageType::Tread
            }
            Tmessage::Write { fid, offset, data } => {
                payload.extend_from_slice(&fid.to_le_bytes());
                payload.extend_from_slice(&offset.to_le_bytes());
                put_data(&mut payload, data)?;
                MessageType::Twrite
            }
            Tmessage::Clunk { fid } => {
                payload.extend_from_slice(&fid.to_le_bytes());
                MessageType::Tclunk
            }
        };
        finish(ty, &payload)
    }

    pub fn decode(frame: &[u8]) -> Result<(u16, Self), CodecError> {
        let (ty, payload) = split_frame(frame)?;
        let mut cursor = Cursor::new(payload);
        let tag = cursor.u16()?;
        let msg = match ty {
            MessageType::Tversion => Tmessage::Version {
                msize: cursor.u32()?,
                version: cursor.string()?,
            },
            MessageType::Tattach => Tmessage::Attach {
                fid: cursor.u32()?,
                afid: cursor.u32()?,
                uname: cursor.string()?,
                aname: cursor.string()?,
            },
            MessageType::Twalk => {
                let fid = cursor.u32()?;
                let newfid = cursor.u32()?;
                let count = cursor.u16()?;
                let wnames = (0..count)
                    .map(|_| cursor.string())
                    .collect::<Result<Vec<_>, _>>()?;
                Tmessage::Walk {
                    fid,
                    newfid,
                    wnames,
                }
            }
            MessageType::Topen => Tmessage::Open {
                fid: cursor.u32()?,
                mode: cursor.u8()?,
            },
            MessageType::Tread => Tmessage::Read {
                fid: cursor.u32()?,
                offset: cursor.u64()?,
                count: cursor.u32()?,
            },
            MessageType::Twrite => Tmessage::Write {
                fid: cursor.u32()?,
                offset: cursor.u64()?,
                data: cursor.data()?,
            },
            MessageType::Tclunk => Tmessage::Clunk { fid: cursor.u32()? },
            other => return Err(CodecError::Unexpected(other as u8)),
        };
        Ok((tag, msg))
    }
}

impl Rmessage {
    pub fn encode(&self, tag: u16) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&tag.to_le_bytes());
        let ty = match self {
            Rmessage::Version { msize, version } => {
                payload.extend_from_slice(&msize.to_le_bytes());
                put_string(&mut payload, version)?;
                MessageType::Rversion
            }
            Rmessage::Attach { qid } => {
                put_qid(&mut payload, qid);
                MessageType::Rattach
            }
            Rmessage::Error { ename } => {
                put_string(&mut payload, ename)?;
                MessageType::Rerror
            }
            Rmessage::Walk { qids } => {
                let count: u16 = qids.len().try_into().map_err(|_| CodecError::TooLong)?;
                payload.extend_from_slice(&count.to_le_bytes());
                for qid in qids {
                    put_qid(&mut payload, qid);
                }
                MessageType::Rwalk
            }
            Rmessage::Open { qid, iounit } => {
                put_qid(&mut payload, qid);
                payload.extend_from_slice(&iounit.to_le_bytes());
                MessageType::Ropen
            }
            Rmessage::Read { data } => {
                put_data(&mut payload, data)?;
                MessageType::Rread
            }
            Rmessage::Write { count } => {
                payload.extend_from_slice(&count.to_le_bytes());
                MessageType::Rwrite
            }
            Rmessage::Clunk => MessageType::Rclunk,
        };
        finish(ty, &payload)
    }

    pub fn decode(frame: &[u8]) -> Result<(u16, Self), CodecError> {
        let (ty, payload) = split_frame(frame)?;
        let mut cursor = Cursor::new(payload);
        let tag = cursor.u16()?;
        let msg = match ty {
            MessageType::Rversion => Rmessage::Version {
                msize: cursor.u32()?,
                version: cursor.string()?,
            },
            MessageType::Rattach => Rmessage::Attach { qid: cursor.qid()? },
            MessageType::Rerror => Rmessage::Error {
                ename: cursor.string()?,
            },
            MessageType::Rwalk => {
                let count = cursor.u16()?;
                let qids = (0..count)
                    .map(|_| cursor.qid())
                    .collect::<Result<Vec<_>, _>>()?;
                Rmessage::Walk { qids }
            }
            MessageType::Ropen => Rmessage::Open {
                qid: cursor.qid()?,
                iounit: cursor.u32()?,
            },
            MessageType::Rread => Rmessage::Read {
                data: cursor.data()?,
            },
            MessageType::Rwrite => Rmessage::Write {
                count: cursor.u32()?,
            },
            MessageType::Rclunk => Rmessage::Clunk,
            other => return Err(CodecError::Unexpected(other as u8)),
        };
        Ok((tag, msg))
    }
}

impl fmt::Display for Tmessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tmessage::Version { msize, version } => {
                write!(f, "Tversion msize {} version {}", msize, version)
            }
            Tmessage::Attach {
                fid, uname, aname, ..
            } => write!(f, "Tattach fid {} uname {} aname {:?}", fid, uname, aname),
            Tmessage::Walk {
                fid,
                newfid,
                wnames,
            } => write!(f, "Twalk fid {} newfid {} {}", fid, newfid, wnames.join("/")),
            Tmessage::Open { fid, mode } => write!(f, "Topen fid {} mode {}", fid, mode),
            Tmessage::Read { fid, offset, count } => {
                write!(f, "Tread fid {} offset {} count {}", fid, offset, count)
            }
            Tmessage::Write { fid, offset, data } => write!(
                f,
                "Twrite fid {} offset {} count {} {:?}",
                fid,
                offset,
                data.len(),
                preview(data)
            ),
            Tmessage::Clunk { fid } => write!(f, "Tclunk fid {}", fid),
        }
    }
}

impl fmt::Display for Rmessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rmessage::Version { msize, version } => {
                write!(f, "Rversion msize {} version {}", msize, version)
            }
            Rmessage::Attach { qid } => write!(f, "Rattach qid {:x}", qid.path),
            Rmessage::Error { ename } => write!(f, "Rerror {}", ename),
            Rmessage::Walk { qids } => write!(f, "Rwalk nqid {}", qids.len()),
            Rmessage::Open { qid, iounit } => {
                write!(f, "Ropen qid {:x} iounit {}", qid.path, iounit)
            }
            Rmessage::Read { data } => {
                write!(f, "Rread count {} {:?}", data.len(), preview(data))
            }
            Rmessage::Write { count } => write!(f, "Rwrite count {}", count),
            Rmessage::Clunk => f.write_str("Rclunk"),
        }
    }
}

fn preview(data: &[u8]) -> String {
    String::from_utf8_lossy(&data[..data.len().min(64)]).into_owned()
}

/// Size of the frame whose first four bytes are `header`.
pub fn frame_len(header: [u8; 4]) -> u32 {
    u32::from_le_bytes(header)
}

fn finish(ty: MessageType, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let size: u32 = (payload.len() + 5)
        .try_into()
        .map_err(|_| CodecError::TooLong)?;
    let mut frame = Vec::with_capacity(size as usize);
    frame.extend_from_slice(&size.to_le_bytes());
    frame.push(ty as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn split_frame(frame: &[u8]) -> Result<(MessageType, &[u8]), CodecError> {
    if frame.len() < 7 {
        return Err(CodecError::Truncated);
    }
    let declared = frame_len([frame[0], frame[1], frame[2], frame[3]]);
    if declared as usize != frame.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }
    let ty = MessageType::try_from(frame[4])?;
    Ok((ty, &frame[5..]))
}

fn put_string(buffer: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    let len: u16 = value.len().try_into().map_err(|_| CodecError::TooLong)?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_data(buffer: &mut Vec<u8>, data: &[u8]) -> Result<(), CodecError> {
    let count: u32 = data.len().try_into().map_err(|_| CodecError::TooLong)?;
    buffer.extend_from_slice(&count.to_le_bytes());
    buffer.extend_from_slice(data);
    Ok(())
}

fn put_qid(buffer: &mut Vec<u8>, qid: &Qid) {
    buffer.push(qid.ty);
    buffer.extend_from_slice(&qid.version.to_le_bytes());
    buffer.extend_from_slice(&qid.path.to_le_bytes());
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn data(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn qid(&mut self) -> Result<Qid, CodecError> {
        Ok(Qid {
            ty: self.u8()?,
            version: self.u32()?,
            path: self.u64()?,
        })
    }
}
