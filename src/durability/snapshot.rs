use crate::store::entry::Cell;
use crate::types::sorted_set::SortedSet;
use crate::types::Value;
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::Path;

/// Binary point-in-time snapshot format, trimmed to the two value types
/// this store holds. Every record is prefixed with its key's expiry, if
/// any, followed by a type byte, the key, and the type-specific payload.
const MAGIC: &[u8; 8] = b"CRDB0001";
const TYPE_STRING: u8 = 0;
const TYPE_ZSET: u8 = 1;
const OPCODE_EXPIRE_MS: u8 = 0xFC;
const OPCODE_EOF: u8 = 0xFF;

fn write_u32(buf: &mut Vec<u8>, n: u32) {
    buf.extend_from_slice(&n.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &[u8]) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s);
}

/// Serializes the whole dataset map into the on-disk snapshot format.
pub fn serialize(map: &HashMap<String, Cell>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);

    for (key, cell) in map {
        if let Some(expires_at) = cell.expires_at {
            buf.push(OPCODE_EXPIRE_MS);
            buf.extend_from_slice(&expires_at.to_le_bytes());
        }
        match &cell.value {
            Value::Str(s) => {
                buf.push(TYPE_STRING);
                write_string(&mut buf, key.as_bytes());
                write_string(&mut buf, s);
            }
            Value::SortedSet(z) => {
                buf.push(TYPE_ZSET);
                write_string(&mut buf, key.as_bytes());
                let members: Vec<_> = z.iter().collect();
                write_u32(&mut buf, members.len() as u32);
                for (member, score) in members {
                    write_string(&mut buf, member);
                    buf.extend_from_slice(&score.to_le_bytes());
                }
            }
        }
    }

    buf.push(OPCODE_EOF);
    buf
}

struct Cursor<'a> {
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn truncated() -> io::Error {
        io::Error::new(ErrorKind::UnexpectedEof, "truncated snapshot")
    }

    fn u8(&mut self) -> io::Result<u8> {
        if self.rest.is_empty() {
            return Err(Self::truncated());
        }
        let b = self.rest[0];
        self.rest = &self.rest[1..];
        Ok(b)
    }

    fn u32(&mut self) -> io::Result<u32> {
        if self.rest.len() < 4 {
            return Err(Self::truncated());
        }
        let (head, tail) = self.rest.split_at(4);
        self.rest = tail;
        Ok(u32::from_le_bytes(head.try_into().unwrap()))
    }

    fn u64(&mut self) -> io::Result<u64> {
        if self.rest.len() < 8 {
            return Err(Self::truncated());
        }
        let (head, tail) = self.rest.split_at(8);
        self.rest = tail;
        Ok(u64::from_le_bytes(head.try_into().unwrap()))
    }

    fn f64(&mut self) -> io::Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.u32()? as usize;
        if self.rest.len() < len {
            return Err(Self::truncated());
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head.to_vec())
    }
}

/// Parses a snapshot previously produced by `serialize`.
pub fn deserialize(bytes: &[u8]) -> io::Result<HashMap<String, Cell>> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(io::Error::new(ErrorKind::InvalidData, "bad snapshot magic"));
    }

    let mut map = HashMap::new();
    let mut cur = Cursor {
        rest: &bytes[MAGIC.len()..],
    };
    let mut pending_expiry: Option<u64> = None;

    loop {
        match cur.u8()? {
            OPCODE_EOF => break,
            OPCODE_EXPIRE_MS => {
                pending_expiry = Some(cur.u64()?);
                continue;
            }
            TYPE_STRING => {
                let key = String::from_utf8_lossy(&cur.bytes()?).into_owned();
                let value = cur.bytes()?;
                let cell = match pending_expiry.take() {
                    Some(e) => Cell::with_expiry(Value::Str(value), e),
                    None => Cell::new(Value::Str(value)),
                };
                map.insert(key, cell);
            }
            TYPE_ZSET => {
                let key = String::from_utf8_lossy(&cur.bytes()?).into_owned();
                let count = cur.u32()?;
                let mut z = SortedSet::new();
                let mut pairs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let member = cur.bytes()?;
                    let score = cur.f64()?;
                    pairs.push((score, member));
                }
                z.update(&pairs, false);
                let cell = match pending_expiry.take() {
                    Some(e) => Cell::with_expiry(Value::SortedSet(z), e),
                    None => Cell::new(Value::SortedSet(z)),
                };
                map.insert(key, cell);
            }
            other => {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("unknown snapshot opcode {other}"),
                ))
            }
        }
        pending_expiry = None;
    }

    Ok(map)
}

/// Writes `bytes` to `path` atomically: full write to a sibling `.new`
/// file, then `rename` over the destination. A reader never observes a
/// partially written snapshot.
pub fn save_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_file_name(format!(
        "{}.new",
        path.file_name().unwrap().to_string_lossy()
    ));
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Loads the snapshot at `path`, or an empty dataset if it doesn't exist yet.
pub fn load(path: &Path) -> io::Result<HashMap<String, Cell>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let bytes = std::fs::read(path)?;
    deserialize(&bytes)
}
