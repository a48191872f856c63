//! Framing: file header = 2-byte BE length + modified UTF-8 name, then 8-byte BE signed size.
//! Exactly `size` raw content bytes follow the header; there is no trailer.

/// TCP port the group owner listens on.
pub const TRANSFER_PORT: u16 = 8988;
/// Buffer size for streaming file content.
pub const CHUNK_SIZE: usize = 8192;

const LEN_SIZE: usize = 2;
const SIZE_FIELD: usize = 8;
const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Metadata frame sent before the file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub file_name: String,
    pub file_size: u64,
}

/// Encode the header for `file_name` / `file_size`.
pub fn encode_header(file_name: &str, file_size: u64) -> Result<Vec<u8>, FrameEncodeError> {
    let size = i64::try_from(file_size).map_err(|_| FrameEncodeError::SizeOutOfRange)?;
    let name = encode_modified_utf8(file_name)?;
    let mut out = Vec::with_capacity(LEN_SIZE + name.len() + SIZE_FIELD);
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(&name);
    out.extend_from_slice(&size.to_be_bytes());
    Ok(out)
}

/// Decode a header from the front of `bytes`. Returns the header and the number of bytes consumed.
/// Call with a partial buffer; `NeedMore` means try again after more data arrives.
pub fn decode_header(bytes: &[u8]) -> Result<(FileHeader, usize), FrameDecodeError> {
    let name_len = header_name_len(bytes)?;
    let total = LEN_SIZE + name_len + SIZE_FIELD;
    if bytes.len() < total {
        return Err(FrameDecodeError::NeedMore);
    }
    let file_name = decode_modified_utf8(&bytes[LEN_SIZE..LEN_SIZE + name_len])?;
    let mut size = [0u8; SIZE_FIELD];
    size.copy_from_slice(&bytes[LEN_SIZE + name_len..total]);
    let size = i64::from_be_bytes(size);
    let file_size = u64::try_from(size).map_err(|_| FrameDecodeError::NegativeSize(size))?;
    Ok((
        FileHeader {
            file_name,
            file_size,
        },
        total,
    ))
}

/// Length of the name field announced by the first two bytes of a header.
pub fn header_name_len(bytes: &[u8]) -> Result<usize, FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
}

/// Total header length for a name field of `name_len` bytes.
pub fn header_len(name_len: usize) -> usize {
    LEN_SIZE + name_len + SIZE_FIELD
}

/// Java-style modified UTF-8: UTF-16 code units, NUL as two bytes, surrogates encoded separately.
fn encode_modified_utf8(s: &str) -> Result<Vec<u8>, FrameEncodeError> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.encode_utf16() {
        match c {
            0x0001..=0x007F => out.push(c as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((c >> 6) & 0x1F) as u8);
                out.push(0x80 | (c & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((c >> 12) & 0x0F) as u8);
                out.push(0x80 | ((c >> 6) & 0x3F) as u8);
                out.push(0x80 | (c & 0x3F) as u8);
            }
        }
        if out.len() > MAX_NAME_LEN {
            return Err(FrameEncodeError::NameTooLong);
        }
    }
    Ok(out)
}

fn decode_modified_utf8(bytes: &[u8]) -> Result<String, FrameDecodeError> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b >> 4 {
            0..=7 => {
                units.push(b as u16);
                i += 1;
            }
            12 | 13 => {
                let b2 = continuation(bytes, i + 1)?;
                units.push(((b as u16 & 0x1F) << 6) | b2);
                i += 2;
            }
            14 => {
                let b2 = continuation(bytes, i + 1)?;
                let b3 = continuation(bytes, i + 2)?;
                units.push(((b as u16 & 0x0F) << 12) | (b2 << 6) | b3);
                i += 3;
            }
            _ => return Err(FrameDecodeError::MalformedName(i)),
        }
    }
    String::from_utf16(&units).map_err(|_| FrameDecodeError::UnpairedSurrogate)
}

fn continuation(bytes: &[u8], at: usize) -> Result<u16, FrameDecodeError> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        _ => Err(FrameDecodeError::MalformedName(at)),
    }
}

/// Error encoding a header.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("file name exceeds 65535 encoded bytes")]
    NameTooLong,
    #[error("file size does not fit a signed 64-bit field")]
    SizeOutOfRange,
}

/// Error decoding a header (need more bytes, or a malformed field).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("malformed modified UTF-8 in file name at byte {0}")]
    MalformedName(usize),
    #[error("file name contains an unpaired surrogate")]
    UnpairedSurrogate,
    #[error("negative file size {0}")]
    NegativeSize(i64),
}
