//! Filename encoding and validation.
//!
//! Names in the disc filesystem are stored as NUL-terminated Shift-JIS byte
//! strings. A name is valid if it contains no NUL byte, no path separator,
//! and survives a round trip through the codec.

use encoding_rs::SHIFT_JIS;

use crate::error::FsError;

/// Encodes a name to its on-disk Shift-JIS bytes (without terminator).
///
/// Fails if the name contains characters the codec cannot represent.
pub fn encode(name: &str) -> Result<Vec<u8>, FsError> {
    let (bytes, _, had_errors) = SHIFT_JIS.encode(name);
    if had_errors {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(bytes.into_owned())
}

/// Decodes on-disk name bytes (terminator already stripped).
///
/// Fails if the bytes are not valid Shift-JIS.
pub fn decode(bytes: &[u8]) -> Result<String, FsError> {
    let (s, _, had_errors) = SHIFT_JIS.decode(bytes);
    if had_errors {
        return Err(FsError::InvalidName(format!("{:?}", bytes)));
    }
    Ok(s.into_owned())
}

/// Decodes bytes, substituting replacement characters for anything the
/// codec rejects. Used for informational header fields where failing the
/// whole query over one bad byte would be unhelpful.
pub fn decode_lossy(bytes: &[u8]) -> String {
    let (s, _, _) = SHIFT_JIS.decode(bytes);
    s.into_owned()
}

/// The encoded length of a name plus its NUL terminator, as laid out in the
/// string table.
pub fn encoded_len(name: &str) -> Result<u32, FsError> {
    Ok(encode(name)?.len() as u32 + 1)
}

/// Checks whether a file/directory name can be safely added to the tree.
pub fn valid_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') {
        return false;
    }
    if name.contains('/') || name.contains('\\') {
        return false;
    }
    match encode(name) {
        Ok(bytes) => decode(&bytes).map(|s| s == name).unwrap_or(false),
        Err(_) => false,
    }
}
