//! Descriptor decoding.
//!
//! Descriptors are tiny JSON documents such as `{"version":"1.4.0"}`. Only one
//! string field is ever read, so the decoder scans for the quoted key and fails
//! closed on anything it does not recognise.

use heapless::String;

use crate::update::UpdateError;

/// Bodies beyond this many bytes are truncated before decoding.
pub const DESCRIPTOR_MAX_BYTES: usize = 512;
pub const TOKEN_MAX_BYTES: usize = 64;

/// Version string or content fingerprint.
pub type Token = String<TOKEN_MAX_BYTES>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    Firmware,
    Content,
}

impl ArtifactKind {
    pub const fn manifest_key(self) -> &'static str {
        match self {
            Self::Firmware => "version",
            Self::Content => "md5",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Firmware => "firmware",
            Self::Content => "content",
        }
    }
}

/// Returns the string value stored under `key`.
pub fn extract_field<'a>(body: &'a [u8], key: &str) -> Result<&'a str, UpdateError> {
    let body = &body[..body.len().min(DESCRIPTOR_MAX_BYTES)];
    let key = key.as_bytes();

    let mut search_from = 0usize;
    let after_marker = loop {
        let Some(pos) = find_quoted(&body[search_from..], key) else {
            return Err(UpdateError::ManifestUnparsable);
        };
        let start = search_from + pos;
        let end = start + key.len() + 2;
        let rest = skip_ws(&body[end..]);
        // A quoted value that happens to equal the key is not a marker.
        if rest.first() == Some(&b':') {
            break end;
        }
        search_from = start + 1;
    };

    let rest = skip_ws(&body[after_marker..]);
    let rest = rest.strip_prefix(b":").ok_or(UpdateError::ManifestUnparsable)?;
    let rest = skip_ws(rest);
    let rest = rest.strip_prefix(b"\"").ok_or(UpdateError::ManifestUnparsable)?;
    let close = rest
        .iter()
        .position(|&b| b == b'"')
        .ok_or(UpdateError::ManifestUnparsable)?;
    let value = &rest[..close];

    if value.is_empty() || value.len() > TOKEN_MAX_BYTES {
        return Err(UpdateError::ManifestUnparsable);
    }
    core::str::from_utf8(value).map_err(|_| UpdateError::ManifestUnparsable)
}

/// Decodes the remote token for `kind` from a descriptor body.
pub fn decode(body: &[u8], kind: ArtifactKind) -> Result<Token, UpdateError> {
    let value = extract_field(body, kind.manifest_key())?;
    let mut token = Token::new();
    token
        .push_str(value)
        .map_err(|_| UpdateError::ManifestUnparsable)?;
    Ok(token)
}

fn find_quoted(haystack: &[u8], key: &[u8]) -> Option<usize> {
    let needle_len = key.len() + 2;
    if haystack.len() < needle_len {
        return None;
    }
    (0..=haystack.len() - needle_len).find(|&i| {
        haystack[i] == b'"'
            && &haystack[i + 1..i + 1 + key.len()] == key
            && haystack[i + 1 + key.len()] == b'"'
    })
}

fn skip_ws(bytes: &[u8]) -> &[u8] {
    let skip = bytes
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    &bytes[skip..]
}
