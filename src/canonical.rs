//! Canonical forms for conversation identities
//!
//! Pure helpers that normalize and validate session ids, community server
//! URLs, room tokens, and server pubkeys in their various text encodings.
//! Logically-equal inputs must always produce byte-identical canonical
//! output, because the canonical forms become keys in the shared config tree.

use base64::Engine;

use crate::error::{ConvoError, RoomError, UrlError};

/// Longest allowed canonical base URL.
pub const MAX_URL: usize = 267;

/// Longest allowed room token.
pub const MAX_ROOM: usize = 64;

/// Leading byte of a current-network session id.
pub const SESSION_ID_PREFIX: u8 = 0x05;

/// Validate a session-id-shaped identity: exactly 66 hex characters.
///
/// Note that this deliberately does not require any particular leading byte;
/// see the leading-byte note on [`crate::iter::ConvoCursor`].
pub fn check_session_id(id: &str) -> Result<(), ConvoError> {
    if id.len() == 66 && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ConvoError::InvalidIdentity)
    }
}

/// Canonical (lowercase) form of a session-style id.
pub fn canonical_session_id(id: &str) -> Result<String, ConvoError> {
    check_session_id(id)?;
    Ok(id.to_ascii_lowercase())
}

/// Raw 33-byte key form of a session-style id.
pub fn session_id_to_bytes(id: &str) -> Result<[u8; 33], ConvoError> {
    check_session_id(id)?;
    let mut out = [0u8; 33];
    hex::decode_to_slice(id, &mut out).map_err(|_| ConvoError::InvalidIdentity)?;
    Ok(out)
}

/// Parse `scheme://host[:port][/]` into its pieces.
///
/// Scheme and host are folded to lowercase; the port comes back as 0 when
/// absent or equal to the scheme's default (80/443). No path is allowed
/// beyond a single optional trailing `/`.
fn parse_url(url: &str) -> Result<(&'static str, String, u16), UrlError> {
    let (scheme, rest) = match url.find("://") {
        Some(pos) => (&url[..pos], &url[pos + 3..]),
        None => return Err(UrlError::MissingOrUnknownScheme),
    };
    let scheme = if scheme.eq_ignore_ascii_case("http") {
        "http"
    } else if scheme.eq_ignore_ascii_case("https") {
        "https"
    } else {
        return Err(UrlError::MissingOrUnknownScheme);
    };

    // Scan the host byte by byte, stopping at the first character that cannot
    // be part of a hostname. A dot may only appear between two label bytes.
    let mut host = String::new();
    let mut next_allow_dot = false;
    let mut has_dot = false;
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            c @ (b'0'..=b'9' | b'a'..=b'z' | b'-') => {
                host.push(c as char);
                next_allow_dot = true;
            }
            c @ b'A'..=b'Z' => {
                host.push(c.to_ascii_lowercase() as char);
                next_allow_dot = true;
            }
            b'.' if next_allow_dot => {
                host.push('.');
                has_dot = true;
                next_allow_dot = false;
            }
            _ => break,
        }
        i += 1;
    }
    if host.len() < 4 || !has_dot || host.ends_with('.') {
        return Err(UrlError::InvalidHost);
    }
    let mut rest = &rest[i..];

    let mut port = 0u16;
    if let Some(r) = rest.strip_prefix(':') {
        let digits_end = r
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(r.len());
        port = r[..digits_end].parse().map_err(|_| UrlError::InvalidPort)?;
        if (port == 80 && scheme == "http") || (port == 443 && scheme == "https") {
            port = 0;
        }
        rest = &r[digits_end..];
    }

    if let Some(r) = rest.strip_prefix('/') {
        rest = r;
    }
    // We don't allow a path in a community URL.
    if !rest.is_empty() {
        return Err(UrlError::UnexpectedTrailingContent);
    }

    Ok((scheme, host, port))
}

/// Canonical lowercase `scheme://host[:port]` form of a server base URL.
pub fn canonical_url(url: &str) -> Result<String, UrlError> {
    let (scheme, host, port) = parse_url(url)?;
    let mut out = format!("{scheme}://{host}");
    if port != 0 {
        out.push(':');
        out.push_str(&port.to_string());
    }
    if out.len() > MAX_URL {
        return Err(UrlError::TooLong);
    }
    Ok(out)
}

/// Canonical lowercase form of a room token (charset `[-0-9a-z_]`).
pub fn canonical_room(token: &str) -> Result<String, RoomError> {
    let token = token.to_ascii_lowercase();
    if token.len() > MAX_ROOM {
        return Err(RoomError::TooLong);
    }
    if token.is_empty() {
        return Err(RoomError::Empty);
    }
    if !token
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'-' | b'_'))
    {
        return Err(RoomError::InvalidCharacters);
    }
    Ok(token)
}

// z-base-32, as used for encoded server pubkeys in pasted community links.
const BASE32Z_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Decode a z-base-32 string; trailing bits beyond the last whole byte are
/// ignored. No crate in our stack speaks this alphabet, so the bit plumbing
/// lives here.
fn base32z_decode(s: &str) -> Option<Vec<u8>> {
    let mut bits = 0u32;
    let mut nbits = 0u32;
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    for c in s.bytes() {
        let v = BASE32Z_ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_lowercase())? as u32;
        bits = (bits << 5) | v;
        nbits += 5;
        if nbits >= 8 {
            nbits -= 8;
            out.push((bits >> nbits) as u8);
            bits &= (1 << nbits) - 1;
        }
    }
    Some(out)
}

/// Decode a server pubkey from text, auto-detecting the encoding by length:
/// 64 hex characters, 43 (unpadded) or 44 (padded) base64 characters, or 52
/// z-base-32 characters.
pub fn decode_pubkey_text(s: &str) -> Result<[u8; 32], ConvoError> {
    let bytes = match s.len() {
        64 => hex::decode(s).ok(),
        43 => base64::engine::general_purpose::STANDARD_NO_PAD.decode(s).ok(),
        44 => base64::engine::general_purpose::STANDARD.decode(s).ok(),
        52 => base32z_decode(s),
        _ => None,
    };
    match bytes {
        Some(b) if b.len() == 32 => {
            let mut out = [0u8; 32];
            out.copy_from_slice(&b);
            Ok(out)
        }
        _ => Err(ConvoError::InvalidPubkeyEncoding),
    }
}

/// A server pubkey from raw bytes: exactly 32 of them.
pub fn pubkey_from_bytes(b: &[u8]) -> Result<[u8; 32], ConvoError> {
    b.try_into().map_err(|_| ConvoError::InvalidPubkey(b.len()))
}

const QS_PUBKEY: &str = "?public_key=";

/// Split a pasted community link into (canonical base URL, canonical room
/// token, server pubkey).
///
/// The URL is consumed from back to front: first the mandatory
/// `?public_key=` query value, then a `/r/<token>` segment or, failing that,
/// a trailing `/<token>` segment; whatever remains is the base URL.
pub fn parse_full_url(full_url: &str) -> Result<(String, String, [u8; 32]), ConvoError> {
    let (rest, pubkey) = match full_url.rfind(QS_PUBKEY) {
        Some(pos) => (
            &full_url[..pos],
            decode_pubkey_text(&full_url[pos + QS_PUBKEY.len()..])?,
        ),
        None => return Err(ConvoError::MissingPubkey),
    };

    let (base, token) = if let Some(pos) = rest.rfind("/r/") {
        (&rest[..pos], &rest[pos + 3..])
    } else if let Some(pos) = rest.rfind('/') {
        (&rest[..pos], &rest[pos + 1..])
    } else {
        (rest, "")
    };

    let room = canonical_room(token)?;
    let base_url = canonical_url(base)?;
    Ok((base_url, room, pubkey))
}
