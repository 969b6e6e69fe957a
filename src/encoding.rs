//! Reversible filename encoding for channel names.
//!
//! Filenames are embedded in broker channel and key names, so they are
//! encoded with the URL-safe base64 alphabet (`A-Z a-z 0-9 - _`) and no
//! padding. The output never contains `*`, `?`, `[`, `/`, `+`, `=` or `:`,
//! so it cannot interfere with PSUBSCRIBE glob patterns or prefix stripping.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::path::{Component, Path};

/// Errors produced when a channel token cannot be turned back into a filename.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid base64url token: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Decoded filename is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Decoded value is not a plain file name: {0:?}")]
    NotAFileName(String),
}

/// Encode a filename into a channel-safe token.
pub fn encode(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name.as_bytes())
}

/// Decode a token produced by [`encode`].
///
/// Besides alphabet and length checks, the decoded value must be a bare file
/// name: empty names, `.`/`..` and anything containing a path separator of
/// the host platform or a NUL byte are rejected, since the receiver joins the
/// result onto its destination directory.
pub fn decode(token: &str) -> Result<String, DecodeError> {
    let bytes = URL_SAFE_NO_PAD.decode(token.as_bytes())?;
    let name = String::from_utf8(bytes)?;

    if !is_plain_file_name(&name) {
        return Err(DecodeError::NotAFileName(name));
    }

    Ok(name)
}

fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\0']) {
        return false;
    }

    // A backslash is an ordinary character on Unix and a separator on Windows.
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
