//! Public-key text normalization.
//!
//! Public keys are uploaded with the PEM armor and all whitespace removed.
//! [`wrap_pem`] restores the canonical SPKI PEM text that
//! [`strip_pem`] started from, byte for byte.

const HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const FOOTER: &str = "-----END PUBLIC KEY-----";
const LINE_WIDTH: usize = 64;

/// Removes the PEM header, footer, and every whitespace character.
#[must_use]
pub fn strip_pem(pem: &str) -> String {
    pem.replace(HEADER, "")
        .replace(FOOTER, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Re-wraps a stripped public key into canonical PEM: header line, base64
/// body in 64-column lines, footer line, trailing newline.
///
/// Text that already carries the PEM header is returned unchanged.
#[must_use]
pub fn wrap_pem(key: &str) -> String {
    if key.contains(HEADER) {
        return key.to_string();
    }
    let body: Vec<char> = key.chars().filter(|c| !c.is_whitespace()).collect();
    let mut out = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 64);
    out.push_str(HEADER);
    out.push('\n');
    for line in body.chunks(LINE_WIDTH) {
        out.extend(line);
        out.push('\n');
    }
    out.push_str(FOOTER);
    out.push('\n');
    out
}
