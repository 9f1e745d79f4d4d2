//! Python bytes-literal codec.
//!
//! Generated registration modules carry the serialized descriptor as a single
//! `b'...'` (or `b"..."`) literal. Decoding follows Python's escape rules for
//! non-raw bytes literals; encoding produces the same shape the protobuf
//! compiler emits: printable ASCII verbatim, `\n` `\r` `\t` `\\` `\'` named,
//! everything else as `\xNN`.

/// Decodes a complete bytes literal, quotes and `b` prefix included.
pub fn decode(literal: &str) -> Result<Vec<u8>, String> {
    let body = literal
        .strip_prefix('b')
        .or_else(|| literal.strip_prefix('B'))
        .ok_or_else(|| "bytes literal must start with b".to_string())?;
    let quote = body
        .chars()
        .next()
        .filter(|q| *q == '\'' || *q == '"')
        .ok_or_else(|| "bytes literal must be quoted".to_string())?;
    let inner = body
        .strip_prefix(quote)
        .and_then(|b| b.strip_suffix(quote))
        .ok_or_else(|| "unterminated bytes literal".to_string())?;

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii() {
            return Err(format!("non-ASCII byte 0x{:02x} at offset {}", b, i));
        }
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }

        let Some(&esc) = bytes.get(i + 1) else {
            return Err("dangling backslash".to_string());
        };
        i += 2;
        match esc {
            b'\n' => {}
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'x' => {
                let hex = inner
                    .get(i..i + 2)
                    .ok_or_else(|| format!("truncated \\x escape at offset {}", i - 2))?;
                let value = u8::from_str_radix(hex, 16)
                    .map_err(|_| format!("invalid \\x escape '{}' at offset {}", hex, i - 2))?;
                out.push(value);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value: u32 = u32::from(esc - b'0');
                let mut digits = 1;
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                if value > 0xff {
                    return Err(format!("octal escape out of range: {}", value));
                }
                out.push(value as u8);
            }
            // Unknown escapes keep their backslash, as Python does.
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }

    Ok(out)
}

/// Encodes bytes as a single-quoted Python bytes literal.
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('\'');
    out
}
