//! Backslash escaping helpers shared by every identifier binding.

/// Backslash-escape every character outside `[A-Za-z0-9_]`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if !(ch.is_ascii_alphanumeric() || ch == '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Strip escaping backslashes. A trailing lone backslash is kept as-is.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Split `text` on `delim`, treating a delimiter preceded by an unescaped backslash as
/// part of the field. The returned fields keep every escape sequence verbatim.
pub(crate) fn split_raw(delim: char, text: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
        } else if ch == delim {
            fields.push(&text[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    fields.push(&text[start..]);
    fields
}

/// Split `text` on unescaped occurrences of `delim`.
///
/// An escaped delimiter (`\:` for `':'`) becomes a literal delimiter in the field; other
/// escape sequences are left untouched.
pub fn split_escaped(delim: char, text: &str) -> Vec<String> {
    split_raw(delim, text)
        .into_iter()
        .map(|field| {
            let mut out = String::with_capacity(field.len());
            let mut chars = field.chars().peekable();
            while let Some(ch) = chars.next() {
                if ch == '\\' {
                    match chars.next() {
                        Some(next) if next == delim => out.push(next),
                        Some(next) => {
                            out.push('\\');
                            out.push(next);
                        }
                        None => out.push('\\'),
                    }
                } else {
                    out.push(ch);
                }
            }
            out
        })
        .collect()
}

/// Decode `%xx` sequences used by the legacy URI binding. Malformed sequences are kept
/// literally.
pub(crate) fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%'
            && idx + 2 < bytes.len()
            && bytes[idx + 1].is_ascii_hexdigit()
            && bytes[idx + 2].is_ascii_hexdigit()
        {
            // Both bytes are ASCII hex digits, so this slice is on char boundaries.
            if let Ok(value) = u8::from_str_radix(&text[idx + 1..idx + 3], 16) {
                out.push(value);
                idx += 3;
                continue;
            }
        }
        out.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
