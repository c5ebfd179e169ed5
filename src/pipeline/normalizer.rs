//! Content normalizer: turns an HTML (or plain) email body into one line of text.

use tracing::warn;

/// Strip markup, decode entities and collapse whitespace.
///
/// Never fails: if the markup cannot be parsed (an unterminated tag or
/// comment) the original content is returned unchanged.
pub fn normalize_content(raw: &str) -> String {
    match strip_markup(raw) {
        Some(text) => collapse_whitespace(&decode_entities(&text)),
        None => {
            warn!(len = raw.len(), "Malformed markup in email body, using raw content");
            raw.to_string()
        }
    }
}

/// Replace every tag and comment with a space and drop `<script>`/`<style>`
/// bodies. Returns `None` on an unterminated tag, comment or raw-text block.
fn strip_markup(html: &str) -> Option<String> {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        // A bare '<' in text ("a < b") is not a tag.
        if !opens_tag(after) {
            out.push('<');
            rest = after;
            continue;
        }

        if let Some(comment) = after.strip_prefix("!--") {
            let end = comment.find("-->")?;
            out.push(' ');
            rest = &comment[end + 3..];
            continue;
        }

        let close = after.find('>')?;
        let tag = &after[..close];
        out.push(' ');
        rest = &after[close + 1..];

        if let Some(name) = raw_text_element(tag) {
            // Skip to the matching end tag; the loop then consumes it.
            let marker = format!("</{name}");
            let end = rest.to_ascii_lowercase().find(&marker)?;
            rest = &rest[end..];
        }
    }

    out.push_str(rest);
    Some(out)
}

fn opens_tag(after_lt: &str) -> bool {
    after_lt
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
}

/// `script` or `style` when `tag` opens one of them.
fn raw_text_element(tag: &str) -> Option<&'static str> {
    let name = tag
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match name.as_str() {
        "script" => Some("script"),
        "style" => Some("style"),
        _ => None,
    }
}

/// Decode named and numeric character references. Unknown references are
/// left as written.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let decoded = after
            .find(';')
            .filter(|&end| end > 0 && end <= 10)
            .and_then(|end| decode_reference(&after[..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }

    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "aacute" => 'á',
        "eacute" => 'é',
        "iacute" => 'í',
        "oacute" => 'ó',
        "uacute" => 'ú',
        "Aacute" => 'Á',
        "Eacute" => 'É',
        "Iacute" => 'Í',
        "Oacute" => 'Ó',
        "Uacute" => 'Ú',
        "ntilde" => 'ñ',
        "Ntilde" => 'Ñ',
        "uuml" => 'ü',
        "Uuml" => 'Ü',
        "iquest" => '¿',
        "iexcl" => '¡',
        _ => return None,
    };
    Some(ch)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
