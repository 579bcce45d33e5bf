//! Byte-level HTML tokenizer for the extraction scans.
//!
//! All structural characters (`<`, `>`, `/`, quotes) are ASCII, so scanning
//! bytes and slicing at token boundaries is UTF-8 safe; multi-byte characters
//! only ever appear inside text or attribute values and pass through intact.

/// Tags that never take a closing counterpart and never change depth.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// One opening or closing tag. `start` is the index of `<`; `end` is just
/// past `>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub self_closing: bool,
}

impl Tag {
    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Open(Tag),
    Close(Tag),
    /// `<!-- ... -->`; carries the index just past the comment.
    Comment(usize),
}

impl Token {
    fn end(&self) -> usize {
        match self {
            Token::Open(tag) | Token::Close(tag) => tag.end,
            Token::Comment(end) => *end,
        }
    }
}

pub struct Tokenizer<'a> {
    html: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(html: &'a str) -> Self {
        Self { html, pos: 0 }
    }

    /// Jump the scan position forward (used to skip a captured fragment).
    pub fn seek(&mut self, pos: usize) {
        self.pos = self.pos.max(pos);
    }

    pub fn next_token(&mut self) -> Option<Token> {
        let bytes = self.html.as_bytes();
        while self.pos < bytes.len() {
            if bytes[self.pos] != b'<' {
                self.pos += 1;
                continue;
            }
            match parse_token_at(self.html, self.pos) {
                Some(token) => {
                    self.pos = token.end();
                    return Some(token);
                }
                // Stray '<' in text, or an unterminated tag at end of input.
                None => {
                    self.pos += 1;
                }
            }
        }
        None
    }
}

/// Parse the token starting at `start` (which must index a `<`).
fn parse_token_at(html: &str, start: usize) -> Option<Token> {
    let bytes = html.as_bytes();
    debug_assert_eq!(bytes[start], b'<');

    if html[start..].starts_with("<!--") {
        let end = html[start..].find("-->").map(|rel| start + rel + 3)?;
        return Some(Token::Comment(end));
    }

    let mut pos = start + 1;
    let closing = bytes.get(pos) == Some(&b'/');
    if closing {
        pos += 1;
    }

    let name_start = pos;
    while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'-') {
        pos += 1;
    }
    if pos == name_start {
        return None;
    }
    let name = html[name_start..pos].to_ascii_lowercase();

    // Scan to the closing '>' outside quoted attribute values.
    let mut quote: Option<u8> = None;
    let mut last_meaningful = 0u8;
    while pos < bytes.len() {
        let byte = bytes[pos];
        match quote {
            Some(open_quote) => {
                if byte == open_quote {
                    quote = None;
                }
            }
            None => match byte {
                b'"' | b'\'' => quote = Some(byte),
                b'>' => {
                    let tag = Tag {
                        name,
                        start,
                        end: pos + 1,
                        self_closing: last_meaningful == b'/',
                    };
                    return Some(if closing {
                        Token::Close(tag)
                    } else {
                        Token::Open(tag)
                    });
                }
                _ => {}
            },
        }
        if !byte.is_ascii_whitespace() {
            last_meaningful = byte;
        }
        pos += 1;
    }
    None
}

/// Find the end index (just past the matching close tag) of the fragment
/// opened by `tag`, tracking nesting depth for the outer tag's name.
/// Self-closing and void tags are complete at their own end. Returns `None`
/// when the close cannot be matched (malformed output; caller drops it).
pub fn fragment_end(html: &str, tag: &Tag) -> Option<usize> {
    if tag.self_closing || tag.is_void() {
        return Some(tag.end);
    }

    let mut tokenizer = Tokenizer::new(html);
    tokenizer.seek(tag.end);
    let mut depth = 1usize;

    while let Some(token) = tokenizer.next_token() {
        match token {
            Token::Open(inner) if inner.name == tag.name => {
                if !inner.self_closing && !inner.is_void() {
                    depth += 1;
                }
            }
            Token::Close(inner) if inner.name == tag.name => {
                depth -= 1;
                if depth == 0 {
                    return Some(inner.end);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract the value of `name` from the tag's attribute list, if present.
/// Attribute names compare case-insensitively; values may be quoted with
/// either quote character or bare.
pub fn attribute_value(html: &str, tag: &Tag, name: &str) -> Option<String> {
    let bytes = html.as_bytes();
    // Past "<name" (or "</name", which carries no attributes anyway).
    let mut pos = tag.start + 1 + tag.name.len();
    let end = tag.end.saturating_sub(1);

    while pos < end {
        while pos < end && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b'/') {
            pos += 1;
        }
        let attr_start = pos;
        while pos < end && bytes[pos] != b'=' && bytes[pos] != b'>' && !bytes[pos].is_ascii_whitespace()
        {
            pos += 1;
        }
        if pos == attr_start {
            break;
        }
        let attr_name = &html[attr_start..pos];

        let mut value = String::new();
        if pos < end && bytes[pos] == b'=' {
            pos += 1;
            if pos < end && (bytes[pos] == b'"' || bytes[pos] == b'\'') {
                let open_quote = bytes[pos];
                pos += 1;
                let value_start = pos;
                while pos < end && bytes[pos] != open_quote {
                    pos += 1;
                }
                value = html[value_start..pos].to_string();
                pos += 1;
            } else {
                let value_start = pos;
                while pos < end && !bytes[pos].is_ascii_whitespace() {
                    pos += 1;
                }
                value = html[value_start..pos].to_string();
            }
        }

        if attr_name.eq_ignore_ascii_case(name) {
            return Some(value);
        }
    }
    None
}

/// Remove all markup from a fragment slice, collapsing runs of whitespace.
pub fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut tokenizer = Tokenizer::new(html);
    let mut text_start = 0usize;

    loop {
        let token = tokenizer.next_token();
        let tag_start = match &token {
            Some(Token::Open(tag)) | Some(Token::Close(tag)) => tag.start,
            Some(Token::Comment(end)) => {
                // Comment start is not carried on the token; recover it by
                // searching backwards for the opener.
                html[..*end].rfind("<!--").unwrap_or(text_start)
            }
            None => html.len(),
        };
        if tag_start > text_start {
            out.push_str(&html[text_start..tag_start]);
        }
        match token {
            Some(token) => text_start = token.end(),
            None => break,
        }
    }

    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }
    out
}
