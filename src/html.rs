//! Block-level view of a document's HTML.
//!
//! Instead of mutating a live DOM, the pipeline treats the document as an
//! ordered list of block spans over the raw HTML string (find index, splice).
//! Anchor matching and patch application become pure list operations, which
//! keeps them deterministic and easy to fuzz against drifted content.
//!
//! Input is assumed to be sanitized upstream; this module only cares about
//! structural well-formedness (balanced tags), not about scripts or styles.

use anyhow::{bail, Result};

/// Elements the anchor matcher walks, in document order of their opening tag.
pub const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "td", "th",
];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// One block-level element located inside the raw HTML string.
#[derive(Debug, Clone)]
pub struct BlockSpan {
    pub tag: String,
    /// Byte offset of the opening `<`.
    pub start: usize,
    /// Byte offset one past the closing `>` of the end tag.
    pub end: usize,
    pub inner_start: usize,
    pub inner_end: usize,
    /// Whitespace-normalized plain text of the block.
    pub text: String,
}

impl BlockSpan {
    pub fn outer<'a>(&self, html: &'a str) -> &'a str {
        &html[self.start..self.end]
    }
}

pub fn is_block_tag(tag: &str) -> bool {
    BLOCK_TAGS.contains(&tag)
}

fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

struct OpenTag {
    tag: String,
    block_index: Option<usize>,
}

/// Walk the HTML and return every block-level element in document order
/// (outer blocks before the blocks nested inside them).
///
/// Fails only on structurally invalid markup: mismatched or unclosed tags.
pub fn segment(html: &str) -> Result<Vec<BlockSpan>> {
    let bytes = html.as_bytes();
    let mut blocks: Vec<BlockSpan> = Vec::new();
    let mut stack: Vec<OpenTag> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let rest = &html[i..];
        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(off) => i += off + 3,
                None => bail!("unterminated comment at byte {}", i),
            }
            continue;
        }
        if rest.starts_with("<!") {
            match rest.find('>') {
                Some(off) => i += off + 1,
                None => bail!("unterminated declaration at byte {}", i),
            }
            continue;
        }
        if rest.starts_with("</") {
            let name_start = i + 2;
            let name = read_tag_name(html, name_start);
            if name.is_empty() {
                bail!("malformed closing tag at byte {}", i);
            }
            let gt = match html[name_start..].find('>') {
                Some(off) => name_start + off,
                None => bail!("unterminated closing tag at byte {}", i),
            };
            let open = match stack.pop() {
                Some(open) => open,
                None => bail!("closing tag </{}> with no open element", name),
            };
            if open.tag != name {
                bail!("mismatched closing tag: expected </{}>, found </{}>", open.tag, name);
            }
            if let Some(idx) = open.block_index {
                blocks[idx].inner_end = i;
                blocks[idx].end = gt + 1;
            }
            i = gt + 1;
            continue;
        }
        let name = read_tag_name(html, i + 1);
        if name.is_empty() {
            // Bare '<' in text content.
            i += 1;
            continue;
        }
        let (gt, self_closing) = match scan_to_tag_end(bytes, i + 1 + name.len()) {
            Some(found) => found,
            None => bail!("unterminated tag <{} at byte {}", name, i),
        };
        if is_void_tag(&name) || self_closing {
            i = gt + 1;
            continue;
        }
        let block_index = if is_block_tag(&name) {
            blocks.push(BlockSpan {
                tag: name.clone(),
                start: i,
                end: 0,
                inner_start: gt + 1,
                inner_end: 0,
                text: String::new(),
            });
            Some(blocks.len() - 1)
        } else {
            None
        };
        stack.push(OpenTag {
            tag: name,
            block_index,
        });
        i = gt + 1;
    }

    if let Some(open) = stack.last() {
        bail!("unclosed <{}> element", open.tag);
    }

    for block in &mut blocks {
        block.text = normalize_text(&strip_tags(&html[block.inner_start..block.inner_end]));
    }
    Ok(blocks)
}

/// Structural validity check; same failure conditions as [`segment`].
pub fn validate(html: &str) -> Result<()> {
    segment(html).map(|_| ())
}

fn read_tag_name(html: &str, start: usize) -> String {
    html[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Scan attribute soup up to the terminating `>`, honoring quoted values that
/// may contain `>` themselves. Returns the offset of `>` and whether the tag
/// was self-closing.
fn scan_to_tag_end(bytes: &[u8], mut i: usize) -> Option<(usize, bool)> {
    let mut quote: Option<u8> = None;
    let mut last_meaningful = 0u8;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some((i, last_meaningful == b'/')),
                _ => {
                    if !b.is_ascii_whitespace() {
                        last_meaningful = b;
                    }
                }
            },
        }
        i += 1;
    }
    None
}

/// Drop every tag and comment, keeping text content with entities decoded.
pub fn strip_tags(html: &str) -> String {
    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            let rest = &html[i..];
            if rest.starts_with("<!--") {
                i += rest.find("-->").map(|off| off + 3).unwrap_or(rest.len());
                continue;
            }
            match scan_to_tag_end(bytes, i + 1) {
                Some((gt, _)) => i = gt + 1,
                None => break,
            }
            continue;
        }
        let ch = html[i..].chars().next().unwrap_or('\u{fffd}');
        if ch == '&' {
            if let Some((decoded, consumed)) = decode_entity(&html[i..]) {
                out.push(decoded);
                i += consumed;
                continue;
            }
        }
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn decode_entity(s: &str) -> Option<(char, usize)> {
    let semi = s
        .char_indices()
        .take_while(|(i, _)| *i < 12)
        .find(|(_, c)| *c == ';')
        .map(|(i, _)| i)?;
    let body = &s[1..semi];
    let decoded = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        _ => {
            let code = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok()?
            } else {
                return None;
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, semi + 1))
}

/// Collapse all whitespace runs to single spaces and trim. Anchor snippets
/// and block text are always compared in this form.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Locate the first block whose text corresponds to the anchor snippet.
///
/// The match is a bidirectional substring test: the block may contain the
/// snippet, or the snippet may contain the block's text. This tolerates the
/// model returning a slightly shortened or padded anchor.
pub fn find_anchor(blocks: &[BlockSpan], normalized_find: &str) -> Option<usize> {
    if normalized_find.is_empty() {
        return None;
    }
    blocks.iter().position(|block| {
        !block.text.is_empty()
            && (block.text.contains(normalized_find) || normalized_find.contains(&block.text))
    })
}
