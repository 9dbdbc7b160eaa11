//! Splitting UPF text into named blocks.
//!
//! Both markups delimit blocks with `<PP_NAME>` ... `</PP_NAME>`. They differ
//! in where a marker may sit: XML markup allows markers anywhere (attributes
//! may even span several lines), the legacy markup only recognizes a marker
//! at the start of a line. Pairing, nesting and uniqueness rules are shared.

use crate::error::{FormatError, Result};
use crate::version::Markup;
use indexmap::IndexMap;
use log::trace;
use regex::Regex;
use std::sync::LazyLock;

/// Blocks may contain children, children may not contain anything.
pub const MAX_DEPTH: usize = 2;

static XML_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    // quoted attribute values may contain '>'
    Regex::new(r#"<\s*(/?)\s*(PP_[A-Za-z0-9_.]+)((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)\s*>"#).unwrap()
});

static LEGACY_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*<[ \t]*(/?)[ \t]*(PP_[A-Za-z0-9_.]+)([^>\n]*?)()[ \t]*>").unwrap()
});

/// One delimited section of the input, still unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Literal tag, e.g. `PP_CHI.1`.
    pub tag: String,
    /// The complete text of the block, markers included.
    pub text: String,
    /// Text between the markers with child blocks cut out.
    pub body: String,
    pub children: Vec<RawBlock>,
    /// 1-based line of the start marker.
    pub line: usize,
}

/// Top-level blocks in file order, keyed by literal tag.
pub type BlockMap = IndexMap<String, RawBlock>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum MarkerKind {
    Start,
    End,
    Empty,
}

#[derive(Debug)]
struct Marker<'a> {
    kind: MarkerKind,
    name: &'a str,
    start: usize,
    end: usize,
    line: usize,
}

struct Open<'a> {
    name: &'a str,
    start: usize,
    line: usize,
    cursor: usize,
    body: String,
    children: Vec<RawBlock>,
}

pub fn split_blocks(text: &str, markup: Markup) -> Result<BlockMap> {
    let re: &Regex = match markup {
        Markup::Xml => &*XML_MARKER_RE,
        Markup::Legacy => &*LEGACY_MARKER_RE,
    };

    let markers = find_markers(text, re);
    trace!("found {} block markers ({:?} markup)", markers.len(), markup);

    assemble(text, &markers)
}

fn find_markers<'a>(text: &'a str, re: &Regex) -> Vec<Marker<'a>> {
    let mut markers = Vec::new();
    let mut line = 1;
    let mut counted = 0;

    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        // the legacy pattern may swallow the indentation before '<'
        let start = whole.start() + whole.as_str().find('<').unwrap_or(0);

        line += text[counted..start].matches('\n').count();
        counted = start;

        let kind = if !caps[1].is_empty() {
            MarkerKind::End
        } else if caps.get(4).map_or(false, |m| !m.as_str().is_empty()) {
            MarkerKind::Empty
        } else {
            MarkerKind::Start
        };

        markers.push(Marker {
            kind,
            name: caps.get(2).map_or("", |m| m.as_str()),
            start,
            end: whole.end(),
            line,
        });
    }

    markers
}

fn assemble(text: &str, markers: &[Marker]) -> Result<BlockMap> {
    let mut blocks = BlockMap::new();
    let mut stack: Vec<Open> = Vec::new();

    for m in markers {
        match m.kind {
            MarkerKind::Start | MarkerKind::Empty => {
                if stack.len() >= MAX_DEPTH {
                    let parent = stack.last().map(|o| o.name).unwrap_or_default();
                    return Err(FormatError::NestingTooDeep {
                        block: m.name.to_string(),
                        parent: parent.to_string(),
                        line: m.line,
                    }
                    .into());
                }

                if let Some(parent) = stack.last_mut() {
                    parent.body.push_str(&text[parent.cursor..m.start]);
                    parent.cursor = m.end;
                }

                if m.kind == MarkerKind::Empty {
                    let block = RawBlock {
                        tag: m.name.to_string(),
                        text: text[m.start..m.end].to_string(),
                        body: String::new(),
                        children: Vec::new(),
                        line: m.line,
                    };
                    close(block, &mut stack, &mut blocks)?;
                } else {
                    stack.push(Open {
                        name: m.name,
                        start: m.start,
                        line: m.line,
                        cursor: m.end,
                        body: String::new(),
                        children: Vec::new(),
                    });
                }
            }

            MarkerKind::End => {
                let Some(top) = stack.last() else {
                    return Err(FormatError::UnexpectedEnd {
                        block: m.name.to_string(),
                        line: m.line,
                    }
                    .into());
                };

                if top.name != m.name {
                    if stack.iter().any(|o| o.name == m.name) {
                        return Err(FormatError::UnmatchedStart {
                            block: top.name.to_string(),
                            line: top.line,
                        }
                        .into());
                    }

                    return Err(FormatError::UnexpectedEnd {
                        block: m.name.to_string(),
                        line: m.line,
                    }
                    .into());
                }

                if let Some(mut open) = stack.pop() {
                    open.body.push_str(&text[open.cursor..m.start]);

                    let block = RawBlock {
                        tag: open.name.to_string(),
                        text: text[open.start..m.end].to_string(),
                        body: open.body,
                        children: open.children,
                        line: open.line,
                    };
                    close(block, &mut stack, &mut blocks)?;
                }
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(FormatError::UnmatchedStart {
            block: open.name.to_string(),
            line: open.line,
        }
        .into());
    }

    Ok(blocks)
}

fn close(block: RawBlock, stack: &mut [Open], blocks: &mut BlockMap) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(block);
        return Ok(());
    }

    if blocks.contains_key(&block.tag) {
        return Err(FormatError::DuplicateBlock {
            block: block.tag,
            line: block.line,
        }
        .into());
    }

    blocks.insert(block.tag.clone(), block);
    Ok(())
}
