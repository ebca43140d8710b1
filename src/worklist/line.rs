//! Line grammar for the worklist file.
//!
//! ```text
//! # comment
//! DefaultImageCount:200
//! "cats":3
//! "dogs"
//! DONE - "birds":10
//! ```

use std::sync::LazyLock;

use regex::Regex;

/// Prefix marking a term line as already processed.
pub const DONE_PREFIX: &str = "DONE - ";

/// Written by some editors at the start of UTF-8 files.
pub(crate) const BYTE_ORDER_MARK: char = '\u{feff}';

/// Directive names that set the default requested count.
const DEFAULT_COUNT_DIRECTIVES: &[&str] = &["DefaultImageCount", "DEFAULT_IMAGES"];

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^"([^"]+)"\s*(?::\s*(.*?))?\s*$"#).expect("item pattern is valid")
});

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.*?)\s*$").expect("directive pattern is valid")
});

/// Completion status of a worklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    Pending,
    Done,
}

/// A search term to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Exact line text, used to find the line again when marking it done.
    pub raw_line: String,
    pub term: String,
    /// Count to download: the explicit count, else the default in effect.
    pub requested_count: u32,
    /// Count written on the line itself, if any.
    pub explicit_count: Option<u32>,
    pub status: ItemStatus,
}

impl WorkItem {
    /// Build an item in canonical form (`raw_line` is its serialized text).
    pub fn new(
        term: impl Into<String>,
        explicit_count: Option<u32>,
        default_count: u32,
        status: ItemStatus,
    ) -> Self {
        let mut item = Self {
            raw_line: String::new(),
            term: term.into(),
            requested_count: explicit_count.unwrap_or(default_count),
            explicit_count,
            status,
        };
        item.raw_line = serialize_line(&item);
        item
    }

    pub fn is_done(&self) -> bool {
        self.status == ItemStatus::Done
    }
}

/// A configuration directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    DefaultImageCount(u32),
    /// Any other `Name:value` line; ignored.
    Unknown { name: String },
}

/// One parsed worklist line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorklistLine {
    Blank,
    Comment(String),
    Directive(Directive),
    Item(WorkItem),
    /// Non-blank content that is neither of the above; left untouched.
    Unrecognized { raw: String, reason: String },
}

/// Parse one line given the default count currently in effect.
///
/// Returns `Err` only for a malformed default-count directive.
pub fn parse_line(line: &str, default_count: u32) -> Result<WorklistLine, String> {
    let line = line.strip_prefix(BYTE_ORDER_MARK).unwrap_or(line);
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Ok(WorklistLine::Blank);
    }
    if trimmed.starts_with('#') {
        return Ok(WorklistLine::Comment(line.to_string()));
    }

    if let Some(rest) = trimmed.strip_prefix(DONE_PREFIX) {
        return Ok(parse_item(line, rest, default_count, ItemStatus::Done));
    }

    if trimmed.starts_with('"') {
        return Ok(parse_item(line, trimmed, default_count, ItemStatus::Pending));
    }

    if let Some(caps) = DIRECTIVE_RE.captures(trimmed) {
        let name = &caps[1];
        let value = &caps[2];
        if DEFAULT_COUNT_DIRECTIVES.contains(&name) {
            return parse_count(value)
                .map(|n| WorklistLine::Directive(Directive::DefaultImageCount(n)))
                .map_err(|reason| format!("{name}: {reason}"));
        }
        return Ok(WorklistLine::Directive(Directive::Unknown {
            name: name.to_string(),
        }));
    }

    Ok(WorklistLine::Unrecognized {
        raw: line.to_string(),
        reason: "expected a quoted term, a directive or a comment".to_string(),
    })
}

fn parse_item(raw: &str, body: &str, default_count: u32, status: ItemStatus) -> WorklistLine {
    let Some(caps) = ITEM_RE.captures(body) else {
        return WorklistLine::Unrecognized {
            raw: raw.to_string(),
            reason: "expected \"<term>\" or \"<term>\":<count>".to_string(),
        };
    };

    let explicit_count = match caps.get(2) {
        Some(count) => match parse_count(count.as_str()) {
            Ok(n) => Some(n),
            Err(reason) => {
                return WorklistLine::Unrecognized {
                    raw: raw.to_string(),
                    reason: format!("image count {reason}"),
                };
            }
        },
        None => None,
    };

    WorklistLine::Item(WorkItem {
        raw_line: raw.to_string(),
        term: caps[1].to_string(),
        requested_count: explicit_count.unwrap_or(default_count),
        explicit_count,
        status,
    })
}

fn parse_count(value: &str) -> Result<u32, String> {
    match value.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(format!("{value:?} is not a positive integer")),
        Ok(n) => Ok(n),
    }
}

/// Canonical text for an item.
pub fn serialize_line(item: &WorkItem) -> String {
    let prefix = match item.status {
        ItemStatus::Done => DONE_PREFIX,
        ItemStatus::Pending => "",
    };
    match item.explicit_count {
        Some(n) => format!("{prefix}\"{}\":{n}", item.term),
        None => format!("{prefix}\"{}\"", item.term),
    }
}

/// Text of a pending line once marked done. Leading indentation is kept.
pub fn done_line(raw_line: &str) -> String {
    let body = raw_line.trim_start();
    let indent = &raw_line[..raw_line.len() - body.len()];
    format!("{indent}{DONE_PREFIX}{body}")
}
