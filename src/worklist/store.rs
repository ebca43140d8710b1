//! File-backed worklist: load, and mark items done in place.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{ConfigError, WorklistError};
use crate::worklist::line::{
    BYTE_ORDER_MARK, Directive, WorkItem, WorklistLine, done_line, parse_line,
};

/// Parsed worklist, in file order.
#[derive(Debug, Clone, Default)]
pub struct Worklist {
    lines: Vec<WorklistLine>,
}

impl Worklist {
    /// Parse worklist text, threading the default count through the lines.
    ///
    /// A `DefaultImageCount` directive applies to the item lines after it.
    pub fn parse(text: &str, initial_default: u32) -> Result<Self, ConfigError> {
        let (_, lines) = text.lines().enumerate().try_fold(
            (initial_default, Vec::new()),
            |(default_count, mut lines), (idx, raw)| {
                let line_no = idx + 1;
                let parsed = parse_line(raw, default_count).map_err(|reason| {
                    ConfigError::MalformedDirective {
                        line_no,
                        line: raw.to_string(),
                        reason,
                    }
                })?;

                let default_count = match &parsed {
                    WorklistLine::Directive(Directive::DefaultImageCount(n)) => *n,
                    WorklistLine::Directive(Directive::Unknown { name }) => {
                        warn!(
                            line_no,
                            directive = %name,
                            "Ignoring unknown worklist directive; terms must be quoted"
                        );
                        default_count
                    }
                    WorklistLine::Unrecognized { raw, reason } => {
                        warn!(line_no, line = %raw, "Skipping worklist line: {}", reason);
                        default_count
                    }
                    _ => default_count,
                };

                lines.push(parsed);
                Ok::<_, ConfigError>((default_count, lines))
            },
        )?;

        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[WorklistLine] {
        &self.lines
    }

    /// All items, done or not, in file order.
    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.lines.iter().filter_map(|line| match line {
            WorklistLine::Item(item) => Some(item),
            _ => None,
        })
    }

    /// Items still to be processed, in file order.
    pub fn pending(&self) -> impl Iterator<Item = &WorkItem> {
        self.items().filter(|item| !item.is_done())
    }

    pub fn done_count(&self) -> usize {
        self.items().filter(|item| item.is_done()).count()
    }

    /// Lines skipped with a warning, unknown directives included.
    pub fn warning_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| {
                matches!(
                    line,
                    WorklistLine::Unrecognized { .. } | WorklistLine::Directive(Directive::Unknown { .. })
                )
            })
            .count()
    }
}

/// Exclusive owner of the worklist file for the duration of a run.
#[derive(Debug, Clone)]
pub struct WorklistStore {
    path: PathBuf,
    default_count: u32,
}

impl WorklistStore {
    /// `default_count` applies to items before any `DefaultImageCount` directive.
    pub fn new(path: impl Into<PathBuf>, default_count: u32) -> Self {
        Self {
            path: path.into(),
            default_count,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the worklist file.
    pub async fn load(&self) -> Result<Worklist, ConfigError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::WorklistMissing {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(ConfigError::WorklistUnreadable {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let worklist = Worklist::parse(&text, self.default_count)?;
        debug!(
            path = %self.path.display(),
            items = worklist.items().count(),
            done = worklist.done_count(),
            warnings = worklist.warning_count(),
            "Loaded worklist"
        );
        Ok(worklist)
    }

    /// Prefix the item's line with `DONE - ` and atomically replace the file.
    ///
    /// The current file is re-read so edits made during the run survive.
    pub async fn mark_done(&self, item: &WorkItem) -> Result<(), WorklistError> {
        let text = fs::read_to_string(&self.path).await?;
        let updated = mark_done_in(&text, &item.raw_line).ok_or_else(|| {
            WorklistError::LineNotFound {
                line: item.raw_line.clone(),
            }
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_atomically(&path, &updated))
            .await
            .map_err(|e| WorklistError::Persist {
                path: self.path.clone(),
                reason: format!("rewrite task failed: {e}"),
            })??;

        debug!(term = %item.term, "Marked worklist item done");
        Ok(())
    }
}

/// Rewrite the first line equal to `raw_line`, keeping every other byte.
fn mark_done_in(text: &str, raw_line: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() + 8);
    let mut found = false;

    for segment in text.split_inclusive('\n') {
        let (content, ending) = split_line_ending(segment);
        let (bom, content) = match content.strip_prefix(BYTE_ORDER_MARK) {
            Some(rest) => (&content[..content.len() - rest.len()], rest),
            None => ("", content),
        };
        if !found && content == raw_line {
            out.push_str(bom);
            out.push_str(&done_line(content));
            out.push_str(ending);
            found = true;
        } else {
            out.push_str(segment);
        }
    }

    found.then_some(out)
}

fn split_line_ending(segment: &str) -> (&str, &str) {
    if let Some(content) = segment.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = segment.strip_suffix('\n') {
        (content, "\n")
    } else {
        (segment, "")
    }
}

/// Write to a sibling temp file, flush, then rename over the target.
fn replace_atomically(path: &Path, contents: &str) -> Result<(), WorklistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".worklist-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    if let Ok(existing) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(existing.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| WorklistError::Persist {
        path: path.to_path_buf(),
        reason: e.error.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::worklist::line::ItemStatus;

    const SAMPLE: &str = "# my terms\nDefaultImageCount:200\n\n\"cats\":3\n\"dogs\"\nDONE - \"birds\"\nnonsense here\n";

    #[test]
    fn default_is_folded_positionally() {
        let text = "\"early\"\nDefaultImageCount:200\n\"dogs\"\nDefaultImageCount:7\n\"late\"\n";
        let worklist = Worklist::parse(text, 100).unwrap();
        let counts: Vec<(String, u32)> = worklist
            .items()
            .map(|i| (i.term.clone(), i.requested_count))
            .collect();
        assert_eq!(
            counts,
            vec![
                ("early".to_string(), 100),
                ("dogs".to_string(), 200),
                ("late".to_string(), 7),
            ]
        );
    }

    #[test]
    fn pending_skips_done_items() {
        let worklist = Worklist::parse(SAMPLE, 100).unwrap();
        let pending: Vec<&str> = worklist.pending().map(|i| i.term.as_str()).collect();
        assert_eq!(pending, vec!["cats", "dogs"]);
        assert_eq!(worklist.done_count(), 1);
        assert_eq!(worklist.warning_count(), 1);
        assert_eq!(worklist.lines().len(), 7);
    }

    #[test]
    fn unquoted_term_is_reported() {
        let worklist = Worklist::parse("cats:5\n\"dogs\"\n", 100).unwrap();
        let pending: Vec<&str> = worklist.pending().map(|i| i.term.as_str()).collect();
        assert_eq!(pending, vec!["dogs"]);
        assert_eq!(worklist.warning_count(), 1);
    }

    #[test]
    fn malformed_default_is_fatal() {
        let err = Worklist::parse("\"cats\"\nDefaultImageCount:lots\n", 100).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedDirective { line_no: 2, .. }
        ));
    }

    #[tokio::test]
    async fn load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = WorklistStore::new(dir.path().join("absent.txt"), 100);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ConfigError::WorklistMissing { .. }));
    }

    #[tokio::test]
    async fn mark_done_rewrites_only_that_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, SAMPLE).unwrap();

        let store = WorklistStore::new(&path, 100);
        let worklist = store.load().await.unwrap();
        let dogs = worklist.pending().find(|i| i.term == "dogs").unwrap().clone();
        store.mark_done(&dogs).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, SAMPLE.replace("\n\"dogs\"\n", "\nDONE - \"dogs\"\n"));

        let reloaded = store.load().await.unwrap();
        let pending: Vec<&str> = reloaded.pending().map(|i| i.term.as_str()).collect();
        assert_eq!(pending, vec!["cats"]);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "terms.txt")
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn mark_done_twice_reports_missing_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "\"cats\":3\n").unwrap();

        let store = WorklistStore::new(&path, 100);
        let cats = WorkItem::new("cats", Some(3), 100, ItemStatus::Pending);
        store.mark_done(&cats).await.unwrap();
        let err = store.mark_done(&cats).await.unwrap_err();
        assert!(matches!(err, WorklistError::LineNotFound { .. }));
    }

    #[test]
    fn crlf_and_missing_final_newline_survive() {
        let text = "# list\r\n\"cats\"\r\n\"dogs\"";
        assert_eq!(
            mark_done_in(text, "\"dogs\"").unwrap(),
            "# list\r\n\"cats\"\r\nDONE - \"dogs\""
        );
        assert_eq!(
            mark_done_in(text, "\"cats\"").unwrap(),
            "# list\r\nDONE - \"cats\"\r\n\"dogs\""
        );
        assert!(mark_done_in(text, "\"fish\"").is_none());
    }

    #[test]
    fn duplicate_lines_are_marked_one_at_a_time() {
        let text = "\"cats\"\n\"cats\"\n";
        let once = mark_done_in(text, "\"cats\"").unwrap();
        assert_eq!(once, "DONE - \"cats\"\n\"cats\"\n");
        let twice = mark_done_in(&once, "\"cats\"").unwrap();
        assert_eq!(twice, "DONE - \"cats\"\nDONE - \"cats\"\n");
    }

    #[tokio::test]
    async fn byte_order_mark_survives_mark_done() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "\u{feff}\"cats\":3\n\"dogs\"\n").unwrap();

        let store = WorklistStore::new(&path, 100);
        let worklist = store.load().await.unwrap();
        assert_eq!(worklist.warning_count(), 0);
        let cats = worklist.pending().next().unwrap().clone();
        assert_eq!(cats.term, "cats");
        store.mark_done(&cats).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "\u{feff}DONE - \"cats\":3\n\"dogs\"\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn mark_done_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "\"cats\":3\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = WorklistStore::new(&path, 100);
        let cats = WorkItem::new("cats", Some(3), 100, ItemStatus::Pending);
        store.mark_done(&cats).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
