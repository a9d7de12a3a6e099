//! Line-level diff between two canonical texts

use similar::{ChangeTag, TextDiff};

/// Diff text recorded when old and new are identical
pub const NO_CHANGES: &str = "No changes";

/// Changed lines only, `-` for removed and `+` for added, in document order
pub fn line_diff(old: &str, new: &str) -> String {
    if old == new {
        return NO_CHANGES.to_string();
    }

    let diff = TextDiff::from_lines(old, new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        out.push_str(sign);
        out.push(' ');
        out.push_str(change.value().trim_end_matches('\n'));
        out.push('\n');
    }
    out
}
