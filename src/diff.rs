//! Side-by-side diff alignment
//!
//! Produces two equal-length columns (baseline on the left, live content on the
//! right) with one classification per row. The edit script comes from a Myers
//! diff; inside each run of changes, removed and inserted lines are paired row
//! by row as modifications and the surplus on either side is padded with blanks.

use serde::Serialize;
use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::fmt::Write as _;
use std::ops::Range;

/// Classification of one aligned row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Unchanged,
    Added,
    Removed,
    Modified,
}

impl LineKind {
    fn marker(self) -> char {
        match self {
            LineKind::Unchanged => ' ',
            LineKind::Added => '+',
            LineKind::Removed => '-',
            LineKind::Modified => '~',
        }
    }
}

/// Aligned old/new columns; all three vectors have the same length
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlignedDiff {
    pub old: Vec<String>,
    pub new: Vec<String>,
    pub kinds: Vec<LineKind>,
}

/// Row counts per classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl AlignedDiff {
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn is_identical(&self) -> bool {
        self.kinds.iter().all(|k| *k == LineKind::Unchanged)
    }

    pub fn stats(&self) -> DiffStats {
        let mut stats = DiffStats::default();
        for kind in &self.kinds {
            match kind {
                LineKind::Unchanged => stats.unchanged += 1,
                LineKind::Added => stats.added += 1,
                LineKind::Removed => stats.removed += 1,
                LineKind::Modified => stats.modified += 1,
            }
        }
        stats
    }

    /// Plain-text two-column rendering, each column cut to `width` characters
    pub fn render(&self, width: usize) -> String {
        let mut out = String::new();
        for ((old, new), kind) in self.old.iter().zip(&self.new).zip(&self.kinds) {
            let left: String = old.chars().take(width).collect();
            let right: String = new.chars().take(width).collect();
            let _ = writeln!(
                out,
                "{} {:<width$} | {}",
                kind.marker(),
                left,
                right,
                width = width
            );
        }
        out
    }

    fn push(&mut self, old: &str, new: &str, kind: LineKind) {
        self.old.push(old.to_string());
        self.new.push(new.to_string());
        self.kinds.push(kind);
    }

    /// Emit one run of changes: paired rows first, then the unpaired surplus.
    fn push_change_run(&mut self, old: &[&str], new: &[&str]) {
        let paired = old.len().min(new.len());
        for i in 0..paired {
            self.push(old[i], new[i], LineKind::Modified);
        }
        for line in &old[paired..] {
            self.push(line, "", LineKind::Removed);
        }
        for line in &new[paired..] {
            self.push("", line, LineKind::Added);
        }
    }
}

/// Align two line sequences.
pub fn align<S: AsRef<str>>(old: &[S], new: &[S]) -> AlignedDiff {
    let old: Vec<&str> = old.iter().map(AsRef::as_ref).collect();
    let new: Vec<&str> = new.iter().map(AsRef::as_ref).collect();

    let mut aligned = AlignedDiff::default();
    let mut pending_old: Range<usize> = 0..0;
    let mut pending_new: Range<usize> = 0..0;

    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => {
                aligned.push_change_run(&old[pending_old.clone()], &new[pending_new.clone()]);
                pending_old = old_range.end..old_range.end;
                pending_new = new_range.end..new_range.end;
                for (o, n) in old_range.zip(new_range) {
                    aligned.push(old[o], new[n], LineKind::Unchanged);
                }
            }
            DiffTag::Delete | DiffTag::Insert | DiffTag::Replace => {
                // Ops are contiguous, so extending the pending ranges keeps them exact
                if pending_old.is_empty() && pending_new.is_empty() {
                    pending_old = old_range.start..old_range.end;
                    pending_new = new_range.start..new_range.end;
                } else {
                    pending_old.end = old_range.end;
                    pending_new.end = new_range.end;
                }
            }
        }
    }
    aligned.push_change_run(&old[pending_old], &new[pending_new]);

    aligned
}

/// Align two texts line by line. An empty text has no lines.
pub fn align_text(old: &str, new: &str) -> AlignedDiff {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();
    align(&old, &new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identical_inputs_are_unchanged() {
        let a = lines(&["one", "two", "three"]);
        let diff = align(&a, &a);

        assert_eq!(diff.old, a);
        assert_eq!(diff.new, a);
        assert!(diff.kinds.iter().all(|k| *k == LineKind::Unchanged));
        assert!(diff.is_identical());
    }

    #[test]
    fn test_empty_old_is_all_added() {
        let b = lines(&["x", "y"]);
        let diff = align(&Vec::<String>::new(), &b);

        assert_eq!(diff.new, b);
        assert_eq!(diff.old, vec![String::new(), String::new()]);
        assert_eq!(diff.kinds, vec![LineKind::Added, LineKind::Added]);
    }

    #[test]
    fn test_empty_new_is_all_removed() {
        let a = lines(&["x", "y"]);
        let diff = align(&a, &Vec::<String>::new());

        assert_eq!(diff.kinds, vec![LineKind::Removed, LineKind::Removed]);
        assert_eq!(diff.new, vec![String::new(), String::new()]);
    }

    #[test]
    fn test_single_line_edit_is_modified() {
        let diff = align(&["hello"], &["hello world"]);

        assert_eq!(diff.len(), 1);
        assert_eq!(diff.kinds[0], LineKind::Modified);
        assert_eq!(diff.old[0], "hello");
        assert_eq!(diff.new[0], "hello world");
    }

    #[test]
    fn test_insertion_in_the_middle_is_padded() {
        let diff = align(&["a", "b", "c"], &["a", "b", "inserted", "c"]);

        assert_eq!(
            diff.kinds,
            vec![
                LineKind::Unchanged,
                LineKind::Unchanged,
                LineKind::Added,
                LineKind::Unchanged
            ]
        );
        assert_eq!(diff.old, lines(&["a", "b", "", "c"]));
        assert_eq!(diff.new, lines(&["a", "b", "inserted", "c"]));
    }

    #[test]
    fn test_replacement_with_surplus() {
        let diff = align(&["a", "old1", "z"], &["a", "new1", "new2", "z"]);

        assert_eq!(
            diff.kinds,
            vec![
                LineKind::Unchanged,
                LineKind::Modified,
                LineKind::Added,
                LineKind::Unchanged
            ]
        );
        assert_eq!(diff.stats().modified, 1);
        assert_eq!(diff.stats().added, 1);
    }

    #[test]
    fn test_align_text_treats_empty_as_no_lines() {
        let diff = align_text("", "first\nsecond\n");
        assert_eq!(diff.kinds, vec![LineKind::Added, LineKind::Added]);
    }

    #[test]
    fn test_render_marks_rows() {
        let diff = align(&["keep", "gone"], &["keep"]);
        let rendered = diff.render(8);
        let rows: Vec<&str> = rendered.lines().collect();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("  keep"));
        assert!(rows[1].starts_with("- gone"));
    }

    #[quickcheck]
    fn prop_columns_have_equal_length(old: Vec<String>, new: Vec<String>) -> bool {
        let diff = align(&old, &new);
        diff.old.len() == diff.new.len() && diff.new.len() == diff.kinds.len()
    }

    #[quickcheck]
    fn prop_non_blank_sides_reconstruct_inputs(old: Vec<u8>, new: Vec<u8>) -> bool {
        // Small alphabet so the inputs share lines
        let old: Vec<String> = old.iter().map(|b| format!("l{}", b % 4)).collect();
        let new: Vec<String> = new.iter().map(|b| format!("l{}", b % 4)).collect();
        let diff = align(&old, &new);

        let left: Vec<String> = diff
            .old
            .iter()
            .zip(&diff.kinds)
            .filter(|(_, k)| **k != LineKind::Added)
            .map(|(l, _)| l.clone())
            .collect();
        let right: Vec<String> = diff
            .new
            .iter()
            .zip(&diff.kinds)
            .filter(|(_, k)| **k != LineKind::Removed)
            .map(|(l, _)| l.clone())
            .collect();

        left == old && right == new
    }
}
