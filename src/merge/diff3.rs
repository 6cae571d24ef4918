//! Line-based three-way merge.
//!
//! Both sides are diffed against the ancestor with Myers' algorithm. Change
//! hunks from the two sides that overlap or touch in ancestor coordinates are
//! grouped into one region; a region changed by only one side takes that
//! side, a region changed identically by both takes either, and anything else
//! becomes a conflict bounded by git-style markers.

use similar::{Algorithm, DiffTag, capture_diff_slices};

pub const MARKER_CURRENT: &str = "<<<<<<<";
pub const MARKER_SEPARATOR: &str = "=======";
pub const MARKER_INCOMING: &str = ">>>>>>>";

/// Label used for the current side in conflict markers.
pub const CURRENT_LABEL: &str = "current";

/// Outcome of merging one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Fully resolved content.
    Clean(String),
    /// Content with inline conflict markers.
    Conflict(String),
}

impl MergeResult {
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Clean(content) | Self::Conflict(content) => content,
        }
    }

    #[must_use]
    pub fn into_content(self) -> String {
        match self {
            Self::Clean(content) | Self::Conflict(content) => content,
        }
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Current,
    Incoming,
}

/// A changed span: `ancestor[o_start..o_end]` became `side[s_start..s_end]`.
#[derive(Debug, Clone, Copy)]
struct Hunk {
    side: Side,
    o_start: usize,
    o_end: usize,
    s_start: usize,
    s_end: usize,
}

fn lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn hunks(side: Side, ancestor: &[&str], other: &[&str]) -> Vec<Hunk> {
    let mut out: Vec<Hunk> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, ancestor, other) {
        if op.tag() == DiffTag::Equal {
            continue;
        }
        let (old, new) = (op.old_range(), op.new_range());
        match out.last_mut() {
            Some(last) if last.o_end == old.start && last.s_end == new.start => {
                last.o_end = old.end;
                last.s_end = new.end;
            }
            _ => out.push(Hunk {
                side,
                o_start: old.start,
                o_end: old.end,
                s_start: new.start,
                s_end: new.end,
            }),
        }
    }
    out
}

/// Range of `side` covering ancestor region `[lo, hi)` given the side's hunks in it.
fn side_range(group: &[Hunk], side: Side, lo: usize, hi: usize) -> Option<(usize, usize)> {
    let mine: Vec<&Hunk> = group.iter().filter(|h| h.side == side).collect();
    let first = mine.first()?;
    let last = mine.last()?;
    let start = first.s_start - (first.o_start - lo);
    let end = last.s_end + (hi - last.o_end);
    Some((start, end))
}

fn push_lines(out: &mut String, chunk: &[&str]) {
    for line in chunk {
        out.push_str(line);
    }
}

fn push_terminated(out: &mut String, chunk: &[&str]) {
    push_lines(out, chunk);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Merge `current` and `incoming`, both derived from `ancestor`.
///
/// `incoming_label` names the incoming side in conflict markers, normally
/// the skill being applied.
#[must_use]
pub fn merge3(current: &str, ancestor: &str, incoming: &str, incoming_label: &str) -> MergeResult {
    if current == incoming || ancestor == incoming {
        return MergeResult::Clean(current.to_string());
    }
    if ancestor == current {
        return MergeResult::Clean(incoming.to_string());
    }

    let o = lines(ancestor);
    let a = lines(current);
    let b = lines(incoming);

    let mut all = hunks(Side::Current, &o, &a);
    all.extend(hunks(Side::Incoming, &o, &b));
    all.sort_by_key(|h| (h.o_start, h.o_end));

    let mut out = String::with_capacity(current.len().max(incoming.len()));
    let mut conflicted = false;
    let mut o_cursor = 0;
    let mut i = 0;

    while i < all.len() {
        let lo = all[i].o_start;
        let mut hi = all[i].o_end;
        let mut j = i + 1;
        while j < all.len() && all[j].o_start <= hi {
            hi = hi.max(all[j].o_end);
            j += 1;
        }
        let group = &all[i..j];
        i = j;

        push_lines(&mut out, &o[o_cursor..lo]);
        o_cursor = hi;

        let a_range = side_range(group, Side::Current, lo, hi);
        let b_range = side_range(group, Side::Incoming, lo, hi);
        let a_chunk = a_range.map_or(&o[lo..hi], |(s, e)| &a[s..e]);
        let b_chunk = b_range.map_or(&o[lo..hi], |(s, e)| &b[s..e]);

        match (a_range, b_range) {
            (Some(_), None) => push_lines(&mut out, a_chunk),
            (None, Some(_)) => push_lines(&mut out, b_chunk),
            _ if a_chunk == b_chunk => push_lines(&mut out, a_chunk),
            _ => {
                conflicted = true;
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(MARKER_CURRENT);
                out.push(' ');
                out.push_str(CURRENT_LABEL);
                out.push('\n');
                push_terminated(&mut out, a_chunk);
                out.push_str(MARKER_SEPARATOR);
                out.push('\n');
                push_terminated(&mut out, b_chunk);
                out.push_str(MARKER_INCOMING);
                out.push(' ');
                out.push_str(incoming_label);
                out.push('\n');
            }
        }
    }
    push_lines(&mut out, &o[o_cursor..]);

    if conflicted {
        MergeResult::Conflict(out)
    } else {
        MergeResult::Clean(out)
    }
}

/// Whether `content` still carries conflict markers.
#[must_use]
pub fn has_conflict_markers(content: &str) -> bool {
    content.lines().any(|line| {
        line == MARKER_SEPARATOR
            || line.starts_with(&format!("{MARKER_CURRENT} "))
            || line.starts_with(&format!("{MARKER_INCOMING} "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_on_same_line() {
        let result = merge3("L1\nX\nL3", "L1\nL2\nL3", "L1\nY\nL3", "skill-b");
        assert!(result.is_conflict());
        insta::assert_snapshot!(result.content(), @r"
        L1
        <<<<<<< current
        X
        =======
        Y
        >>>>>>> skill-b
        L3
        ");
        assert!(has_conflict_markers(result.content()));
    }

    #[test]
    fn test_conflict_preserves_missing_trailing_newline() {
        let result = merge3("L1\nX\nL3", "L1\nL2\nL3", "L1\nY\nL3", "b");
        assert!(result.content().ends_with("\nL3"));
    }

    #[test]
    fn test_disjoint_changes_merge_cleanly() {
        let ancestor = "a\nb\nc\nd\ne\n";
        let current = "A\nb\nc\nd\ne\n";
        let incoming = "a\nb\nc\nd\nE\n";
        assert_eq!(
            merge3(current, ancestor, incoming, "s"),
            MergeResult::Clean("A\nb\nc\nd\nE\n".into())
        );
    }

    #[test]
    fn test_one_sided_changes_adopted() {
        let ancestor = "a\nb\n";
        assert_eq!(
            merge3(ancestor, ancestor, "a\nb\nc\n", "s").into_content(),
            "a\nb\nc\n"
        );
        assert_eq!(
            merge3("z\na\nb\n", ancestor, ancestor, "s").into_content(),
            "z\na\nb\n"
        );
    }

    #[test]
    fn test_identical_changes_are_not_conflicts() {
        let ancestor = "one\ntwo\nthree\nfour\n";
        let both = "one\nTWO\nthree\nfour\nfive\n";
        let current = "zero\none\nTWO\nthree\nfour\nfive\n";
        let result = merge3(current, ancestor, both, "s");
        assert_eq!(result, MergeResult::Clean(current.into()));
    }

    #[test]
    fn test_insertions_at_different_points() {
        let ancestor = "fn a() {}\n\nfn b() {}\n\nfn c() {}\n";
        let current = "use x;\nfn a() {}\n\nfn b() {}\n\nfn c() {}\n";
        let incoming = "fn a() {}\n\nfn b() {}\n\nfn c() {}\nfn d() {}\n";
        assert_eq!(
            merge3(current, ancestor, incoming, "s").into_content(),
            "use x;\nfn a() {}\n\nfn b() {}\n\nfn c() {}\nfn d() {}\n"
        );
    }

    #[test]
    fn test_deletion_vs_edit_conflicts() {
        let ancestor = "keep\nvictim\nkeep2\n";
        let current = "keep\nkeep2\n";
        let incoming = "keep\nvictim edited\nkeep2\n";
        let result = merge3(current, ancestor, incoming, "s");
        assert!(result.is_conflict());
        assert!(result.content().contains("=======\nvictim edited\n>>>>>>> s\n"));
    }

    #[test]
    fn test_empty_ancestor_both_add_differently() {
        let result = merge3("a\n", "", "b\n", "s");
        assert!(result.is_conflict());
    }

    #[test]
    fn test_marker_detection_ignores_lookalikes() {
        assert!(!has_conflict_markers("a\n======== heading\n<<<<<<<<x\n"));
        assert!(has_conflict_markers("a\n=======\nb\n"));
    }
}
