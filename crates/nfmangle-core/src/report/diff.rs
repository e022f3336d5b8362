//! Byte-level diff using Myers' O(ND) algorithm
//!
//! Common prefix and suffix are trimmed before the search. When the edit
//! distance of the remaining middle exceeds the limit, the middle is
//! reported as one removed span followed by one inserted span.

use colored::Colorize;

/// Default cap on the number of edits the search explores
pub const DEFAULT_MAX_EDITS: usize = 256;

/// A run of bytes tagged with how it relates the old and new input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSpan {
    /// Present in both inputs
    Common(Vec<u8>),
    /// Present only in the new input
    Inserted(Vec<u8>),
    /// Present only in the old input
    Removed(Vec<u8>),
}

impl DiffSpan {
    /// Bytes covered by this span
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Common(b) | Self::Inserted(b) | Self::Removed(b) => b,
        }
    }

    /// True for inserted and removed spans
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Common(_))
    }
}

/// Diff two byte sequences with [`DEFAULT_MAX_EDITS`]
pub fn diff(old: &[u8], new: &[u8]) -> Vec<DiffSpan> {
    diff_with_limit(old, new, DEFAULT_MAX_EDITS)
}

/// Diff two byte sequences, giving up on a minimal script past `max_edits`
pub fn diff_with_limit(old: &[u8], new: &[u8], max_edits: usize) -> Vec<DiffSpan> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    let mut spans = SpanBuilder::default();
    spans.extend(Kind::Common, &old[..prefix]);

    match shortest_edit(a, b, max_edits) {
        Some(edits) => {
            for edit in edits {
                match edit {
                    Edit::Equal(i) => spans.push(Kind::Common, a[i]),
                    Edit::Delete(i) => spans.push(Kind::Removed, a[i]),
                    Edit::Insert(j) => spans.push(Kind::Inserted, b[j]),
                }
            }
        }
        None => {
            spans.extend(Kind::Removed, a);
            spans.extend(Kind::Inserted, b);
        }
    }

    spans.extend(Kind::Common, &old[old.len() - suffix..]);
    spans.finish()
}

/// Render spans as text, inserted in green and removed in red
///
/// Bytes that are not valid UTF-8 are replaced, which never happens for
/// hex dump input.
pub fn render_pretty(spans: &[DiffSpan]) -> String {
    let mut out = String::new();
    for span in spans {
        let text = String::from_utf8_lossy(span.bytes());
        match span {
            DiffSpan::Common(_) => out.push_str(&text),
            DiffSpan::Inserted(_) => out.push_str(&text.green().to_string()),
            DiffSpan::Removed(_) => out.push_str(&text.red().to_string()),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Common,
    Inserted,
    Removed,
}

/// Merges consecutive bytes of the same kind into one span
#[derive(Default)]
struct SpanBuilder {
    spans: Vec<DiffSpan>,
    current: Option<(Kind, Vec<u8>)>,
}

impl SpanBuilder {
    fn push(&mut self, kind: Kind, byte: u8) {
        self.extend(kind, &[byte]);
    }

    fn extend(&mut self, kind: Kind, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        match &mut self.current {
            Some((k, buf)) if *k == kind => buf.extend_from_slice(bytes),
            _ => {
                self.flush();
                self.current = Some((kind, bytes.to_vec()));
            }
        }
    }

    fn flush(&mut self) {
        if let Some((kind, buf)) = self.current.take() {
            self.spans.push(match kind {
                Kind::Common => DiffSpan::Common(buf),
                Kind::Inserted => DiffSpan::Inserted(buf),
                Kind::Removed => DiffSpan::Removed(buf),
            });
        }
    }

    fn finish(mut self) -> Vec<DiffSpan> {
        self.flush();
        self.spans
    }
}

/// One step of an edit script, indexing into the old (`Equal`, `Delete`)
/// or new (`Insert`) input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal(usize),
    Delete(usize),
    Insert(usize),
}

/// Greedy forward Myers search, or `None` past `max_edits`
fn shortest_edit(a: &[u8], b: &[u8], max_edits: usize) -> Option<Vec<Edit>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = (a.len() + b.len()).min(max_edits) as isize;
    let offset = max + 1;

    // v[k + offset] is the furthest x reached on diagonal k
    let mut v = vec![0isize; 2 * max as usize + 3];
    let mut trace = Vec::new();

    for d in 0..=max {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                return Some(backtrack(&trace, n, m, offset));
            }
            k += 2;
        }
    }

    None
}

fn backtrack(trace: &[Vec<isize>], n: isize, m: isize, offset: isize) -> Vec<Edit> {
    let mut edits = Vec::new();
    let (mut x, mut y) = (n, m);

    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let idx = (k + offset) as usize;
        let prev_k = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[(prev_k + offset) as usize];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            edits.push(Edit::Equal((x - 1) as usize));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                edits.push(Edit::Insert((y - 1) as usize));
            } else {
                edits.push(Edit::Delete((x - 1) as usize));
            }
        }
        x = prev_x;
        y = prev_y;
    }

    edits.reverse();
    edits
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild both inputs from the spans
    fn sides(spans: &[DiffSpan]) -> (Vec<u8>, Vec<u8>) {
        let mut old = Vec::new();
        let mut new = Vec::new();
        for span in spans {
            match span {
                DiffSpan::Common(b) => {
                    old.extend_from_slice(b);
                    new.extend_from_slice(b);
                }
                DiffSpan::Removed(b) => old.extend_from_slice(b),
                DiffSpan::Inserted(b) => new.extend_from_slice(b),
            }
        }
        (old, new)
    }

    fn edit_count(spans: &[DiffSpan]) -> usize {
        spans.iter().filter(|s| s.is_change()).map(|s| s.bytes().len()).sum()
    }

    #[test]
    fn test_identical() {
        assert_eq!(diff(b"same", b"same"), vec![DiffSpan::Common(b"same".to_vec())]);
        assert!(diff(b"", b"").is_empty());
    }

    #[test]
    fn test_insert_in_middle() {
        let spans = diff(b"abcdef", b"abcXYdef");
        assert_eq!(
            spans,
            vec![
                DiffSpan::Common(b"abc".to_vec()),
                DiffSpan::Inserted(b"XY".to_vec()),
                DiffSpan::Common(b"def".to_vec()),
            ]
        );
    }

    #[test]
    fn test_all_new_or_all_removed() {
        assert_eq!(diff(b"", b"abc"), vec![DiffSpan::Inserted(b"abc".to_vec())]);
        assert_eq!(diff(b"abc", b""), vec![DiffSpan::Removed(b"abc".to_vec())]);
    }

    #[test]
    fn test_minimal_edit_script() {
        // Classic example from Myers' paper: D = 5
        let spans = diff(b"ABCABBA", b"CBABAC");
        assert_eq!(sides(&spans), (b"ABCABBA".to_vec(), b"CBABAC".to_vec()));
        assert_eq!(edit_count(&spans), 5);
    }

    #[test]
    fn test_rewrite_in_text() {
        let old = b"GET /magic string HTTP/1.1";
        let new = b"GET /modified value HTTP/1.1";
        let spans = diff(old, new);
        assert_eq!(sides(&spans), (old.to_vec(), new.to_vec()));
        assert!(matches!(spans.first(), Some(DiffSpan::Common(b)) if b == b"GET /m"));
        assert!(matches!(spans.last(), Some(DiffSpan::Common(b)) if b == b" HTTP/1.1"));
    }

    #[test]
    fn test_limit_falls_back_to_replace() {
        let spans = diff_with_limit(b"xxabcdyy", b"xx1234yy", 2);
        assert_eq!(
            spans,
            vec![
                DiffSpan::Common(b"xx".to_vec()),
                DiffSpan::Removed(b"abcd".to_vec()),
                DiffSpan::Inserted(b"1234".to_vec()),
                DiffSpan::Common(b"yy".to_vec()),
            ]
        );
    }

    #[test]
    fn test_render_pretty_plain_text() {
        colored::control::set_override(false);
        let spans = diff(b"abc", b"aXc");
        assert_eq!(render_pretty(&spans), "abXc");
    }
}
