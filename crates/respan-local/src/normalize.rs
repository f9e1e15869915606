//! Matching-only text normalization.
//!
//! The rewriter that produced the transformed document is free with quotes,
//! dashes, hyphenation and whitespace, so literal comparison fails on text a
//! human would call identical. Everything here is deterministic, lossy, and
//! used exclusively for matching and scoring; display text is never rewritten.

/// Collapse all whitespace runs to single spaces and trim.
pub fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Aggressively normalized text with per-char offset maps back into the
/// source string.
///
/// Folding rules:
/// - quote-like characters (ASCII quotes, backtick, acute, smart quotes) fold
///   to `'`
/// - dash variants (hyphen, en/em dash, horizontal bar, minus) fold to `-`
/// - soft hyphens are dropped; a dash followed by whitespace is dropped
///   entirely (re-joins line-break hyphenation: `sug-\ngests` -> `suggests`)
/// - whitespace runs collapse to one space; everything lowercases
///
/// A normalized char range converts back to a byte span in the source via
/// [`NormText::src_span`]; spans always land on source `char` boundaries.
#[derive(Debug, Clone)]
pub struct NormText {
    chars: Vec<char>,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

fn is_quote_like(c: char) -> bool {
    matches!(
        c,
        '"' | '\'' | '`' | '\u{00B4}' | '\u{2018}'..='\u{201F}'
    )
}

fn is_dash_like(c: char) -> bool {
    matches!(c, '-' | '\u{2010}'..='\u{2015}' | '\u{2212}')
}

impl NormText {
    pub fn new(s: &str) -> Self {
        let mut chars = Vec::with_capacity(s.len());
        let mut starts = Vec::with_capacity(s.len());
        let mut ends = Vec::with_capacity(s.len());
        let mut pending_space: Option<(usize, usize)> = None;

        macro_rules! push {
            ($c:expr, $start:expr, $end:expr) => {{
                chars.push($c);
                starts.push($start);
                ends.push($end);
            }};
        }

        let mut it = s.char_indices().peekable();
        while let Some((i, c)) = it.next() {
            let end = i + c.len_utf8();
            if c == '\u{00AD}' {
                continue;
            }
            if c.is_whitespace() {
                // Only emit a separator if something precedes it; trailing
                // whitespace is handled by never flushing the pending space.
                if !chars.is_empty() {
                    pending_space.get_or_insert((i, end));
                }
                continue;
            }
            if is_dash_like(c) {
                if it.peek().is_some_and(|&(_, nc)| nc.is_whitespace()) {
                    // Line-break hyphenation: drop the dash and the break.
                    while it.peek().is_some_and(|&(_, nc)| nc.is_whitespace()) {
                        it.next();
                    }
                    continue;
                }
                if let Some((ws_start, ws_end)) = pending_space.take() {
                    push!(' ', ws_start, ws_end);
                }
                push!('-', i, end);
                continue;
            }
            if let Some((ws_start, ws_end)) = pending_space.take() {
                push!(' ', ws_start, ws_end);
            }
            if is_quote_like(c) {
                push!('\'', i, end);
                continue;
            }
            for lc in c.to_lowercase() {
                push!(lc, i, end);
            }
        }

        Self {
            chars,
            starts,
            ends,
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn window(&self, start: usize, end: usize) -> &[char] {
        &self.chars[start.min(self.len())..end.min(self.len())]
    }

    /// Map a normalized char range back to a byte span in the source string.
    pub fn src_span(&self, start: usize, end: usize) -> (usize, usize) {
        if self.chars.is_empty() || start >= end {
            return (0, 0);
        }
        let start = start.min(self.len() - 1);
        let end = end.min(self.len());
        (self.starts[start], self.ends[end - 1])
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

/// Levenshtein similarity over chars: `1 - distance / max_len`.
///
/// Two-row DP; both inputs are expected to be normalized already.
pub fn levenshtein_similarity(a: &[char], b: &[char]) -> f64 {
    let (m, n) = (a.len(), b.len());
    if m == 0 && n == 0 {
        return 1.0;
    }
    if m == 0 || n == 0 {
        return 0.0;
    }
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut cur = vec![0usize; n + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    let dist = prev[n];
    1.0 - dist as f64 / m.max(n) as f64
}

fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for lc in ch.to_lowercase() {
                cur.push(lc);
            }
        } else if !cur.is_empty() {
            out.push(std::mem::take(&mut cur));
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn shingles(tokens: &[String], k: usize) -> std::collections::BTreeSet<String> {
    let mut out = std::collections::BTreeSet::new();
    if k == 0 || tokens.len() < k {
        return out;
    }
    for w in tokens.windows(k) {
        out.insert(w.join(" "));
    }
    out
}

/// Token k-shingle Jaccard similarity; a cheap prefilter before the full
/// edit-distance scoring pass.
pub fn shingle_jaccard(a: &str, b: &str, k: usize) -> f64 {
    let sa = shingles(&tokenize(a), k);
    let sb = shingles(&tokenize(b), k);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let uni = sa.union(&sb).count() as f64;
    inter / uni
}
