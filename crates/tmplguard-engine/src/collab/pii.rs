//! PII detection collaborator.
//!
//! Detection itself lives outside this crate; the engine only consumes
//! match spans and asks the detector to mask them.

use serde::Serialize;

/// A detected span, as byte offsets into the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PiiMatch {
    pub start: usize,
    pub end: usize,
    /// Short kind label, e.g. `email` or `phone`. Safe to log.
    pub kind: String,
}

pub trait PiiDetector: Send + Sync {
    fn detect(&self, text: &str) -> Vec<PiiMatch>;

    /// Replace every match with `[REDACTED:<kind>]`.
    ///
    /// Overlapping, out-of-range or non-char-boundary spans are skipped.
    fn mask(&self, text: &str, matches: &[PiiMatch]) -> String {
        let mut sorted: Vec<&PiiMatch> = matches.iter().collect();
        sorted.sort_by_key(|m| (m.start, m.end));

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        for m in sorted {
            if m.start < cursor
                || m.end <= m.start
                || m.end > text.len()
                || !text.is_char_boundary(m.start)
                || !text.is_char_boundary(m.end)
            {
                continue;
            }
            out.push_str(&text[cursor..m.start]);
            out.push_str("[REDACTED:");
            out.push_str(&m.kind);
            out.push(']');
            cursor = m.end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

/// Detector used when no PII service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPiiDetector;

impl PiiDetector for NoPiiDetector {
    fn detect(&self, _text: &str) -> Vec<PiiMatch> {
        Vec::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    struct Fixed(Vec<PiiMatch>);

    impl PiiDetector for Fixed {
        fn detect(&self, _text: &str) -> Vec<PiiMatch> {
            self.0.clone()
        }
    }

    fn m(start: usize, end: usize, kind: &str) -> PiiMatch {
        PiiMatch { start, end, kind: kind.into() }
    }

    #[test]
    fn masks_in_order_and_skips_bad_spans() {
        let text = "mail bob@x.io or call 555-1234";
        let d = Fixed(vec![m(22, 30, "phone"), m(5, 13, "email"), m(6, 9, "overlap"), m(40, 50, "oob")]);
        let found = d.detect(text);
        assert_eq!(
            d.mask(text, &found),
            "mail [REDACTED:email] or call [REDACTED:phone]"
        );
    }

    #[test]
    fn no_detector_finds_nothing() {
        assert!(NoPiiDetector.detect("bob@x.io").is_empty());
    }
}
