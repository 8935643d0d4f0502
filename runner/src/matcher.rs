//! Readiness detection on a process's output.

use regex::Regex;

/// What a readiness line looks like.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// The line contains this text.
    Substr(String),
    /// The line matches this expression somewhere.
    Regex(Regex),
}

impl Pattern {
    pub fn substr<S: Into<String>>(s: S) -> Self {
        Pattern::Substr(s.into())
    }

    pub fn is_match(&self, line: &str) -> bool {
        match self {
            Pattern::Substr(s) => line.contains(s.as_str()),
            Pattern::Regex(re) => re.is_match(line),
        }
    }
}

/// Fires once, on the first line matching its pattern, and ignores everything after that.
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: Pattern,
    matched: bool,
}

impl Matcher {
    pub fn new(pattern: Pattern) -> Self {
        Matcher {
            pattern,
            matched: false,
        }
    }

    /// Feed one line. Returns `true` only for the line that moves the matcher from armed to
    /// matched.
    pub fn feed(&mut self, line: &str) -> bool {
        if self.matched {
            return false;
        }
        self.matched = self.pattern.is_match(line);
        self.matched
    }

    pub fn matched(&self) -> bool {
        self.matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_once() {
        let mut m = Matcher::new(Pattern::substr("Press any key to run..."));

        assert!(!m.feed("Loading relations"));
        assert!(!m.matched());
        assert!(m.feed("[node 0] Press any key to run..."));
        assert!(m.matched());
        assert!(!m.feed("Press any key to run..."));
        assert!(m.matched());
    }

    #[test]
    fn regex_pattern() {
        let mut m = Matcher::new(Pattern::Regex(Regex::new(r"^ready \d+$").unwrap()));
        assert!(!m.feed("not ready 1"));
        assert!(m.feed("ready 12"));
    }
}
