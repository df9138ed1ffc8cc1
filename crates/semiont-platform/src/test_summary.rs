//! Pull pass/fail/skip counts out of test runner output.
//!
//! Recognised forms:
//!
//! ```text
//! Tests:       1 failed, 2 skipped, 10 passed, 13 total      (jest)
//!       Tests  1 failed | 10 passed | 2 skipped (13)         (vitest)
//! test result: ok. 10 passed; 0 failed; 2 ignored; ...       (cargo, summed)
//!   10 passing / 2 failing / 1 pending                       (mocha)
//! ```

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

fn summary_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(Tests:?\s|test result:)").expect("static regex"))
}

fn count() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+)\s+(passed|failed|skipped|ignored|todo|pending)").expect("static regex")
    })
}

fn mocha_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+(passing|failing|pending)\b").expect("static regex"))
}

/// `None` when no summary line was found.
pub fn parse(output: &str) -> Option<TestSummary> {
    let mut summary = TestSummary::default();
    let mut found = false;

    for line in output.lines() {
        if summary_line().is_match(line) {
            for caps in count().captures_iter(line) {
                let n: u32 = caps[1].parse().unwrap_or(0);
                found = true;
                match &caps[2] {
                    "passed" => summary.passed += n,
                    "failed" => summary.failed += n,
                    _ => summary.skipped += n,
                }
            }
        } else if let Some(caps) = mocha_line().captures(line) {
            let n: u32 = caps[1].parse().unwrap_or(0);
            found = true;
            match &caps[2] {
                "passing" => summary.passed += n,
                "failing" => summary.failed += n,
                _ => summary.skipped += n,
            }
        }
    }

    found.then_some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jest_ignores_suite_line() {
        let out = "\
Test Suites: 1 failed, 3 passed, 4 total
Tests:       1 failed, 2 skipped, 10 passed, 13 total
Snapshots:   0 total";
        assert_eq!(
            parse(out),
            Some(TestSummary {
                passed: 10,
                failed: 1,
                skipped: 2
            })
        );
    }

    #[test]
    fn vitest() {
        let out = " Test Files  1 failed | 3 passed (4)\n      Tests  2 failed | 20 passed | 1 todo (23)\n";
        assert_eq!(
            parse(out),
            Some(TestSummary {
                passed: 20,
                failed: 2,
                skipped: 1
            })
        );
    }

    #[test]
    fn cargo_sums_every_binary() {
        let out = "\
running 3 tests
test result: ok. 3 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out; finished in 0.01s
running 2 tests
test result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.02s";
        assert_eq!(
            parse(out),
            Some(TestSummary {
                passed: 4,
                failed: 1,
                skipped: 1
            })
        );
    }

    #[test]
    fn mocha() {
        let out = "  12 passing (30ms)\n  1 pending\n  2 failing\n";
        assert_eq!(
            parse(out),
            Some(TestSummary {
                passed: 12,
                failed: 2,
                skipped: 1
            })
        );
    }

    #[test]
    fn nothing_recognisable() {
        assert_eq!(parse("build finished\nall good"), None);
    }
}
