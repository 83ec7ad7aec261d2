//! Pattern rewriter for the finite-state engine
//!
//! Probes are authored against a backtracking dialect (named captures,
//! lookarounds, backreferences). The linear-time engine rejects those
//! constructs, so every `(?...)` group after the leading inline-flags group
//! is elided to `.*`. The elision drops the group's parentheses entirely:
//! no capture indices shift, and the `$N` references used by probe metadata
//! keep pointing at the surviving groups. The substitution is lossy but
//! one-sided: a payload accepted by the original pattern is still accepted
//! by the rewritten one.

/// Rewrite a pattern, eliding every `(?...)` group except the first
pub fn rewrite(pattern: &str) -> String {
    let bytes = pattern.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());

    let mut escaped = false;
    let mut reset_escaped = false;
    let mut ignore = false;
    let mut first_group = true;
    let mut open_count: i64 = -1;
    let mut close_count: i64 = -1;
    let mut last: u8 = 0;

    for &b in bytes {
        // a backslash escapes exactly the byte that follows it
        if b == b'\\' && !escaped {
            escaped = true;
        } else if escaped {
            if reset_escaped {
                escaped = false;
                reset_escaped = false;
            } else {
                reset_escaped = true;
            }
        }

        if ignore {
            if b == b')' && !escaped {
                close_count += 1;
                if open_count == close_count {
                    // matching close of the elided group
                    ignore = false;
                    open_count = 0;
                    close_count = 0;
                    last = b;
                    continue;
                }
            }
            if b == b'(' && !escaped {
                open_count += 1;
            }
            last = b;
            continue;
        }

        if b == b'(' {
            if !escaped {
                open_count += 1;
            }
            out.push(b);
            last = b;
            continue;
        }

        if b == b'?' && last == b'(' {
            if first_group {
                // the leading inline-flags group stays
                first_group = false;
            } else {
                out.pop();
                out.extend_from_slice(b".*");
                ignore = true;
                last = b;
                continue;
            }
        }

        if b == b')' && !escaped {
            close_count += 1;
        }

        out.push(b);
        last = b;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_pattern_unchanged() {
        let input = r"(?m)^220 ([-.\w]+) AMANDA";
        assert_eq!(rewrite(input), input);
    }

    #[test]
    fn test_elides_groups_after_flags() {
        let out = rewrite("(?m)^(?:foo)(bar)(?P<x>baz)$");
        assert_eq!(out, "(?m)^.*(bar).*$");
        assert!(regex::Regex::new(&out).is_ok());
    }

    #[test]
    fn test_keeps_leading_flags_group() {
        let out = rewrite("(?mis)^foo(bar)$");
        assert_eq!(out, "(?mis)^foo(bar)$");
    }

    #[test]
    fn test_nested_group_inside_elision() {
        // the inner plain group belongs to the elided lookahead
        let out = rewrite("(?m)^a(?=x(b)y)c$");
        assert_eq!(out, "(?m)^a.*c$");
    }

    #[test]
    fn test_escaped_parens_are_literals() {
        let out = rewrite(r"(?m)\((?:\d+)\)");
        assert_eq!(out, r"(?m)\(.*\)");

        let re = regex::Regex::new(&out).unwrap();
        assert!(re.is_match("(123)"));
    }

    #[test]
    fn test_rewritten_still_accepts_original_matches() {
        // positive samples: whatever matched before must match after
        let cases = [
            (r"(?m)^SSH-(?:1\.99|2\.0)-OpenSSH_([\w.]+)", "SSH-2.0-OpenSSH_8.9p1"),
            (r"(?m)^220 ([-.\w]+) (?i:amanda) index server", "220 backup.host AMANDA index server"),
            (r"(?m)Server: (?P<product>Apache)/([\d.]+)", "HTTP/1.1 200 OK\r\nServer: Apache/2.4.29\r\n"),
        ];

        for (pattern, sample) in cases {
            let original = fancy_regex::Regex::new(pattern).unwrap();
            assert!(original.is_match(sample).unwrap(), "original rejects {:?}", sample);

            let rewritten = rewrite(pattern);
            let automaton = regex::Regex::new(&rewritten)
                .unwrap_or_else(|e| panic!("rewritten pattern {:?} failed: {}", rewritten, e));
            assert!(automaton.is_match(sample), "rewritten rejects {:?}", sample);
        }
    }

    #[test]
    fn test_over_acceptance_is_bounded() {
        // the elision widens the language, but anchored context still rejects
        let rewritten = rewrite(r"(?m)^SSH-(?:1\.99|2\.0)-OpenSSH_([\w.]+)");
        let re = regex::Regex::new(&rewritten).unwrap();
        assert!(!re.is_match("HTTP/1.1 200 OK"));
        assert!(!re.is_match("220 ftp.example.org FTP"));
    }

    #[test]
    fn test_capture_indices_do_not_shift() {
        let rewritten = rewrite(r"(?m)^(?:220|250) ([-.\w]+) ready");
        let re = regex::Regex::new(&rewritten).unwrap();

        let caps = re.captures("220 mail.example.org ready").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "mail.example.org");
    }
}
