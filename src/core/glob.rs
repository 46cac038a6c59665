//! Shell-style wildcard matching for cell values: `*`, `?`, `[seq]`, `[!seq]`.

pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches_from(&pattern, &text)
}

fn matches_from(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        // Unterminated class is a literal bracket.
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                ch if ch == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|ch| *ch == '*')
}

/// Evaluates the class starting at `pattern[start] == '['`.
/// Returns `None` when the class is unterminated.
fn match_class(pattern: &[char], start: usize, ch: char) -> Option<(bool, usize)> {
    let mut idx = start + 1;
    let negated = matches!(pattern.get(idx), Some('!'));
    if negated {
        idx += 1;
    }
    let mut matched = false;
    let mut first = true;
    while idx < pattern.len() {
        let current = pattern[idx];
        if current == ']' && !first {
            return Some((matched != negated, idx + 1));
        }
        first = false;
        if idx + 2 < pattern.len() && pattern[idx + 1] == '-' && pattern[idx + 2] != ']' {
            if current <= ch && ch <= pattern[idx + 2] {
                matched = true;
            }
            idx += 3;
        } else {
            if current == ch {
                matched = true;
            }
            idx += 1;
        }
    }
    None
}
