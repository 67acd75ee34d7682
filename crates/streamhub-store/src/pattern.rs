//! Redis-style glob matching for key patterns.
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]`, `[^a]` / `[!a]` and `\` escapes,
//! matching the subset of `KEYS`/`SCAN MATCH` syntax the in-process
//! backend needs.

/// Whether `text` matches the glob `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    match pattern {
        [] => text.is_empty(),
        ['*', rest @ ..] => {
            // Collapse runs of stars before trying every suffix.
            let rest = skip_stars(rest);
            if rest.is_empty() {
                return true;
            }
            let mut remaining = text;
            loop {
                if match_from(rest, remaining) {
                    return true;
                }
                match remaining.split_first() {
                    Some((_, tail)) => remaining = tail,
                    None => return false,
                }
            }
        }
        ['?', rest @ ..] => text
            .split_first()
            .is_some_and(|(_, tail)| match_from(rest, tail)),
        ['[', rest @ ..] => {
            let Some((class, after)) = split_class(rest) else {
                return literal(&'[', rest, text);
            };
            text.split_first()
                .is_some_and(|(c, tail)| class_matches(class, *c) && match_from(after, tail))
        }
        ['\\', escaped, rest @ ..] => literal(escaped, rest, text),
        [c, rest @ ..] => literal(c, rest, text),
    }
}

fn literal(expected: &char, rest: &[char], text: &[char]) -> bool {
    text.split_first()
        .is_some_and(|(c, tail)| c == expected && match_from(rest, tail))
}

fn skip_stars(mut pattern: &[char]) -> &[char] {
    while let ['*', rest @ ..] = pattern {
        pattern = rest;
    }
    pattern
}

/// Split `abc]rest` into (`abc`, `rest`). `None` if the class is unclosed.
fn split_class(pattern: &[char]) -> Option<(&[char], &[char])> {
    let end = pattern.iter().position(|c| *c == ']')?;
    let (class, closing) = pattern.split_at(end);
    let (_, after) = closing.split_first()?;
    Some((class, after))
}

fn class_matches(class: &[char], c: char) -> bool {
    match class {
        ['^' | '!', body @ ..] => !class_contains(body, c),
        body => class_contains(body, c),
    }
}

fn class_contains(mut body: &[char], c: char) -> bool {
    loop {
        match body {
            [] => return false,
            ['\\', x, rest @ ..] => {
                if *x == c {
                    return true;
                }
                body = rest;
            }
            [lo, '-', hi, rest @ ..] => {
                let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                if (lo..=hi).contains(&c) {
                    return true;
                }
                body = rest;
            }
            [x, rest @ ..] => {
                if *x == c {
                    return true;
                }
                body = rest;
            }
        }
    }
}
