//! Glob matching with Redis `KEYS`/`SCAN MATCH` semantics
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes. Used by the
//! in-memory backend and by tooling that needs to check a key against an
//! invalidation pattern without asking the store.

/// Check whether `key` matches the glob `pattern`
///
/// # Example
///
/// ```
/// use medcrm_cache::pattern::glob_match;
///
/// assert!(glob_match("clinic_42:*", "clinic_42:contacts:list"));
/// assert!(!glob_match("clinic_42:*", "clinic_420:contacts:list"));
/// ```
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    // Position of the last `*` seen and the key index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, k));
            p += 1;
            continue;
        }

        if p < pattern.len() {
            if let Some(next) = match_token(&pattern, p, key[k]) {
                p = next;
                k += 1;
                continue;
            }
        }

        match backtrack {
            Some((star, absorbed)) => {
                p = star + 1;
                k = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Match the single-character token at `p` against `c`
///
/// Returns the index of the next token on success.
fn match_token(pattern: &[char], p: usize, c: char) -> Option<usize> {
    match pattern[p] {
        '?' => Some(p + 1),
        '\\' if p + 1 < pattern.len() => (pattern[p + 1] == c).then_some(p + 2),
        '[' => match_class(pattern, p, c),
        literal => (literal == c).then_some(p + 1),
    }
}

fn match_class(pattern: &[char], open: usize, c: char) -> Option<usize> {
    let mut i = open + 1;
    let negate = i < pattern.len() && pattern[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (mut lo, mut hi) = (pattern[i], pattern[i + 2]);
            if lo > hi {
                std::mem::swap(&mut lo, &mut hi);
            }
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    // An unterminated class runs to the end of the pattern, as in Redis
    let next = if i < pattern.len() { i + 1 } else { i };
    (matched != negate).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(glob_match("clinic_1:settings", "clinic_1:settings"));
        assert!(!glob_match("clinic_1:settings", "clinic_1:settingsx"));
        assert!(!glob_match("clinic_1:settings", "clinic_1:setting"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("clinic_1:*", "clinic_1:"));
        assert!(glob_match("clinic_1:contacts*", "clinic_1:contacts"));
        assert!(glob_match("clinic_1:contacts*", "clinic_1:contacts:list:page_1"));
        assert!(!glob_match("clinic_1:contacts*", "clinic_1:appointments:id:1"));
        assert!(glob_match("*:page_*", "clinic_9:contacts:list:page_3"));
        assert!(glob_match("a*b*c", "aXXbYYbZc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("clinic_?:*", "clinic_7:x"));
        assert!(!glob_match("clinic_?:*", "clinic_77:x"));
    }

    #[test]
    fn test_classes() {
        assert!(glob_match("clinic_[12]:*", "clinic_2:x"));
        assert!(!glob_match("clinic_[12]:*", "clinic_3:x"));
        assert!(glob_match("clinic_[0-9]:*", "clinic_5:x"));
        assert!(glob_match("clinic_[9-0]:*", "clinic_5:x"));
        assert!(glob_match("clinic_[^1]:*", "clinic_2:x"));
        assert!(!glob_match("clinic_[^1]:*", "clinic_1:x"));
    }

    #[test]
    fn test_escapes() {
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("a[\\]]b", "a]b"));
    }

    #[test]
    fn test_tenant_boundary() {
        assert!(!glob_match("clinic_4:*", "clinic_42:contacts"));
        assert!(!glob_match("clinic_42:*", "session:user_42"));
    }
}
