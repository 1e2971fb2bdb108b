// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Partition policy with fnmatch-style wildcard intersection.
//!
//! A partition name may contain `*` (any run), `?` (any one character), and
//! `[...]` character classes. Two endpoints share a partition when any pair
//! of their names matches, treating an empty set as the single empty name.

/// Wildcard-matched string namespace separating endpoints on a topic.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Partition {
    names: Vec<String>,
}

impl Partition {
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Partition {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.names.is_empty() || (self.names.len() == 1 && self.names[0].is_empty())
    }

    /// True when this partition set and `other` have a common member.
    /// Either side's names may carry wildcards; a wildcard name matches the
    /// other side's literal names.
    #[must_use]
    pub fn intersects(&self, other: &Partition) -> bool {
        const EMPTY: &[&str] = &[""];
        let ours: Vec<&str> = if self.names.is_empty() {
            EMPTY.to_vec()
        } else {
            self.names.iter().map(String::as_str).collect()
        };
        let theirs: Vec<&str> = if other.names.is_empty() {
            EMPTY.to_vec()
        } else {
            other.names.iter().map(String::as_str).collect()
        };

        ours.iter()
            .any(|a| theirs.iter().any(|b| fnmatch(a, b) || fnmatch(b, a)))
    }
}

/// Minimal fnmatch: `pattern` may contain `*`, `?`, and `[...]` classes.
#[must_use]
pub fn fnmatch(pattern: &str, name: &str) -> bool {
    match_inner(pattern.as_bytes(), name.as_bytes())
}

fn match_inner(pat: &[u8], name: &[u8]) -> bool {
    if pat.is_empty() {
        return name.is_empty();
    }
    match pat[0] {
        b'*' => {
            // Try consuming zero or more name bytes.
            (0..=name.len()).any(|skip| match_inner(&pat[1..], &name[skip..]))
        }
        b'?' => !name.is_empty() && match_inner(&pat[1..], &name[1..]),
        b'[' => {
            let Some(close) = pat.iter().position(|&c| c == b']').filter(|&p| p > 1) else {
                // Unterminated class: treat '[' literally.
                return !name.is_empty()
                    && name[0] == b'['
                    && match_inner(&pat[1..], &name[1..]);
            };
            if name.is_empty() {
                return false;
            }
            let (negate, class) = if pat[1] == b'!' || pat[1] == b'^' {
                (true, &pat[2..close])
            } else {
                (false, &pat[1..close])
            };
            class_matches(class, name[0]) != negate && match_inner(&pat[close + 1..], &name[1..])
        }
        c => !name.is_empty() && name[0] == c && match_inner(&pat[1..], &name[1..]),
    }
}

fn class_matches(class: &[u8], ch: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if (class[i]..=class[i + 2]).contains(&ch) {
                return true;
            }
            i += 3;
        } else {
            if class[i] == ch {
                return true;
            }
            i += 1;
        }
    }
    false
}
