//! Shell-style glob patterns for topic matching
//!
//! Supported syntax:
//!
//! - `?` matches exactly one character other than `/`
//! - `*` matches any run of characters other than `/`, including none
//! - `[abc]`, `[a-z]` match one character from the class
//! - `[^a-z]` matches one character outside the class
//! - `\x` matches `x` literally
//!
//! `/` separates topic segments, so `room/*` matches `room/1` but not
//! `room/1/2`. Patterns are compiled once, when they are registered.

const SEPARATOR: char = '/';

/// A compiled glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar | Token::AnyRun => c != SEPARATOR,
            Token::Class { negated, ranges } => {
                let hit = ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
                hit != *negated
            }
        }
    }
}

impl Glob {
    /// Compile a pattern. Returns `None` for malformed patterns
    /// (unterminated class, empty class, dangling escape, reversed range).
    pub fn new(pattern: &str) -> Option<Self> {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '?' => tokens.push(Token::AnyChar),
                '*' => {
                    // Collapse runs of stars
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '\\' => tokens.push(Token::Literal(chars.next()?)),
                '[' => {
                    let negated = chars.peek() == Some(&'^');
                    if negated {
                        chars.next();
                    }

                    let mut ranges = Vec::new();
                    loop {
                        let lo = match chars.next()? {
                            ']' if !ranges.is_empty() => break,
                            ']' => return None,
                            '\\' => chars.next()?,
                            other => other,
                        };
                        let hi = if chars.peek() == Some(&'-') {
                            chars.next();
                            match chars.next()? {
                                ']' => return None,
                                '\\' => chars.next()?,
                                other => other,
                            }
                        } else {
                            lo
                        };
                        if hi < lo {
                            return None;
                        }
                        ranges.push((lo, hi));
                    }
                    tokens.push(Token::Class { negated, ranges });
                }
                other => tokens.push(Token::Literal(other)),
            }
        }

        Some(Self { tokens })
    }

    /// Match the whole of `name` against the pattern
    pub fn matches(&self, name: &str) -> bool {
        let name: Vec<char> = name.chars().collect();
        let tokens = &self.tokens;

        let (mut ti, mut ni) = (0, 0);
        // Position of the last `*` and the name index it is currently absorbing up to
        let mut backtrack: Option<(usize, usize)> = None;

        while ni < name.len() {
            match tokens.get(ti) {
                Some(Token::AnyRun) => {
                    backtrack = Some((ti, ni));
                    ti += 1;
                    continue;
                }
                Some(token) if token.matches_char(name[ni]) => {
                    ti += 1;
                    ni += 1;
                    continue;
                }
                _ => {}
            }

            // The last star may only grow over non-separator characters
            match backtrack {
                Some((star, absorbed)) if name[absorbed] != SEPARATOR => {
                    ti = star + 1;
                    ni = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                _ => return false,
            }
        }

        tokens[ti..].iter().all(|t| *t == Token::AnyRun)
    }
}

/// One-shot match; malformed patterns never match
pub fn matches(pattern: &str, name: &str) -> bool {
    Glob::new(pattern).is_some_and(|glob| glob.matches(name))
}
