//! Match expressions for database, branch, user and host names.
//!
//! `%` matches any run of characters (including none) and `_` matches exactly
//! one. Everything else matches itself.

/// Collapse runs of `%` into a single `%`. Two expressions that fold to the
/// same string match the same names.
pub fn fold_expression(expr: &str) -> String {
    let mut folded = String::with_capacity(expr.len());
    let mut last_any = false;
    for c in expr.chars() {
        if c == '%' {
            if !last_any {
                folded.push(c);
            }
            last_any = true;
        } else {
            folded.push(c);
            last_any = false;
        }
    }
    folded
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Char(char),
}

/// A parsed match expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchExpr {
    tokens: Vec<Token>,
    case_sensitive: bool,
}

impl MatchExpr {
    pub fn parse(expr: &str, case_sensitive: bool) -> Self {
        let source = if case_sensitive {
            fold_expression(expr)
        } else {
            fold_expression(&expr.to_lowercase())
        };
        let tokens = source
            .chars()
            .map(|c| match c {
                '%' => Token::Any,
                '_' => Token::One,
                c => Token::Char(c),
            })
            .collect();
        Self { tokens, case_sensitive }
    }

    pub fn matches(&self, name: &str) -> bool {
        let name: Vec<char> = if self.case_sensitive {
            name.chars().collect()
        } else {
            name.to_lowercase().chars().collect()
        };

        // greedy wildcard walk, backtracking to the last `%`
        let (mut t, mut n) = (0, 0);
        let mut star: Option<(usize, usize)> = None;
        while n < name.len() {
            match self.tokens.get(t) {
                Some(Token::Any) => {
                    star = Some((t, n));
                    t += 1;
                }
                Some(Token::One) => {
                    t += 1;
                    n += 1;
                }
                Some(Token::Char(c)) if *c == name[n] => {
                    t += 1;
                    n += 1;
                }
                _ => match star {
                    Some((st, sn)) => {
                        t = st + 1;
                        n = sn + 1;
                        star = Some((st, sn + 1));
                    }
                    None => return false,
                },
            }
        }
        self.tokens[t..].iter().all(|tok| *tok == Token::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold() {
        assert_eq!(fold_expression("%%a%%%b%"), "%a%b%");
        assert_eq!(fold_expression("a_b"), "a_b");
        assert_eq!(fold_expression(""), "");
    }

    #[test]
    fn test_wildcards() {
        let any = MatchExpr::parse("%", false);
        assert!(any.matches(""));
        assert!(any.matches("main"));

        let prefix = MatchExpr::parse("feature/%", false);
        assert!(prefix.matches("feature/"));
        assert!(prefix.matches("feature/login"));
        assert!(!prefix.matches("main"));

        let one = MatchExpr::parse("v_", false);
        assert!(one.matches("v1"));
        assert!(!one.matches("v"));
        assert!(!one.matches("v12"));

        let inner = MatchExpr::parse("a%b%c", false);
        assert!(inner.matches("abc"));
        assert!(inner.matches("axxbyyc"));
        assert!(!inner.matches("axxbyy"));
    }

    #[test]
    fn test_case_sensitivity() {
        assert!(MatchExpr::parse("Main", false).matches("MAIN"));
        assert!(!MatchExpr::parse("Root", true).matches("root"));
        assert!(MatchExpr::parse("Root", true).matches("Root"));
    }
}
