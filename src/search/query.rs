//! Query-string parsing.
//!
//! Tokens are whitespace-separated; double quotes form phrases; `AND` and
//! `OR` are honored with AND as the default combinator. The result is
//! disjunctive normal form: a list of OR'd clauses, each a list of AND'd
//! terms.

/// A single match requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryClause {
    Term(String),
    Phrase(String),
}

/// A parsed query in disjunctive normal form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedQuery {
    /// OR of AND-groups.
    pub groups: Vec<Vec<QueryClause>>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.is_empty())
    }

    /// All distinct terms across groups (phrase words included).
    pub fn terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        for group in &self.groups {
            for clause in group {
                match clause {
                    QueryClause::Term(t) => terms.push(t.clone()),
                    QueryClause::Phrase(p) => {
                        terms.extend(p.split_whitespace().map(|w| w.to_string()))
                    }
                }
            }
        }
        terms.sort();
        terms.dedup();
        terms
    }
}

/// Parse a raw query string.
pub fn parse_query(raw: &str) -> ParsedQuery {
    let tokens = tokenize(raw);
    let mut groups: Vec<Vec<QueryClause>> = vec![Vec::new()];

    for token in tokens {
        match token {
            Token::Or => groups.push(Vec::new()),
            Token::And => {}
            Token::Word(word) => {
                let normalized = normalize(&word);
                if !normalized.is_empty() {
                    groups
                        .last_mut()
                        .expect("groups starts non-empty")
                        .push(QueryClause::Term(normalized));
                }
            }
            Token::Quoted(phrase) => {
                let normalized = phrase
                    .split_whitespace()
                    .map(normalize)
                    .filter(|w| !w.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !normalized.is_empty() {
                    groups
                        .last_mut()
                        .expect("groups starts non-empty")
                        .push(QueryClause::Phrase(normalized));
                }
            }
        }
    }

    groups.retain(|g| !g.is_empty());
    ParsedQuery { groups }
}

enum Token {
    Word(String),
    Quoted(String),
    And,
    Or,
}

fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut phrase = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                phrase.push(c);
            }
            tokens.push(Token::Quoted(phrase));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            match word.as_str() {
                "AND" => tokens.push(Token::And),
                "OR" => tokens.push(Token::Or),
                _ => tokens.push(Token::Word(word)),
            }
        }
    }
    tokens
}

/// Lowercase and strip non-alphanumeric edges; this mirrors the indexer's
/// tokenizer so query terms line up with postings.
pub fn normalize(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(t: &str) -> QueryClause {
        QueryClause::Term(t.to_string())
    }

    #[test]
    fn test_default_combinator_is_and() {
        let parsed = parse_query("seattle fire");
        assert_eq!(parsed.groups, vec![vec![term("seattle"), term("fire")]]);
    }

    #[test]
    fn test_explicit_and_or() {
        let parsed = parse_query("seattle AND fire OR flood");
        assert_eq!(
            parsed.groups,
            vec![
                vec![term("seattle"), term("fire")],
                vec![term("flood")],
            ]
        );
    }

    #[test]
    fn test_quoted_phrase() {
        let parsed = parse_query(r#""great fire" seattle"#);
        assert_eq!(
            parsed.groups,
            vec![vec![
                QueryClause::Phrase("great fire".to_string()),
                term("seattle"),
            ]]
        );
    }

    #[test]
    fn test_normalization_and_empties() {
        let parsed = parse_query("  Fire!  ,, ");
        assert_eq!(parsed.groups, vec![vec![term("fire")]]);
        assert!(parse_query("").is_empty());
        assert!(parse_query("AND OR").is_empty());
    }

    #[test]
    fn test_terms_collects_phrase_words() {
        let parsed = parse_query(r#""great fire" flood"#);
        assert_eq!(parsed.terms(), vec!["fire", "flood", "great"]);
    }
}
