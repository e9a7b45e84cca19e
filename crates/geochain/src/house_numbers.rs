//! House-number tokenizing and matching.
//!
//! A house number such as "12a" or "д 7 к 2" is split into number and word
//! tokens. A query is parsed into one or more alternatives ([`Parse`]) that a
//! feature's house number is then matched against.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+|\p{L}+").unwrap());

/// Words that introduce a house number or a building within it.
const DESIGNATORS: [&str; 9] = [
    "building", "bldg", "house", "no", "корпус", "корп", "дом", "д", "к",
];

const MAX_HOUSE_NUMBER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Number(String),
    Word(String),
}

impl Token {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Number(s) | Self::Word(s) => s,
        }
    }

    fn same_kind(&self, other: &Token) -> bool {
        matches!(
            (self, other),
            (Self::Number(_), Self::Number(_)) | (Self::Word(_), Self::Word(_))
        )
    }
}

pub fn tokenize(s: &str) -> Vec<Token> {
    let lower = s.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| {
            let text = m.as_str().to_owned();
            if text.starts_with(|c: char| c.is_ascii_digit()) {
                Token::Number(text)
            } else {
                Token::Word(text)
            }
        })
        .collect()
}

/// One reading of a house-number query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parse {
    pub parts: Vec<Token>,
    /// The last part may still be typed further.
    pub is_prefix: bool,
}

impl Parse {
    fn starts_with_number(&self) -> bool {
        matches!(self.parts.first(), Some(Token::Number(_)))
    }

    fn matches(&self, house: &[Token]) -> bool {
        if self.parts.is_empty() {
            return false;
        }
        if !self.is_prefix {
            return self.parts == house;
        }
        if self.parts.len() > house.len() {
            return false;
        }
        let (last, head) = match self.parts.split_last() {
            Some(split) => split,
            None => return false,
        };
        let full_match = head.iter().zip(house).all(|(q, h)| q == h);
        let candidate = &house[head.len()];
        full_match && last.same_kind(candidate) && candidate.as_str().starts_with(last.as_str())
    }
}

pub fn parse_query(query: &str, is_prefix: bool) -> Vec<Parse> {
    let tokens = tokenize(query);
    let stripped: Vec<Token> = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Word(w) if DESIGNATORS.contains(&w.as_str())))
        .cloned()
        .collect();

    let mut parses = Vec::with_capacity(2);
    if stripped.len() != tokens.len() && !stripped.is_empty() {
        parses.push(Parse {
            parts: stripped,
            is_prefix,
        });
    }
    if !tokens.is_empty() {
        parses.push(Parse {
            parts: tokens,
            is_prefix,
        });
    }
    parses
}

/// Whether `house_number` is matched by any of the query parses.
pub fn house_numbers_match(house_number: &str, parses: &[Parse]) -> bool {
    if parses.is_empty() {
        return false;
    }
    let tokens = tokenize(house_number);
    if tokens.is_empty() {
        return false;
    }
    let stripped: Vec<Token> = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Word(w) if DESIGNATORS.contains(&w.as_str())))
        .cloned()
        .collect();
    parses
        .iter()
        .any(|parse| parse.matches(&tokens) || parse.matches(&stripped))
}

/// Shape test for strings stored as house numbers.
pub fn is_house_number(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty()
        && s.chars().count() <= MAX_HOUSE_NUMBER_LEN
        && s.starts_with(|c: char| c.is_ascii_digit())
}

/// Whether a query could be a house number: some reading of it starts with a
/// number.
pub fn looks_like_house_number(query: &str, is_prefix: bool) -> bool {
    parse_query(query, is_prefix)
        .iter()
        .any(Parse::starts_with_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_digits_and_letters() {
        assert_eq!(
            tokenize("12A/3"),
            vec![
                Token::Number("12".into()),
                Token::Word("a".into()),
                Token::Number("3".into())
            ]
        );
        assert!(tokenize(" - ").is_empty());
    }

    #[test]
    fn test_exact_match() {
        let parses = parse_query("12a", false);
        assert!(house_numbers_match("12A", &parses));
        assert!(house_numbers_match("12 a", &parses));
        assert!(!house_numbers_match("12", &parses));
        assert!(!house_numbers_match("12ab", &parses));
    }

    #[test]
    fn test_prefix_match() {
        let parses = parse_query("12", true);
        assert!(house_numbers_match("12", &parses));
        assert!(house_numbers_match("12a", &parses));
        assert!(house_numbers_match("123", &parses));
        assert!(!house_numbers_match("2", &parses));

        let parses = parse_query("12 b", true);
        assert!(house_numbers_match("12 bis", &parses));
        assert!(!house_numbers_match("12", &parses));
    }

    #[test]
    fn test_designators_are_optional() {
        let parses = parse_query("house 7", false);
        assert!(house_numbers_match("7", &parses));
        assert!(house_numbers_match("д 7", &parse_query("7", false)));
        assert!(house_numbers_match("7 к 2", &parse_query("7 корпус 2", false)));
    }

    #[test]
    fn test_is_house_number() {
        assert!(is_house_number("12a"));
        assert!(!is_house_number(""));
        assert!(!is_house_number("Main"));
        assert!(!is_house_number("12345678901234567"));
    }

    #[test]
    fn test_looks_like_house_number() {
        assert!(looks_like_house_number("12", false));
        assert!(looks_like_house_number("house 12", true));
        assert!(!looks_like_house_number("main street", false));
        assert!(!looks_like_house_number("", true));
    }
}
