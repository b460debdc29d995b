/*!
Regular expression source syntax.

The pattern source is tokenized with a [`logos`] lexer and assembled into a
[`Regexp`] tree by recursive descent. The tree is deliberately small:
alternation, sequence, repetition with a greedy flag, and character classes.
Groups only shape the tree, they are not captured.
*/
use std::fmt;

use logos::Logos;

use crate::{
    alphabet::Alphabet,
    interval::{Character, Interval},
    RegexError,
};

/// A parsed regular expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Regexp {
    /// Matches the empty string.
    Empty,
    /// A single code drawn from the character set.
    Class(Character),
    /// Alternatives, tried in declaration order.
    Choice(Vec<Regexp>),
    /// Concatenation, left to right.
    Sequence(Vec<Regexp>),
    /// Repetition. `max == None` means unbounded. `greedy == false` is the
    /// reluctant form (`*?`, `+?`, ...).
    Repeat {
        node: Box<Regexp>,
        min: u32,
        max: Option<u32>,
        greedy: bool,
    },
}

impl Regexp {
    /// Parse a pattern source against the given alphabet.
    pub fn parse(source: &str, alphabet: &dyn Alphabet) -> Result<Regexp, RegexError> {
        Parser::new(source, alphabet)?.parse()
    }

    /// A regexp matching exactly `text`.
    pub fn literal(text: &str, alphabet: &dyn Alphabet) -> Regexp {
        let mut seq: Vec<Regexp> = text
            .chars()
            .map(|c| Regexp::Class(Character::new([(c as u32, c as u32)], alphabet)))
            .collect();
        match seq.len() {
            0 => Regexp::Empty,
            1 => seq.pop().unwrap_or(Regexp::Empty),
            _ => Regexp::Sequence(seq),
        }
    }
}

impl fmt::Display for Regexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regexp::Empty => Ok(()),
            Regexp::Class(c) => write!(f, "{c:?}"),
            Regexp::Choice(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Regexp::Sequence(items) => {
                for item in items {
                    match item {
                        Regexp::Choice(_) => write!(f, "({item})")?,
                        _ => write!(f, "{item}")?,
                    }
                }
                Ok(())
            }
            Regexp::Repeat {
                node,
                min,
                max,
                greedy,
            } => {
                match **node {
                    Regexp::Class(_) | Regexp::Empty => write!(f, "{node}")?,
                    _ => write!(f, "({node})")?,
                }
                match (min, max) {
                    (0, None) => write!(f, "*")?,
                    (1, None) => write!(f, "+")?,
                    (0, Some(1)) => write!(f, "?")?,
                    (m, None) => write!(f, "{{{m},}}")?,
                    (m, Some(n)) if m == n => write!(f, "{{{m}}}")?,
                    (m, Some(n)) => write!(f, "{{{m},{n}}}")?,
                }
                if !greedy {
                    write!(f, "?")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Logos, Clone, Copy, Debug, PartialEq)]
enum PatternToken {
    #[token("|")]
    Alt,

    #[token("(")]
    Open,

    #[token(")")]
    Close,

    #[token("*")]
    Star,

    #[token("+")]
    Plus,

    #[token("?")]
    Question,

    #[token(".")]
    Dot,

    /// `{m}`, `{m,}` or `{m,n}`.
    #[regex(r"\{[0-9]+(,[0-9]*)?\}")]
    Bound,

    /// A whole bracketed class, negation and escapes included.
    #[regex(r"\[\^?\]?([^\]\\]|\\.)*\]")]
    Class,

    #[regex(r"\\.")]
    Escape,

    #[regex(r"[^\\\[\](){}|*+?.]")]
    Literal,
}

struct Parser<'a> {
    tokens: Vec<(PatternToken, &'a str, usize)>,
    at: usize,
    alphabet: &'a dyn Alphabet,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, alphabet: &'a dyn Alphabet) -> Result<Self, RegexError> {
        let mut lex = PatternToken::lexer(source);
        let mut tokens = Vec::new();
        while let Some(token) = lex.next() {
            match token {
                Ok(token) => tokens.push((token, lex.slice(), lex.span().start)),
                Err(()) => {
                    return Err(RegexError::parse(lex.span().start, "unexpected character"))
                }
            }
        }
        Ok(Parser {
            tokens,
            at: 0,
            alphabet,
        })
    }

    fn parse(mut self) -> Result<Regexp, RegexError> {
        let regexp = self.choice()?;
        match self.tokens.get(self.at) {
            Some(&(_, slice, offset)) => Err(RegexError::parse(
                offset,
                format!("unexpected `{slice}`"),
            )),
            None => Ok(regexp),
        }
    }

    fn peek(&self) -> Option<PatternToken> {
        self.tokens.get(self.at).map(|&(t, _, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.at)
            .map(|&(_, _, o)| o)
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|&(_, s, o)| o + s.len())
                    .unwrap_or(0)
            })
    }

    fn choice(&mut self) -> Result<Regexp, RegexError> {
        let mut items = vec![self.sequence()?];
        while self.peek() == Some(PatternToken::Alt) {
            self.at += 1;
            items.push(self.sequence()?);
        }
        if items.len() == 1 {
            Ok(items.pop().unwrap_or(Regexp::Empty))
        } else {
            Ok(Regexp::Choice(items))
        }
    }

    fn sequence(&mut self) -> Result<Regexp, RegexError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None | Some(PatternToken::Alt) | Some(PatternToken::Close) => break,
                _ => items.push(self.repeat()?),
            }
        }
        match items.len() {
            0 => Ok(Regexp::Empty),
            1 => Ok(items.pop().unwrap_or(Regexp::Empty)),
            _ => Ok(Regexp::Sequence(items)),
        }
    }

    fn repeat(&mut self) -> Result<Regexp, RegexError> {
        let mut node = self.atom()?;
        loop {
            let (min, max) = match self.peek() {
                Some(PatternToken::Star) => (0, None),
                Some(PatternToken::Plus) => (1, None),
                Some(PatternToken::Question) => (0, Some(1)),
                Some(PatternToken::Bound) => {
                    let slice = self.tokens[self.at].1;
                    self.bound(slice)?
                }
                _ => break,
            };
            self.at += 1;
            // a trailing `?` flips to the reluctant form
            let greedy = if self.peek() == Some(PatternToken::Question) {
                self.at += 1;
                false
            } else {
                true
            };
            node = Regexp::Repeat {
                node: Box::new(node),
                min,
                max,
                greedy,
            };
        }
        Ok(node)
    }

    fn bound(&self, slice: &str) -> Result<(u32, Option<u32>), RegexError> {
        let inner = &slice[1..slice.len() - 1];
        let (min, max) = match inner.split_once(',') {
            None => {
                let n = self.parse_count(inner)?;
                (n, Some(n))
            }
            Some((m, "")) => (self.parse_count(m)?, None),
            Some((m, n)) => (self.parse_count(m)?, Some(self.parse_count(n)?)),
        };
        if let Some(max) = max {
            if max < min {
                return Err(RegexError::parse(self.offset(), "bound maximum below minimum"));
            }
        }
        Ok((min, max))
    }

    fn parse_count(&self, digits: &str) -> Result<u32, RegexError> {
        digits
            .parse()
            .map_err(|_| RegexError::parse(self.offset(), "repetition bound out of range"))
    }

    fn atom(&mut self) -> Result<Regexp, RegexError> {
        let (token, slice, offset) = match self.tokens.get(self.at) {
            Some(&t) => t,
            None => return Err(RegexError::parse(self.offset(), "expected an atom")),
        };
        self.at += 1;
        match token {
            PatternToken::Literal => {
                let c = slice.chars().next().unwrap_or('\0') as u32;
                Ok(Regexp::Class(Character::new([(c, c)], self.alphabet)))
            }
            PatternToken::Dot => Ok(Regexp::Class(Character::new(
                [(self.alphabet.min_code(), self.alphabet.max_code())],
                self.alphabet,
            ))),
            PatternToken::Escape => Ok(Regexp::Class(self.escape(slice, offset)?)),
            PatternToken::Class => Ok(Regexp::Class(self.class(slice, offset)?)),
            PatternToken::Open => {
                let inner = self.choice()?;
                match self.peek() {
                    Some(PatternToken::Close) => {
                        self.at += 1;
                        Ok(inner)
                    }
                    _ => Err(RegexError::parse(self.offset(), "unclosed group")),
                }
            }
            _ => Err(RegexError::parse(offset, format!("unexpected `{slice}`"))),
        }
    }

    fn escape(&self, slice: &str, offset: usize) -> Result<Character, RegexError> {
        let c = slice.chars().nth(1).unwrap_or('\0');
        self.escape_char(c, offset)
    }

    fn escape_char(&self, c: char, offset: usize) -> Result<Character, RegexError> {
        let alphabet = self.alphabet;
        let single =
            |c: char| Character::new([(c as u32, c as u32)], alphabet);
        let class = |intervals: &[Interval]| Character::new(intervals.iter().copied(), alphabet);
        Ok(match c {
            'n' => single('\n'),
            'r' => single('\r'),
            't' => single('\t'),
            'f' => single('\x0C'),
            'v' => single('\x0B'),
            'd' => class(DIGIT),
            'D' => class(DIGIT).complement(alphabet),
            'w' => class(WORD),
            'W' => class(WORD).complement(alphabet),
            's' => class(SPACE),
            'S' => class(SPACE).complement(alphabet),
            c if c.is_ascii_alphanumeric() => {
                return Err(RegexError::parse(offset, format!("unknown escape `\\{c}`")))
            }
            c => single(c),
        })
    }

    fn class(&self, slice: &str, offset: usize) -> Result<Character, RegexError> {
        let mut inner: &str = &slice[1..slice.len() - 1];
        let negated = inner.starts_with('^');
        if negated {
            inner = &inner[1..];
        }
        let mut chars = inner.chars().peekable();
        let mut set = Character::default();
        let mut prev: Option<u32> = None;
        let mut union = |set: &mut Character, c: &Character| {
            for interval in c.iter() {
                set.append(interval, self.alphabet);
            }
        };
        while let Some(c) = chars.next() {
            let item = match c {
                '\\' => {
                    let e = chars.next().ok_or_else(|| {
                        RegexError::parse(offset, "dangling escape in class")
                    })?;
                    self.escape_char(e, offset)?
                }
                '-' if prev.is_some() && chars.peek().is_some() => {
                    let hi = match chars.next() {
                        Some('\\') => {
                            let e = chars.next().ok_or_else(|| {
                                RegexError::parse(offset, "dangling escape in class")
                            })?;
                            let c = self.escape_char(e, offset)?;
                            match c.intervals() {
                                [(a, b)] if a == b => *a,
                                _ => {
                                    return Err(RegexError::parse(
                                        offset,
                                        "class escape cannot end a range",
                                    ))
                                }
                            }
                        }
                        Some(hi) => hi as u32,
                        None => unreachable!(),
                    };
                    let lo = prev.take().unwrap_or(hi);
                    set.append((lo, hi), self.alphabet);
                    continue;
                }
                c => Character::new([(c as u32, c as u32)], self.alphabet),
            };
            // remember single codes so `a-z` ranges can form
            prev = match item.intervals() {
                [(a, b)] if a == b => Some(*a),
                _ => None,
            };
            union(&mut set, &item);
        }
        if negated {
            Ok(set.complement(self.alphabet))
        } else {
            Ok(set)
        }
    }
}

const DIGIT: &[Interval] = &[('0' as u32, '9' as u32)];
const WORD: &[Interval] = &[
    ('0' as u32, '9' as u32),
    ('A' as u32, 'Z' as u32),
    ('_' as u32, '_' as u32),
    ('a' as u32, 'z' as u32),
];
const SPACE: &[Interval] = &[
    ('\t' as u32, '\r' as u32),
    (' ' as u32, ' ' as u32),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Unicode;

    fn parse(source: &str) -> Regexp {
        match Regexp::parse(source, &Unicode) {
            Ok(r) => r,
            Err(e) => panic!("{source}: {e}"),
        }
    }

    #[test]
    fn literals_and_sequence() {
        let r = parse("abc");
        match r {
            Regexp::Sequence(items) => assert_eq!(items.len(), 3),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn alternation_order() {
        let r = parse("ab|c|d");
        match r {
            Regexp::Choice(items) => assert_eq!(items.len(), 3),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn repetitions() {
        assert!(matches!(
            parse("a*"),
            Regexp::Repeat {
                min: 0,
                max: None,
                greedy: true,
                ..
            }
        ));
        assert!(matches!(
            parse("a+?"),
            Regexp::Repeat {
                min: 1,
                max: None,
                greedy: false,
                ..
            }
        ));
        assert!(matches!(
            parse("a{3,5}"),
            Regexp::Repeat {
                min: 3,
                max: Some(5),
                ..
            }
        ));
        assert!(matches!(
            parse("a{2,}"),
            Regexp::Repeat {
                min: 2,
                max: None,
                ..
            }
        ));
    }

    #[test]
    fn classes() {
        let r = parse("[a-cx]");
        match r {
            Regexp::Class(c) => {
                assert!(c.contains('b' as u32));
                assert!(c.contains('x' as u32));
                assert!(!c.contains('d' as u32));
            }
            other => panic!("{other:?}"),
        }
        let r = parse("[^a-z]");
        match r {
            Regexp::Class(c) => {
                assert!(!c.contains('m' as u32));
                assert!(c.contains('A' as u32));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn escapes() {
        let r = parse(r"\d+");
        match r {
            Regexp::Repeat { node, .. } => match *node {
                Regexp::Class(c) => assert!(c.contains('7' as u32)),
                other => panic!("{other:?}"),
            },
            other => panic!("{other:?}"),
        }
        assert!(matches!(parse(r"\."), Regexp::Class(_)));
        assert!(Regexp::parse(r"\q", &Unicode).is_err());
    }

    #[test]
    fn groups_shape_the_tree() {
        let r = parse("(ab|c)d");
        match r {
            Regexp::Sequence(items) => {
                assert!(matches!(items[0], Regexp::Choice(_)));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn malformed_source_is_an_error() {
        assert!(Regexp::parse("(ab", &Unicode).is_err());
        assert!(Regexp::parse("a)", &Unicode).is_err());
        assert!(Regexp::parse("*a", &Unicode).is_err());
        assert!(Regexp::parse("a{5,3}", &Unicode).is_err());
    }

    #[test]
    fn display_round_trips_structure() {
        for source in ["a(b|c)*", "[a-z]+?", "ab{2,3}c"] {
            let parsed = parse(source);
            let reparsed = parse(&parsed.to_string());
            assert_eq!(parsed, reparsed);
        }
    }
}
