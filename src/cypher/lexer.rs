//! Cypher lexer for the statement subset the backup pipelines emit.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Byte range in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Clauses
    Match, Where, Return, Unwind, Create, Set, Remove, Call, Yield,
    Order, By, Skip, Limit, Asc, Desc, Distinct, As,
    // Expressions
    And, Or, Not, Xor, Is, Null, True, False, In, Exists,
    // Schema
    Show, Constraint, Constraints, Drop, If, On, For, Assert, Require, Unique,

    Integer, Float, StringLiteral,
    Identifier, Parameter,

    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, Comma, Colon, Semicolon, Pipe, Star,
    Arrow,     // ->
    LeftArrow, // <-
    Dash,

    Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Slash, Percent,
    PlusEq,

    Eof,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("MATCH", TokenKind::Match),
    ("WHERE", TokenKind::Where),
    ("RETURN", TokenKind::Return),
    ("UNWIND", TokenKind::Unwind),
    ("CREATE", TokenKind::Create),
    ("SET", TokenKind::Set),
    ("REMOVE", TokenKind::Remove),
    ("CALL", TokenKind::Call),
    ("YIELD", TokenKind::Yield),
    ("ORDER", TokenKind::Order),
    ("BY", TokenKind::By),
    ("SKIP", TokenKind::Skip),
    ("LIMIT", TokenKind::Limit),
    ("ASC", TokenKind::Asc),
    ("ASCENDING", TokenKind::Asc),
    ("DESC", TokenKind::Desc),
    ("DESCENDING", TokenKind::Desc),
    ("DISTINCT", TokenKind::Distinct),
    ("AS", TokenKind::As),
    ("AND", TokenKind::And),
    ("OR", TokenKind::Or),
    ("NOT", TokenKind::Not),
    ("XOR", TokenKind::Xor),
    ("IS", TokenKind::Is),
    ("NULL", TokenKind::Null),
    ("TRUE", TokenKind::True),
    ("FALSE", TokenKind::False),
    ("IN", TokenKind::In),
    ("EXISTS", TokenKind::Exists),
    ("SHOW", TokenKind::Show),
    ("CONSTRAINT", TokenKind::Constraint),
    ("CONSTRAINTS", TokenKind::Constraints),
    ("DROP", TokenKind::Drop),
    ("IF", TokenKind::If),
    ("ON", TokenKind::On),
    ("FOR", TokenKind::For),
    ("ASSERT", TokenKind::Assert),
    ("REQUIRE", TokenKind::Require),
    ("UNIQUE", TokenKind::Unique),
];

/// Two-character operators, tried before single characters.
const DIGRAPHS: &[(&str, TokenKind)] = &[
    ("->", TokenKind::Arrow),
    ("<-", TokenKind::LeftArrow),
    ("<>", TokenKind::Neq),
    ("!=", TokenKind::Neq),
    ("<=", TokenKind::Lte),
    (">=", TokenKind::Gte),
    ("+=", TokenKind::PlusEq),
];

fn single(c: char) -> Option<TokenKind> {
    Some(match c {
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        '[' => TokenKind::LBracket,
        ']' => TokenKind::RBracket,
        '{' => TokenKind::LBrace,
        '}' => TokenKind::RBrace,
        '.' => TokenKind::Dot,
        ',' => TokenKind::Comma,
        ':' => TokenKind::Colon,
        ';' => TokenKind::Semicolon,
        '|' => TokenKind::Pipe,
        '*' => TokenKind::Star,
        '-' => TokenKind::Dash,
        '=' => TokenKind::Eq,
        '<' => TokenKind::Lt,
        '>' => TokenKind::Gt,
        '+' => TokenKind::Plus,
        '/' => TokenKind::Slash,
        '%' => TokenKind::Percent,
        _ => return None,
    })
}

fn keyword(word: &str) -> TokenKind {
    KEYWORDS
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(word))
        .map_or(TokenKind::Identifier, |(_, kind)| *kind)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Tokenize a Cypher statement.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { src: input, pos: 0, tokens: Vec::new() };
    lexer.run()?;
    Ok(lexer.tokens)
}

// ============================================================================
// Lexer
// ============================================================================

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(position: usize, message: impl Into<String>) -> Error {
        Error::SyntaxError { position, message: message.into() }
    }

    fn emit(&mut self, kind: TokenKind, start: usize, text: impl Into<String>) {
        self.tokens.push(Token { kind, span: Span { start, end: self.pos }, text: text.into() });
    }

    fn run(&mut self) -> Result<()> {
        loop {
            self.skip_trivia()?;
            let start = self.pos;
            let Some(c) = self.peek() else { break };
            match c {
                '\'' | '"' => self.string(c)?,
                '`' => self.quoted_identifier()?,
                '$' => {
                    self.bump();
                    let name = self.word();
                    if name.is_empty() {
                        return Err(Self::error(start, "Expected parameter name after '$'"));
                    }
                    self.emit(TokenKind::Parameter, start, name);
                }
                c if c.is_ascii_digit() => self.number(),
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.word();
                    self.emit(keyword(&word), start, word);
                }
                _ => self.symbol(c)?,
            }
        }
        let end = self.src.len();
        self.tokens.push(Token { kind: TokenKind::Eof, span: Span { start: end, end }, text: String::new() });
        Ok(())
    }

    /// Whitespace, `// line` and `/* block */` comments.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let rest = self.rest();
            if rest.starts_with("//") {
                self.pos += rest.find('\n').unwrap_or(rest.len());
            } else if rest.starts_with("/*") {
                let Some(close) = rest[2..].find("*/") else {
                    return Err(Self::error(self.pos, "Unterminated block comment"));
                };
                self.pos += close + 4;
            } else if self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            } else {
                return Ok(());
            }
        }
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_word_char) {
            self.bump();
        }
        self.src[start..self.pos].to_owned()
    }

    fn string(&mut self, quote: char) -> Result<()> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(Self::error(start, "Unterminated string literal")),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(c @ ('\\' | '\'' | '"')) => value.push(c),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(Self::error(start, "Unterminated string literal")),
                },
                Some(c) => value.push(c),
            }
        }
        self.emit(TokenKind::StringLiteral, start, value);
        Ok(())
    }

    /// `` `name` `` with a doubled backtick standing for one backtick.
    fn quoted_identifier(&mut self) -> Result<()> {
        let start = self.pos;
        self.bump();
        let mut name = String::new();
        loop {
            match self.bump() {
                None => return Err(Self::error(start, "Unterminated escaped identifier")),
                Some('`') if self.peek() == Some('`') => {
                    self.bump();
                    name.push('`');
                }
                Some('`') => break,
                Some(c) => name.push(c),
            }
        }
        self.emit(TokenKind::Identifier, start, name);
        Ok(())
    }

    /// `42`, `4.2`, `4e2`, `4.2E-1`.
    fn number(&mut self) {
        let start = self.pos;
        let mut float = false;
        self.digits();
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            float = true;
            self.bump();
            self.digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) && self.exponent_follows() {
            float = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            self.digits();
        }
        let text = self.src[start..self.pos].to_owned();
        self.emit(if float { TokenKind::Float } else { TokenKind::Integer }, start, text);
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
    }

    fn exponent_follows(&self) -> bool {
        let mut after = self.rest().chars().skip(1);
        match after.next() {
            Some(d) if d.is_ascii_digit() => true,
            Some('+' | '-') => after.next().is_some_and(|d| d.is_ascii_digit()),
            _ => false,
        }
    }

    fn symbol(&mut self, c: char) -> Result<()> {
        let start = self.pos;
        if let Some((text, kind)) = DIGRAPHS.iter().find(|(text, _)| self.rest().starts_with(*text)) {
            self.pos += text.len();
            self.emit(*kind, start, *text);
            return Ok(());
        }
        let kind = single(c).ok_or_else(|| Self::error(start, format!("Unexpected character: '{c}'")))?;
        self.bump();
        self.emit(kind, start, c.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_relationship_pattern() {
        use TokenKind::*;
        assert_eq!(
            kinds("MATCH (a)-[:KNOWS]->(b)<-(c)"),
            vec![
                Match, LParen, Identifier, RParen, Dash, LBracket, Colon, Identifier, RBracket, Arrow, LParen,
                Identifier, RParen, LeftArrow, LParen, Identifier, RParen, Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(kinds("unwind $rows as row"), vec![
            TokenKind::Unwind,
            TokenKind::Parameter,
            TokenKind::As,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn test_strings_and_escapes() {
        let tokens = tokenize(r#"'it\'s' "tab\there""#).unwrap();
        assert_eq!(tokens[0].text, "it's");
        assert_eq!(tokens[1].text, "tab\there");
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn test_quoted_identifier_with_backtick() {
        let tokens = tokenize("n.`we``ird key`").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].text, "we`ird key");
        assert!(tokenize("`open").is_err());
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 4.25 1e3 2.5E-2 3.x").unwrap();
        let pairs: Vec<_> = tokens.iter().map(|t| (t.kind, t.text.as_str())).collect();
        assert_eq!(&pairs[..4], &[
            (TokenKind::Integer, "42"),
            (TokenKind::Float, "4.25"),
            (TokenKind::Float, "1e3"),
            (TokenKind::Float, "2.5E-2"),
        ]);
        assert_eq!(pairs[4], (TokenKind::Integer, "3"));
        assert_eq!(pairs[5].0, TokenKind::Dot);
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(kinds("RETURN /* a\nb */ 1 // trailing"), vec![
            TokenKind::Return,
            TokenKind::Integer,
            TokenKind::Eof,
        ]);
        assert!(tokenize("RETURN /* open").is_err());
    }

    #[test]
    fn test_operators() {
        use TokenKind::*;
        assert_eq!(kinds("+= <> != <= >= = < >"), vec![PlusEq, Neq, Neq, Lte, Gte, Eq, Lt, Gt, Eof]);
        let err = tokenize("RETURN #").unwrap_err();
        assert!(matches!(err, Error::SyntaxError { position: 7, .. }));
    }

    #[test]
    fn test_parameter_needs_name() {
        assert_eq!(tokenize("$after").unwrap()[0].text, "after");
        assert!(tokenize("$ x").is_err());
    }
}
