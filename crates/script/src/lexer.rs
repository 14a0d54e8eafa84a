//! Tokenizer for the script language.
//!
//! Produces a flat token list with line/column positions. Template
//! literals keep their `${...}` parts as raw source, which the parser
//! re-parses as expressions.

use crate::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    Ident(String),

    // Keywords
    Let,
    Const,
    If,
    Else,
    While,
    For,
    Of,
    Return,
    Break,
    Continue,
    True,
    False,
    Null,
    Await,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semicolon,
    Colon,
    Question,
    Arrow,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Nullish,
    Bang,

    Eof,
}

/// A piece of a template literal: literal text or the source of `${...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    Expr { source: String, line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str, line: usize) -> Self {
        Self {
            chars: input.chars().peekable(),
            line,
            column: 1,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

/// Tokenize script source. The returned list always ends with [`Token::Eof`].
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ScriptError> {
    tokenize_at(input, 1)
}

pub(crate) fn tokenize_at(input: &str, first_line: usize) -> Result<Vec<Spanned>, ScriptError> {
    let mut cur = Cursor::new(input, first_line);
    let mut tokens = Vec::new();

    loop {
        skip_trivia(&mut cur)?;
        let (line, column) = (cur.line, cur.column);
        let Some(c) = cur.bump() else {
            tokens.push(Spanned {
                token: Token::Eof,
                line,
                column,
            });
            return Ok(tokens);
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            ':' => Token::Colon,
            '%' => Token::Percent,
            '.' if cur.peek().is_some_and(|n| n.is_ascii_digit()) => lex_number(&mut cur, c)?,
            '.' => Token::Dot,
            '?' if cur.eat('?') => Token::Nullish,
            '?' => Token::Question,
            '+' if cur.eat('+') => Token::PlusPlus,
            '+' if cur.eat('=') => Token::PlusAssign,
            '+' => Token::Plus,
            '-' if cur.eat('-') => Token::MinusMinus,
            '-' if cur.eat('=') => Token::MinusAssign,
            '-' => Token::Minus,
            '*' if cur.eat('=') => Token::StarAssign,
            '*' => Token::Star,
            '/' if cur.eat('=') => Token::SlashAssign,
            '/' => Token::Slash,
            '=' if cur.eat('>') => Token::Arrow,
            '=' if cur.eat('=') => {
                cur.eat('=');
                Token::EqEq
            }
            '=' => Token::Assign,
            '!' if cur.eat('=') => {
                cur.eat('=');
                Token::NotEq
            }
            '!' => Token::Bang,
            '<' if cur.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if cur.eat('=') => Token::Ge,
            '>' => Token::Gt,
            '&' if cur.eat('&') => Token::AndAnd,
            '|' if cur.eat('|') => Token::OrOr,
            '"' | '\'' => Token::Str(lex_string(&mut cur, c)?),
            '`' => Token::Template(lex_template(&mut cur)?),
            c if c.is_ascii_digit() => lex_number(&mut cur, c)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => lex_word(&mut cur, c),
            other => {
                return Err(ScriptError::Syntax {
                    line,
                    column,
                    message: format!("unexpected character '{other}'"),
                });
            }
        };
        tokens.push(Spanned {
            token,
            line,
            column,
        });
    }
}

fn skip_trivia(cur: &mut Cursor<'_>) -> Result<(), ScriptError> {
    loop {
        match cur.peek() {
            Some(c) if c.is_whitespace() => {
                cur.bump();
            }
            Some('/') => {
                let mut lookahead = cur.chars.clone();
                lookahead.next();
                match lookahead.peek() {
                    Some('/') => {
                        while let Some(c) = cur.bump() {
                            if c == '\n' {
                                break;
                            }
                        }
                    }
                    Some('*') => {
                        cur.bump();
                        cur.bump();
                        let mut closed = false;
                        while let Some(c) = cur.bump() {
                            if c == '*' && cur.eat('/') {
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Err(cur.error("unterminated block comment"));
                        }
                    }
                    _ => return Ok(()),
                }
            }
            _ => return Ok(()),
        }
    }
}

fn lex_number(cur: &mut Cursor<'_>, first: char) -> Result<Token, ScriptError> {
    let mut text = String::from(first);
    while let Some(c) = cur.peek() {
        if c.is_ascii_digit() || c == '.' || c == '_' {
            if c != '_' {
                text.push(c);
            }
            cur.bump();
        } else if (c == 'e' || c == 'E') && !text.contains(['e', 'E']) {
            text.push(c);
            cur.bump();
            if let Some(sign @ ('+' | '-')) = cur.peek() {
                text.push(sign);
                cur.bump();
            }
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .map(Token::Number)
        .map_err(|_| cur.error(format!("invalid number '{text}'")))
}

fn lex_word(cur: &mut Cursor<'_>, first: char) -> Token {
    let mut word = String::from(first);
    while let Some(c) = cur.peek() {
        if c.is_alphanumeric() || c == '_' || c == '$' {
            word.push(c);
            cur.bump();
        } else {
            break;
        }
    }
    match word.as_str() {
        "let" | "var" => Token::Let,
        "const" => Token::Const,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "for" => Token::For,
        "of" => Token::Of,
        "return" => Token::Return,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "true" => Token::True,
        "false" => Token::False,
        "null" | "undefined" => Token::Null,
        "await" => Token::Await,
        _ => Token::Ident(word),
    }
}

fn lex_escape(cur: &mut Cursor<'_>) -> Result<char, ScriptError> {
    match cur.bump() {
        Some('n') => Ok('\n'),
        Some('t') => Ok('\t'),
        Some('r') => Ok('\r'),
        Some('0') => Ok('\0'),
        Some('u') => {
            let mut hex = String::new();
            for _ in 0..4 {
                match cur.bump() {
                    Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                    _ => return Err(cur.error("invalid \\u escape")),
                }
            }
            u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| cur.error("invalid \\u escape"))
        }
        Some(other) => Ok(other),
        None => Err(cur.error("unterminated string literal")),
    }
}

fn lex_string(cur: &mut Cursor<'_>, quote: char) -> Result<String, ScriptError> {
    let mut s = String::new();
    loop {
        match cur.bump() {
            Some('\\') => s.push(lex_escape(cur)?),
            Some(c) if c == quote => return Ok(s),
            Some('\n') | None => return Err(cur.error("unterminated string literal")),
            Some(c) => s.push(c),
        }
    }
}

fn lex_template(cur: &mut Cursor<'_>) -> Result<Vec<TemplateChunk>, ScriptError> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    loop {
        match cur.bump() {
            Some('\\') => text.push(lex_escape(cur)?),
            Some('`') => break,
            Some('$') if cur.eat('{') => {
                if !text.is_empty() {
                    chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                }
                let line = cur.line;
                let mut source = String::new();
                let mut depth = 0usize;
                loop {
                    match cur.bump() {
                        Some('{') => {
                            depth += 1;
                            source.push('{');
                        }
                        Some('}') if depth == 0 => break,
                        Some('}') => {
                            depth -= 1;
                            source.push('}');
                        }
                        Some(c) => source.push(c),
                        None => return Err(cur.error("unterminated template expression")),
                    }
                }
                chunks.push(TemplateChunk::Expr { source, line });
            }
            Some(c) => text.push(c),
            None => return Err(cur.error("unterminated template literal")),
        }
    }
    if !text.is_empty() || chunks.is_empty() {
        chunks.push(TemplateChunk::Text(text));
    }
    Ok(chunks)
}
