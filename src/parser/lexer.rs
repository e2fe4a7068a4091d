use crate::error::{DbError, Pos, Result};

/// Token kinds of the SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Keyword,
    Identifier,
    Number,
    String,
    Operator,
    Delimiter,
    Eof,
}

/// (kind, lexeme, line, column). Keywords are normalized to upper case;
/// identifiers keep their literal casing.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenType,
    pub lexeme: String,
    pub pos: Pos,
}

impl Token {
    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenType::Keyword && self.lexeme == word
    }
}

const KEYWORDS: &[&str] = &[
    "CREATE", "TABLE", "INSERT", "INTO", "VALUES", "SELECT", "FROM", "WHERE", "DELETE", "UPDATE",
    "SET", "AND", "OR", "NOT", "NULL", "INT", "VARCHAR", "PRIMARY", "KEY", "FOREIGN",
    "REFERENCES", "UNIQUE", "INDEX", "DROP", "ALTER", "ADD", "COLUMN", "ORDER", "BY", "GROUP",
    "HAVING", "DISTINCT", "AS", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "ON", "CASE", "WHEN",
    "THEN", "ELSE", "END", "IF", "EXISTS", "BETWEEN", "LIKE", "IN", "IS", "ASC", "DESC", "LIMIT",
    "OFFSET", "SHOW", "TABLES", "RENAME", "TO", "MODIFY", "CHAR", "DEFAULT",
];

const TWO_CHAR_OPERATORS: &[&str] = &["!=", "<>", "<=", ">=", "||"];
const ONE_CHAR_OPERATORS: &[char] = &['=', '<', '>', '+', '-', '*', '/', '%'];
const DELIMITERS: &[char] = &['(', ')', ',', ';', '.', '[', ']', '{', '}'];

/// Hand-written SQL tokenizer with 1-based line/column tracking.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize(text: &str) -> Result<Vec<Token>> {
        Lexer::new(text).run()
    }

    fn run(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            if self.skip_comment()? {
                continue;
            }
            if self.at_end() {
                break;
            }

            let pos = self.here();
            let c = self.current();
            if c == '\'' || c == '"' {
                tokens.push(self.string_token()?);
            } else if c.is_ascii_digit() {
                tokens.push(self.number_token());
            } else if c.is_alphabetic() || c == '_' {
                tokens.push(self.word_token());
            } else if let Some(token) = self.operator_token() {
                tokens.push(token);
            } else if DELIMITERS.contains(&c) {
                self.advance();
                tokens.push(Token {
                    kind: TokenType::Delimiter,
                    lexeme: c.to_string(),
                    pos,
                });
            } else {
                return Err(DbError::Lexical {
                    pos,
                    msg: format!("unexpected character '{c}'"),
                });
            }
        }

        tokens.push(Token {
            kind: TokenType::Eof,
            lexeme: String::new(),
            pos: self.here(),
        });
        Ok(tokens)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn current(&self) -> char {
        self.chars[self.pos]
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn here(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while !self.at_end() && self.current().is_whitespace() {
            self.advance();
        }
    }

    /// `-- line` and `/* block */` comments. Returns true when one was
    /// consumed; an unclosed block comment is a lexical error at its start.
    fn skip_comment(&mut self) -> Result<bool> {
        if self.current() == '-' && self.peek() == Some('-') {
            while !self.at_end() && self.current() != '\n' {
                self.advance();
            }
            return Ok(true);
        }
        if self.current() == '/' && self.peek() == Some('*') {
            let start = self.here();
            self.advance();
            self.advance();
            while !self.at_end() {
                if self.current() == '*' && self.peek() == Some('/') {
                    self.advance();
                    self.advance();
                    return Ok(true);
                }
                self.advance();
            }
            return Err(DbError::Lexical {
                pos: start,
                msg: "unterminated comment".into(),
            });
        }
        Ok(false)
    }

    fn string_token(&mut self) -> Result<Token> {
        let pos = self.here();
        let quote = self.advance();
        let mut value = String::new();

        while !self.at_end() {
            let c = self.current();
            if c == quote {
                self.advance();
                return Ok(Token {
                    kind: TokenType::String,
                    lexeme: value,
                    pos,
                });
            }
            if c == '\\' {
                self.advance();
                if self.at_end() {
                    break;
                }
                let escaped = self.advance();
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                value.push(self.advance());
            }
        }

        Err(DbError::Lexical {
            pos,
            msg: "unterminated string literal".into(),
        })
    }

    fn number_token(&mut self) -> Token {
        let pos = self.here();
        let mut value = String::new();
        while !self.at_end() && self.current().is_ascii_digit() {
            value.push(self.advance());
        }
        if !self.at_end()
            && self.current() == '.'
            && self.peek().is_some_and(|c| c.is_ascii_digit())
        {
            value.push(self.advance());
            while !self.at_end() && self.current().is_ascii_digit() {
                value.push(self.advance());
            }
        }
        Token {
            kind: TokenType::Number,
            lexeme: value,
            pos,
        }
    }

    fn word_token(&mut self) -> Token {
        let pos = self.here();
        let mut value = String::new();
        while !self.at_end() && (self.current().is_alphanumeric() || self.current() == '_') {
            value.push(self.advance());
        }
        let upper = value.to_ascii_uppercase();
        if KEYWORDS.contains(&upper.as_str()) {
            Token {
                kind: TokenType::Keyword,
                lexeme: upper,
                pos,
            }
        } else {
            Token {
                kind: TokenType::Identifier,
                lexeme: value,
                pos,
            }
        }
    }

    fn operator_token(&mut self) -> Option<Token> {
        let pos = self.here();
        if let Some(next) = self.peek() {
            let two: String = [self.current(), next].iter().collect();
            if TWO_CHAR_OPERATORS.contains(&two.as_str()) {
                self.advance();
                self.advance();
                return Some(Token {
                    kind: TokenType::Operator,
                    lexeme: two,
                    pos,
                });
            }
        }
        let c = self.current();
        if ONE_CHAR_OPERATORS.contains(&c) {
            self.advance();
            return Some(Token {
                kind: TokenType::Operator,
                lexeme: c.to_string(),
                pos,
            });
        }
        None
    }
}
