//! Tokenizer for the script language.

use std::rc::Rc;

use super::ParseError;

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Continue,
    True,
    False,
    Null,
    New,
    Typeof,
    Throw,
    Try,
    Catch,
    Finally,
    In,
    This,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        let kw = match ident {
            "var" => Keyword::Var,
            "let" => Keyword::Let,
            "const" => Keyword::Const,
            "function" => Keyword::Function,
            "return" => Keyword::Return,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "do" => Keyword::Do,
            "for" => Keyword::For,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            "new" => Keyword::New,
            "typeof" => Keyword::Typeof,
            "throw" => Keyword::Throw,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "finally" => Keyword::Finally,
            "in" => Keyword::In,
            "this" => Keyword::This,
            _ => return None,
        };
        Some(kw)
    }
}

/// Operators and delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Bang,
    Assign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(Rc<str>),
    Ident(Rc<str>),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
}

/// Punctuators, longest first so greedy matching works.
const PUNCTUATORS: &[(&str, Punct)] = &[
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::Le),
    (">=", Punct::Ge),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (";", Punct::Semicolon),
    (",", Punct::Comma),
    (".", Punct::Dot),
    ("?", Punct::Question),
    (":", Punct::Colon),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("!", Punct::Bang),
    ("=", Punct::Assign),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

struct Lexer<'s> {
    src: &'s str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: u32,
    column: u32,
}

/// Split `src` into tokens, ending with a single [`TokenKind::Eof`].
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        src,
        chars: src.char_indices().collect(),
        pos: 0,
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();
    loop {
        let newline_before = lexer.skip_trivia()?;
        let (line, column) = (lexer.line, lexer.column);
        let kind = match lexer.peek() {
            None => TokenKind::Eof,
            Some(c) => lexer.lex_token(c)?,
        };
        let done = kind == TokenKind::Eof;
        tokens.push(Token {
            kind,
            line,
            column,
            newline_before,
        });
        if done {
            return Ok(tokens);
        }
    }
}

impl<'s> Lexer<'s> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|&(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn rest(&self) -> &'s str {
        match self.chars.get(self.pos) {
            Some(&(offset, _)) => &self.src[offset..],
            None => "",
        }
    }

    /// Skip whitespace and comments; report whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, ParseError> {
        let mut newline = false;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some('\n'), _) => {
                    newline = true;
                    self.bump();
                }
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(c), _) => {
                                if c == '\n' {
                                    newline = true;
                                }
                                self.bump();
                            }
                            (None, _) => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn lex_token(&mut self, c: char) -> Result<TokenKind, ParseError> {
        if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
        {
            return self.lex_number();
        }
        if c == '"' || c == '\'' {
            return self.lex_string(c);
        }
        if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(c) = self.peek() {
                if !is_ident_part(c) {
                    break;
                }
                ident.push(c);
                self.bump();
            }
            return Ok(match Keyword::from_ident(&ident) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Ident(Rc::from(ident)),
            });
        }
        let rest = self.rest();
        for (text, punct) in PUNCTUATORS {
            if rest.starts_with(text) {
                for _ in 0..text.len() {
                    self.bump();
                }
                return Ok(TokenKind::Punct(*punct));
            }
        }
        Err(self.error(format!("unexpected character '{c}'")))
    }

    fn lex_number(&mut self) -> Result<TokenKind, ParseError> {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if !c.is_ascii_hexdigit() {
                    break;
                }
                digits.push(c);
                self.bump();
            }
            return u64::from_str_radix(&digits, 16)
                .map(|n| TokenKind::Number(n as f64))
                .map_err(|_| self.error("invalid hexadecimal literal"));
        }

        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.bump();
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                text.push(c);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.error("identifier starts immediately after numeric literal"));
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("invalid number literal '{text}'")))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, ParseError> {
        self.bump();
        let mut out = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => return Err(self.error("unterminated string literal")),
            };
            match c {
                c if c == quote => break,
                '\n' => return Err(self.error("unterminated string literal")),
                '\\' => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated string literal"))?;
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'v' => out.push('\u{b}'),
                        '0' => out.push('\0'),
                        'u' => out.push(self.lex_unicode_escape()?),
                        '\n' => {}
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(TokenKind::Str(Rc::from(out)))
    }

    fn lex_unicode_escape(&mut self) -> Result<char, ParseError> {
        let mut hex = String::with_capacity(4);
        for _ in 0..4 {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                _ => return Err(self.error("invalid unicode escape")),
            }
        }
        let code = u32::from_str_radix(&hex, 16).map_err(|_| self.error("invalid unicode escape"))?;
        Ok(char::from_u32(code).unwrap_or('\u{fffd}'))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_numbers_in_several_forms() {
        assert_eq!(
            kinds("1 2.5 .5 1e3 0x1F"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.5),
                TokenKind::Number(0.5),
                TokenKind::Number(1000.0),
                TokenKind::Number(31.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_strings_with_escapes() {
        assert_eq!(
            kinds(r#"'a\'b' "c\nd" "A""#),
            vec![
                TokenKind::Str(Rc::from("a'b")),
                TokenKind::Str(Rc::from("c\nd")),
                TokenKind::Str(Rc::from("A")),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn greedy_punctuators() {
        assert_eq!(
            kinds("a !== b += 1"),
            vec![
                TokenKind::Ident(Rc::from("a")),
                TokenKind::Punct(Punct::NotEqEq),
                TokenKind::Ident(Rc::from("b")),
                TokenKind::Punct(Punct::PlusAssign),
                TokenKind::Number(1.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_newlines_recorded() {
        let tokens = tokenize("a // c\n/* x\n */ b").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Ident(Rc::from("b")));
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].line, 3);
        assert!(!tokens[0].newline_before);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("'abc").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn keywords_are_recognised() {
        assert_eq!(
            kinds("var function"),
            vec![
                TokenKind::Keyword(Keyword::Var),
                TokenKind::Keyword(Keyword::Function),
                TokenKind::Eof
            ]
        );
    }
}
