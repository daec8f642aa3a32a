//! Lexer for the assembly source language.
//!
//! Turns a source string into a stream of [`Token`]s on demand. The lexer
//! never fails: malformed input is surfaced as [`TokenKind::Illegal`]
//! tokens and left for the assembler to diagnose.
//!
//! One wrinkle drives most of the logic here: `#` introduces a comment
//! running to end-of-line, *unless* the next character is a decimal digit,
//! in which case it starts a register reference such as `#7`.

use crate::vm::token::{Token, TokenKind, lookup_keyword};

/// A cursor over the characters of one source program.
pub struct Lexer {
    /// The input, decoded up front so multi-byte characters index cleanly.
    chars: Vec<char>,
    /// Offset of `ch` within `chars`.
    position: usize,
    /// Offset of the next character to read.
    read_position: usize,
    /// Character under the cursor; `'\0'` once input is exhausted.
    ch: char,
}

impl Lexer {
    /// Creates a lexer over the given source text.
    pub fn new(input: &str) -> Self {
        let mut lexer = Self {
            chars: input.chars().collect(),
            position: 0,
            read_position: 0,
            ch: '\0',
        };
        lexer.read_char();
        lexer
    }

    /// Returns the next token, or an EOF token at end of input.
    ///
    /// Calling this again after EOF keeps returning EOF.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        // A `#` not followed by a digit is a comment; `#N` is a register.
        if self.ch == '#' && !self.peek_char().is_ascii_digit() {
            self.skip_comment();
            return self.next_token();
        }

        let token = match self.ch {
            ',' => Token::new(TokenKind::Comma, ","),
            '"' => {
                let body = self.read_string();
                Token::new(TokenKind::Str, body)
            }
            ':' => {
                let label = self.read_label();
                Token::new(TokenKind::Label, label)
            }
            '\0' => return Token::eof(),
            c if c.is_ascii_digit() => return self.read_decimal(),
            _ => {
                let ident = self.read_identifier();
                let kind = lookup_keyword(&ident);
                return Token::new(kind, ident);
            }
        };
        self.read_char();
        token
    }

    /// Advances the cursor by one character.
    fn read_char(&mut self) {
        self.ch = self.chars.get(self.read_position).copied().unwrap_or('\0');
        self.position = self.read_position;
        self.read_position += 1;
    }

    /// Returns the character after the cursor without consuming it.
    fn peek_char(&self) -> char {
        self.chars.get(self.read_position).copied().unwrap_or('\0')
    }

    fn skip_whitespace(&mut self) {
        while is_whitespace(self.ch) {
            self.read_char();
        }
    }

    /// Consumes up to (not including) the next newline.
    fn skip_comment(&mut self) {
        while self.ch != '\n' && self.ch != '\0' {
            self.read_char();
        }
        self.skip_whitespace();
    }

    /// Reads a run of identifier characters: anything that is not a comma,
    /// whitespace or end of input.
    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while is_identifier(self.ch) {
            self.read_char();
        }
        self.chars[start..self.position].iter().collect()
    }

    /// Reads a run of integer-literal characters.
    ///
    /// The accepted class covers decimal digits, hex digits and the `x`/`X`
    /// radix marker, so `10`, `0xFF` and `0Xff` all lex as one run. Actual
    /// numeric interpretation is deferred to the assembler.
    fn read_number(&mut self) -> String {
        let start = self.position;
        while is_hex_digit(self.ch) {
            self.read_char();
        }
        self.chars[start..self.position].iter().collect()
    }

    fn read_until_whitespace(&mut self) -> String {
        let start = self.position;
        while !is_whitespace(self.ch) && self.ch != '\0' {
            self.read_char();
        }
        self.chars[start..self.position].iter().collect()
    }

    /// Reads an integer literal, tagging it ILLEGAL if the digit run is
    /// followed by anything other than whitespace, a comma, or the end of
    /// the input. The junk is attached to the literal for the diagnostic.
    fn read_decimal(&mut self) -> Token {
        let integer = self.read_number();

        if self.ch == '\0' || is_whitespace(self.ch) || self.ch == ',' {
            return Token::new(TokenKind::Int, integer);
        }
        let rest = self.read_until_whitespace();
        Token::new(TokenKind::Illegal, integer + &rest)
    }

    /// Reads a string literal body, decoding the recognised escapes
    /// (`\n`, `\r`, `\t`, `\"`, `\\`). The cursor is left on the closing
    /// quote. An unterminated string simply runs to end of input.
    fn read_string(&mut self) -> String {
        let mut out = String::new();

        loop {
            self.read_char();
            match self.ch {
                '"' | '\0' => break,
                '\\' => {
                    self.read_char();
                    let decoded = match self.ch {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '"' => '"',
                        '\\' => '\\',
                        '\0' => break,
                        other => other,
                    };
                    out.push(decoded);
                }
                c => out.push(c),
            }
        }
        out
    }

    /// Reads a label definition starting at the colon; the colon is kept
    /// in the literal.
    fn read_label(&mut self) -> String {
        self.read_until_whitespace()
    }
}

fn is_whitespace(ch: char) -> bool {
    ch == ' ' || ch == '\t' || ch == '\n' || ch == '\r'
}

fn is_identifier(ch: char) -> bool {
    ch != ',' && !is_whitespace(ch) && ch != '\0'
}

fn is_hex_digit(ch: char) -> bool {
    ch.is_ascii_digit() || ('a'..='f').contains(&ch) || ('A'..='F').contains(&ch) || ch == 'x' || ch == 'X'
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Asserts the lexer yields exactly the given (kind, literal) pairs,
    /// with a trailing EOF.
    fn assert_tokens(input: &str, expected: &[(TokenKind, &str)]) {
        let mut lexer = Lexer::new(input);
        for (i, (kind, literal)) in expected.iter().enumerate() {
            let token = lexer.next_token();
            assert_eq!(token.kind, *kind, "token {i}: kind mismatch ({token:?})");
            assert_eq!(
                token.literal, *literal,
                "token {i}: literal mismatch ({token:?})"
            );
        }
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn trivial() {
        assert_tokens(",", &[(TokenKind::Comma, ",")]);
    }

    #[test]
    fn real_program() {
        let input = "
        store #1, 10
        store #2, 20
        add #0, #1, #2
        print_int #0
        ";
        assert_tokens(
            input,
            &[
                (TokenKind::Store, "store"),
                (TokenKind::Ident, "#1"),
                (TokenKind::Comma, ","),
                (TokenKind::Int, "10"),
                (TokenKind::Store, "store"),
                (TokenKind::Ident, "#2"),
                (TokenKind::Comma, ","),
                (TokenKind::Int, "20"),
                (TokenKind::Add, "add"),
                (TokenKind::Ident, "#0"),
                (TokenKind::Comma, ","),
                (TokenKind::Ident, "#1"),
                (TokenKind::Comma, ","),
                (TokenKind::Ident, "#2"),
                (TokenKind::PrintInt, "print_int"),
                (TokenKind::Ident, "#0"),
            ],
        );
    }

    #[test]
    fn comments_are_skipped() {
        let input = "# This is a comment
        # This is still a comment
        print_int #3
        # This is a final
        print_int #15
        # comment on two-lines
        ";
        assert_tokens(
            input,
            &[
                (TokenKind::PrintInt, "print_int"),
                (TokenKind::Ident, "#3"),
                (TokenKind::PrintInt, "print_int"),
                (TokenKind::Ident, "#15"),
            ],
        );
    }

    #[test]
    fn register_versus_comment() {
        // `#1` is a register reference, `# 1` is a comment.
        assert_tokens("inc #1", &[(TokenKind::Inc, "inc"), (TokenKind::Ident, "#1")]);
        assert_tokens("inc # 1", &[(TokenKind::Inc, "inc")]);
    }

    #[test]
    fn labels_keep_the_colon() {
        assert_tokens(
            ":loop jmp loop",
            &[
                (TokenKind::Label, ":loop"),
                (TokenKind::Jmp, "jmp"),
                (TokenKind::Ident, "loop"),
            ],
        );
    }

    #[test]
    fn label_at_end_of_input() {
        assert_tokens(":end", &[(TokenKind::Label, ":end")]);
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_tokens(
            r#"store #1, "a\tb\n\"c\"\\""#,
            &[
                (TokenKind::Store, "store"),
                (TokenKind::Ident, "#1"),
                (TokenKind::Comma, ","),
                (TokenKind::Str, "a\tb\n\"c\"\\"),
            ],
        );
    }

    #[test]
    fn hex_literals_lex_as_one_run() {
        assert_tokens(
            "store #1, 0xFF",
            &[
                (TokenKind::Store, "store"),
                (TokenKind::Ident, "#1"),
                (TokenKind::Comma, ","),
                (TokenKind::Int, "0xFF"),
            ],
        );
    }

    #[test]
    fn integer_with_trailing_junk_is_illegal() {
        assert_tokens("10!stuff", &[(TokenKind::Illegal, "10!stuff")]);
    }

    #[test]
    fn comma_terminates_an_integer() {
        assert_tokens(
            "10,20",
            &[
                (TokenKind::Int, "10"),
                (TokenKind::Comma, ","),
                (TokenKind::Int, "20"),
            ],
        );
    }

    #[test]
    fn eof_is_idempotent() {
        let mut lexer = Lexer::new("nop");
        assert_eq!(lexer.next_token().kind, TokenKind::Nop);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }
}
