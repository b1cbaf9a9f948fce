//! A module implementing lexical analysis (tokenization) for the shell's command lines.

use thiserror::Error;

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with quotes and escapes already removed.
    Word(String),
    /// The pipe operator, `|`.
    Pipe,
    /// The pipe operator that also carries stderr, `|&`.
    PipeWithStderr,
    /// Input redirection symbol, `<`.
    RedirectIn,
    /// Output redirection symbol, `>`.
    RedirectOut,
    /// Appending output redirection symbol, `>>`.
    RedirectAppend,
    /// Output redirection that also carries stderr, `>&`.
    RedirectOutWithStderr,
    /// Background marker and pipeline terminator, `&`.
    Ampersand,
    /// Pipeline separator, `;`.
    Semicolon,
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexingError {
    /// A closing quote (single or double) was not found.
    #[error("unterminated quote")]
    UnfinishedQuote,
    /// The line ended right after a backslash.
    #[error("dangling escape at end of line")]
    DanglingEscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
}

impl LexingFSM {
    fn new(line: String) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Performs lexical analysis on the input string and returns a vector of tokens.
    ///
    /// Quotes may start in the middle of a word (`ab'c d'e` is the single word `abc de`),
    /// and a quoted empty string still produces a word.
    fn make_tokens(&mut self) -> Result<Vec<Token>, LexingError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out)?,
                LexingState::ReadingWord => self.handle_word(ch, &mut out)?,
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch)?,
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote => {
                return Err(LexingError::UnfinishedQuote);
            }
            LexingState::ReadingWord => self.finish_word(&mut out),
            LexingState::Start => {}
        }

        Ok(out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_start(&mut self, ch: char, out: &mut Vec<Token>) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' | '\n' => {}
            '|' | '<' | '>' | '&' | ';' => out.push(self.operator(ch)),
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                let escaped = self.read_char().ok_or(LexingError::DanglingEscape)?;
                self.buffer.push(escaped);
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
        Ok(())
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' | '\n' => {
                self.finish_word(out);
                self.state = LexingState::Start;
            }
            '|' | '<' | '>' | '&' | ';' => {
                self.finish_word(out);
                out.push(self.operator(ch));
                self.state = LexingState::Start;
            }
            '\'' => self.state = LexingState::ReadingSingleQuote,
            '"' => self.state = LexingState::ReadingDoubleQuote,
            '\\' => {
                let escaped = self.read_char().ok_or(LexingError::DanglingEscape)?;
                self.buffer.push(escaped);
            }
            c => self.buffer.push(c),
        }
        Ok(())
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) -> Result<(), LexingError> {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' if matches!(self.peek_char(), Some('"') | Some('\\')) => {
                let escaped = self.read_char().ok_or(LexingError::DanglingEscape)?;
                self.buffer.push(escaped);
            }
            c => self.buffer.push(c),
        }
        Ok(())
    }

    /// Reads the remainder of a (possibly two-character) operator starting with `first`.
    fn operator(&mut self, first: char) -> Token {
        match (first, self.peek_char()) {
            ('|', Some('&')) => {
                self.read_char();
                Token::PipeWithStderr
            }
            ('>', Some('>')) => {
                self.read_char();
                Token::RedirectAppend
            }
            ('>', Some('&')) => {
                self.read_char();
                Token::RedirectOutWithStderr
            }
            ('|', _) => Token::Pipe,
            ('<', _) => Token::RedirectIn,
            ('>', _) => Token::RedirectOut,
            ('&', _) => Token::Ampersand,
            (';', _) => Token::Semicolon,
            _ => unreachable!("operator() is only called for operator characters"),
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        out.push(Token::Word(std::mem::take(&mut self.buffer)));
    }
}

/// The main entry point function to perform lexical analysis.
///
/// Creates and runs the finite state machine to tokenize the input line.
pub fn split_into_tokens(line: String) -> Result<Vec<Token>, LexingError> {
    let mut lexer = LexingFSM::new(line);
    lexer.make_tokens()
}
