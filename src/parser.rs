use crate::lexer::{self, LexingError, Token};
use crate::pipeline::{Command, Pipeline};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during the parsing phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsingError {
    /// The line could not be tokenized.
    #[error(transparent)]
    Lexing(#[from] LexingError),
    /// Encountered a token that was not expected at the current position according to the grammar.
    #[error("syntax error near unexpected token `{}`", describe(.0))]
    UnexpectedToken(Token),
    /// A redirection operator was the last thing on the line.
    #[error("syntax error: missing file name after redirection")]
    MissingRedirectTarget,
    /// A pipe was not followed by a command (e.g. `cmd |`).
    #[error("syntax error: missing command after pipe")]
    EmptyCommand,
}

fn describe(token: &Token) -> &str {
    match token {
        Token::Word(w) => w,
        Token::Pipe => "|",
        Token::PipeWithStderr => "|&",
        Token::RedirectIn => "<",
        Token::RedirectOut => ">",
        Token::RedirectAppend => ">>",
        Token::RedirectOutWithStderr => ">&",
        Token::Ampersand => "&",
        Token::Semicolon => ";",
    }
}

/// Every pipeline found on one input line, in the order they should run.
pub type CommandLine = Vec<Pipeline>;

struct AstBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl AstBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        AstBuilder { tokens, pos: 0 }
    }

    /// Parse a command line: pipeline ((';' | '&') pipeline)* (';' | '&')?
    fn build(mut self) -> Result<CommandLine, ParsingError> {
        let mut pipelines = Vec::new();

        while self.peek().is_some() {
            let mut pipeline = self.parse_pipeline()?;
            match self.consume() {
                Some(Token::Ampersand) => pipeline.background = true,
                Some(Token::Semicolon) | None => {}
                Some(token) => return Err(ParsingError::UnexpectedToken(token)),
            }
            pipelines.push(pipeline);
        }

        Ok(pipelines)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a pipeline: command (('|' | '|&') command)*
    ///
    /// Redirections may appear after any word; `<` feeds the pipeline's first stage and
    /// `>`, `>>`, `>&` capture its last stage.
    fn parse_pipeline(&mut self) -> Result<Pipeline, ParsingError> {
        let mut pipeline = Pipeline::default();
        let mut stderr_to_output = false;

        loop {
            let mut command = self.parse_command(&mut pipeline, &mut stderr_to_output)?;
            match self.peek() {
                Some(Token::Pipe) => {
                    self.consume();
                }
                Some(Token::PipeWithStderr) => {
                    self.consume();
                    command.merge_stderr = true;
                }
                _ => {
                    pipeline.commands.push(command);
                    break;
                }
            }
            pipeline.commands.push(command);
        }

        if stderr_to_output {
            if let Some(last) = pipeline.commands.last_mut() {
                last.merge_stderr = true;
            }
        }
        Ok(pipeline)
    }

    /// Parse a command: (word | redirect)+
    ///
    /// `stderr_to_output` tracks whether the pipeline's final output redirection was `>&`.
    fn parse_command(
        &mut self,
        pipeline: &mut Pipeline,
        stderr_to_output: &mut bool,
    ) -> Result<Command, ParsingError> {
        let mut argv = Vec::new();

        while let Some(token) = self.peek() {
            match token {
                Token::Word(_) => {
                    if let Some(Token::Word(w)) = self.consume() {
                        argv.push(w);
                    }
                }
                Token::RedirectIn => {
                    self.consume();
                    pipeline.input = Some(self.parse_target()?);
                }
                Token::RedirectOut | Token::RedirectAppend | Token::RedirectOutWithStderr => {
                    let op = self.consume();
                    pipeline.output = Some(self.parse_target()?);
                    pipeline.append = op == Some(Token::RedirectAppend);
                    *stderr_to_output = op == Some(Token::RedirectOutWithStderr);
                }
                _ => break,
            }
        }

        if argv.is_empty() {
            return Err(match self.peek() {
                Some(token) => ParsingError::UnexpectedToken(token.clone()),
                None => ParsingError::EmptyCommand,
            });
        }

        Ok(Command {
            argv,
            merge_stderr: false,
        })
    }

    /// Parse the file name following a redirection operator.
    fn parse_target(&mut self) -> Result<PathBuf, ParsingError> {
        match self.consume() {
            Some(Token::Word(w)) => Ok(PathBuf::from(w)),
            Some(token) => Err(ParsingError::UnexpectedToken(token)),
            None => Err(ParsingError::MissingRedirectTarget),
        }
    }
}

/// Builds the list of pipelines described by a vector of tokens.
///
/// An empty token stream yields an empty command line, not an error.
pub fn construct_ast(tokens: Vec<Token>) -> Result<CommandLine, ParsingError> {
    AstBuilder::from(tokens).build()
}

/// Tokenizes and parses one input line.
pub fn parse_line(line: &str) -> Result<CommandLine, ParsingError> {
    let tokens = lexer::split_into_tokens(line.to_string())?;
    construct_ast(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_line_has_no_pipelines() {
        assert_eq!(parse_line("   ").unwrap(), Vec::<Pipeline>::new());
    }

    #[test]
    fn background_flag_from_trailing_ampersand() {
        let line = parse_line("sleep 5 &").unwrap();
        assert_eq!(line.len(), 1);
        assert!(line[0].background);
        assert_eq!(line[0].commands[0].argv, vec!["sleep", "5"]);
    }

    #[test]
    fn three_stage_pipeline_with_redirections() {
        let line = parse_line("cat < in.txt | sort |& uniq >> out.txt").unwrap();
        let p = &line[0];
        assert_eq!(p.len(), 3);
        assert_eq!(p.input, Some(PathBuf::from("in.txt")));
        assert_eq!(p.output, Some(PathBuf::from("out.txt")));
        assert!(p.append);
        assert!(!p.background);
        assert!(!p.commands[0].merge_stderr);
        assert!(p.commands[1].merge_stderr);
        assert!(!p.commands[2].merge_stderr);
    }

    #[test]
    fn redirect_with_stderr_marks_last_command() {
        let line = parse_line("make >& build.log").unwrap();
        let p = &line[0];
        assert_eq!(p.output, Some(PathBuf::from("build.log")));
        assert!(!p.append);
        assert!(p.commands[0].merge_stderr);
    }

    #[test]
    fn redirect_with_stderr_applies_to_last_stage() {
        let line = parse_line("make >& build.log | tee copy.log").unwrap();
        let p = &line[0];
        assert_eq!(p.output, Some(PathBuf::from("build.log")));
        assert!(!p.commands[0].merge_stderr);
        assert!(p.commands[1].merge_stderr);
    }

    #[test]
    fn later_plain_redirect_drops_stderr_merge() {
        let line = parse_line("make >& build.log > out.log").unwrap();
        let p = &line[0];
        assert_eq!(p.output, Some(PathBuf::from("out.log")));
        assert!(!p.commands[0].merge_stderr);
    }

    #[test]
    fn separators_split_pipelines() {
        let line = parse_line("sleep 1 & echo hi; true").unwrap();
        assert_eq!(line.len(), 3);
        assert!(line[0].background);
        assert!(!line[1].background);
        assert_eq!(line[2].commands[0].argv, vec!["true"]);
    }

    #[test]
    fn dangling_pipe_is_an_error() {
        assert_eq!(parse_line("ls |"), Err(ParsingError::EmptyCommand));
    }

    #[test]
    fn leading_operator_is_an_error() {
        assert_eq!(
            parse_line("| ls"),
            Err(ParsingError::UnexpectedToken(Token::Pipe))
        );
    }

    #[test]
    fn redirect_without_target_is_an_error() {
        assert_eq!(
            parse_line("ls >"),
            Err(ParsingError::MissingRedirectTarget)
        );
    }

    #[test]
    fn lexing_errors_propagate() {
        assert_eq!(
            parse_line("echo 'x"),
            Err(ParsingError::Lexing(LexingError::UnfinishedQuote))
        );
    }
}
