//! The recursive-descent T-SQL parser.
//!
//! Most parser functions peek a token from the lexer and pick a path based
//! on which token is next. Whenever only one token can be next the
//! [`expected!`] macro consumes it or raises an error; a limited set of
//! alternatives is matched on the token kind with a catch-all arm calling
//! [`Parser::unexpected`]. Whitespace and comment tokens are skipped by
//! [`Parser::next`] and [`Parser::peek`].
//!
//! A handful of places are ambiguous until several tokens in, such as a
//! parenthesised condition versus a parenthesised arithmetic expression.
//! These use [`Parser::checkpoint`]/[`Parser::restore`] to backtrack over
//! at most one parenthesised group.

#[macro_use]
mod mac;

mod expr;
mod select;
mod stmt;

use crate::cnf::MAX_QUERY_DEPTH;
use crate::sql::Script;
use crate::syn::error::{SyntaxError, SyntaxErrorKind};
use crate::syn::lexer::Lexer;
use crate::syn::token::{Keyword, Span, Token, TokenKind};
use std::collections::VecDeque;

/// The result returned by most parser functions.
pub type ParseResult<T> = Result<T, SyntaxError>;

/// A token together with the decoded text of its identifier, string, or
/// variable payload.
#[derive(Clone, Debug)]
pub struct Lexed {
	pub token: Token,
	pub value: Option<String>,
}

/// A saved parser position for backtracking.
pub struct Checkpoint {
	offset: usize,
	buffer: VecDeque<Lexed>,
	last_span: Span,
}

/// The T-SQL parser.
#[non_exhaustive]
pub struct Parser<'a> {
	lexer: Lexer<'a>,
	buffer: VecDeque<Lexed>,
	last_span: Span,
	depth: u32,
}

impl<'a> Parser<'a> {
	/// Create a new parser over the given source.
	pub fn new(source: &'a str) -> Self {
		Parser {
			lexer: Lexer::new(source),
			buffer: VecDeque::new(),
			last_span: Span::empty(),
			depth: 0,
		}
	}

	/// The source this parser reads from.
	pub fn source(&self) -> &'a str {
		self.lexer.source()
	}

	/// Pull the next non-trivia token from the lexer.
	fn lex_next(&mut self) -> Lexed {
		loop {
			let token = self.lexer.next_token();
			if matches!(token.kind, TokenKind::WhiteSpace | TokenKind::Comment) {
				continue;
			}
			return Lexed {
				token,
				value: self.lexer.string.take(),
			};
		}
	}

	/// Consume and return the next token.
	pub fn next(&mut self) -> Lexed {
		let lexed = self.buffer.pop_front().unwrap_or_else(|| self.lex_next());
		self.last_span = lexed.token.span;
		lexed
	}

	/// Return the next token without consuming it.
	pub fn peek(&mut self) -> Lexed {
		if self.buffer.is_empty() {
			let lexed = self.lex_next();
			self.buffer.push_back(lexed);
		}
		self.buffer.front().cloned().expect("buffer was just filled")
	}

	/// Return the kind of the next token without consuming it.
	pub fn peek_kind(&mut self) -> TokenKind {
		self.peek().token.kind
	}

	/// Return the n'th upcoming token kind without consuming anything.
	pub fn peek_kind_at(&mut self, at: usize) -> TokenKind {
		while self.buffer.len() <= at {
			let lexed = self.lex_next();
			self.buffer.push_back(lexed);
		}
		self.buffer[at].token.kind
	}

	/// The span of the most recently consumed token.
	pub fn last_span(&self) -> Span {
		self.last_span
	}

	/// The span the next error should point at: the upcoming token when one
	/// was peeked, otherwise the last consumed token.
	pub fn recent_span(&mut self) -> Span {
		self.buffer.front().map(|l| l.token.span).unwrap_or(self.last_span)
	}

	/// Consume the next token when it has the given kind.
	pub fn eat(&mut self, kind: TokenKind) -> bool {
		if self.peek_kind() == kind {
			self.next();
			true
		} else {
			false
		}
	}

	/// Consume the next token when it is the given keyword.
	pub fn eat_kw(&mut self, kw: Keyword) -> bool {
		self.eat(TokenKind::Keyword(kw))
	}

	/// Whether the next token is the given keyword.
	pub fn peek_kw(&mut self, kw: Keyword) -> bool {
		self.peek_kind() == TokenKind::Keyword(kw)
	}

	/// Save the parser position for backtracking.
	pub fn checkpoint(&mut self) -> Checkpoint {
		Checkpoint {
			offset: self.lexer.offset(),
			buffer: self.buffer.clone(),
			last_span: self.last_span,
		}
	}

	/// Restore a previously saved position.
	pub fn restore(&mut self, cp: Checkpoint) {
		self.lexer.backup_to(cp.offset);
		self.buffer = cp.buffer;
		self.last_span = cp.last_span;
	}

	/// Build a syntax error at the given span.
	pub fn error(&self, kind: SyntaxErrorKind, span: Span) -> SyntaxError {
		SyntaxError::new(kind, span, self.lexer.source())
	}

	/// Build the error for an unexpected token, naming what was expected.
	pub fn unexpected(&mut self, lexed: Lexed, expected: &str) -> SyntaxError {
		let kind = match lexed.token.kind {
			TokenKind::Invalid => {
				self.lexer.error.take().unwrap_or(SyntaxErrorKind::UnexpectedToken {
					found: "an invalid token".into(),
					expected: expected.into(),
				})
			}
			TokenKind::Eof => SyntaxErrorKind::UnexpectedEof {
				expected: expected.into(),
			},
			kind => SyntaxErrorKind::UnexpectedToken {
				found: kind.to_string(),
				expected: expected.into(),
			},
		};
		self.error(kind, lexed.token.span)
	}

	/// Run a nested parse, guarding against pathological nesting depth.
	pub(crate) fn enter<T>(
		&mut self,
		f: impl FnOnce(&mut Self) -> ParseResult<T>,
	) -> ParseResult<T> {
		if self.depth >= *MAX_QUERY_DEPTH {
			let span = self.recent_span();
			return Err(self.error(SyntaxErrorKind::QueryDepthExceeded, span));
		}
		self.depth += 1;
		let res = f(self);
		self.depth -= 1;
		res
	}

	/// Parse an identifier, accepting plain and quoted forms.
	pub fn parse_ident(&mut self, what: &str) -> ParseResult<String> {
		let lexed = self.next();
		match lexed.token.kind {
			TokenKind::Identifier | TokenKind::QuotedIdentifier => {
				Ok(lexed.value.unwrap_or_default())
			}
			_ => Err(self.unexpected(lexed, what)),
		}
	}

	/// Parse a full script: statements separated by optional semicolons.
	pub fn parse_script(&mut self) -> ParseResult<Script> {
		let mut statements = Vec::new();
		loop {
			while self.eat(TokenKind::SemiColon) {}
			if self.peek_kind() == TokenKind::Eof {
				break;
			}
			statements.push(self.parse_stmt()?);
		}
		Ok(Script(statements))
	}

	/// Parse as much of the script as possible, collecting an error per
	/// failed statement and resynchronising on the next statement boundary.
	pub fn parse_script_partial(&mut self) -> (Script, Vec<SyntaxError>) {
		let mut statements = Vec::new();
		let mut errors = Vec::new();
		loop {
			while self.eat(TokenKind::SemiColon) {}
			if self.peek_kind() == TokenKind::Eof {
				break;
			}
			match self.parse_stmt() {
				Ok(stmt) => statements.push(stmt),
				Err(err) => {
					errors.push(err);
					self.recover();
				}
			}
		}
		(Script(statements), errors)
	}

	/// Skip tokens until a statement boundary: past the next semicolon, or
	/// up to a keyword that can begin a statement.
	fn recover(&mut self) {
		// Always step over the failing token so recovery makes progress.
		if self.peek_kind() != TokenKind::Eof {
			self.next();
		}
		loop {
			match self.peek_kind() {
				TokenKind::Eof => return,
				TokenKind::SemiColon => {
					self.next();
					return;
				}
				TokenKind::Keyword(kw) if kw.starts_statement() => return,
				_ => {
					self.next();
				}
			}
		}
	}
}
