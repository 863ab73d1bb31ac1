//! Tokens, lexer, and parser for the engine's T-SQL surface.

pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

use crate::sql::Script;
use error::SyntaxError;
use lexer::Lexer;
use parser::Parser;
use token::{ColoredToken, TokenKind};

/// Parse SQL text into a script of statements.
pub fn parse(sql: &str) -> Result<Script, SyntaxError> {
	Parser::new(sql).parse_script()
}

/// Parse SQL text tolerantly, retaining as much of the script as possible.
///
/// On a statement-level failure the parser records the error, skips to the
/// next statement boundary, and keeps going. Used by the language service
/// for autocomplete and partial validation.
pub fn parse_partial(sql: &str) -> (Script, Vec<SyntaxError>) {
	Parser::new(sql).parse_script_partial()
}

/// Tokenize SQL text for syntax highlighting.
///
/// Tokenization is total: every byte of the input is covered by exactly one
/// token span, including whitespace and comments, and invalid input yields
/// error-category tokens rather than a failure.
pub fn tokenize(sql: &str) -> Vec<ColoredToken> {
	let mut lexer = Lexer::new(sql);
	let mut tokens = Vec::new();
	loop {
		let token = lexer.next_token();
		if token.kind == TokenKind::Eof {
			break;
		}
		tokens.push(ColoredToken {
			category: token.kind.into(),
			span: token.span,
		});
	}
	tokens
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_reports_position() {
		let err = parse("SELECT name\nFORM account").unwrap_err();
		assert_eq!(err.line, 2);
	}

	#[test]
	fn tokenize_is_total() {
		let sql = "SELECT name, 'it''s' FROM [a b] -- trailing\n  WHERE x = 1.5";
		let total: usize = tokenize(sql).iter().map(|t| t.span.len as usize).sum();
		assert_eq!(total, sql.len());
	}

	#[test]
	fn tokenize_never_fails() {
		let sql = "SELECT 'unterminated";
		let tokens = tokenize(sql);
		let total: usize = tokens.iter().map(|t| t.span.len as usize).sum();
		assert_eq!(total, sql.len());
	}

	#[test]
	fn parse_then_print_is_idempotent() {
		let sql = "SELECT ownerid, COUNT(*) AS cnt FROM account GROUP BY ownerid HAVING COUNT(*) > 1 ORDER BY cnt DESC";
		let once = parse(sql).unwrap().to_string();
		let twice = parse(&once).unwrap().to_string();
		assert_eq!(once, twice);
	}
}
