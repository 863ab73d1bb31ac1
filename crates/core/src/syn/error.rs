use crate::syn::token::Span;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The classification of a syntax error.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Error)]
#[non_exhaustive]
pub enum SyntaxErrorKind {
	#[error("unexpected {found}, expected {expected}")]
	UnexpectedToken {
		found: String,
		expected: String,
	},
	#[error("unexpected end of input, expected {expected}")]
	UnexpectedEof {
		expected: String,
	},
	#[error("unterminated string literal")]
	UnterminatedString,
	#[error("unterminated bracketed identifier")]
	UnterminatedIdentifier,
	#[error("unterminated block comment")]
	UnterminatedComment,
	#[error("invalid number literal")]
	InvalidNumber,
	#[error("unexpected character {0:?}")]
	UnexpectedCharacter(char),
	#[error("`{keyword}` is not valid here")]
	MisplacedKeyword {
		keyword: String,
	},
	#[error("query is nested too deeply")]
	QueryDepthExceeded,
}

/// A parse failure with its position in the source text.
///
/// The line and column are one-based and computed when the error is raised,
/// so the error stays meaningful after the source text is gone.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Error)]
#[error("{kind} at line {line}, column {column}")]
#[non_exhaustive]
pub struct SyntaxError {
	pub kind: SyntaxErrorKind,
	pub span: Span,
	pub line: usize,
	pub column: usize,
}

impl SyntaxError {
	/// Raise a syntax error pointing at a span of the given source.
	pub fn new(kind: SyntaxErrorKind, span: Span, source: &str) -> Self {
		let (line, column) = line_column(source, span.offset as usize);
		SyntaxError {
			kind,
			span,
			line,
			column,
		}
	}

	/// The byte offset of the error in the source.
	pub fn offset(&self) -> usize {
		self.span.offset as usize
	}

	/// Render the error with a context snippet and a caret underline.
	pub fn render_on(&self, source: &str) -> RenderedError {
		let line_text = source.lines().nth(self.line.saturating_sub(1)).unwrap_or("");
		let (snippet, caret_offset) = truncate_line(line_text, self.column.saturating_sub(1));
		RenderedError {
			message: self.kind.to_string(),
			line: self.line,
			column: self.column,
			offset: self.offset(),
			snippet,
			caret_offset,
			caret_len: (self.span.len as usize).max(1),
		}
	}
}

/// A rendered syntax error, ready for display in a terminal.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
pub struct RenderedError {
	pub message: String,
	pub line: usize,
	pub column: usize,
	pub offset: usize,
	pub snippet: String,
	pub caret_offset: usize,
	pub caret_len: usize,
}

impl fmt::Display for RenderedError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		writeln!(f, "{} at line {}, column {}", self.message, self.line, self.column)?;
		writeln!(f, "  | {}", self.snippet)?;
		write!(f, "  | ")?;
		for _ in 0..self.caret_offset {
			f.write_str(" ")?;
		}
		for _ in 0..self.caret_len.min(self.snippet.len().saturating_sub(self.caret_offset)).max(1)
		{
			f.write_str("^")?;
		}
		Ok(())
	}
}

/// How long a source line may be before the snippet is truncated around the
/// error position.
const MAX_SNIPPET_LEN: usize = 80;

fn truncate_line(line: &str, column: usize) -> (String, usize) {
	let chars: Vec<char> = line.chars().collect();
	if chars.len() <= MAX_SNIPPET_LEN {
		return (line.to_owned(), column.min(chars.len()));
	}
	// Keep a window centred on the error position.
	let start = column.saturating_sub(MAX_SNIPPET_LEN / 2).min(chars.len());
	let end = (start + MAX_SNIPPET_LEN).min(chars.len());
	let mut snippet: String = chars[start..end].iter().collect();
	let mut caret = column - start;
	if start > 0 {
		snippet = format!("...{snippet}");
		caret += 3;
	}
	if end < chars.len() {
		snippet.push_str("...");
	}
	(snippet, caret)
}

/// The one-based line and column of a byte offset in the source.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
	let offset = offset.min(source.len());
	let before = &source[..offset];
	let line = before.matches('\n').count() + 1;
	let column = before.rfind('\n').map(|i| before[i + 1..].chars().count()).unwrap_or_else(|| {
		before.chars().count()
	}) + 1;
	(line, column)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn line_column_counts_from_one() {
		let source = "SELECT *\nFROM account";
		assert_eq!(line_column(source, 0), (1, 1));
		assert_eq!(line_column(source, 9), (2, 1));
		assert_eq!(line_column(source, 14), (2, 6));
	}

	#[test]
	fn rendered_error_points_at_the_problem() {
		let source = "SELECT FORM account";
		let err = SyntaxError::new(
			SyntaxErrorKind::UnexpectedToken {
				found: "an identifier".into(),
				expected: "FROM".into(),
			},
			Span {
				offset: 7,
				len: 4,
			},
			source,
		);
		assert_eq!(err.line, 1);
		assert_eq!(err.column, 8);
		let rendered = err.render_on(source).to_string();
		assert!(rendered.contains("SELECT FORM account"));
		assert!(rendered.contains("^^^^"));
	}

	#[test]
	fn long_lines_are_truncated_around_the_error() {
		let mut source = "SELECT ".to_owned();
		source.push_str(&"a, ".repeat(60));
		source.push_str("FORM x");
		let off = source.find("FORM").unwrap();
		let err = SyntaxError::new(
			SyntaxErrorKind::MisplacedKeyword {
				keyword: "FORM".into(),
			},
			Span {
				offset: off as u32,
				len: 4,
			},
			&source,
		);
		let rendered = err.render_on(&source);
		assert!(rendered.snippet.len() < source.len());
		assert!(rendered.snippet.contains("FORM"));
	}
}
