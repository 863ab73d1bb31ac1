use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in the source text, in bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Span {
	pub offset: u32,
	pub len: u32,
}

impl Span {
	/// An empty span at the start of the source.
	pub fn empty() -> Self {
		Span {
			offset: 0,
			len: 0,
		}
	}

	/// The smallest span covering both this span and another.
	pub fn covers(self, other: Span) -> Span {
		let start = self.offset.min(other.offset);
		let end = (self.offset + self.len).max(other.offset + other.len);
		Span {
			offset: start,
			len: end - start,
		}
	}

	/// Slice the source text this span points into.
	pub fn slice(self, source: &str) -> &str {
		let start = self.offset as usize;
		let end = (self.offset + self.len) as usize;
		&source[start.min(source.len())..end.min(source.len())]
	}
}

/// The reserved words of the engine's T-SQL surface. Keywords are matched
/// case-insensitively by the lexer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Keyword {
	All,
	And,
	As,
	Asc,
	Begin,
	Between,
	Break,
	By,
	Case,
	Cast,
	Continue,
	Convert,
	Cross,
	Declare,
	Delete,
	Desc,
	Distinct,
	Else,
	End,
	Exists,
	Fetch,
	From,
	Full,
	Group,
	Having,
	If,
	In,
	Inner,
	Insert,
	Into,
	Is,
	Join,
	Left,
	Like,
	Next,
	Not,
	Null,
	Offset,
	On,
	Only,
	Option,
	Or,
	Order,
	Outer,
	Over,
	Partition,
	RaiseError,
	Right,
	Rows,
	Select,
	Set,
	Then,
	Top,
	Union,
	Update,
	Values,
	When,
	Where,
	While,
	With,
}

impl Keyword {
	/// Look up a keyword from an identifier, case-insensitively.
	pub fn lookup(ident: &str) -> Option<Keyword> {
		let kw = match ident.to_ascii_uppercase().as_str() {
			"ALL" => Keyword::All,
			"AND" => Keyword::And,
			"AS" => Keyword::As,
			"ASC" => Keyword::Asc,
			"BEGIN" => Keyword::Begin,
			"BETWEEN" => Keyword::Between,
			"BREAK" => Keyword::Break,
			"BY" => Keyword::By,
			"CASE" => Keyword::Case,
			"CAST" => Keyword::Cast,
			"CONTINUE" => Keyword::Continue,
			"CONVERT" => Keyword::Convert,
			"CROSS" => Keyword::Cross,
			"DECLARE" => Keyword::Declare,
			"DELETE" => Keyword::Delete,
			"DESC" => Keyword::Desc,
			"DISTINCT" => Keyword::Distinct,
			"ELSE" => Keyword::Else,
			"END" => Keyword::End,
			"EXISTS" => Keyword::Exists,
			"FETCH" => Keyword::Fetch,
			"FROM" => Keyword::From,
			"FULL" => Keyword::Full,
			"GROUP" => Keyword::Group,
			"HAVING" => Keyword::Having,
			"IF" => Keyword::If,
			"IN" => Keyword::In,
			"INNER" => Keyword::Inner,
			"INSERT" => Keyword::Insert,
			"INTO" => Keyword::Into,
			"IS" => Keyword::Is,
			"JOIN" => Keyword::Join,
			"LEFT" => Keyword::Left,
			"LIKE" => Keyword::Like,
			"NEXT" => Keyword::Next,
			"NOT" => Keyword::Not,
			"NULL" => Keyword::Null,
			"OFFSET" => Keyword::Offset,
			"ON" => Keyword::On,
			"ONLY" => Keyword::Only,
			"OPTION" => Keyword::Option,
			"OR" => Keyword::Or,
			"ORDER" => Keyword::Order,
			"OUTER" => Keyword::Outer,
			"OVER" => Keyword::Over,
			"PARTITION" => Keyword::Partition,
			"RAISERROR" => Keyword::RaiseError,
			"RIGHT" => Keyword::Right,
			"ROWS" => Keyword::Rows,
			"SELECT" => Keyword::Select,
			"SET" => Keyword::Set,
			"THEN" => Keyword::Then,
			"TOP" => Keyword::Top,
			"UNION" => Keyword::Union,
			"UPDATE" => Keyword::Update,
			"VALUES" => Keyword::Values,
			"WHEN" => Keyword::When,
			"WHERE" => Keyword::Where,
			"WHILE" => Keyword::While,
			"WITH" => Keyword::With,
			_ => return None,
		};
		Some(kw)
	}

	/// Whether a statement may begin with this keyword. Used by tolerant
	/// parsing to find a resynchronisation point.
	pub fn starts_statement(&self) -> bool {
		matches!(
			self,
			Keyword::Select
				| Keyword::Insert
				| Keyword::Update
				| Keyword::Delete
				| Keyword::If
				| Keyword::While
				| Keyword::Begin
				| Keyword::Declare
				| Keyword::Set
				| Keyword::RaiseError
				| Keyword::Break
				| Keyword::Continue
				| Keyword::With
		)
	}
}

impl fmt::Display for Keyword {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", format!("{self:?}").to_uppercase())
	}
}

/// The numeric flavor of a number token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum NumberKind {
	Int,
	Decimal,
	Float,
}

/// The kind of a lexed token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TokenKind {
	Keyword(Keyword),
	Identifier,
	/// `[name]` or `"name"`.
	QuotedIdentifier,
	/// `@name`.
	Variable,
	/// `'text'`.
	Strand,
	Number(NumberKind),
	Plus,
	Minus,
	Star,
	Slash,
	Percent,
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	LParen,
	RParen,
	Comma,
	Dot,
	SemiColon,
	WhiteSpace,
	Comment,
	Invalid,
	Eof,
}

impl TokenKind {
	/// A human readable name for error messages.
	pub fn as_str(&self) -> &'static str {
		match self {
			TokenKind::Keyword(_) => "a keyword",
			TokenKind::Identifier => "an identifier",
			TokenKind::QuotedIdentifier => "a quoted identifier",
			TokenKind::Variable => "a variable",
			TokenKind::Strand => "a string",
			TokenKind::Number(_) => "a number",
			TokenKind::Plus => "`+`",
			TokenKind::Minus => "`-`",
			TokenKind::Star => "`*`",
			TokenKind::Slash => "`/`",
			TokenKind::Percent => "`%`",
			TokenKind::Eq => "`=`",
			TokenKind::Ne => "`<>`",
			TokenKind::Lt => "`<`",
			TokenKind::Le => "`<=`",
			TokenKind::Gt => "`>`",
			TokenKind::Ge => "`>=`",
			TokenKind::LParen => "`(`",
			TokenKind::RParen => "`)`",
			TokenKind::Comma => "`,`",
			TokenKind::Dot => "`.`",
			TokenKind::SemiColon => "`;`",
			TokenKind::WhiteSpace => "whitespace",
			TokenKind::Comment => "a comment",
			TokenKind::Invalid => "an invalid token",
			TokenKind::Eof => "end of input",
		}
	}
}

impl fmt::Display for TokenKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			TokenKind::Keyword(k) => write!(f, "{k}"),
			other => f.write_str(other.as_str()),
		}
	}
}

/// A single lexed token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Token {
	pub kind: TokenKind,
	pub span: Span,
}

impl Token {
	pub fn is_eof(&self) -> bool {
		self.kind == TokenKind::Eof
	}
}

/// The coarse classification used by syntax highlighting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TokenCategory {
	Keyword,
	Identifier,
	Variable,
	String,
	Number,
	Operator,
	Punctuation,
	Comment,
	Whitespace,
	Error,
}

impl From<TokenKind> for TokenCategory {
	fn from(kind: TokenKind) -> Self {
		match kind {
			TokenKind::Keyword(_) => TokenCategory::Keyword,
			TokenKind::Identifier | TokenKind::QuotedIdentifier => TokenCategory::Identifier,
			TokenKind::Variable => TokenCategory::Variable,
			TokenKind::Strand => TokenCategory::String,
			TokenKind::Number(_) => TokenCategory::Number,
			TokenKind::Plus
			| TokenKind::Minus
			| TokenKind::Star
			| TokenKind::Slash
			| TokenKind::Percent
			| TokenKind::Eq
			| TokenKind::Ne
			| TokenKind::Lt
			| TokenKind::Le
			| TokenKind::Gt
			| TokenKind::Ge => TokenCategory::Operator,
			TokenKind::LParen
			| TokenKind::RParen
			| TokenKind::Comma
			| TokenKind::Dot
			| TokenKind::SemiColon => TokenCategory::Punctuation,
			TokenKind::Comment => TokenCategory::Comment,
			TokenKind::WhiteSpace => TokenCategory::Whitespace,
			TokenKind::Invalid | TokenKind::Eof => TokenCategory::Error,
		}
	}
}

/// A token with its highlighting category, as returned by
/// [`crate::syn::tokenize`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ColoredToken {
	pub category: TokenCategory,
	pub span: Span,
}
