/// Requires the next token to match the given kind pattern, returning the
/// consumed token, or raises a parse error naming what was expected.
macro_rules! expected {
	($parser:expr, $kind:pat, $expected:expr) => {{
		let lexed = $parser.next();
		match lexed.token.kind {
			$kind => lexed,
			_ => return Err($parser.unexpected(lexed, $expected)),
		}
	}};
}

/// Requires the next token to be the given keyword.
macro_rules! expected_kw {
	($parser:expr, $kw:expr) => {{
		let lexed = $parser.next();
		match lexed.token.kind {
			$crate::syn::token::TokenKind::Keyword(k) if k == $kw => lexed,
			_ => return Err($parser.unexpected(lexed, concat!("`", stringify!($kw), "`"))),
		}
	}};
}
