//! Statement-level parsing: DML, control flow, and variable statements.

use crate::sql::statements::script::{
	Block, DeclareStatement, DeclaredVar, IfStatement, RaiseErrorStatement, SetStatement,
	WhileStatement,
};
use crate::sql::{
	DeleteStatement, InsertSource, InsertStatement, Statement, UpdateStatement,
};
use crate::syn::parser::{ParseResult, Parser};
use crate::syn::token::{Keyword, TokenKind};

impl Parser<'_> {
	/// Parse a single statement.
	pub fn parse_stmt(&mut self) -> ParseResult<Statement> {
		match self.peek_kind() {
			TokenKind::Keyword(Keyword::Select) | TokenKind::Keyword(Keyword::With) => {
				let (select, union) = self.parse_select_or_union()?;
				Ok(match union {
					Some(u) => Statement::Union(u),
					None => Statement::Select(select),
				})
			}
			TokenKind::Keyword(Keyword::Insert) => self.parse_insert(),
			TokenKind::Keyword(Keyword::Update) => self.parse_update(),
			TokenKind::Keyword(Keyword::Delete) => self.parse_delete(),
			TokenKind::Keyword(Keyword::If) => self.parse_if(),
			TokenKind::Keyword(Keyword::While) => self.parse_while(),
			TokenKind::Keyword(Keyword::Begin) => self.parse_block(),
			TokenKind::Keyword(Keyword::Declare) => self.parse_declare(),
			TokenKind::Keyword(Keyword::Set) => self.parse_set(),
			TokenKind::Keyword(Keyword::RaiseError) => self.parse_raiserror(),
			TokenKind::Keyword(Keyword::Break) => {
				self.next();
				Ok(Statement::Break)
			}
			TokenKind::Keyword(Keyword::Continue) => {
				self.next();
				Ok(Statement::Continue)
			}
			_ => {
				let lexed = self.next();
				Err(self.unexpected(lexed, "a statement"))
			}
		}
	}

	fn parse_insert(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::Insert);
		self.eat_kw(Keyword::Into);
		let target = self.parse_table_source()?;
		expected!(self, TokenKind::LParen, "`(`");
		let mut columns = Vec::new();
		loop {
			columns.push(self.parse_ident("a column name")?);
			if !self.eat(TokenKind::Comma) {
				break;
			}
		}
		expected!(self, TokenKind::RParen, "`)`");
		let source = if self.eat_kw(Keyword::Values) {
			let mut rows = Vec::new();
			loop {
				expected!(self, TokenKind::LParen, "`(`");
				let mut row = Vec::new();
				loop {
					row.push(self.parse_expr()?);
					if !self.eat(TokenKind::Comma) {
						break;
					}
				}
				expected!(self, TokenKind::RParen, "`)`");
				rows.push(row);
				if !self.eat(TokenKind::Comma) {
					break;
				}
			}
			InsertSource::Values(rows)
		} else {
			InsertSource::Select(Box::new(self.parse_select()?))
		};
		let hints = if self.peek_kw(Keyword::Option) {
			self.parse_option_hints()?
		} else {
			Vec::new()
		};
		Ok(Statement::Insert(InsertStatement {
			target,
			columns,
			source,
			hints,
		}))
	}

	fn parse_update(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::Update);
		let top = self.parse_dml_top()?;
		let target = self.parse_table_source()?;
		expected_kw!(self, Keyword::Set);
		let mut set = Vec::new();
		loop {
			let column = self.parse_ident("a column name")?;
			expected!(self, TokenKind::Eq, "`=`");
			let expr = self.parse_expr()?;
			set.push((column, expr));
			if !self.eat(TokenKind::Comma) {
				break;
			}
		}
		let cond = if self.eat_kw(Keyword::Where) {
			Some(self.parse_condition()?)
		} else {
			None
		};
		let hints = if self.peek_kw(Keyword::Option) {
			self.parse_option_hints()?
		} else {
			Vec::new()
		};
		Ok(Statement::Update(UpdateStatement {
			target,
			set,
			cond,
			top,
			hints,
		}))
	}

	fn parse_delete(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::Delete);
		let top = self.parse_dml_top()?;
		self.eat_kw(Keyword::From);
		let target = self.parse_table_source()?;
		let cond = if self.eat_kw(Keyword::Where) {
			Some(self.parse_condition()?)
		} else {
			None
		};
		let hints = if self.peek_kw(Keyword::Option) {
			self.parse_option_hints()?
		} else {
			Vec::new()
		};
		Ok(Statement::Delete(DeleteStatement {
			target,
			cond,
			top,
			hints,
		}))
	}

	/// Parse the `TOP (n)` clause of UPDATE and DELETE.
	fn parse_dml_top(&mut self) -> ParseResult<Option<u64>> {
		if !self.eat_kw(Keyword::Top) {
			return Ok(None);
		}
		let parens = self.eat(TokenKind::LParen);
		let n = self.parse_u64()?;
		if parens {
			expected!(self, TokenKind::RParen, "`)`");
		}
		Ok(Some(n))
	}

	fn parse_if(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::If);
		let cond = self.parse_condition()?;
		let then = Box::new(self.enter(|p| p.parse_stmt())?);
		self.eat(TokenKind::SemiColon);
		let otherwise = if self.eat_kw(Keyword::Else) {
			Some(Box::new(self.enter(|p| p.parse_stmt())?))
		} else {
			None
		};
		Ok(Statement::If(IfStatement {
			cond,
			then,
			otherwise,
		}))
	}

	fn parse_while(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::While);
		let cond = self.parse_condition()?;
		let body = Box::new(self.enter(|p| p.parse_stmt())?);
		Ok(Statement::While(WhileStatement {
			cond,
			body,
		}))
	}

	fn parse_block(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::Begin);
		let mut statements = Vec::new();
		loop {
			while self.eat(TokenKind::SemiColon) {}
			if self.eat_kw(Keyword::End) {
				break;
			}
			if self.peek_kind() == TokenKind::Eof {
				let lexed = self.next();
				return Err(self.unexpected(lexed, "`END`"));
			}
			statements.push(self.enter(|p| p.parse_stmt())?);
		}
		Ok(Statement::Block(Block(statements)))
	}

	fn parse_declare(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::Declare);
		let mut vars = Vec::new();
		loop {
			let lexed = expected!(self, TokenKind::Variable, "a variable");
			let name = lexed.value.unwrap_or_default();
			self.eat_kw(Keyword::As);
			let ty = self.parse_cast_type()?;
			let init = if self.eat(TokenKind::Eq) {
				Some(self.parse_expr()?)
			} else {
				None
			};
			vars.push(DeclaredVar {
				name,
				ty,
				init,
			});
			if !self.eat(TokenKind::Comma) {
				break;
			}
		}
		Ok(Statement::Declare(DeclareStatement {
			vars,
		}))
	}

	fn parse_set(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::Set);
		let lexed = expected!(self, TokenKind::Variable, "a variable");
		let name = lexed.value.unwrap_or_default();
		expected!(self, TokenKind::Eq, "`=`");
		let expr = self.parse_expr()?;
		Ok(Statement::Set(SetStatement {
			name,
			expr,
		}))
	}

	fn parse_raiserror(&mut self) -> ParseResult<Statement> {
		expected_kw!(self, Keyword::RaiseError);
		expected!(self, TokenKind::LParen, "`(`");
		let message = self.parse_expr()?;
		expected!(self, TokenKind::Comma, "`,`");
		let severity = self.parse_i32()?;
		expected!(self, TokenKind::Comma, "`,`");
		let state = self.parse_i32()?;
		expected!(self, TokenKind::RParen, "`)`");
		Ok(Statement::RaiseError(RaiseErrorStatement {
			message,
			severity,
			state,
		}))
	}

	fn parse_i32(&mut self) -> ParseResult<i32> {
		let negative = self.eat(TokenKind::Minus);
		let n = self.parse_u32()? as i32;
		Ok(if negative { -n } else { n })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sql::Script;

	fn script(text: &str) -> Script {
		Parser::new(text).parse_script().unwrap()
	}

	#[test]
	fn insert_values_parses() {
		let s = script("INSERT INTO account (name, revenue) VALUES ('Contoso', 100), ('Fabrikam', 200)");
		let Statement::Insert(ins) = &s.0[0] else {
			panic!("expected insert");
		};
		assert_eq!(ins.columns, vec!["name", "revenue"]);
		let InsertSource::Values(rows) = &ins.source else {
			panic!("expected values");
		};
		assert_eq!(rows.len(), 2);
	}

	#[test]
	fn insert_select_parses() {
		let s = script("INSERT INTO target (col_a) SELECT col_b FROM source");
		let Statement::Insert(ins) = &s.0[0] else {
			panic!("expected insert");
		};
		assert!(matches!(ins.source, InsertSource::Select(_)));
	}

	#[test]
	fn update_without_where_parses() {
		let s = script("UPDATE account SET name = 'x'");
		let Statement::Update(upd) = &s.0[0] else {
			panic!("expected update");
		};
		assert!(upd.cond.is_none());
	}

	#[test]
	fn if_block_with_dml() {
		let s = script("IF 1 = 1 BEGIN DELETE FROM account WHERE revenue = 0; END");
		let Statement::If(ifs) = &s.0[0] else {
			panic!("expected if");
		};
		assert!(ifs.then.writes());
	}

	#[test]
	fn while_with_break() {
		let s = script(
			"DECLARE @i int = 0; WHILE @i < 10 BEGIN SET @i = @i + 1; IF @i = 5 BREAK; END",
		);
		assert_eq!(s.len(), 2);
		assert!(matches!(s.0[0], Statement::Declare(_)));
		assert!(matches!(s.0[1], Statement::While(_)));
	}

	#[test]
	fn raiserror_parses() {
		let s = script("RAISERROR('boom', 16, 1)");
		let Statement::RaiseError(r) = &s.0[0] else {
			panic!("expected raiserror");
		};
		assert!(r.is_error());
	}

	#[test]
	fn partial_parse_recovers_per_statement() {
		let (parsed, errors) =
			Parser::new("SELECT name FROM account; SELECT FROM; SELECT 1").parse_script_partial();
		assert_eq!(parsed.len(), 2);
		assert_eq!(errors.len(), 1);
	}

	#[test]
	fn statements_roundtrip_through_display() {
		for text in [
			"SELECT TOP 10 name FROM account WHERE revenue > 1000 ORDER BY name DESC",
			"INSERT INTO account (name) VALUES ('x')",
			"UPDATE account SET revenue = revenue * 2 WHERE accountid = 'a'",
			"DELETE FROM account WHERE revenue = 0",
		] {
			let script = Parser::new(text).parse_script().unwrap();
			let printed = script.to_string();
			let reparsed = Parser::new(&printed).parse_script().unwrap();
			assert_eq!(script, reparsed, "round-trip failed for {text}");
		}
	}
}
