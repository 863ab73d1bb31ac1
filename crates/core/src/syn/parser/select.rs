//! SELECT statement parsing: projection, FROM and JOIN clauses, grouping,
//! ordering, paging, CTEs, and OPTION hints.

use crate::sql::{
	Cte, Hint, Join, JoinKind, SelectColumn, SelectStatement, TableSource, UnionStatement,
};
use crate::syn::parser::{ParseResult, Parser};
use crate::syn::token::{Keyword, TokenKind};

impl Parser<'_> {
	/// Parse a full SELECT statement, including a leading WITH clause.
	pub fn parse_select(&mut self) -> ParseResult<SelectStatement> {
		let ctes = if self.eat_kw(Keyword::With) {
			self.parse_ctes()?
		} else {
			Vec::new()
		};
		let mut select = self.parse_select_body()?;
		select.ctes = ctes;
		Ok(select)
	}

	/// Parse a SELECT statement or a UNION chain of them. A trailing ORDER
	/// BY binds to the whole chain, per T-SQL.
	pub fn parse_select_or_union(&mut self) -> ParseResult<(SelectStatement, Option<UnionStatement>)> {
		let mut first = self.parse_select()?;
		if !self.peek_kw(Keyword::Union) {
			return Ok((first, None));
		}
		let mut selects = Vec::new();
		let mut all = Vec::new();
		let mut order = std::mem::take(&mut first.order);
		selects.push(first);
		while self.eat_kw(Keyword::Union) {
			all.push(self.eat_kw(Keyword::All));
			let mut next = self.parse_select_body()?;
			// ORDER BY is only legal on the final member, where it orders
			// the combined result.
			order = std::mem::take(&mut next.order);
			selects.push(next);
		}
		let union = UnionStatement {
			selects,
			all,
			order,
		};
		Ok((SelectStatement::default(), Some(union)))
	}

	fn parse_ctes(&mut self) -> ParseResult<Vec<Cte>> {
		let mut ctes = Vec::new();
		loop {
			let name = self.parse_ident("a CTE name")?;
			let mut columns = Vec::new();
			if self.eat(TokenKind::LParen) {
				loop {
					columns.push(self.parse_ident("a column name")?);
					if !self.eat(TokenKind::Comma) {
						break;
					}
				}
				expected!(self, TokenKind::RParen, "`)`");
			}
			expected_kw!(self, Keyword::As);
			expected!(self, TokenKind::LParen, "`(`");
			let mut body = vec![self.enter(|p| p.parse_select_body())?];
			let mut union_all = true;
			while self.eat_kw(Keyword::Union) {
				union_all &= self.eat_kw(Keyword::All);
				body.push(self.enter(|p| p.parse_select_body())?);
			}
			expected!(self, TokenKind::RParen, "`)`");
			ctes.push(Cte {
				name,
				columns,
				body,
				union_all,
			});
			if !self.eat(TokenKind::Comma) {
				break;
			}
		}
		Ok(ctes)
	}

	fn parse_select_body(&mut self) -> ParseResult<SelectStatement> {
		expected_kw!(self, Keyword::Select);
		let mut select = SelectStatement::default();
		select.distinct = self.eat_kw(Keyword::Distinct);
		if self.eat_kw(Keyword::All) && select.distinct {
			let lexed = self.next();
			return Err(self.unexpected(lexed, "a projection list"));
		}
		if self.eat_kw(Keyword::Top) {
			// TOP n and TOP (n) are both accepted.
			let parens = self.eat(TokenKind::LParen);
			select.top = Some(self.parse_u64()?);
			if parens {
				expected!(self, TokenKind::RParen, "`)`");
			}
		}
		select.columns = self.parse_projection()?;
		if self.eat_kw(Keyword::From) {
			select.from = Some(self.parse_table_source()?);
			loop {
				let Some(kind) = self.peek_join_kind() else {
					break;
				};
				select.joins.push(self.parse_join(kind)?);
			}
		}
		if self.eat_kw(Keyword::Where) {
			select.cond = Some(self.parse_condition()?);
		}
		if self.eat_kw(Keyword::Group) {
			expected_kw!(self, Keyword::By);
			loop {
				select.group.push(self.parse_expr()?);
				if !self.eat(TokenKind::Comma) {
					break;
				}
			}
		}
		if self.eat_kw(Keyword::Having) {
			select.having = Some(self.parse_condition()?);
		}
		if self.eat_kw(Keyword::Order) {
			expected_kw!(self, Keyword::By);
			select.order = self.parse_order_items()?;
		}
		if self.eat_kw(Keyword::Offset) {
			select.offset = Some(self.parse_u64()?);
			expected_kw!(self, Keyword::Rows);
			if self.eat_kw(Keyword::Fetch) {
				expected_kw!(self, Keyword::Next);
				select.fetch = Some(self.parse_u64()?);
				expected_kw!(self, Keyword::Rows);
				expected_kw!(self, Keyword::Only);
			}
		}
		if self.peek_kw(Keyword::Option) {
			select.hints = self.parse_option_hints()?;
		}
		Ok(select)
	}

	fn parse_projection(&mut self) -> ParseResult<Vec<SelectColumn>> {
		let mut columns = Vec::new();
		loop {
			if self.eat(TokenKind::Star) {
				columns.push(SelectColumn::Wildcard(None));
			} else if matches!(
				self.peek_kind(),
				TokenKind::Identifier | TokenKind::QuotedIdentifier
			) && self.peek_kind_at(1) == TokenKind::Dot
				&& self.peek_kind_at(2) == TokenKind::Star
			{
				let table = self.parse_ident("a table alias")?;
				self.next();
				self.next();
				columns.push(SelectColumn::Wildcard(Some(table)));
			} else {
				let expr = self.parse_expr()?;
				let alias = self.parse_alias()?;
				columns.push(SelectColumn::Expr {
					expr,
					alias,
				});
			}
			if !self.eat(TokenKind::Comma) {
				break;
			}
		}
		Ok(columns)
	}

	/// Parse an optional `AS alias`, bare alias, or string alias.
	fn parse_alias(&mut self) -> ParseResult<Option<String>> {
		if self.eat_kw(Keyword::As) {
			return Ok(Some(self.parse_ident("an alias")?));
		}
		match self.peek_kind() {
			TokenKind::Identifier | TokenKind::QuotedIdentifier => {
				Ok(Some(self.parse_ident("an alias")?))
			}
			_ => Ok(None),
		}
	}

	/// Parse a multi-part table name with an optional alias. The first
	/// part of a three-part name, or a bracketed first part of a two-part
	/// name, denotes a remote environment profile label.
	pub(super) fn parse_table_source(&mut self) -> ParseResult<TableSource> {
		let first_quoted = self.peek_kind() == TokenKind::QuotedIdentifier;
		let first = self.parse_ident("a table name")?;
		let mut parts = vec![first];
		while self.eat(TokenKind::Dot) {
			parts.push(self.parse_ident("a table name part")?);
		}
		let mut source = match parts.len() {
			1 => TableSource::named(parts.pop().expect("one part")),
			2 => {
				let entity = parts.pop().expect("two parts");
				let head = parts.pop().expect("two parts");
				let mut s = TableSource::named(entity);
				if first_quoted {
					s.environment = Some(head);
				} else {
					s.schema = Some(head);
				}
				s
			}
			3 => {
				let entity = parts.pop().expect("three parts");
				let schema = parts.pop().expect("three parts");
				let env = parts.pop().expect("three parts");
				let mut s = TableSource::named(entity);
				s.environment = Some(env);
				s.schema = Some(schema);
				s
			}
			_ => {
				let span = self.last_span();
				return Err(self.error(
					crate::syn::error::SyntaxErrorKind::UnexpectedToken {
						found: "a fourth name part".into(),
						expected: "at most three name parts".into(),
					},
					span,
				));
			}
		};
		source.alias = self.parse_alias()?;
		Ok(source)
	}

	fn peek_join_kind(&mut self) -> Option<JoinKind> {
		match self.peek_kind() {
			TokenKind::Keyword(Keyword::Join) | TokenKind::Keyword(Keyword::Inner) => {
				Some(JoinKind::Inner)
			}
			TokenKind::Keyword(Keyword::Left) => Some(JoinKind::Left),
			TokenKind::Keyword(Keyword::Right) => Some(JoinKind::Right),
			TokenKind::Keyword(Keyword::Full) => Some(JoinKind::Full),
			TokenKind::Keyword(Keyword::Cross) => Some(JoinKind::Cross),
			_ => None,
		}
	}

	fn parse_join(&mut self, kind: JoinKind) -> ParseResult<Join> {
		// Consume the introducing keyword, then any OUTER, then JOIN.
		let first = self.next();
		if !matches!(first.token.kind, TokenKind::Keyword(Keyword::Join)) {
			self.eat_kw(Keyword::Outer);
			expected_kw!(self, Keyword::Join);
		}
		let table = self.parse_table_source()?;
		let on = if kind == JoinKind::Cross {
			None
		} else {
			expected_kw!(self, Keyword::On);
			Some(self.parse_condition()?)
		};
		Ok(Join {
			kind,
			table,
			on,
		})
	}

	/// Parse an `OPTION (hint, ...)` clause.
	pub(super) fn parse_option_hints(&mut self) -> ParseResult<Vec<Hint>> {
		expected_kw!(self, Keyword::Option);
		expected!(self, TokenKind::LParen, "`(`");
		let mut hints = Vec::new();
		loop {
			hints.push(self.parse_hint()?);
			if !self.eat(TokenKind::Comma) {
				break;
			}
		}
		expected!(self, TokenKind::RParen, "`)`");
		Ok(hints)
	}

	fn parse_hint(&mut self) -> ParseResult<Hint> {
		// HASH GROUP and MERGE JOIN are two-word hints built from keywords
		// and identifiers.
		let lexed = self.next();
		let word = match (&lexed.token.kind, &lexed.value) {
			(TokenKind::Identifier, Some(v)) => v.to_uppercase(),
			(TokenKind::Keyword(k), _) => k.to_string(),
			_ => return Err(self.unexpected(lexed, "a query hint")),
		};
		let hint = match word.as_str() {
			"BATCH_SIZE" => Hint::BatchSize(self.parse_u32()?),
			"MAXDOP" => Hint::MaxDop(self.parse_u32()?),
			"MAXRECURSION" => Hint::MaxRecursion(self.parse_u32()?),
			"BYPASS_PLUGINS" => Hint::BypassPlugins,
			"BYPASS_FLOWS" => Hint::BypassFlows,
			"USE_TDS" => Hint::UseTds,
			"NOLOCK" => Hint::NoLock,
			"MAX_ROWS" => Hint::MaxRows(self.parse_u64()?),
			"HASH" => {
				expected_kw!(self, Keyword::Group);
				Hint::HashGroup
			}
			"MERGE" => {
				expected_kw!(self, Keyword::Join);
				Hint::MergeJoin
			}
			_ => return Err(self.unexpected(lexed, "a query hint")),
		};
		Ok(hint)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn select(text: &str) -> SelectStatement {
		Parser::new(text).parse_select().unwrap()
	}

	#[test]
	fn basic_select_roundtrips() {
		let s = select("SELECT name, revenue FROM account WHERE revenue > 1000 ORDER BY name");
		assert_eq!(
			s.to_string(),
			"SELECT name, revenue FROM account WHERE revenue > 1000 ORDER BY name"
		);
	}

	#[test]
	fn top_and_distinct() {
		let s = select("SELECT DISTINCT TOP 10 name FROM account");
		assert!(s.distinct);
		assert_eq!(s.top, Some(10));
	}

	#[test]
	fn joins_collect_in_order() {
		let s = select(
			"SELECT a.name FROM account a \
			 INNER JOIN contact c ON c.parentcustomerid = a.accountid \
			 LEFT JOIN systemuser u ON u.systemuserid = a.ownerid",
		);
		assert_eq!(s.joins.len(), 2);
		assert_eq!(s.joins[0].kind, JoinKind::Inner);
		assert_eq!(s.joins[1].kind, JoinKind::Left);
	}

	#[test]
	fn multipart_names_resolve_environment() {
		let s = select("SELECT name FROM [prod].dbo.account");
		let from = s.from.unwrap();
		assert_eq!(from.environment.as_deref(), Some("prod"));
		assert_eq!(from.schema.as_deref(), Some("dbo"));
		assert_eq!(from.entity, "account");

		let s = select("SELECT name FROM [uat].account");
		let from = s.from.unwrap();
		assert_eq!(from.environment.as_deref(), Some("uat"));
		assert_eq!(from.entity, "account");

		let s = select("SELECT name FROM dbo.account");
		let from = s.from.unwrap();
		assert!(from.environment.is_none());
		assert_eq!(from.schema.as_deref(), Some("dbo"));
	}

	#[test]
	fn group_by_and_having() {
		let s = select(
			"SELECT ownerid, COUNT(*) AS cnt FROM account GROUP BY ownerid HAVING COUNT(*) > 1",
		);
		assert_eq!(s.group.len(), 1);
		assert!(s.having.is_some());
		assert!(s.is_aggregate());
	}

	#[test]
	fn offset_fetch() {
		let s = select("SELECT name FROM account ORDER BY name OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY");
		assert_eq!(s.offset, Some(10));
		assert_eq!(s.fetch, Some(5));
	}

	#[test]
	fn option_hints_parse() {
		let s = select("SELECT name FROM account OPTION (MAXDOP 2, NOLOCK, HASH GROUP)");
		assert_eq!(
			s.hints,
			vec![Hint::MaxDop(2), Hint::NoLock, Hint::HashGroup]
		);
	}

	#[test]
	fn recursive_cte_detected() {
		let s = select(
			"WITH nums (n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM nums WHERE n < 10) \
			 SELECT n FROM nums",
		);
		assert_eq!(s.ctes.len(), 1);
		assert!(s.ctes[0].is_recursive());
		assert!(s.ctes[0].union_all);
	}

	#[test]
	fn union_collects_members() {
		let (_, union) = Parser::new("SELECT name FROM account UNION SELECT fullname FROM contact ORDER BY name")
			.parse_select_or_union()
			.unwrap();
		let union = union.unwrap();
		assert_eq!(union.selects.len(), 2);
		assert_eq!(union.all, vec![false]);
		assert_eq!(union.order.len(), 1);
	}
}
