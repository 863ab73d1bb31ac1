//! Expression and condition parsing.

use crate::sql::{
	BinaryOperator, CaseExpression, CastType, ColumnRef, ComparisonOperator, Condition,
	Expression, FunctionCall, Literal, OrderItem, OverClause, UnaryOperator,
};
use crate::syn::error::SyntaxErrorKind;
use crate::syn::parser::{Lexed, ParseResult, Parser};
use crate::syn::token::{Keyword, NumberKind, TokenKind};
use rust_decimal::Decimal;
use std::str::FromStr;

impl Parser<'_> {
	/// Parse an expression with precedence climbing.
	pub fn parse_expr(&mut self) -> ParseResult<Expression> {
		self.enter(|p| p.parse_expr_bp(0))
	}

	fn parse_expr_bp(&mut self, min_bp: u8) -> ParseResult<Expression> {
		let mut lhs = self.parse_unary()?;
		loop {
			let op = match self.peek_kind() {
				TokenKind::Star => BinaryOperator::Multiply,
				TokenKind::Slash => BinaryOperator::Divide,
				TokenKind::Percent => BinaryOperator::Modulo,
				TokenKind::Plus => BinaryOperator::Add,
				TokenKind::Minus => BinaryOperator::Subtract,
				_ => break,
			};
			let bp = op.binding_power();
			if bp < min_bp {
				break;
			}
			self.next();
			let rhs = self.parse_expr_bp(bp + 1)?;
			lhs = Expression::Binary {
				op,
				left: Box::new(lhs),
				right: Box::new(rhs),
			};
		}
		Ok(lhs)
	}

	fn parse_unary(&mut self) -> ParseResult<Expression> {
		if self.eat(TokenKind::Minus) {
			let expr = self.parse_unary()?;
			// Fold negation straight into numeric literals.
			return Ok(match expr {
				Expression::Literal(Literal::Int(v)) => Expression::Literal(Literal::Int(-v)),
				Expression::Literal(Literal::Decimal(v)) => {
					Expression::Literal(Literal::Decimal(-v))
				}
				Expression::Literal(Literal::Float(v)) => Expression::Literal(Literal::Float(-v)),
				expr => Expression::Unary {
					op: UnaryOperator::Negate,
					expr: Box::new(expr),
				},
			});
		}
		if self.eat(TokenKind::Plus) {
			return self.parse_unary();
		}
		self.parse_primary()
	}

	fn parse_primary(&mut self) -> ParseResult<Expression> {
		let lexed = self.peek();
		match lexed.token.kind {
			TokenKind::Number(kind) => {
				let lexed = self.next();
				self.parse_number(lexed, kind)
			}
			TokenKind::Strand => {
				let lexed = self.next();
				Ok(Expression::Literal(Literal::Strand(lexed.value.unwrap_or_default())))
			}
			TokenKind::Variable => {
				let lexed = self.next();
				Ok(Expression::Variable(lexed.value.unwrap_or_default()))
			}
			TokenKind::Keyword(Keyword::Null) => {
				self.next();
				Ok(Expression::Literal(Literal::Null))
			}
			TokenKind::Keyword(Keyword::Case) => {
				self.next();
				self.enter(|p| p.parse_case())
			}
			TokenKind::Keyword(Keyword::Cast) => {
				self.next();
				self.parse_cast()
			}
			TokenKind::Keyword(Keyword::Convert) => {
				self.next();
				self.parse_convert()
			}
			// LEFT and RIGHT are reserved for joins but also name built-in
			// string functions.
			TokenKind::Keyword(kw @ (Keyword::Left | Keyword::Right))
				if self.peek_kind_at(1) == TokenKind::LParen =>
			{
				self.next();
				let name = match kw {
					Keyword::Left => "LEFT",
					_ => "RIGHT",
				};
				self.parse_function(name.to_owned())
			}
			TokenKind::LParen => {
				self.next();
				if self.peek_kw(Keyword::Select) || self.peek_kw(Keyword::With) {
					let select = self.enter(|p| p.parse_select())?;
					expected!(self, TokenKind::RParen, "`)`");
					return Ok(Expression::Subquery(Box::new(select)));
				}
				let expr = self.enter(|p| p.parse_expr())?;
				expected!(self, TokenKind::RParen, "`)`");
				Ok(expr)
			}
			TokenKind::Identifier | TokenKind::QuotedIdentifier => {
				let lexed = self.next();
				let name = lexed.value.unwrap_or_default();
				if self.peek_kind() == TokenKind::LParen {
					return self.parse_function(name);
				}
				if self.eat(TokenKind::Dot) {
					let column = self.parse_ident("a column name")?;
					return Ok(Expression::Column(ColumnRef {
						table: Some(name),
						column,
					}));
				}
				Ok(Expression::Column(ColumnRef::bare(name)))
			}
			_ => {
				let lexed = self.next();
				Err(self.unexpected(lexed, "an expression"))
			}
		}
	}

	fn parse_number(&mut self, lexed: Lexed, kind: NumberKind) -> ParseResult<Expression> {
		let text = lexed.token.span.slice(self.source());
		let lit = match kind {
			NumberKind::Int => match text.parse::<i64>() {
				Ok(v) => Literal::Int(v),
				// Out-of-range integers degrade to floats, as T-SQL
				// promotes oversized literals to numeric.
				Err(_) => match text.parse::<f64>() {
					Ok(v) => Literal::Float(v),
					Err(_) => {
						return Err(
							self.error(SyntaxErrorKind::InvalidNumber, lexed.token.span)
						);
					}
				},
			},
			NumberKind::Decimal => match Decimal::from_str(text) {
				Ok(v) => Literal::Decimal(v),
				Err(_) => return Err(self.error(SyntaxErrorKind::InvalidNumber, lexed.token.span)),
			},
			NumberKind::Float => match text.parse::<f64>() {
				Ok(v) => Literal::Float(v),
				Err(_) => return Err(self.error(SyntaxErrorKind::InvalidNumber, lexed.token.span)),
			},
		};
		Ok(Expression::Literal(lit))
	}

	/// Parse a function call. The name has been consumed and the next token
	/// is the opening parenthesis.
	fn parse_function(&mut self, name: String) -> ParseResult<Expression> {
		expected!(self, TokenKind::LParen, "`(`");
		let mut call = FunctionCall::new(name, Vec::new());
		if self.eat(TokenKind::Star) {
			call.star = true;
			expected!(self, TokenKind::RParen, "`)`");
		} else {
			if self.eat_kw(Keyword::Distinct) {
				call.distinct = true;
			}
			if !self.eat(TokenKind::RParen) {
				loop {
					call.args.push(self.enter(|p| p.parse_expr())?);
					if !self.eat(TokenKind::Comma) {
						break;
					}
				}
				expected!(self, TokenKind::RParen, "`)`");
			}
		}
		if self.peek_kw(Keyword::Over) {
			self.next();
			call.over = Some(self.parse_over()?);
		}
		Ok(Expression::Function(call))
	}

	fn parse_over(&mut self) -> ParseResult<OverClause> {
		expected!(self, TokenKind::LParen, "`(`");
		let mut over = OverClause::default();
		if self.eat_kw(Keyword::Partition) {
			expected_kw!(self, Keyword::By);
			loop {
				over.partition_by.push(self.enter(|p| p.parse_expr())?);
				if !self.eat(TokenKind::Comma) {
					break;
				}
			}
		}
		if self.eat_kw(Keyword::Order) {
			expected_kw!(self, Keyword::By);
			over.order_by = self.parse_order_items()?;
		}
		expected!(self, TokenKind::RParen, "`)`");
		Ok(over)
	}

	/// Parse a comma-separated ORDER BY item list.
	pub(super) fn parse_order_items(&mut self) -> ParseResult<Vec<OrderItem>> {
		let mut items = Vec::new();
		loop {
			let expr = self.enter(|p| p.parse_expr())?;
			let descending = if self.eat_kw(Keyword::Desc) {
				true
			} else {
				self.eat_kw(Keyword::Asc);
				false
			};
			items.push(OrderItem {
				expr,
				descending,
			});
			if !self.eat(TokenKind::Comma) {
				break;
			}
		}
		Ok(items)
	}

	fn parse_case(&mut self) -> ParseResult<Expression> {
		if self.peek_kw(Keyword::When) {
			// Searched CASE.
			let mut branches = Vec::new();
			while self.eat_kw(Keyword::When) {
				let cond = self.parse_condition()?;
				expected_kw!(self, Keyword::Then);
				let expr = self.parse_expr()?;
				branches.push((cond, expr));
			}
			let otherwise = if self.eat_kw(Keyword::Else) {
				Some(Box::new(self.parse_expr()?))
			} else {
				None
			};
			expected_kw!(self, Keyword::End);
			return Ok(Expression::Case(Box::new(CaseExpression::Searched {
				branches,
				otherwise,
			})));
		}
		// Simple CASE.
		let operand = Box::new(self.parse_expr()?);
		let mut branches = Vec::new();
		while self.eat_kw(Keyword::When) {
			let value = self.parse_expr()?;
			expected_kw!(self, Keyword::Then);
			let expr = self.parse_expr()?;
			branches.push((value, expr));
		}
		if branches.is_empty() {
			let lexed = self.next();
			return Err(self.unexpected(lexed, "`WHEN`"));
		}
		let otherwise = if self.eat_kw(Keyword::Else) {
			Some(Box::new(self.parse_expr()?))
		} else {
			None
		};
		expected_kw!(self, Keyword::End);
		Ok(Expression::Case(Box::new(CaseExpression::Simple {
			operand,
			branches,
			otherwise,
		})))
	}

	fn parse_cast(&mut self) -> ParseResult<Expression> {
		expected!(self, TokenKind::LParen, "`(`");
		let expr = self.parse_expr()?;
		expected_kw!(self, Keyword::As);
		let to = self.parse_cast_type()?;
		expected!(self, TokenKind::RParen, "`)`");
		Ok(Expression::Cast {
			expr: Box::new(expr),
			to,
		})
	}

	fn parse_convert(&mut self) -> ParseResult<Expression> {
		expected!(self, TokenKind::LParen, "`(`");
		let to = self.parse_cast_type()?;
		expected!(self, TokenKind::Comma, "`,`");
		let expr = self.parse_expr()?;
		// An optional CONVERT style argument is accepted and ignored.
		if self.eat(TokenKind::Comma) {
			self.parse_expr()?;
		}
		expected!(self, TokenKind::RParen, "`)`");
		Ok(Expression::Cast {
			expr: Box::new(expr),
			to,
		})
	}

	pub(super) fn parse_cast_type(&mut self) -> ParseResult<CastType> {
		let lexed = self.next();
		let name = match (&lexed.token.kind, &lexed.value) {
			(TokenKind::Identifier, Some(v)) => v.clone(),
			_ => return Err(self.unexpected(lexed, "a type name")),
		};
		let Some(mut ty) = CastType::from_name(&name) else {
			return Err(self.unexpected(
				Lexed {
					token: lexed.token,
					value: Some(name),
				},
				"a type name",
			));
		};
		// Optional precision and length arguments.
		if self.eat(TokenKind::LParen) {
			match &mut ty {
				CastType::Decimal {
					precision,
					scale,
				} => {
					*precision = Some(self.parse_u32()?);
					if self.eat(TokenKind::Comma) {
						*scale = Some(self.parse_u32()?);
					}
				}
				CastType::NVarChar(len) => {
					// nvarchar(max) is accepted as unbounded.
					if self.peek_kind() == TokenKind::Identifier {
						let lexed = self.next();
						if !lexed.value.as_deref().is_some_and(|v| v.eq_ignore_ascii_case("max"))
						{
							return Err(self.unexpected(lexed, "a length or `max`"));
						}
					} else {
						*len = Some(self.parse_u32()?);
					}
				}
				_ => {
					let lexed = self.next();
					return Err(self.unexpected(lexed, "`)`"));
				}
			}
			expected!(self, TokenKind::RParen, "`)`");
		}
		Ok(ty)
	}

	pub(super) fn parse_u32(&mut self) -> ParseResult<u32> {
		let lexed = expected!(self, TokenKind::Number(NumberKind::Int), "an integer");
		lexed
			.token
			.span
			.slice(self.source())
			.parse::<u32>()
			.map_err(|_| self.error(SyntaxErrorKind::InvalidNumber, lexed.token.span))
	}

	pub(super) fn parse_u64(&mut self) -> ParseResult<u64> {
		let lexed = expected!(self, TokenKind::Number(NumberKind::Int), "an integer");
		lexed
			.token
			.span
			.slice(self.source())
			.parse::<u64>()
			.map_err(|_| self.error(SyntaxErrorKind::InvalidNumber, lexed.token.span))
	}

	/// Parse a condition: OR-joined chains of AND-joined predicates.
	pub fn parse_condition(&mut self) -> ParseResult<Condition> {
		self.enter(|p| p.parse_cond_or())
	}

	fn parse_cond_or(&mut self) -> ParseResult<Condition> {
		let mut lhs = self.parse_cond_and()?;
		while self.eat_kw(Keyword::Or) {
			let rhs = self.parse_cond_and()?;
			lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_cond_and(&mut self) -> ParseResult<Condition> {
		let mut lhs = self.parse_cond_not()?;
		while self.eat_kw(Keyword::And) {
			let rhs = self.parse_cond_not()?;
			lhs = Condition::And(Box::new(lhs), Box::new(rhs));
		}
		Ok(lhs)
	}

	fn parse_cond_not(&mut self) -> ParseResult<Condition> {
		if self.eat_kw(Keyword::Not) {
			let inner = self.parse_cond_not()?;
			return Ok(Condition::Not(Box::new(inner)));
		}
		self.parse_predicate()
	}

	fn parse_predicate(&mut self) -> ParseResult<Condition> {
		if self.eat_kw(Keyword::Exists) {
			expected!(self, TokenKind::LParen, "`(`");
			let subquery = self.enter(|p| p.parse_select())?;
			expected!(self, TokenKind::RParen, "`)`");
			return Ok(Condition::Exists {
				subquery: Box::new(subquery),
				negated: false,
			});
		}
		// A parenthesis is ambiguous: it may group a condition or start an
		// arithmetic expression. Try the condition first and fall back when
		// the tokens after the closing parenthesis continue an expression.
		if self.peek_kind() == TokenKind::LParen && !self.paren_starts_subquery() {
			let cp = self.checkpoint();
			self.next();
			let attempt = self.enter(|p| p.parse_cond_or()).and_then(|cond| {
				expected!(self, TokenKind::RParen, "`)`");
				Ok(cond)
			});
			match attempt {
				Ok(cond) if !self.continues_expression() => return Ok(cond),
				_ => self.restore(cp),
			}
		}
		let expr = self.parse_expr()?;
		self.parse_predicate_tail(expr)
	}

	fn paren_starts_subquery(&mut self) -> bool {
		matches!(
			self.peek_kind_at(1),
			TokenKind::Keyword(Keyword::Select) | TokenKind::Keyword(Keyword::With)
		)
	}

	/// Whether the next token would extend a parenthesised group into a
	/// larger expression, as in `(a + b) * 2 > 5`.
	fn continues_expression(&mut self) -> bool {
		matches!(
			self.peek_kind(),
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
				| TokenKind::Ge
				| TokenKind::Keyword(Keyword::Is)
				| TokenKind::Keyword(Keyword::Like)
				| TokenKind::Keyword(Keyword::In)
				| TokenKind::Keyword(Keyword::Between)
		)
	}

	fn parse_predicate_tail(&mut self, expr: Expression) -> ParseResult<Condition> {
		let op = match self.peek_kind() {
			TokenKind::Eq => Some(ComparisonOperator::Eq),
			TokenKind::Ne => Some(ComparisonOperator::Ne),
			TokenKind::Lt => Some(ComparisonOperator::Lt),
			TokenKind::Le => Some(ComparisonOperator::Le),
			TokenKind::Gt => Some(ComparisonOperator::Gt),
			TokenKind::Ge => Some(ComparisonOperator::Ge),
			_ => None,
		};
		if let Some(op) = op {
			self.next();
			let right = self.parse_expr()?;
			return Ok(Condition::Comparison {
				op,
				left: expr,
				right,
			});
		}
		if self.eat_kw(Keyword::Is) {
			let negated = self.eat_kw(Keyword::Not);
			expected_kw!(self, Keyword::Null);
			return Ok(Condition::Null {
				expr,
				negated,
			});
		}
		let negated = self.eat_kw(Keyword::Not);
		if self.eat_kw(Keyword::Like) {
			let pattern = self.parse_expr()?;
			return Ok(Condition::Like {
				expr,
				pattern,
				negated,
			});
		}
		if self.eat_kw(Keyword::In) {
			expected!(self, TokenKind::LParen, "`(`");
			if self.peek_kw(Keyword::Select) || self.peek_kw(Keyword::With) {
				let subquery = self.enter(|p| p.parse_select())?;
				expected!(self, TokenKind::RParen, "`)`");
				return Ok(Condition::InSubquery {
					expr,
					subquery: Box::new(subquery),
					negated,
				});
			}
			let mut list = Vec::new();
			loop {
				list.push(self.parse_expr()?);
				if !self.eat(TokenKind::Comma) {
					break;
				}
			}
			expected!(self, TokenKind::RParen, "`)`");
			return Ok(Condition::In {
				expr,
				list,
				negated,
			});
		}
		if self.eat_kw(Keyword::Between) {
			let low = self.parse_expr()?;
			expected_kw!(self, Keyword::And);
			let high = self.parse_expr()?;
			return Ok(Condition::Between {
				expr,
				low,
				high,
				negated,
			});
		}
		if negated {
			let lexed = self.next();
			return Err(self.unexpected(lexed, "`LIKE`, `IN`, or `BETWEEN`"));
		}
		Ok(Condition::Expr(expr))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn expr(text: &str) -> Expression {
		Parser::new(text).parse_expr().unwrap()
	}

	fn cond(text: &str) -> Condition {
		Parser::new(text).parse_condition().unwrap()
	}

	#[test]
	fn precedence_binds_multiplication_tighter() {
		assert_eq!(expr("1 + 2 * 3").to_string(), "1 + 2 * 3");
		assert_eq!(expr("(1 + 2) * 3").to_string(), "(1 + 2) * 3");
	}

	#[test]
	fn case_both_forms_parse() {
		let searched = expr("CASE WHEN a > 1 THEN 'big' ELSE 'small' END");
		assert!(matches!(
			searched,
			Expression::Case(ref c) if matches!(**c, CaseExpression::Searched { .. })
		));
		let simple = expr("CASE status WHEN 1 THEN 'open' WHEN 2 THEN 'closed' END");
		assert!(matches!(
			simple,
			Expression::Case(ref c) if matches!(**c, CaseExpression::Simple { .. })
		));
	}

	#[test]
	fn convert_maps_to_cast() {
		let e = expr("CONVERT(int, revenue)");
		assert!(matches!(
			e,
			Expression::Cast {
				to: CastType::Int,
				..
			}
		));
	}

	#[test]
	fn count_star_and_distinct() {
		let e = expr("COUNT(*)");
		let Expression::Function(call) = e else {
			panic!("expected function");
		};
		assert!(call.star);
		let e = expr("COUNT(DISTINCT ownerid)");
		let Expression::Function(call) = e else {
			panic!("expected function");
		};
		assert!(call.distinct);
	}

	#[test]
	fn row_number_with_over_clause() {
		let e = expr("ROW_NUMBER() OVER (PARTITION BY ownerid ORDER BY createdon DESC)");
		let Expression::Function(call) = e else {
			panic!("expected function");
		};
		let over = call.over.unwrap();
		assert_eq!(over.partition_by.len(), 1);
		assert_eq!(over.order_by.len(), 1);
		assert!(over.order_by[0].descending);
	}

	#[test]
	fn condition_precedence_not_and_or() {
		// NOT binds tighter than AND, AND tighter than OR.
		let c = cond("NOT a = 1 AND b = 2 OR c = 3");
		assert!(matches!(c, Condition::Or(..)));
	}

	#[test]
	fn parenthesised_condition_vs_expression() {
		assert!(matches!(cond("(a = 1 OR b = 2) AND c = 3"), Condition::And(..)));
		assert!(matches!(cond("(a + b) * 2 > 5"), Condition::Comparison { .. }));
	}

	#[test]
	fn not_between_parses() {
		let c = cond("qty NOT BETWEEN 1 AND 10");
		assert!(matches!(
			c,
			Condition::Between {
				negated: true,
				..
			}
		));
	}

	#[test]
	fn in_subquery_is_detected() {
		let c = cond("ownerid IN (SELECT systemuserid FROM systemuser)");
		assert!(matches!(
			c,
			Condition::InSubquery {
				negated: false,
				..
			}
		));
	}

	#[test]
	fn left_function_call_despite_keyword() {
		let e = expr("LEFT(name, 3)");
		let Expression::Function(call) = e else {
			panic!("expected function");
		};
		assert_eq!(call.name, "LEFT");
		assert_eq!(call.args.len(), 2);
	}

	#[test]
	fn negative_literals_fold() {
		assert_eq!(expr("-5"), Expression::Literal(Literal::Int(-5)));
	}
}
