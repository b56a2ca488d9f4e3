//! Recursive descent parser for the Cypher subset the graph backends accept.
//!
//! Clauses are parsed by dedicated methods on [`Parser`]; expressions use
//! precedence climbing over a single binding-power table.

use std::collections::BTreeMap;

use super::ast::*;
use super::lexer::{tokenize, Token, TokenKind};
use crate::{Error, Result};

/// Binding power of the comparison level. `IS [NOT] NULL` and `IN` live here.
const COMPARISON_BP: u8 = 5;
/// Operand level of a prefix `NOT`: binds tighter than AND, looser than `=`.
const NOT_BP: u8 = 4;

/// Left binding power and operator for an infix token.
fn infix(kind: TokenKind) -> Option<(u8, BinaryOp)> {
    let entry = match kind {
        TokenKind::Or => (1, BinaryOp::Or),
        TokenKind::Xor => (2, BinaryOp::Xor),
        TokenKind::And => (3, BinaryOp::And),
        TokenKind::Eq => (COMPARISON_BP, BinaryOp::Eq),
        TokenKind::Neq => (COMPARISON_BP, BinaryOp::Neq),
        TokenKind::Lt => (COMPARISON_BP, BinaryOp::Lt),
        TokenKind::Lte => (COMPARISON_BP, BinaryOp::Lte),
        TokenKind::Gt => (COMPARISON_BP, BinaryOp::Gt),
        TokenKind::Gte => (COMPARISON_BP, BinaryOp::Gte),
        TokenKind::Plus => (6, BinaryOp::Add),
        TokenKind::Dash => (6, BinaryOp::Sub),
        TokenKind::Star => (7, BinaryOp::Mul),
        TokenKind::Slash => (7, BinaryOp::Div),
        TokenKind::Percent => (7, BinaryOp::Mod),
        _ => return None,
    };
    Some(entry)
}

/// Cursor over a token slice. The slice always ends with `Eof`.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

/// Parse a complete Cypher statement from tokens.
pub fn parse_statement(tokens: &[Token]) -> Result<Statement> {
    let mut p = Parser::new(tokens);
    let stmt = p.statement()?;
    p.eat(TokenKind::Semicolon);
    p.finish("statement")?;
    Ok(stmt)
}

/// Parse a standalone expression, e.g. `date('2020-01-02')`.
///
/// The whole input must be consumed.
pub fn parse_expression(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut p = Parser::new(&tokens);
    let expr = p.expr()?;
    p.finish("expression")?;
    Ok(expr)
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    // ========================================================================
    // Cursor
    // ========================================================================

    fn token(&self, offset: usize) -> &'t Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + offset).min(last)]
    }

    fn kind(&self) -> TokenKind {
        self.token(0).kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn at_end(&self) -> bool {
        matches!(self.kind(), TokenKind::Eof | TokenKind::Semicolon)
    }

    fn bump(&mut self) -> &'t Token {
        let tok = self.token(0);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        let hit = self.at(kind);
        if hit {
            self.bump();
        }
        hit
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'t Token> {
        if self.at(kind) {
            return Ok(self.bump());
        }
        let tok = self.token(0);
        Err(self.error(format!("Expected {kind:?}, got {:?} '{}'", tok.kind, tok.text)))
    }

    fn ident(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.text.clone())
    }

    /// A label, type, property key or map key. Keywords are allowed here.
    fn name(&mut self) -> Result<String> {
        let tok = self.token(0);
        let word = match tok.kind {
            TokenKind::Identifier => true,
            TokenKind::StringLiteral | TokenKind::Parameter => false,
            _ => tok.text.starts_with(|c: char| c.is_alphabetic()),
        };
        if !word {
            return Err(self.error(format!("Expected a name, got {:?} '{}'", tok.kind, tok.text)));
        }
        Ok(self.bump().text.clone())
    }

    /// `AS alias`, if present.
    fn alias(&mut self) -> Result<Option<String>> {
        if self.eat(TokenKind::As) { self.ident().map(Some) } else { Ok(None) }
    }

    fn finish(&self, what: &str) -> Result<()> {
        if self.at(TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error(format!("Unexpected token after {what}: {:?}", self.kind())))
        }
    }

    fn error(&self, message: String) -> Error {
        Error::SyntaxError { position: self.token(0).span.start, message }
    }

    /// One or more `item`s separated by commas.
    fn comma_list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let mut items = vec![item(self)?];
        while self.eat(TokenKind::Comma) {
            items.push(item(self)?);
        }
        Ok(items)
    }

    /// Possibly empty comma list of expressions up to `close`, which is consumed.
    fn delimited(&mut self, close: TokenKind) -> Result<Vec<Expr>> {
        let items = if self.at(close) { Vec::new() } else { self.comma_list(Self::expr)? };
        self.expect(close)?;
        Ok(items)
    }

    // ========================================================================
    // Statements and clauses
    // ========================================================================

    fn statement(&mut self) -> Result<Statement> {
        match self.kind() {
            TokenKind::Show => self.show_constraints(),
            TokenKind::Drop => self.drop_constraint(),
            TokenKind::Create if self.token(1).kind == TokenKind::Constraint => {
                self.create_constraint()
            }
            _ => self.query().map(Statement::Query),
        }
    }

    fn query(&mut self) -> Result<Query> {
        let mut clauses = Vec::new();
        while !self.at_end() {
            let clause = self.clause()?;
            let last = matches!(clause, Clause::Return(_));
            clauses.push(clause);
            if last {
                if !self.at_end() {
                    return Err(self.error("RETURN must be the last clause".into()));
                }
                break;
            }
        }
        if clauses.is_empty() {
            return Err(self.error("Empty statement".into()));
        }
        Ok(Query { clauses })
    }

    fn clause(&mut self) -> Result<Clause> {
        if self.at(TokenKind::Call) {
            return self.call().map(Clause::Call);
        }
        let keyword = self.bump().kind;
        let clause = match keyword {
            TokenKind::Match => {
                let patterns = self.comma_list(Self::pattern)?;
                let where_clause =
                    if self.eat(TokenKind::Where) { Some(self.expr()?) } else { None };
                Clause::Match { patterns, where_clause }
            }
            TokenKind::Unwind => {
                let expr = self.expr()?;
                self.expect(TokenKind::As)?;
                Clause::Unwind { expr, alias: self.ident()? }
            }
            TokenKind::Create => Clause::Create { patterns: self.comma_list(Self::pattern)? },
            TokenKind::Set => Clause::Set { items: self.comma_list(Self::set_item)? },
            TokenKind::Remove => Clause::Remove { items: self.comma_list(Self::remove_item)? },
            TokenKind::Return => Clause::Return(self.return_clause()?),
            kind => {
                self.pos -= 1;
                return Err(self.error(format!("Unexpected token {kind:?} at start of clause")));
            }
        };
        Ok(clause)
    }

    fn call(&mut self) -> Result<ProcedureCall> {
        self.expect(TokenKind::Call)?;
        let mut segments = vec![self.name()?];
        while self.eat(TokenKind::Dot) {
            segments.push(self.name()?);
        }
        let args = if self.eat(TokenKind::LParen) { self.delimited(TokenKind::RParen)? } else { Vec::new() };

        let mut yields = None;
        if self.eat(TokenKind::Yield) && !self.eat(TokenKind::Star) {
            yields = Some(self.comma_list(|p| {
                Ok(YieldItem { column: p.name()?, alias: p.alias()? })
            })?);
        }
        Ok(ProcedureCall { name: segments.join("."), args, yields })
    }

    fn return_clause(&mut self) -> Result<ReturnClause> {
        let distinct = self.eat(TokenKind::Distinct);
        let items = self.comma_list(|p| Ok(ReturnItem { expr: p.expr()?, alias: p.alias()? }))?;

        let mut order_by = Vec::new();
        if self.eat(TokenKind::Order) {
            self.expect(TokenKind::By)?;
            order_by = self.comma_list(|p| {
                let expr = p.expr()?;
                let ascending = !p.eat(TokenKind::Desc);
                if ascending {
                    p.eat(TokenKind::Asc);
                }
                Ok(OrderExpr { expr, ascending })
            })?;
        }
        let skip = if self.eat(TokenKind::Skip) { Some(self.expr()?) } else { None };
        let limit = if self.eat(TokenKind::Limit) { Some(self.expr()?) } else { None };

        Ok(ReturnClause { distinct, items, order_by, skip, limit })
    }

    fn set_item(&mut self) -> Result<SetItem> {
        let variable = self.ident()?;
        let item = match self.bump().kind {
            TokenKind::Dot => {
                let key = self.name()?;
                self.expect(TokenKind::Eq)?;
                SetItem::Property { variable, key, value: self.expr()? }
            }
            TokenKind::PlusEq => SetItem::MergeProperties { variable, value: self.expr()? },
            TokenKind::Eq => SetItem::AllProperties { variable, value: self.expr()? },
            TokenKind::Colon => SetItem::Label { variable, label: self.name()? },
            _ => {
                self.pos -= 1;
                return Err(self.error("Expected '.', '=', '+=', or ':' after SET variable".into()));
            }
        };
        Ok(item)
    }

    fn remove_item(&mut self) -> Result<RemoveItem> {
        let variable = self.ident()?;
        if self.eat(TokenKind::Dot) {
            Ok(RemoveItem::Property { variable, key: self.name()? })
        } else if self.eat(TokenKind::Colon) {
            Ok(RemoveItem::Label { variable, label: self.name()? })
        } else {
            Err(self.error("Expected '.' or ':' after REMOVE variable".into()))
        }
    }

    // ========================================================================
    // Schema statements
    // ========================================================================

    /// SHOW [UNIQUE | UNIQUENESS | ALL] CONSTRAINTS
    fn show_constraints(&mut self) -> Result<Statement> {
        self.expect(TokenKind::Show)?;
        if !self.at(TokenKind::Constraints) && !self.eat(TokenKind::Unique) {
            self.eat(TokenKind::Identifier);
        }
        self.expect(TokenKind::Constraints)?;
        Ok(Statement::Schema(SchemaCommand::ShowConstraints))
    }

    /// CREATE CONSTRAINT [name] [IF NOT EXISTS]
    ///     FOR (n:Label) REQUIRE n.prop IS UNIQUE
    ///  |  ON (n:Label) ASSERT n.prop IS UNIQUE
    fn create_constraint(&mut self) -> Result<Statement> {
        self.expect(TokenKind::Create)?;
        self.expect(TokenKind::Constraint)?;
        let name = if self.at(TokenKind::Identifier) { Some(self.ident()?) } else { None };

        let if_not_exists = self.eat(TokenKind::If);
        if if_not_exists {
            self.expect(TokenKind::Not)?;
            self.expect(TokenKind::Exists)?;
        }

        // 4.x: ON ... ASSERT, 5.x: FOR ... REQUIRE
        let body = if self.eat(TokenKind::On) {
            TokenKind::Assert
        } else {
            self.expect(TokenKind::For)?;
            TokenKind::Require
        };

        self.expect(TokenKind::LParen)?;
        let bound = self.ident()?;
        self.expect(TokenKind::Colon)?;
        let label = self.name()?;
        self.expect(TokenKind::RParen)?;
        self.expect(body)?;

        let used = self.ident()?;
        if used != bound {
            return Err(self.error(format!(
                "Unknown variable '{used}' in constraint, expected '{bound}'"
            )));
        }
        self.expect(TokenKind::Dot)?;
        let property = self.name()?;
        self.expect(TokenKind::Is)?;
        self.expect(TokenKind::Unique)?;

        Ok(Statement::Schema(SchemaCommand::CreateUniqueConstraint {
            name,
            if_not_exists,
            label,
            property,
        }))
    }

    /// DROP CONSTRAINT name [IF EXISTS]
    fn drop_constraint(&mut self) -> Result<Statement> {
        self.expect(TokenKind::Drop)?;
        self.expect(TokenKind::Constraint)?;
        let name = self.ident()?;
        let if_exists = self.eat(TokenKind::If);
        if if_exists {
            self.expect(TokenKind::Exists)?;
        }
        Ok(Statement::Schema(SchemaCommand::DropConstraint { name, if_exists }))
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    fn pattern(&mut self) -> Result<Pattern> {
        let start = self.node_pattern()?;
        let mut hops = Vec::new();
        while matches!(self.kind(), TokenKind::Dash | TokenKind::LeftArrow) {
            let rel = self.rel_pattern()?;
            hops.push(Hop { rel, node: self.node_pattern()? });
        }
        Ok(Pattern { start, hops })
    }

    fn optional_alias(&mut self) -> Option<String> {
        self.at(TokenKind::Identifier).then(|| self.bump().text.clone())
    }

    fn optional_properties(&mut self) -> Result<BTreeMap<String, Expr>> {
        if self.at(TokenKind::LBrace) { self.map_literal() } else { Ok(BTreeMap::new()) }
    }

    /// `(alias:Label1:Label2 {k: v})`
    fn node_pattern(&mut self) -> Result<NodePattern> {
        self.expect(TokenKind::LParen)?;
        let alias = self.optional_alias();
        let mut labels = Vec::new();
        while self.eat(TokenKind::Colon) {
            labels.push(self.name()?);
        }
        let properties = self.optional_properties()?;
        self.expect(TokenKind::RParen)?;
        Ok(NodePattern { alias, labels, properties })
    }

    /// `-[..]->`, `<-[..]-` or `-[..]-`, brackets optional.
    fn rel_pattern(&mut self) -> Result<RelPattern> {
        let incoming = self.eat(TokenKind::LeftArrow);
        if !incoming {
            self.expect(TokenKind::Dash)?;
        }

        let (mut alias, mut rel_types, mut properties) = (None, Vec::new(), BTreeMap::new());
        if self.eat(TokenKind::LBracket) {
            alias = self.optional_alias();
            if self.eat(TokenKind::Colon) {
                rel_types.push(self.name()?);
                while self.eat(TokenKind::Pipe) {
                    rel_types.push(self.name()?);
                }
            }
            if self.at(TokenKind::Star) {
                return Err(self.error("Variable-length relationships are not supported".into()));
            }
            properties = self.optional_properties()?;
            self.expect(TokenKind::RBracket)?;
        }

        let direction = match (incoming, self.eat(TokenKind::Arrow)) {
            (false, true) => PatternDirection::Right,
            (true, false) => {
                self.expect(TokenKind::Dash)?;
                PatternDirection::Left
            }
            (false, false) => {
                self.expect(TokenKind::Dash)?;
                PatternDirection::Both
            }
            (true, true) => return Err(self.error("Relationship cannot point both ways".into())),
        };
        Ok(RelPattern { alias, rel_types, direction, properties })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr(&mut self) -> Result<Expr> {
        self.expr_bp(0)
    }

    /// Precedence climbing: consume operators binding at least as tight as `min`.
    fn expr_bp(&mut self, min: u8) -> Result<Expr> {
        let mut left = if self.eat(TokenKind::Not) {
            let operand = self.expr_bp(NOT_BP)?;
            Expr::UnaryOp { op: UnaryOp::Not, expr: Box::new(operand) }
        } else {
            self.unary()?
        };

        loop {
            let kind = self.kind();
            if min <= COMPARISON_BP && kind == TokenKind::Is {
                self.bump();
                let negated = self.eat(TokenKind::Not);
                self.expect(TokenKind::Null)?;
                left = Expr::IsNull { expr: Box::new(left), negated };
                continue;
            }
            if min <= COMPARISON_BP && kind == TokenKind::In {
                self.bump();
                let list = self.expr_bp(COMPARISON_BP + 1)?;
                left = Expr::In { expr: Box::new(left), list: Box::new(list) };
                continue;
            }
            let Some((bp, op)) = infix(kind) else { break };
            if bp < min {
                break;
            }
            self.bump();
            let right = self.expr_bp(bp + 1)?;
            left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(TokenKind::Dash) {
            // `-3` and `-1.5` stay literals.
            let expr = match self.postfix()? {
                Expr::Literal(Literal::Int(i)) => Expr::Literal(Literal::Int(-i)),
                Expr::Literal(Literal::Float(f)) => Expr::Literal(Literal::Float(-f)),
                other => Expr::UnaryOp { op: UnaryOp::Negate, expr: Box::new(other) },
            };
            return Ok(expr);
        }
        self.eat(TokenKind::Plus);
        self.postfix()
    }

    /// Primary followed by any chain of `.key` accesses.
    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.eat(TokenKind::Dot) {
            expr = Expr::Property { expr: Box::new(expr), key: self.name()? };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        let tok = self.token(0);
        let literal = match tok.kind {
            TokenKind::Integer => Literal::Int(self.number(tok, "integer")?),
            TokenKind::Float => Literal::Float(self.number(tok, "float")?),
            TokenKind::StringLiteral => Literal::String(tok.text.clone()),
            TokenKind::True => Literal::Bool(true),
            TokenKind::False => Literal::Bool(false),
            TokenKind::Null => Literal::Null,
            TokenKind::Parameter => {
                self.bump();
                return Ok(Expr::Parameter(tok.text.clone()));
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.bump();
                return self.delimited(TokenKind::RBracket).map(Expr::List);
            }
            TokenKind::LBrace => return self.map_literal().map(Expr::MapLiteral),
            TokenKind::Identifier => {
                self.bump();
                return if self.eat(TokenKind::LParen) {
                    self.function_call(tok.text.clone())
                } else {
                    Ok(Expr::Variable(tok.text.clone()))
                };
            }
            kind => {
                return Err(self.error(format!("Unexpected token in expression: {kind:?} '{}'", tok.text)));
            }
        };
        self.bump();
        Ok(Expr::Literal(literal))
    }

    fn number<N: std::str::FromStr>(&self, tok: &Token, what: &str) -> Result<N> {
        tok.text.parse().map_err(|_| Error::SyntaxError {
            position: tok.span.start,
            message: format!("Invalid {what}"),
        })
    }

    /// Arguments after `name(`, including `count(*)` and `count(DISTINCT x)`.
    fn function_call(&mut self, name: String) -> Result<Expr> {
        let distinct = self.eat(TokenKind::Distinct);
        let args = if self.eat(TokenKind::Star) {
            self.expect(TokenKind::RParen)?;
            vec![Expr::Star]
        } else {
            self.delimited(TokenKind::RParen)?
        };
        Ok(Expr::FunctionCall { name, args, distinct })
    }

    fn map_literal(&mut self) -> Result<BTreeMap<String, Expr>> {
        self.expect(TokenKind::LBrace)?;
        let mut map = BTreeMap::new();
        if !self.at(TokenKind::RBrace) {
            for (key, value) in self.comma_list(|p| {
                let key = p.name()?;
                p.expect(TokenKind::Colon)?;
                Ok((key, p.expr()?))
            })? {
                map.insert(key, value);
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(map)
    }
}
