//! SQL front-end: lexer, recursive-descent parser, AST and the semantic
//! analyzer.

pub mod ast;
pub mod lexer;
pub mod semantic;

pub use ast::*;
pub use lexer::{Lexer, Token, TokenType};
pub use semantic::SemanticAnalyzer;

use crate::error::{DbError, Pos, Result};
use crate::storage::types::{ColumnConstraints, DataType, Value};

/// Pure recursive-descent parser over the token stream.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse a script of `;`-terminated statements.
    pub fn parse_script(sql: &str) -> Result<Vec<Statement>> {
        let mut parser = Parser::new(Lexer::tokenize(sql)?);
        let mut statements = Vec::new();
        loop {
            while parser.accept_delim(";") {}
            if parser.current().kind == TokenType::Eof {
                break;
            }
            statements.push(parser.statement()?);
            parser.expect_terminator()?;
        }
        Ok(statements)
    }

    /// Parse exactly one statement.
    pub fn parse_statement(sql: &str) -> Result<Statement> {
        let mut parser = Parser::new(Lexer::tokenize(sql)?);
        let stmt = parser.statement()?;
        parser.expect_terminator()?;
        while parser.accept_delim(";") {}
        if parser.current().kind != TokenType::Eof {
            return Err(parser.err_expected("end of input"));
        }
        Ok(stmt)
    }

    // ---- token plumbing ----

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn err_expected(&self, expected: &str) -> DbError {
        let token = self.current();
        DbError::Syntax {
            pos: token.pos,
            expected: expected.to_string(),
            found: if token.kind == TokenType::Eof {
                "<end of input>".to_string()
            } else {
                token.lexeme.clone()
            },
        }
    }

    fn check_keyword(&self, word: &str) -> bool {
        self.current().is_keyword(word)
    }

    fn accept_keyword(&mut self, word: &str) -> bool {
        if self.check_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<Token> {
        if self.check_keyword(word) {
            Ok(self.advance())
        } else {
            Err(self.err_expected(word))
        }
    }

    fn check_delim(&self, delim: &str) -> bool {
        self.current().kind == TokenType::Delimiter && self.current().lexeme == delim
    }

    fn accept_delim(&mut self, delim: &str) -> bool {
        if self.check_delim(delim) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_delim(&mut self, delim: &str) -> Result<Token> {
        if self.check_delim(delim) {
            Ok(self.advance())
        } else {
            Err(self.err_expected(&format!("'{delim}'")))
        }
    }

    fn expect_terminator(&mut self) -> Result<()> {
        if self.accept_delim(";") || self.current().kind == TokenType::Eof {
            Ok(())
        } else {
            Err(self.err_expected("';'"))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<(String, Pos)> {
        if self.current().kind == TokenType::Identifier {
            let token = self.advance();
            Ok((token.lexeme, token.pos))
        } else {
            Err(self.err_expected(what))
        }
    }

    /// Contextual word outside the closed keyword set (CONSTRAINT, FULL).
    fn check_word(&self, word: &str) -> bool {
        self.current().kind == TokenType::Identifier
            && self.current().lexeme.eq_ignore_ascii_case(word)
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Statement> {
        let token = self.current().clone();
        match token.lexeme.as_str() {
            "CREATE" => self.create_table(),
            "DROP" => self.drop_table(),
            "INSERT" => self.insert(),
            "SELECT" => Ok(Statement::Select(self.select()?)),
            "DELETE" => self.delete(),
            "UPDATE" => self.update(),
            "SHOW" => self.show_tables(),
            "DESC" => self.desc_table(),
            "ALTER" => self.alter_table(),
            _ => Err(self.err_expected("a statement keyword")),
        }
    }

    fn create_table(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("CREATE")?.pos;
        self.expect_keyword("TABLE")?;
        let (table, _) = self.expect_identifier("table name")?;
        self.expect_delim("(")?;

        let mut columns = Vec::new();
        let mut foreign_keys = Vec::new();
        loop {
            if self.check_word("CONSTRAINT") || self.check_keyword("FOREIGN") {
                foreign_keys.push(self.foreign_key_clause()?);
            } else {
                columns.push(self.column_def()?);
            }
            if !self.accept_delim(",") {
                break;
            }
        }
        self.expect_delim(")")?;

        Ok(Statement::CreateTable(CreateTableStmt {
            table,
            columns,
            foreign_keys,
            pos: start,
        }))
    }

    fn column_def(&mut self) -> Result<ColumnDefNode> {
        let (name, pos) = self.expect_identifier("column name")?;
        let data_type = self.type_spec()?;

        let mut constraints = ColumnConstraints::default();
        loop {
            if self.accept_keyword("PRIMARY") {
                self.expect_keyword("KEY")?;
                constraints.primary_key = true;
                constraints.not_null = true;
            } else if self.check_keyword("NOT") {
                self.advance();
                self.expect_keyword("NULL")?;
                constraints.not_null = true;
            } else if self.accept_keyword("UNIQUE") {
                constraints.unique = true;
            } else if self.accept_keyword("DEFAULT") {
                constraints.default = Some(self.value()?.value);
            } else {
                break;
            }
        }

        Ok(ColumnDefNode {
            name,
            data_type,
            constraints,
            pos,
        })
    }

    fn type_spec(&mut self) -> Result<DataType> {
        if self.accept_keyword("INT") {
            return Ok(DataType::Int);
        }
        if self.accept_keyword("VARCHAR") || self.accept_keyword("CHAR") {
            self.expect_delim("(")?;
            let token = self.current().clone();
            if token.kind != TokenType::Number {
                return Err(self.err_expected("a length"));
            }
            self.advance();
            let len: u32 = token.lexeme.parse().map_err(|_| DbError::Syntax {
                pos: token.pos,
                expected: "a VARCHAR length".into(),
                found: token.lexeme.clone(),
            })?;
            if len == 0 || len > u16::MAX as u32 {
                return Err(DbError::Syntax {
                    pos: token.pos,
                    expected: "a VARCHAR length in (0, 65535]".into(),
                    found: token.lexeme,
                });
            }
            self.expect_delim(")")?;
            return Ok(DataType::Varchar(len as u16));
        }
        Err(self.err_expected("a data type (INT or VARCHAR(n))"))
    }

    fn foreign_key_clause(&mut self) -> Result<ForeignKeyClause> {
        let pos = self.current().pos;
        let constraint_name = if self.check_word("CONSTRAINT") {
            self.advance();
            Some(self.expect_identifier("constraint name")?.0)
        } else {
            None
        };
        self.expect_keyword("FOREIGN")?;
        self.expect_keyword("KEY")?;
        self.expect_delim("(")?;
        let (column, _) = self.expect_identifier("column name")?;
        self.expect_delim(")")?;
        self.expect_keyword("REFERENCES")?;
        let (ref_table, _) = self.expect_identifier("referenced table")?;
        self.expect_delim("(")?;
        let (ref_column, _) = self.expect_identifier("referenced column")?;
        self.expect_delim(")")?;

        Ok(ForeignKeyClause {
            constraint_name,
            column,
            ref_table,
            ref_column,
            pos,
        })
    }

    fn drop_table(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("DROP")?.pos;
        self.expect_keyword("TABLE")?;
        let (table, _) = self.expect_identifier("table name")?;
        Ok(Statement::DropTable { table, pos: start })
    }

    fn insert(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("INSERT")?.pos;
        self.expect_keyword("INTO")?;
        let (table, _) = self.expect_identifier("table name")?;

        let columns = if self.accept_delim("(") {
            let mut cols = vec![self.expect_identifier("column name")?.0];
            while self.accept_delim(",") {
                cols.push(self.expect_identifier("column name")?.0);
            }
            self.expect_delim(")")?;
            Some(cols)
        } else {
            None
        };

        self.expect_keyword("VALUES")?;
        self.expect_delim("(")?;
        let mut values = vec![self.value()?];
        while self.accept_delim(",") {
            values.push(self.value()?);
        }
        self.expect_delim(")")?;

        Ok(Statement::Insert(InsertStmt {
            table,
            columns,
            values,
            pos: start,
        }))
    }

    fn value(&mut self) -> Result<ValueNode> {
        let token = self.current().clone();
        let negative = token.kind == TokenType::Operator && token.lexeme == "-";
        if negative {
            self.advance();
        }
        let token = self.current().clone();
        match token.kind {
            TokenType::Number => {
                self.advance();
                let value = if token.lexeme.contains('.') {
                    let f: f64 = token.lexeme.parse().map_err(|_| DbError::Syntax {
                        pos: token.pos,
                        expected: "a number".into(),
                        found: token.lexeme.clone(),
                    })?;
                    Value::Float(if negative { -f } else { f })
                } else {
                    let i: i64 = token.lexeme.parse().map_err(|_| DbError::Syntax {
                        pos: token.pos,
                        expected: "a number".into(),
                        found: token.lexeme.clone(),
                    })?;
                    let i = if negative { -i } else { i };
                    i32::try_from(i)
                        .map(Value::Int)
                        .unwrap_or(Value::Float(i as f64))
                };
                Ok(ValueNode {
                    value,
                    pos: token.pos,
                })
            }
            TokenType::String if !negative => {
                self.advance();
                Ok(ValueNode {
                    value: Value::Str(token.lexeme),
                    pos: token.pos,
                })
            }
            TokenType::Keyword if token.lexeme == "NULL" && !negative => {
                self.advance();
                Ok(ValueNode {
                    value: Value::Null,
                    pos: token.pos,
                })
            }
            _ => Err(self.err_expected("a value")),
        }
    }

    fn select(&mut self) -> Result<SelectStmt> {
        let start = self.expect_keyword("SELECT")?.pos;
        let distinct = self.accept_keyword("DISTINCT");
        let items = self.select_list()?;

        self.expect_keyword("FROM")?;
        let from = self.table_ref()?;

        let mut joins = Vec::new();
        loop {
            if self.check_delim(",") {
                return Err(DbError::Syntax {
                    pos: self.current().pos,
                    expected: "an explicit JOIN (comma joins are not supported)".into(),
                    found: ",".into(),
                });
            }
            if self.check_word("FULL") {
                return Err(DbError::Syntax {
                    pos: self.current().pos,
                    expected: "INNER, LEFT or RIGHT JOIN (FULL JOIN is not supported)".into(),
                    found: self.current().lexeme.clone(),
                });
            }
            let join_type = if self.check_keyword("JOIN") {
                JoinType::Inner
            } else if self.check_keyword("INNER") {
                self.advance();
                JoinType::Inner
            } else if self.check_keyword("LEFT") {
                self.advance();
                self.accept_keyword("OUTER");
                JoinType::Left
            } else if self.check_keyword("RIGHT") {
                self.advance();
                self.accept_keyword("OUTER");
                JoinType::Right
            } else {
                break;
            };
            let pos = self.expect_keyword("JOIN")?.pos;
            let table = self.table_ref()?;
            self.expect_keyword("ON")?;
            let on = self.or_expr()?;
            joins.push(JoinClause {
                join_type,
                table,
                on,
                pos,
            });
        }

        let where_clause = if self.accept_keyword("WHERE") {
            Some(self.or_expr()?)
        } else {
            None
        };

        let group_by = if self.accept_keyword("GROUP") {
            self.expect_keyword("BY")?;
            let mut keys = vec![self.qualified_column()?.0];
            while self.accept_delim(",") {
                keys.push(self.qualified_column()?.0);
            }
            keys
        } else {
            Vec::new()
        };

        let having = if self.accept_keyword("HAVING") {
            Some(self.or_expr()?)
        } else {
            None
        };

        let order_by = if self.accept_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let mut keys = vec![self.sort_key()?];
            while self.accept_delim(",") {
                keys.push(self.sort_key()?);
            }
            keys
        } else {
            Vec::new()
        };

        let limit = if self.accept_keyword("LIMIT") {
            Some(self.limit_clause()?)
        } else {
            None
        };

        Ok(SelectStmt {
            distinct,
            items,
            from,
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            pos: start,
        })
    }

    fn select_list(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = vec![self.select_item()?];
        while self.accept_delim(",") {
            items.push(self.select_item()?);
        }
        Ok(items)
    }

    fn select_item(&mut self) -> Result<SelectItem> {
        if self.current().kind == TokenType::Operator && self.current().lexeme == "*" {
            self.advance();
            return Ok(SelectItem::Wildcard);
        }

        let token = self.current().clone();
        if token.kind == TokenType::Identifier {
            if let Some(func) = AggFunc::parse(&token.lexeme) {
                if self.peek().kind == TokenType::Delimiter && self.peek().lexeme == "(" {
                    let call = self.aggregate_call(func)?;
                    let alias = self.optional_alias()?;
                    return Ok(SelectItem::Aggregate {
                        call,
                        alias,
                        pos: token.pos,
                    });
                }
            }
            let (name, pos) = self.qualified_column()?;
            let alias = self.optional_alias()?;
            return Ok(SelectItem::Column { name, alias, pos });
        }

        Err(self.err_expected("a select list entry"))
    }

    fn aggregate_call(&mut self, func: AggFunc) -> Result<AggregateCall> {
        let name_token = self.advance();
        self.expect_delim("(")?;
        let column = if self.current().kind == TokenType::Operator && self.current().lexeme == "*" {
            if func != AggFunc::Count {
                return Err(DbError::Syntax {
                    pos: name_token.pos,
                    expected: "a column argument (only COUNT accepts *)".into(),
                    found: "*".into(),
                });
            }
            self.advance();
            "*".to_string()
        } else {
            self.qualified_column()?.0
        };
        self.expect_delim(")")?;
        Ok(AggregateCall { func, column })
    }

    fn optional_alias(&mut self) -> Result<Option<String>> {
        if self.accept_keyword("AS") {
            return Ok(Some(self.expect_identifier("an alias")?.0));
        }
        // implicit alias: a bare identifier directly after the item
        if self.current().kind == TokenType::Identifier {
            return Ok(Some(self.advance().lexeme));
        }
        Ok(None)
    }

    fn qualified_column(&mut self) -> Result<(String, Pos)> {
        let (first, pos) = self.expect_identifier("a column name")?;
        if self.accept_delim(".") {
            let (second, _) = self.expect_identifier("a column name")?;
            Ok((format!("{first}.{second}"), pos))
        } else {
            Ok((first, pos))
        }
    }

    fn table_ref(&mut self) -> Result<TableRef> {
        let (table, pos) = self.expect_identifier("a table name")?;
        let alias = if self.accept_keyword("AS") {
            Some(self.expect_identifier("an alias")?.0)
        } else if self.current().kind == TokenType::Identifier && !self.check_word("FULL") {
            Some(self.advance().lexeme)
        } else {
            None
        };
        Ok(TableRef { table, alias, pos })
    }

    fn sort_key(&mut self) -> Result<SortKeyNode> {
        let pos = self.current().pos;
        let target = if self.current().kind == TokenType::Number {
            let token = self.advance();
            let position: usize = token.lexeme.parse().map_err(|_| DbError::Syntax {
                pos: token.pos,
                expected: "a select-list position".into(),
                found: token.lexeme.clone(),
            })?;
            if position == 0 {
                return Err(DbError::Syntax {
                    pos: token.pos,
                    expected: "a 1-based select-list position".into(),
                    found: token.lexeme,
                });
            }
            SortTarget::Position(position)
        } else {
            SortTarget::Column(self.qualified_column()?.0)
        };

        let descending = if self.accept_keyword("DESC") {
            true
        } else {
            self.accept_keyword("ASC");
            false
        };
        Ok(SortKeyNode {
            target,
            descending,
            pos,
        })
    }

    fn limit_clause(&mut self) -> Result<LimitClause> {
        let first = self.limit_number()?;
        if self.accept_delim(",") {
            // LIMIT offset, count
            let count = self.limit_number()?;
            Ok(LimitClause {
                offset: first,
                count,
            })
        } else if self.accept_keyword("OFFSET") {
            let offset = self.limit_number()?;
            Ok(LimitClause {
                offset,
                count: first,
            })
        } else {
            Ok(LimitClause {
                offset: 0,
                count: first,
            })
        }
    }

    fn limit_number(&mut self) -> Result<u64> {
        let token = self.current().clone();
        if token.kind != TokenType::Number || token.lexeme.contains('.') {
            return Err(self.err_expected("a non-negative integer"));
        }
        self.advance();
        token.lexeme.parse().map_err(|_| DbError::Syntax {
            pos: token.pos,
            expected: "a non-negative integer".into(),
            found: token.lexeme,
        })
    }

    fn delete(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("DELETE")?.pos;
        self.expect_keyword("FROM")?;
        let (table, _) = self.expect_identifier("table name")?;
        let where_clause = if self.accept_keyword("WHERE") {
            Some(self.or_expr()?)
        } else {
            None
        };
        Ok(Statement::Delete(DeleteStmt {
            table,
            where_clause,
            pos: start,
        }))
    }

    fn update(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("UPDATE")?.pos;
        let (table, _) = self.expect_identifier("table name")?;
        self.expect_keyword("SET")?;

        let mut assignments = Vec::new();
        loop {
            let (column, _) = self.expect_identifier("a column name")?;
            let token = self.current().clone();
            if !(token.kind == TokenType::Operator && token.lexeme == "=") {
                return Err(self.err_expected("'='"));
            }
            self.advance();
            assignments.push((column, self.value()?));
            if !self.accept_delim(",") {
                break;
            }
        }

        let where_clause = if self.accept_keyword("WHERE") {
            Some(self.or_expr()?)
        } else {
            None
        };
        Ok(Statement::Update(UpdateStmt {
            table,
            assignments,
            where_clause,
            pos: start,
        }))
    }

    fn show_tables(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("SHOW")?.pos;
        self.expect_keyword("TABLES")?;
        Ok(Statement::ShowTables { pos: start })
    }

    fn desc_table(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("DESC")?.pos;
        let (table, _) = self.expect_identifier("table name")?;
        Ok(Statement::DescTable { table, pos: start })
    }

    fn alter_table(&mut self) -> Result<Statement> {
        let start = self.expect_keyword("ALTER")?.pos;
        self.expect_keyword("TABLE")?;
        let (table, _) = self.expect_identifier("table name")?;

        let action = if self.accept_keyword("RENAME") {
            self.expect_keyword("TO")?;
            AlterAction::Rename {
                new_name: self.expect_identifier("a new table name")?.0,
            }
        } else if self.accept_keyword("ADD") {
            self.accept_keyword("COLUMN");
            AlterAction::AddColumn {
                column: self.column_def()?,
            }
        } else if self.accept_keyword("DROP") {
            self.accept_keyword("COLUMN");
            AlterAction::DropColumn {
                name: self.expect_identifier("a column name")?.0,
            }
        } else if self.accept_keyword("MODIFY") {
            self.accept_keyword("COLUMN");
            let (name, _) = self.expect_identifier("a column name")?;
            AlterAction::ModifyColumn {
                name,
                data_type: self.type_spec()?,
            }
        } else if self.check_word("CHANGE") {
            self.advance();
            self.accept_keyword("COLUMN");
            let (old_name, _) = self.expect_identifier("the old column name")?;
            let (new_name, _) = self.expect_identifier("the new column name")?;
            AlterAction::ChangeColumn {
                old_name,
                new_name,
                data_type: self.type_spec()?,
            }
        } else {
            return Err(self.err_expected("RENAME, ADD, DROP, MODIFY or CHANGE"));
        };

        Ok(Statement::AlterTable(AlterTableStmt {
            table,
            action,
            pos: start,
        }))
    }

    // ---- expressions ----
    // precedence, low to high: OR, AND, NOT, comparison (with the postfix
    // LIKE / IN / BETWEEN / IS NULL forms), primary

    fn or_expr(&mut self) -> Result<ExprNode> {
        let mut left = self.and_expr()?;
        while self.check_keyword("OR") {
            let pos = self.advance().pos;
            let right = self.and_expr()?;
            left = ExprNode {
                kind: ExprKind::Or {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<ExprNode> {
        let mut left = self.not_expr()?;
        while self.check_keyword("AND") {
            let pos = self.advance().pos;
            let right = self.not_expr()?;
            left = ExprNode {
                kind: ExprKind::And {
                    left: Box::new(left),
                    right: Box::new(right),
                },
                pos,
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<ExprNode> {
        if self.check_keyword("NOT") {
            let pos = self.advance().pos;
            let expr = self.not_expr()?;
            return Ok(ExprNode {
                kind: ExprKind::Not {
                    expr: Box::new(expr),
                },
                pos,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<ExprNode> {
        let left = self.primary()?;
        let pos = self.current().pos;

        if self.current().kind == TokenType::Operator {
            if let Some(op) = CompareOp::parse(&self.current().lexeme) {
                self.advance();
                let right = self.primary()?;
                return Ok(ExprNode {
                    kind: ExprKind::Compare {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    },
                    pos,
                });
            }
        }

        let negated = if self.check_keyword("NOT")
            && matches!(self.peek().lexeme.as_str(), "LIKE" | "IN" | "BETWEEN")
        {
            self.advance();
            true
        } else {
            false
        };

        if self.accept_keyword("LIKE") {
            let pattern = self.primary()?;
            return Ok(ExprNode {
                kind: ExprKind::Like {
                    expr: Box::new(left),
                    pattern: Box::new(pattern),
                    negated,
                },
                pos,
            });
        }

        if self.accept_keyword("IN") {
            self.expect_delim("(")?;
            if self.check_keyword("SELECT") {
                let subquery = self.select()?;
                self.expect_delim(")")?;
                return Ok(ExprNode {
                    kind: ExprKind::InSubquery {
                        expr: Box::new(left),
                        subquery: Box::new(subquery),
                        negated,
                    },
                    pos,
                });
            }
            let mut values = vec![self.value()?];
            while self.accept_delim(",") {
                values.push(self.value()?);
            }
            self.expect_delim(")")?;
            return Ok(ExprNode {
                kind: ExprKind::InList {
                    expr: Box::new(left),
                    values,
                    negated,
                },
                pos,
            });
        }

        if self.accept_keyword("BETWEEN") {
            let low = self.primary()?;
            self.expect_keyword("AND")?;
            let high = self.primary()?;
            return Ok(ExprNode {
                kind: ExprKind::Between {
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                },
                pos,
            });
        }

        if negated {
            return Err(self.err_expected("LIKE, IN or BETWEEN"));
        }

        if self.accept_keyword("IS") {
            let negated = self.accept_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(ExprNode {
                kind: ExprKind::IsNull {
                    expr: Box::new(left),
                    negated,
                },
                pos,
            });
        }

        Ok(left)
    }

    fn primary(&mut self) -> Result<ExprNode> {
        let token = self.current().clone();

        if self.accept_delim("(") {
            let expr = self.or_expr()?;
            self.expect_delim(")")?;
            return Ok(expr);
        }

        match token.kind {
            TokenType::Number | TokenType::String => {
                let node = self.value()?;
                Ok(ExprNode {
                    kind: ExprKind::Literal(node.value),
                    pos: node.pos,
                })
            }
            TokenType::Operator if token.lexeme == "-" => {
                let node = self.value()?;
                Ok(ExprNode {
                    kind: ExprKind::Literal(node.value),
                    pos: node.pos,
                })
            }
            TokenType::Keyword if token.lexeme == "NULL" => {
                self.advance();
                Ok(ExprNode {
                    kind: ExprKind::Literal(Value::Null),
                    pos: token.pos,
                })
            }
            TokenType::Identifier => {
                if let Some(func) = AggFunc::parse(&token.lexeme) {
                    if self.peek().kind == TokenType::Delimiter && self.peek().lexeme == "(" {
                        let call = self.aggregate_call(func)?;
                        return Ok(ExprNode {
                            kind: ExprKind::Aggregate(call),
                            pos: token.pos,
                        });
                    }
                }
                let (name, pos) = self.qualified_column()?;
                Ok(ExprNode {
                    kind: ExprKind::Column(name),
                    pos,
                })
            }
            _ => Err(self.err_expected("an expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Statement {
        Parser::parse_statement(sql).unwrap()
    }

    #[test]
    fn test_create_table_with_constraints() {
        let stmt = parse(
            "CREATE TABLE users(id INT PRIMARY KEY, name VARCHAR(50) NOT NULL, \
             email VARCHAR(80) UNIQUE, age INT DEFAULT 18);",
        );
        let Statement::CreateTable(create) = stmt else {
            panic!("expected CreateTable");
        };
        assert_eq!(create.table, "users");
        assert_eq!(create.columns.len(), 4);
        assert!(create.columns[0].constraints.primary_key);
        assert!(create.columns[0].constraints.not_null);
        assert!(create.columns[1].constraints.not_null);
        assert!(create.columns[2].constraints.unique);
        assert_eq!(create.columns[3].constraints.default, Some(Value::Int(18)));
    }

    #[test]
    fn test_create_table_with_foreign_key() {
        let stmt = parse(
            "CREATE TABLE children(id INT, parent_id INT, \
             CONSTRAINT fk_parent FOREIGN KEY(parent_id) REFERENCES parents(id));",
        );
        let Statement::CreateTable(create) = stmt else {
            panic!("expected CreateTable");
        };
        assert_eq!(create.foreign_keys.len(), 1);
        let fk = &create.foreign_keys[0];
        assert_eq!(fk.constraint_name.as_deref(), Some("fk_parent"));
        assert_eq!(fk.column, "parent_id");
        assert_eq!(fk.ref_table, "parents");
        assert_eq!(fk.ref_column, "id");
    }

    #[test]
    fn test_insert_with_and_without_columns() {
        let stmt = parse("INSERT INTO t(a, b) VALUES(1, 'x');");
        let Statement::Insert(insert) = stmt else {
            panic!()
        };
        assert_eq!(insert.columns.as_deref().unwrap().len(), 2);
        assert_eq!(insert.values[0].value, Value::Int(1));

        let stmt = parse("INSERT INTO t VALUES(-5, NULL);");
        let Statement::Insert(insert) = stmt else {
            panic!()
        };
        assert!(insert.columns.is_none());
        assert_eq!(insert.values[0].value, Value::Int(-5));
        assert_eq!(insert.values[1].value, Value::Null);
    }

    #[test]
    fn test_select_full_clause_set() {
        let stmt = parse(
            "SELECT DISTINCT dept, COUNT(*) AS cnt FROM employees \
             WHERE age > 25 GROUP BY dept HAVING COUNT(*) >= 2 \
             ORDER BY cnt DESC, dept LIMIT 3 OFFSET 1;",
        );
        let Statement::Select(select) = stmt else {
            panic!()
        };
        assert!(select.distinct);
        assert_eq!(select.items.len(), 2);
        assert!(select.where_clause.is_some());
        assert_eq!(select.group_by, vec!["dept"]);
        assert!(select.having.is_some());
        assert_eq!(select.order_by.len(), 2);
        assert!(select.order_by[0].descending);
        assert!(!select.order_by[1].descending);
        let limit = select.limit.unwrap();
        assert_eq!((limit.offset, limit.count), (1, 3));
    }

    #[test]
    fn test_limit_comma_form() {
        let Statement::Select(select) = parse("SELECT * FROM t LIMIT 5, 10;") else {
            panic!()
        };
        let limit = select.limit.unwrap();
        assert_eq!((limit.offset, limit.count), (5, 10));
    }

    #[test]
    fn test_joins() {
        let Statement::Select(select) = parse(
            "SELECT a.id, b.tag FROM a LEFT OUTER JOIN b ON a.id = b.aid \
             INNER JOIN c ON c.aid = a.id;",
        ) else {
            panic!()
        };
        assert_eq!(select.joins.len(), 2);
        assert_eq!(select.joins[0].join_type, JoinType::Left);
        assert_eq!(select.joins[1].join_type, JoinType::Inner);
    }

    #[test]
    fn test_full_join_rejected() {
        let err = Parser::parse_statement("SELECT * FROM a FULL JOIN b ON a.id = b.id;")
            .unwrap_err();
        assert!(err.to_string().contains("FULL JOIN is not supported"));
    }

    #[test]
    fn test_comma_join_rejected() {
        let err = Parser::parse_statement("SELECT * FROM a, b;").unwrap_err();
        assert!(err.to_string().contains("comma joins are not supported"));
    }

    #[test]
    fn test_expression_precedence() {
        let Statement::Select(select) =
            parse("SELECT * FROM t WHERE a = 1 OR b = 2 AND NOT c = 3;")
        else {
            panic!()
        };
        // OR is the root: AND binds tighter
        let ExprKind::Or { right, .. } = select.where_clause.unwrap().kind else {
            panic!("expected OR at the root");
        };
        assert!(matches!(right.kind, ExprKind::And { .. }));
    }

    #[test]
    fn test_postfix_comparison_forms() {
        let Statement::Select(select) = parse(
            "SELECT * FROM t WHERE a LIKE 'A%' AND b IN (1, 2, 3) \
             AND c BETWEEN 10 AND 20 AND d IS NOT NULL AND e NOT IN (4);",
        ) else {
            panic!()
        };
        let mut found = Vec::new();
        fn walk(expr: &ExprNode, found: &mut Vec<&'static str>) {
            match &expr.kind {
                ExprKind::And { left, right } => {
                    walk(left, found);
                    walk(right, found);
                }
                ExprKind::Like { .. } => found.push("like"),
                ExprKind::InList { negated, .. } => {
                    found.push(if *negated { "not_in" } else { "in" })
                }
                ExprKind::Between { .. } => found.push("between"),
                ExprKind::IsNull { negated, .. } => {
                    found.push(if *negated { "is_not_null" } else { "is_null" })
                }
                _ => {}
            }
        }
        walk(select.where_clause.as_ref().unwrap(), &mut found);
        assert_eq!(found, vec!["like", "in", "between", "is_not_null", "not_in"]);
    }

    #[test]
    fn test_in_subquery() {
        let Statement::Select(select) =
            parse("SELECT * FROM orders WHERE uid IN (SELECT id FROM users WHERE age > 30);")
        else {
            panic!()
        };
        assert!(matches!(
            select.where_clause.unwrap().kind,
            ExprKind::InSubquery { .. }
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let Statement::Update(update) =
            parse("UPDATE t SET a = 1, b = 'x' WHERE id = 3;")
        else {
            panic!()
        };
        assert_eq!(update.assignments.len(), 2);
        assert!(update.where_clause.is_some());

        let Statement::Delete(delete) = parse("DELETE FROM t;") else {
            panic!()
        };
        assert!(delete.where_clause.is_none());
    }

    #[test]
    fn test_alter_forms() {
        assert!(matches!(
            parse("ALTER TABLE t RENAME TO s;"),
            Statement::AlterTable(AlterTableStmt {
                action: AlterAction::Rename { .. },
                ..
            })
        ));
        assert!(matches!(
            parse("ALTER TABLE t ADD COLUMN c INT;"),
            Statement::AlterTable(AlterTableStmt {
                action: AlterAction::AddColumn { .. },
                ..
            })
        ));
        assert!(matches!(
            parse("ALTER TABLE t DROP COLUMN c;"),
            Statement::AlterTable(AlterTableStmt {
                action: AlterAction::DropColumn { .. },
                ..
            })
        ));
        assert!(matches!(
            parse("ALTER TABLE t MODIFY c VARCHAR(80);"),
            Statement::AlterTable(AlterTableStmt {
                action: AlterAction::ModifyColumn { .. },
                ..
            })
        ));
        assert!(matches!(
            parse("ALTER TABLE t CHANGE c d INT;"),
            Statement::AlterTable(AlterTableStmt {
                action: AlterAction::ChangeColumn { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_show_and_desc() {
        assert!(matches!(parse("SHOW TABLES;"), Statement::ShowTables { .. }));
        assert!(matches!(
            parse("DESC users;"),
            Statement::DescTable { .. }
        ));
    }

    #[test]
    fn test_syntax_error_carries_expected() {
        let err = Parser::parse_statement("SELECT FROM t;").unwrap_err();
        let DbError::Syntax { expected, .. } = err else {
            panic!("expected a syntax error");
        };
        assert!(expected.contains("select list"));
    }

    #[test]
    fn test_script_parses_multiple_statements() {
        let stmts = Parser::parse_script(
            "CREATE TABLE t(id INT); INSERT INTO t VALUES(1); SELECT * FROM t;",
        )
        .unwrap();
        assert_eq!(stmts.len(), 3);
    }
}
