//! `CreateTableParser`: a state machine driven directly off a
//! [`SqlTokenizer`] token by token, with no intermediate AST.
//!
//! Invariant kept throughout every private helper: on return, the
//! tokenizer's *current* token (`self.tok.kind()`/`str_value()`/etc.) is
//! the last token that helper consumed, never one token further. Callers
//! that need to look one token ahead to decide whether to consume it (an
//! optional index name, an optional `USING` clause) read that token and,
//! if it turns out not to belong to them, stash its *kind* in `pushback`
//! so the next call to `next()` hands it back without re-reading the
//! underlying tokenizer (whose buffer is still sitting on that exact
//! token, so `str_value()`/`int_value()` stay valid even while a kind sits
//! in `pushback`).

use std::io::Read;

use tablewire_common::error::{Result, TableWireError};
use tablewire_tokenizer::sql::{SqlTokenizer, TokenKind};

use crate::model::{
    Column, DefaultValue, ForeignKey, Index, IndexColumn, IndexKind, ReferentialAction, Table,
};

pub struct CreateTableParser<R> {
    tok: SqlTokenizer<R>,
    pushback: Option<TokenKind>,
}

impl<R: Read> CreateTableParser<R> {
    pub fn new(tok: SqlTokenizer<R>) -> Self {
        Self { tok, pushback: None }
    }

    fn err(&self, message: impl Into<String>) -> TableWireError {
        TableWireError::parse(0, message.into())
    }

    fn next(&mut self) -> Result<TokenKind> {
        if let Some(k) = self.pushback.take() {
            return Ok(k);
        }
        self.tok.read()
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<()> {
        match self.next()? {
            TokenKind::Identifier if self.tok.str_value().eq_ignore_ascii_case(expected) => Ok(()),
            other => Err(self.err(format!("expected identifier `{expected}`, found {other:?}"))),
        }
    }

    /// Consumes `CREATE TABLE` if present; tolerant of callers that
    /// already consumed those tokens upstream.
    pub fn parse(mut self) -> Result<Table> {
        self.parse_table()
    }

    /// Like [`Self::parse`], but hands the tokenizer back afterward instead
    /// of dropping it; the SQL importer keeps scanning the same stream for
    /// `INSERT` statements once the `CREATE TABLE` has been consumed.
    pub fn parse_retaining_tokenizer(mut self) -> Result<(Table, SqlTokenizer<R>)> {
        let table = self.parse_table()?;
        Ok((table, self.tok))
    }

    fn parse_table(&mut self) -> Result<Table> {
        let mut kind = self.next()?;
        if kind == TokenKind::Identifier && self.tok.str_value().eq_ignore_ascii_case("CREATE") {
            kind = self.next()?;
        }
        if kind == TokenKind::Identifier && self.tok.str_value().eq_ignore_ascii_case("TABLE") {
            kind = self.next()?;
        }
        while kind == TokenKind::Identifier
            && matches!(self.tok.str_value().to_ascii_uppercase().as_str(), "IF" | "NOT" | "EXISTS")
        {
            kind = self.next()?;
        }
        if kind != TokenKind::Identifier {
            return Err(self.err("expected table name"));
        }
        let mut table = Table::new(self.tok.str_value().to_string());

        if self.next()? != TokenKind::LeftParen {
            return Err(self.err("expected `(` after table name"));
        }
        loop {
            let k = self.next()?;
            if k == TokenKind::RightParen {
                break;
            }
            if k != TokenKind::Identifier {
                return Err(self.err("expected column definition or table constraint"));
            }
            let word = self.tok.str_value().to_ascii_uppercase();
            if matches!(
                word.as_str(),
                "PRIMARY" | "UNIQUE" | "KEY" | "INDEX" | "CONSTRAINT" | "FOREIGN" | "FULLTEXT"
            ) {
                self.parse_table_constraint(&mut table, &word)?;
            } else {
                let name = self.tok.str_value().to_string();
                let column = self.parse_column_definition(name)?;
                table.columns.push(column);
            }
            match self.next()? {
                TokenKind::Comma => continue,
                TokenKind::RightParen => break,
                other => return Err(self.err(format!("expected `,` or `)`, found {other:?}"))),
            }
        }

        self.parse_table_options(&mut table)?;

        Ok(table)
    }

    fn parse_table_options(&mut self, table: &mut Table) -> Result<()> {
        let mut pending = self.next()?;
        loop {
            if pending != TokenKind::Identifier {
                break;
            }
            let mut option_key = self.tok.str_value().to_string();
            loop {
                match self.next()? {
                    TokenKind::Equals => break,
                    TokenKind::Identifier => {
                        option_key.push(' ');
                        option_key.push_str(self.tok.str_value());
                    }
                    other => return Err(self.err(format!("malformed table option near {other:?}"))),
                }
            }
            let value = match self.next()? {
                TokenKind::Str => {
                    format!("'{}'", self.tok.str_value().replace('\\', "\\\\").replace('\'', "\\'"))
                }
                TokenKind::Integer => self.tok.int_value().to_string(),
                TokenKind::Double => self.tok.double_value().to_string(),
                TokenKind::Identifier => self.tok.str_value().to_string(),
                other => return Err(self.err(format!("expected table option value, found {other:?}"))),
            };
            table.options.insert(option_key, value);
            pending = self.next()?;
        }
        if !matches!(pending, TokenKind::Semicolon | TokenKind::Eof) {
            return Err(self.err(format!("expected `;` or end of statement, found {pending:?}")));
        }
        Ok(())
    }

    fn parse_column_definition(&mut self, name: String) -> Result<Column> {
        let type_expr = self.parse_type_expr()?;
        let mut column = Column::new(name, type_expr);
        loop {
            let kind = self.next()?;
            match kind {
                TokenKind::Comma | TokenKind::RightParen | TokenKind::Eof => {
                    self.pushback = Some(kind);
                    return Ok(column);
                }
                // The bare NULL literal asserting nullability; the lexer
                // classifies it as its own kind, never as an identifier.
                TokenKind::Null => column.nullable = true,
                TokenKind::Identifier => {
                    let word = self.tok.str_value().to_ascii_uppercase();
                    match word.as_str() {
                        "NOT" => {
                            if self.next()? != TokenKind::Null {
                                return Err(self.err("expected NULL after NOT"));
                            }
                            column.nullable = false;
                        }
                        "DEFAULT" => column.default = Some(self.parse_default_value()?),
                        "AUTO_INCREMENT" => column.auto_increment = true,
                        "UNSIGNED" => column.unsigned = true,
                        "PRIMARY" => {
                            self.expect_identifier("KEY")?;
                            column.primary_key = true;
                        }
                        "UNIQUE" => column.extra = Some("UNIQUE".to_string()),
                        "CHARACTER" => {
                            self.expect_identifier("SET")?;
                            column.character_set = Some(self.parse_ident_or_string()?);
                        }
                        "COLLATE" => column.collation = Some(self.parse_ident_or_string()?),
                        // Unknown keywords are consumed and ignored.
                        _ => {}
                    }
                }
                // Stray literals riding an ignored keyword (COMMENT 'x',
                // ON UPDATE CURRENT_TIMESTAMP(3)): consumed and ignored.
                TokenKind::Str | TokenKind::Integer | TokenKind::Double => {}
                other => return Err(self.err(format!("unexpected token {other:?} in column definition"))),
            }
        }
    }

    /// On return the next unconsumed token is either in `pushback` (the
    /// bare-type path had to read one token past the type name) or not yet
    /// read (the parenthesized path stops on the closing `)`).
    fn parse_type_expr(&mut self) -> Result<String> {
        if self.next()? != TokenKind::Identifier {
            return Err(self.err("expected column type"));
        }
        let mut expr = self.tok.str_value().to_string();
        let after_name = self.next()?;
        if after_name != TokenKind::LeftParen {
            self.pushback = Some(after_name);
            return Ok(expr);
        }
        expr.push('(');
        loop {
            match self.next()? {
                TokenKind::RightParen => {
                    expr.push(')');
                    break;
                }
                TokenKind::Comma => expr.push(','),
                TokenKind::Integer => expr.push_str(&self.tok.int_value().to_string()),
                TokenKind::Identifier => expr.push_str(self.tok.str_value()),
                TokenKind::Str => {
                    expr.push('\'');
                    expr.push_str(self.tok.str_value());
                    expr.push('\'');
                }
                other => return Err(self.err(format!("unexpected token in type parameters: {other:?}"))),
            }
        }
        Ok(expr)
    }

    fn parse_ident_or_string(&mut self) -> Result<String> {
        match self.next()? {
            TokenKind::Identifier | TokenKind::Str => Ok(self.tok.str_value().to_string()),
            other => Err(self.err(format!("expected identifier or string, found {other:?}"))),
        }
    }

    /// Leaves the tokenizer positioned on the last token of the value
    /// itself (a bare literal, or the closing `)` of a parenthesized
    /// expression), never one token past it, except through `pushback`.
    fn parse_default_value(&mut self) -> Result<DefaultValue> {
        match self.next()? {
            TokenKind::Str => Ok(DefaultValue::String(self.tok.str_value().to_string())),
            TokenKind::Integer => Ok(DefaultValue::Number(self.tok.int_value().to_string())),
            TokenKind::Double => Ok(DefaultValue::Number(self.tok.double_value().to_string())),
            TokenKind::Null => Ok(DefaultValue::Null),
            TokenKind::LeftParen => {
                // A single parenthesized expression, kept verbatim.
                let mut expr = String::from("(");
                let mut depth = 1usize;
                while depth > 0 {
                    match self.next()? {
                        TokenKind::LeftParen => {
                            depth += 1;
                            expr.push('(');
                        }
                        TokenKind::RightParen => {
                            depth -= 1;
                            expr.push(')');
                        }
                        TokenKind::Identifier => expr.push_str(self.tok.str_value()),
                        TokenKind::Integer => expr.push_str(&self.tok.int_value().to_string()),
                        TokenKind::Double => expr.push_str(&self.tok.double_value().to_string()),
                        TokenKind::Comma => expr.push(','),
                        TokenKind::Null => expr.push_str("NULL"),
                        TokenKind::Str => {
                            expr.push('\'');
                            expr.push_str(self.tok.str_value());
                            expr.push('\'');
                        }
                        other => return Err(self.err(format!("unexpected token in DEFAULT (...): {other:?}"))),
                    }
                }
                Ok(DefaultValue::Expression(expr))
            }
            TokenKind::Identifier => {
                let mut expr = self.tok.str_value().to_string();
                let after = self.next()?;
                if after != TokenKind::LeftParen {
                    self.pushback = Some(after);
                    return Ok(DefaultValue::Expression(expr));
                }
                expr.push('(');
                loop {
                    match self.next()? {
                        TokenKind::RightParen => {
                            expr.push(')');
                            break;
                        }
                        TokenKind::Identifier => expr.push_str(self.tok.str_value()),
                        TokenKind::Integer => expr.push_str(&self.tok.int_value().to_string()),
                        TokenKind::Comma => expr.push(','),
                        other => return Err(self.err(format!("unexpected token in DEFAULT(...): {other:?}"))),
                    }
                }
                Ok(DefaultValue::Expression(expr))
            }
            other => Err(self.err(format!("expected DEFAULT value, found {other:?}"))),
        }
    }

    /// Leaves the tokenizer positioned on the closing `)`.
    fn parse_column_list(&mut self) -> Result<Vec<IndexColumn>> {
        if self.next()? != TokenKind::LeftParen {
            return Err(self.err("expected `(` in column list"));
        }
        let mut columns = Vec::new();
        loop {
            if self.next()? != TokenKind::Identifier {
                return Err(self.err("expected column name in column list"));
            }
            let name = self.tok.str_value().to_string();
            let mut prefix_length = None;
            let mut k = self.next()?;
            if k == TokenKind::LeftParen {
                if self.next()? != TokenKind::Integer {
                    return Err(self.err("expected integer prefix length"));
                }
                prefix_length = Some(self.tok.int_value() as u32);
                if self.next()? != TokenKind::RightParen {
                    return Err(self.err("expected `)` after prefix length"));
                }
                k = self.next()?;
            }
            columns.push(IndexColumn { name, prefix_length });
            match k {
                TokenKind::Comma => continue,
                TokenKind::RightParen => break,
                other => return Err(self.err(format!("expected `,` or `)` in column list, found {other:?}"))),
            }
        }
        Ok(columns)
    }

    /// Caller has already consumed any mandatory `KEY`/`INDEX` keyword.
    /// Reads one token: if it's an identifier, that's the index name;
    /// otherwise (it's the column list's opening `(`) there is no name.
    fn parse_optional_index_name(&mut self) -> Result<Option<String>> {
        let k = self.next()?;
        if k == TokenKind::Identifier {
            Ok(Some(self.tok.str_value().to_string()))
        } else {
            self.pushback = Some(k);
            Ok(None)
        }
    }

    /// After `parse_column_list` leaves the tokenizer on the closing `)`,
    /// consumes an optional `USING <ident>` clause and leaves the result
    /// (the real separator that follows) in `pushback` for the caller's
    /// `parse()` loop to pick up.
    fn consume_optional_using_clause(&mut self) -> Result<()> {
        let mut k = self.next()?;
        if k == TokenKind::Identifier && self.tok.str_value().eq_ignore_ascii_case("USING") {
            self.next()?; // index method identifier, discarded
            k = self.next()?;
        }
        self.pushback = Some(k);
        Ok(())
    }

    fn parse_referential_action(&mut self) -> Result<ReferentialAction> {
        if self.next()? != TokenKind::Identifier {
            return Err(self.err("expected referential action"));
        }
        let first = self.tok.str_value().to_ascii_uppercase();
        if first == "NO" {
            self.expect_identifier("ACTION")?;
            return Ok(ReferentialAction::NoAction);
        }
        if first == "SET" {
            // NULL lexes as its own token kind, not as an identifier.
            if self.next()? != TokenKind::Null {
                return Err(self.err("expected NULL after SET"));
            }
            return Ok(ReferentialAction::SetNull);
        }
        ReferentialAction::parse(&first).ok_or_else(|| self.err(format!("unknown referential action `{first}`")))
    }

    /// `word` is the already-consumed, uppercased constraint keyword that
    /// triggered this call.
    fn parse_table_constraint(&mut self, table: &mut Table, word: &str) -> Result<()> {
        match word {
            "PRIMARY" => {
                self.expect_identifier("KEY")?;
                let columns = self.parse_column_list()?;
                table.indexes.push(Index { name: None, kind: IndexKind::Primary, columns });
                self.consume_optional_using_clause()?;
            }
            "UNIQUE" | "FULLTEXT" => {
                self.expect_identifier("KEY")?;
                let name = self.parse_optional_index_name()?;
                let columns = self.parse_column_list()?;
                let kind = if word == "UNIQUE" { IndexKind::Unique } else { IndexKind::Fulltext };
                table.indexes.push(Index { name, kind, columns });
                self.consume_optional_using_clause()?;
            }
            "KEY" | "INDEX" => {
                let name = self.parse_optional_index_name()?;
                let columns = self.parse_column_list()?;
                table.indexes.push(Index { name, kind: IndexKind::Regular, columns });
                self.consume_optional_using_clause()?;
            }
            "CONSTRAINT" | "FOREIGN" => {
                let name = if word == "CONSTRAINT" {
                    let n = self.parse_optional_index_name()?;
                    self.expect_identifier("FOREIGN")?;
                    n
                } else {
                    None
                };
                self.expect_identifier("KEY")?;
                let columns = self.parse_column_list()?.into_iter().map(|c| c.name).collect();
                self.expect_identifier("REFERENCES")?;
                if self.next()? != TokenKind::Identifier {
                    return Err(self.err("expected referenced table name"));
                }
                let reference_table = self.tok.str_value().to_string();
                let reference_columns = self.parse_column_list()?.into_iter().map(|c| c.name).collect();

                let mut on_delete = None;
                let mut on_update = None;
                let mut k = self.next()?;
                while k == TokenKind::Identifier && self.tok.str_value().eq_ignore_ascii_case("ON") {
                    if self.next()? != TokenKind::Identifier {
                        return Err(self.err("expected DELETE or UPDATE after ON"));
                    }
                    let is_delete = self.tok.str_value().eq_ignore_ascii_case("DELETE");
                    let action = self.parse_referential_action()?;
                    if is_delete {
                        on_delete = Some(action);
                    } else {
                        on_update = Some(action);
                    }
                    k = self.next()?;
                }
                if k == TokenKind::Identifier && self.tok.str_value().eq_ignore_ascii_case("USING") {
                    self.next()?; // index method identifier, discarded
                    k = self.next()?;
                }
                self.pushback = Some(k);
                table.foreign_keys.push(ForeignKey {
                    name,
                    columns,
                    reference_table,
                    reference_columns,
                    on_delete,
                    on_update,
                });
            }
            _ => unreachable!("caller already filtered to known constraint keywords"),
        }
        Ok(())
    }
}
