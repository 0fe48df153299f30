//! Recursive-descent parser with one token of lookahead. The right-hand
//! side of an assignment is parsed in the expression category matching the
//! declared type of the target, so diagnostics stay per-category.

pub mod ast;

use std::collections::{BTreeSet, HashMap};

use crate::error::ParseError;
use crate::lexer::{Item, ItemKind, Lexer};
use crate::value::{self, BytesField, BytesLayout, BytesValue, Value, ValueType};
use ast::*;

/// OID prefix applied to declarations and literals without a leading dot.
pub const DEFAULT_OID_PREFIX: &str = ".1.3.6.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Zero,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpMode {
    Read,
    ReadWrite,
}

/// Compile-time descriptor of one declared variable. Created by the parser
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct VarType {
    pub value_type: ValueType,
    /// Canonical absolute OID with leading dot, or empty when not exposed.
    pub oid: String,
    pub init_mode: InitMode,
    pub snmp_mode: SnmpMode,
    pub line: usize,
    /// Field table, bytes variables only.
    pub layout: Option<BytesLayout>,
}

impl VarType {
    /// The value a Zero-initialized variable starts with.
    pub fn zero_value(&self, prefix: &str) -> Value {
        match self.value_type {
            ValueType::Integer => Value::Integer(0),
            ValueType::Counter => Value::Counter(0),
            ValueType::TimeTicks => Value::TimeTicks(0),
            ValueType::Gauge => Value::Gauge(0),
            ValueType::Str => Value::Str(String::new()),
            ValueType::Boolean => Value::Boolean(false),
            ValueType::Bitset => Value::Bitset(BTreeSet::new()),
            ValueType::Oid => Value::Oid(prefix.to_string()),
            ValueType::Ipv4Address => Value::Ipv4Address([0, 0, 0, 0]),
            ValueType::Bytes => Value::Bytes(BytesValue::zeroed(
                self.layout.clone().unwrap_or(BytesLayout { fields: Vec::new() }),
            )),
            ValueType::None => Value::None,
        }
    }
}

/// Symbol tables built from the var block: identifier index, OID index, and
/// the program-wide alias namespace.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    pub types: HashMap<String, VarType>,
    /// OID -> identifier; omits booleans and OID-less variables.
    pub by_oid: HashMap<String, String>,
    pub aliases: HashMap<String, i64>,
    pub prefix: String,
}

impl Variables {
    pub fn lookup_type(&self, id: &str) -> ValueType {
        self.types
            .get(id)
            .map(|t| t.value_type)
            .unwrap_or(ValueType::None)
    }

    /// Identifiers in declaration order, for deterministic initialization.
    pub fn ids_by_line(&self) -> Vec<String> {
        let mut ids: Vec<(&String, usize)> =
            self.types.iter().map(|(id, t)| (id, t.line)).collect();
        ids.sort_by_key(|(_, line)| *line);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub variables: Variables,
    pub statements: Vec<Statement>,
}

pub struct Parser {
    lexer: Lexer,
    token: Item,
    hold: bool,
    prefix_oid: String,
    variables: Variables,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Parser {
        Parser {
            lexer,
            token: Item {
                kind: ItemKind::Eof,
                text: String::new(),
                line: 0,
                pos: 0,
            },
            hold: false,
            prefix_oid: DEFAULT_OID_PREFIX.to_string(),
            variables: Variables {
                prefix: DEFAULT_OID_PREFIX.to_string(),
                ..Variables::default()
            },
        }
    }

    /// Parser seeded with an existing symbol table, used for init-value
    /// snippets so alias substitution works.
    fn for_snippet(lexer: Lexer, variables: Variables) -> Parser {
        let mut parser = Parser::new(lexer);
        parser.variables = variables;
        parser
    }

    // ---- token plumbing ----

    fn next_item(&mut self) -> Result<Item, ParseError> {
        if self.hold {
            self.hold = false;
        } else {
            self.token = self.lexer.next_item();
        }
        if self.token.kind == ItemKind::Error {
            return Err(ParseError::new(self.token.line, self.token.text.clone()));
        }
        Ok(self.token.clone())
    }

    fn peek(&mut self) -> Result<Item, ParseError> {
        if !self.hold {
            self.token = self.lexer.next_item();
            self.hold = true;
        }
        if self.token.kind == ItemKind::Error {
            return Err(ParseError::new(self.token.line, self.token.text.clone()));
        }
        Ok(self.token.clone())
    }

    fn expect(&mut self, kind: ItemKind, context: &str) -> Result<Item, ParseError> {
        let item = self.next_item()?;
        if item.kind != kind {
            return Err(self.errorf(format!(
                "expecting {} in {} but got \"{}\"",
                kind, context, item.kind
            )));
        }
        Ok(item)
    }

    fn errorf(&self, message: String) -> ParseError {
        ParseError::new(self.token.line, message)
    }

    fn lookup_type(&self, id: &str) -> ValueType {
        self.variables.lookup_type(id)
    }

    // ---- program structure ----

    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        self.parse_variables()?;
        self.expect(ItemKind::Run, "program")?;
        self.expect(ItemKind::NewLine, "program")?;
        let statements = self.parse_statement_list()?;
        self.expect(ItemKind::EndRun, "program")?;
        Ok(Program {
            variables: self.variables,
            statements,
        })
    }

    fn parse_variables(&mut self) -> Result<(), ParseError> {
        if self.peek()?.kind != ItemKind::Var {
            // no variables to process
            return Ok(());
        }
        self.next_item()?;
        self.expect(ItemKind::NewLine, "var block")?;

        loop {
            let item = self.next_item()?;
            match item.kind {
                ItemKind::EndVar => {
                    self.expect(ItemKind::NewLine, "var block end")?;
                    return Ok(());
                }
                ItemKind::Eof => {
                    return Err(self.errorf("cannot find endvar".to_string()));
                }
                ItemKind::Identifier => {
                    let id = item.text;
                    if self.variables.types.contains_key(&id) {
                        return Err(
                            self.errorf(format!("variable \"{}\" already declared", id))
                        );
                    }
                    let init_mode = match self.next_item()?.kind {
                        ItemKind::Colon => InitMode::Zero,
                        ItemKind::GreaterThan => InitMode::External,
                        _ => {
                            return Err(self.errorf(
                                "expecting ':' or '>' after variable identifier".to_string(),
                            ));
                        }
                    };
                    let typ = self.parse_type(init_mode)?;
                    if !typ.oid.is_empty() {
                        if self.variables.by_oid.contains_key(&typ.oid) {
                            return Err(self.errorf(format!(
                                "OID {} already bound to another variable",
                                typ.oid
                            )));
                        }
                        self.variables.by_oid.insert(typ.oid.clone(), id.clone());
                    }
                    self.variables.types.insert(id, typ);
                    self.expect(ItemKind::NewLine, "variable declaration")?;
                }
                _ => {
                    return Err(self.errorf(format!(
                        "unexpected token \"{}\" in variables section",
                        item.kind
                    )));
                }
            }
        }
    }

    fn parse_type(&mut self, init_mode: InitMode) -> Result<VarType, ParseError> {
        let mut item = self.next_item()?;
        let line = item.line;
        let mut oid = String::new();
        let mut snmp_mode = SnmpMode::Read;

        // optional OID, optionally followed by rw
        if item.kind == ItemKind::OidLiteral || item.kind == ItemKind::IntLiteral {
            oid = self.canonical_oid(&item.text)?;
            item = self.next_item()?;
            if item.kind == ItemKind::Rw {
                snmp_mode = SnmpMode::ReadWrite;
                item = self.next_item()?;
            }
        }

        let value_type = match item.kind {
            ItemKind::TypeString => ValueType::Str,
            ItemKind::TypeInteger => ValueType::Integer,
            ItemKind::TypeCounter => {
                if snmp_mode == SnmpMode::ReadWrite {
                    return Err(self.errorf(
                        "counter type can not be in rw mode as it cannot be set".to_string(),
                    ));
                }
                ValueType::Counter
            }
            ItemKind::TypeTimeticks => ValueType::TimeTicks,
            ItemKind::TypeGauge => ValueType::Gauge,
            ItemKind::TypeBoolean => {
                if !oid.is_empty() {
                    return Err(
                        self.errorf("boolean type can not have an OID".to_string())
                    );
                }
                ValueType::Boolean
            }
            ItemKind::TypeIpaddress => ValueType::Ipv4Address,
            ItemKind::TypeBitset => ValueType::Bitset,
            ItemKind::TypeOid => ValueType::Oid,
            ItemKind::TypeBytes => ValueType::Bytes,
            _ => return Err(self.errorf("expecting a variable type".to_string())),
        };

        // optional aliases: [ 1 = 'blah', 2 = 'bloh' ]
        let mut layout = None;
        if (value_type == ValueType::Integer || value_type == ValueType::Bitset)
            && self.peek()?.kind == ItemKind::LeftBracket
        {
            self.next_item()?;
            self.parse_alias_map()?;
        } else if value_type == ValueType::Bytes {
            self.expect(ItemKind::LeftBracket, "bytes field table")?;
            layout = Some(self.parse_field_map()?);
        }

        Ok(VarType {
            value_type,
            oid,
            init_mode,
            snmp_mode,
            line,
            layout,
        })
    }

    fn parse_alias_map(&mut self) -> Result<(), ParseError> {
        loop {
            if self.peek()?.kind == ItemKind::RightBracket {
                self.next_item()?;
                return Ok(());
            }
            let num = self.expect(ItemKind::IntLiteral, "alias")?;
            self.expect(ItemKind::Equals, "alias")?;
            let alias = self.expect(ItemKind::AliasLiteral, "alias")?;

            let n = parse_int_text(&num.text)
                .map_err(|e| self.errorf(e))?;
            if self.variables.aliases.contains_key(&alias.text) {
                return Err(
                    self.errorf(format!("cannot redefine existing alias \"{}\"", alias.text))
                );
            }
            self.variables.aliases.insert(alias.text, n);

            if self.peek()?.kind == ItemKind::Comma {
                self.next_item()?;
            }
        }
    }

    fn parse_field_map(&mut self) -> Result<BytesLayout, ParseError> {
        let mut fields: Vec<BytesField> = Vec::new();
        loop {
            if self.peek()?.kind == ItemKind::RightBracket {
                self.next_item()?;
                break;
            }
            let name = self.expect(ItemKind::AliasLiteral, "byte field")?;
            self.expect(ItemKind::Equals, "byte field")?;
            let size = self.expect(ItemKind::IntLiteral, "byte field")?;

            if fields.iter().any(|f| f.name == name.text) {
                return Err(self.errorf(format!("duplicate byte field '{}'", name.text)));
            }
            let size = parse_int_text(&size.text).map_err(|e| self.errorf(e))?;
            if !(1..=8).contains(&size) {
                return Err(self.errorf(format!(
                    "byte field '{}' size must be 1 to 8, got {}",
                    name.text, size
                )));
            }
            fields.push(BytesField {
                name: name.text,
                size: size as u8,
            });

            if self.peek()?.kind == ItemKind::Comma {
                self.next_item()?;
            }
        }
        if fields.is_empty() {
            return Err(self.errorf("bytes type requires at least one field".to_string()));
        }
        Ok(BytesLayout { fields })
    }

    /// Join a declared or literal OID to the prefix unless it is absolute,
    /// validating the components.
    fn canonical_oid(&self, text: &str) -> Result<String, ParseError> {
        let joined = if text.starts_with('.') {
            text.to_string()
        } else {
            format!("{}.{}", self.prefix_oid, text)
        };
        value::parse_oid(&joined).map_err(|e| self.errorf(e))?;
        Ok(joined)
    }

    // ---- statements ----

    fn parse_statement_list(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            let kind = self.peek()?.kind;
            if matches!(
                kind,
                ItemKind::EndRun | ItemKind::EndLoop | ItemKind::EndIf | ItemKind::Else
                    | ItemKind::ElseIf
            ) {
                return Ok(stmts);
            }
            stmts.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let item = self.peek()?;
        match item.kind {
            ItemKind::Identifier => Ok(Statement::Assignment(self.parse_assignment()?)),
            ItemKind::If => {
                self.next_item()?;
                Ok(Statement::If(self.parse_if()?))
            }
            ItemKind::Loop => {
                self.next_item()?;
                Ok(Statement::Loop(self.parse_loop()?))
            }
            ItemKind::Print => {
                self.next_item()?;
                Ok(Statement::Print(self.parse_print()?))
            }
            ItemKind::Sleep => {
                self.next_item()?;
                Ok(Statement::Sleep(self.parse_sleep()?))
            }
            ItemKind::Exit => {
                self.next_item()?;
                self.expect(ItemKind::NewLine, "exit")?;
                Ok(Statement::Exit)
            }
            ItemKind::Read => {
                self.next_item()?;
                Ok(Statement::Read(self.parse_read()?))
            }
            _ => Err(self.errorf(format!(
                "missing leading statement token, got \"{}\"",
                item.kind
            ))),
        }
    }

    fn parse_assignment(&mut self) -> Result<AssignStatement, ParseError> {
        let id_item = self.next_item()?;
        let identifier = id_item.text;

        // optional bytes-field qualifier: id['field']
        let mut field = None;
        if self.peek()?.kind == ItemKind::LeftBracket {
            self.next_item()?;
            let name = self.expect(ItemKind::AliasLiteral, "field qualifier")?;
            self.expect(ItemKind::RightBracket, "field qualifier")?;
            field = Some(name.text);
        }

        self.expect(ItemKind::Equals, "assignment")?;

        let id_type = self.lookup_type(&identifier);
        if field.is_some() && id_type != ValueType::Bytes {
            return Err(self.errorf(format!(
                "field qualifier on non-bytes variable \"{}\"",
                identifier
            )));
        }
        let exprn = match id_type {
            ValueType::Boolean => Expression::Bool(self.parse_bool_expression()?),
            ValueType::Integer | ValueType::Counter | ValueType::TimeTicks | ValueType::Gauge => {
                Expression::Int(self.parse_int_expression()?)
            }
            ValueType::Str => Expression::Str(self.parse_string_expression()?),
            ValueType::Bitset => Expression::Bitset(self.parse_bitset_expression()?),
            ValueType::Oid => Expression::Oid(self.parse_oid_expression()?),
            ValueType::Ipv4Address => Expression::Addr(self.parse_addr_expression()?),
            ValueType::Bytes => {
                let field_name = field.as_deref().ok_or_else(|| {
                    self.errorf(format!(
                        "bytes variable \"{}\" requires a field qualifier",
                        identifier
                    ))
                })?;
                let layout = self.variables.types[&identifier]
                    .layout
                    .as_ref()
                    .expect("bytes type carries a layout");
                if layout.field(field_name).is_none() {
                    return Err(self.errorf(format!(
                        "no field '{}' on variable \"{}\"",
                        field_name, identifier
                    )));
                }
                Expression::Int(self.parse_int_expression()?)
            }
            ValueType::None => {
                return Err(self.errorf(format!(
                    "assignment to undeclared variable: {}",
                    identifier
                )));
            }
        };

        self.expect(ItemKind::NewLine, "assignment")?;
        Ok(AssignStatement {
            identifier,
            field,
            exprn,
        })
    }

    fn parse_if(&mut self) -> Result<IfStatement, ParseError> {
        let condition = self.parse_bool_expression()?;
        self.expect(ItemKind::NewLine, "if statement")?;
        let then_stmts = self.parse_statement_list()?;

        let mut elseifs = Vec::new();
        let mut else_stmts = Vec::new();
        loop {
            let item = self.next_item()?;
            match item.kind {
                ItemKind::ElseIf => {
                    let condition = self.parse_bool_expression()?;
                    self.expect(ItemKind::NewLine, "elseif")?;
                    let stmts = self.parse_statement_list()?;
                    elseifs.push(ElseIf { condition, stmts });
                }
                ItemKind::Else => {
                    self.expect(ItemKind::NewLine, "else")?;
                    else_stmts = self.parse_statement_list()?;
                }
                ItemKind::EndIf => {
                    self.expect(ItemKind::NewLine, "if statement")?;
                    return Ok(IfStatement {
                        condition,
                        then_stmts,
                        elseifs,
                        else_stmts,
                    });
                }
                _ => return Err(self.errorf("bad token in if statement".to_string())),
            }
        }
    }

    fn parse_loop(&mut self) -> Result<LoopStatement, ParseError> {
        let kind = match self.peek()?.kind {
            ItemKind::NewLine => LoopKind::Forever,
            ItemKind::LoopTimes => {
                self.next_item()?;
                LoopKind::Times(self.parse_int_expression()?)
            }
            _ => LoopKind::While(self.parse_bool_expression()?),
        };

        self.expect(ItemKind::NewLine, "loop")?;
        let stmts = self.parse_statement_list()?;
        self.expect(ItemKind::EndLoop, "loop")?;
        self.expect(ItemKind::NewLine, "loop")?;
        Ok(LoopStatement { kind, stmts })
    }

    fn parse_print(&mut self) -> Result<PrintStatement, ParseError> {
        let exprn = self.parse_string_expression()?;
        self.expect(ItemKind::NewLine, "print statement")?;
        Ok(PrintStatement { exprn })
    }

    fn parse_sleep(&mut self) -> Result<SleepStatement, ParseError> {
        let exprn = self.parse_int_expression()?;
        let item = self.next_item()?;
        let units = match item.kind {
            ItemKind::Secs => TimeUnit::Secs,
            ItemKind::Msecs => TimeUnit::Msecs,
            _ => {
                return Err(self.errorf(format!(
                    "expecting time units in sleep statement but got \"{}\"",
                    item.kind
                )));
            }
        };
        self.expect(ItemKind::NewLine, "sleep statement")?;
        Ok(SleepStatement { exprn, units })
    }

    fn parse_read(&mut self) -> Result<ReadStatement, ParseError> {
        let item = self.expect(ItemKind::Identifier, "read")?;
        let id = item.text;
        let typ = self
            .variables
            .types
            .get(&id)
            .ok_or_else(|| self.errorf("unable to read on undefined variable".to_string()))?;
        if typ.oid.is_empty() {
            return Err(self.errorf("unable to read on non OID variable".to_string()));
        }
        if typ.snmp_mode != SnmpMode::ReadWrite {
            return Err(self.errorf("unable to read on non rw OID variable".to_string()));
        }
        self.expect(ItemKind::NewLine, "read")?;
        Ok(ReadStatement { identifier: id })
    }

    // ---- boolean expressions ----

    fn parse_bool_expression(&mut self) -> Result<BoolExpression, ParseError> {
        let mut or_terms = vec![self.parse_bool_term()?];
        while self.peek()?.kind == ItemKind::Or {
            self.next_item()?;
            or_terms.push(self.parse_bool_term()?);
        }
        Ok(BoolExpression { or_terms })
    }

    fn parse_bool_term(&mut self) -> Result<BoolTerm, ParseError> {
        let mut and_factors = vec![self.parse_bool_factor()?];
        while self.peek()?.kind == ItemKind::And {
            self.next_item()?;
            and_factors.push(self.parse_bool_factor()?);
        }
        Ok(BoolTerm { and_factors })
    }

    fn parse_bool_factor(&mut self) -> Result<BoolFactor, ParseError> {
        let item = self.peek()?;
        match item.kind {
            ItemKind::Identifier if self.lookup_type(&item.text) == ValueType::Boolean => {
                self.next_item()?;
                Ok(BoolFactor::Variable(item.text))
            }
            ItemKind::Identifier if self.lookup_type(&item.text) == ValueType::Bitset => {
                self.next_item()?;
                self.expect(ItemKind::Contains, "bitset predicate")?;
                let position = self.parse_int_expression()?;
                Ok(BoolFactor::Contains(BitsetContains {
                    identifier: item.text,
                    position,
                }))
            }
            ItemKind::True => {
                self.next_item()?;
                Ok(BoolFactor::Literal(true))
            }
            ItemKind::False => {
                self.next_item()?;
                Ok(BoolFactor::Literal(false))
            }
            ItemKind::Not => {
                self.next_item()?;
                Ok(BoolFactor::Not(Box::new(self.parse_bool_factor()?)))
            }
            ItemKind::LeftParen => {
                self.next_item()?;
                let exprn = self.parse_bool_expression()?;
                self.expect(ItemKind::RightParen, "bracketed expression")?;
                Ok(BoolFactor::Bracket(Box::new(exprn)))
            }
            _ => Ok(BoolFactor::Comparison(self.parse_int_comparison()?)),
        }
    }

    fn parse_int_comparison(&mut self) -> Result<IntComparison, ParseError> {
        let lhs = self.parse_int_expression()?;
        let item = self.next_item()?;
        let op = match item.kind {
            ItemKind::LessThan => CompareOp::LessThan,
            ItemKind::LessEquals => CompareOp::LessEquals,
            ItemKind::GreaterThan => CompareOp::GreaterThan,
            ItemKind::GreaterEquals => CompareOp::GreaterEquals,
            ItemKind::Equals => CompareOp::Equals,
            _ => return Err(self.errorf("bad operator for integer comparison".to_string())),
        };
        let rhs = self.parse_int_expression()?;
        Ok(IntComparison { op, lhs, rhs })
    }

    // ---- integer expressions ----

    fn parse_int_expression(&mut self) -> Result<IntExpression, ParseError> {
        let first = self.parse_int_term()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek()?.kind {
                ItemKind::Plus => AddOp::Add,
                ItemKind::Minus => AddOp::Subtract,
                _ => break,
            };
            self.next_item()?;
            rest.push((op, self.parse_int_term()?));
        }
        Ok(IntExpression { first, rest })
    }

    fn parse_int_term(&mut self) -> Result<IntTerm, ParseError> {
        let first = self.parse_int_factor()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek()?.kind {
                ItemKind::Star => MulOp::Multiply,
                ItemKind::Slash => MulOp::Divide,
                _ => break,
            };
            self.next_item()?;
            rest.push((op, self.parse_int_factor()?));
        }
        Ok(IntTerm { first, rest })
    }

    fn parse_int_factor(&mut self) -> Result<IntFactor, ParseError> {
        let item = self.next_item()?;
        match item.kind {
            ItemKind::Identifier => {
                if !self.lookup_type(&item.text).is_numeric() {
                    return Err(
                        self.errorf("not numeric variable in integer expression".to_string())
                    );
                }
                Ok(IntFactor::Variable(item.text))
            }
            ItemKind::IntLiteral => {
                let n = parse_int_text(&item.text).map_err(|e| self.errorf(e))?;
                Ok(IntFactor::Literal(n))
            }
            ItemKind::AliasLiteral => {
                let n = self
                    .variables
                    .aliases
                    .get(&item.text)
                    .copied()
                    .ok_or_else(|| self.errorf(format!("invalid integer alias '{}'", item.text)))?;
                Ok(IntFactor::Literal(n))
            }
            ItemKind::Minus => Ok(IntFactor::Negate(Box::new(self.parse_int_factor()?))),
            ItemKind::LeftParen => {
                let exprn = self.parse_int_expression()?;
                self.expect(ItemKind::RightParen, "bracketed expression")?;
                Ok(IntFactor::Bracket(Box::new(exprn)))
            }
            _ => Err(self.errorf("invalid item in integer factor".to_string())),
        }
    }

    // ---- string expressions ----

    fn parse_string_expression(&mut self) -> Result<StringExpression, ParseError> {
        let mut terms = vec![self.parse_string_term()?];
        while self.peek()?.kind == ItemKind::Plus {
            self.next_item()?;
            terms.push(self.parse_string_term()?);
        }
        Ok(StringExpression { terms })
    }

    fn parse_string_term(&mut self) -> Result<StringTerm, ParseError> {
        let item = self.next_item()?;
        match item.kind {
            ItemKind::Identifier => {
                if self.lookup_type(&item.text) != ValueType::Str {
                    return Err(
                        self.errorf("not string variable in string expression".to_string())
                    );
                }
                Ok(StringTerm::Variable(item.text))
            }
            ItemKind::StringLiteral => Ok(StringTerm::Literal(item.text)),
            ItemKind::LeftParen => {
                let exprn = self.parse_string_expression()?;
                self.expect(ItemKind::RightParen, "bracketed expression")?;
                Ok(StringTerm::Bracket(Box::new(exprn)))
            }
            ItemKind::StrBool => {
                self.expect(ItemKind::LeftParen, "strBool")?;
                let exprn = self.parse_bool_expression()?;
                self.expect(ItemKind::RightParen, "strBool")?;
                Ok(StringTerm::StrBool(exprn))
            }
            ItemKind::StrInt | ItemKind::StrCounter | ItemKind::StrTimeticks
            | ItemKind::StrGauge => {
                self.expect(ItemKind::LeftParen, "stringify")?;
                let exprn = self.parse_int_expression()?;
                self.expect(ItemKind::RightParen, "stringify")?;
                Ok(StringTerm::StrInt(exprn))
            }
            ItemKind::StrOid => {
                self.expect(ItemKind::LeftParen, "strOid")?;
                let exprn = self.parse_oid_expression()?;
                self.expect(ItemKind::RightParen, "strOid")?;
                Ok(StringTerm::StrOid(exprn))
            }
            ItemKind::StrIpaddress => {
                self.expect(ItemKind::LeftParen, "strIpaddress")?;
                let exprn = self.parse_addr_expression()?;
                self.expect(ItemKind::RightParen, "strIpaddress")?;
                Ok(StringTerm::StrIpaddress(exprn))
            }
            ItemKind::StrBitset => {
                self.expect(ItemKind::LeftParen, "strBitset")?;
                let exprn = self.parse_bitset_expression()?;
                self.expect(ItemKind::RightParen, "strBitset")?;
                Ok(StringTerm::StrBitset(exprn))
            }
            _ => Err(self.errorf("invalid string term".to_string())),
        }
    }

    // ---- bitset expressions ----

    fn parse_bitset_expression(&mut self) -> Result<BitsetExpression, ParseError> {
        let first = self.parse_bitset_term()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek()?.kind {
                ItemKind::Plus => BitsetOp::Union,
                ItemKind::Minus => BitsetOp::Difference,
                _ => break,
            };
            self.next_item()?;
            rest.push((op, self.parse_bitset_term()?));
        }
        Ok(BitsetExpression { first, rest })
    }

    fn parse_bitset_term(&mut self) -> Result<BitsetTerm, ParseError> {
        let item = self.next_item()?;
        match item.kind {
            ItemKind::Identifier => {
                if self.lookup_type(&item.text) != ValueType::Bitset {
                    return Err(
                        self.errorf("not bitset variable in bitset expression".to_string())
                    );
                }
                Ok(BitsetTerm::Variable(item.text))
            }
            ItemKind::LeftBracket => Ok(BitsetTerm::Literal(self.parse_bitset_positions()?)),
            ItemKind::LeftParen => {
                let exprn = self.parse_bitset_expression()?;
                self.expect(ItemKind::RightParen, "bracketed expression")?;
                Ok(BitsetTerm::Bracket(Box::new(exprn)))
            }
            _ => Err(self.errorf("invalid bitset term".to_string())),
        }
    }

    /// Bit positions inside `[ ... ]`: int expressions (aliases included)
    /// with optional commas.
    fn parse_bitset_positions(&mut self) -> Result<Vec<IntExpression>, ParseError> {
        let mut positions = Vec::new();
        loop {
            match self.peek()?.kind {
                ItemKind::RightBracket => {
                    self.next_item()?;
                    return Ok(positions);
                }
                ItemKind::Comma => {
                    self.next_item()?;
                }
                _ => positions.push(self.parse_int_expression()?),
            }
        }
    }

    // ---- OID and address expressions ----

    fn parse_oid_expression(&mut self) -> Result<OidExpression, ParseError> {
        let mut terms = vec![self.parse_oid_term()?];
        while self.peek()?.kind == ItemKind::Plus {
            self.next_item()?;
            terms.push(self.parse_oid_term()?);
        }
        Ok(OidExpression { terms })
    }

    fn parse_oid_term(&mut self) -> Result<OidTerm, ParseError> {
        let item = self.next_item()?;
        match item.kind {
            ItemKind::Identifier => {
                if self.lookup_type(&item.text) != ValueType::Oid {
                    return Err(self.errorf("not oid variable in oid expression".to_string()));
                }
                Ok(OidTerm::Variable(item.text))
            }
            ItemKind::OidLiteral => {
                value::parse_oid(&item.text).map_err(|e| self.errorf(e))?;
                Ok(OidTerm::Literal(item.text))
            }
            ItemKind::LeftParen => {
                let exprn = self.parse_oid_expression()?;
                self.expect(ItemKind::RightParen, "bracketed expression")?;
                Ok(OidTerm::Bracket(Box::new(exprn)))
            }
            _ => Err(self.errorf("invalid oid term".to_string())),
        }
    }

    fn parse_addr_expression(&mut self) -> Result<AddrExpression, ParseError> {
        let item = self.next_item()?;
        match item.kind {
            ItemKind::Identifier => {
                if self.lookup_type(&item.text) != ValueType::Ipv4Address {
                    return Err(
                        self.errorf("not address variable in address expression".to_string())
                    );
                }
                Ok(AddrExpression::Variable(item.text))
            }
            ItemKind::OidLiteral => {
                let quad = value::parse_quad(&item.text).map_err(|e| self.errorf(e))?;
                Ok(AddrExpression::Literal(quad))
            }
            _ => Err(self.errorf("invalid address expression".to_string())),
        }
    }
}

/// Parse an integer literal, decimal or 0x hex.
fn parse_int_text(text: &str) -> Result<i64, String> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        text.parse::<i64>()
    };
    parsed.map_err(|_| format!("invalid integer literal \"{}\"", text))
}

// ---- init-value snippet parsing ----

/// Parse the textual initial value of an External variable (`-v` entry or
/// interactive prompt) under the declared type. Bitset snippets run through
/// the real parser so alias substitution works; anything that cannot be
/// constant-folded is rejected.
pub fn parse_init_value(
    text: &str,
    typ: &VarType,
    variables: &Variables,
) -> Result<Value, ParseError> {
    let text = text.trim();
    match typ.value_type {
        ValueType::Str => Ok(Value::Str(text.to_string())),
        ValueType::Boolean => match text {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(ParseError::new(
                typ.line,
                format!("expecting true or false, got \"{}\"", text),
            )),
        },
        ValueType::Ipv4Address => value::parse_quad(text)
            .map(Value::Ipv4Address)
            .map_err(|e| ParseError::new(typ.line, e)),
        ValueType::Oid => {
            let canonical = if text.starts_with('.') {
                text.to_string()
            } else {
                format!("{}.{}", variables.prefix, text)
            };
            value::parse_oid(&canonical).map_err(|e| ParseError::new(typ.line, e))?;
            Ok(Value::Oid(canonical))
        }
        ValueType::Integer | ValueType::Counter | ValueType::TimeTicks | ValueType::Gauge => {
            let mut parser = Parser::for_snippet(
                Lexer::spawn(text.to_string()),
                variables.clone(),
            );
            let exprn = parser.parse_int_expression()?;
            parser.expect_snippet_end()?;
            let n = fold_int_expression(&exprn).map_err(|e| ParseError::new(typ.line, e))?;
            Ok(Value::retag_integer(n, typ.value_type))
        }
        ValueType::Bitset => {
            let mut parser = Parser::for_snippet(
                Lexer::spawn(text.to_string()),
                variables.clone(),
            );
            let exprn = parser.parse_bitset_expression()?;
            parser.expect_snippet_end()?;
            let set = fold_bitset_expression(&exprn).map_err(|e| ParseError::new(typ.line, e))?;
            Ok(Value::Bitset(set))
        }
        ValueType::Bytes => Err(ParseError::new(
            typ.line,
            "bytes variables cannot be initialised externally".to_string(),
        )),
        ValueType::None => Err(ParseError::new(typ.line, "untyped variable".to_string())),
    }
}

impl Parser {
    /// After a snippet expression, only end of input (or a trailing newline)
    /// may remain.
    fn expect_snippet_end(&mut self) -> Result<(), ParseError> {
        loop {
            let item = self.next_item()?;
            match item.kind {
                ItemKind::NewLine => continue,
                ItemKind::Eof => return Ok(()),
                _ => {
                    return Err(self.errorf(format!(
                        "unexpected trailing \"{}\" after value",
                        item.kind
                    )));
                }
            }
        }
    }
}

// ---- constant folding for init values ----

fn fold_int_expression(exprn: &IntExpression) -> Result<i64, String> {
    let mut value = fold_int_term(&exprn.first)?;
    for (op, term) in &exprn.rest {
        let rhs = fold_int_term(term)?;
        value = match op {
            AddOp::Add => value.wrapping_add(rhs),
            AddOp::Subtract => value.wrapping_sub(rhs),
        };
    }
    Ok(value)
}

fn fold_int_term(term: &IntTerm) -> Result<i64, String> {
    let mut value = fold_int_factor(&term.first)?;
    for (op, factor) in &term.rest {
        let rhs = fold_int_factor(factor)?;
        value = match op {
            MulOp::Multiply => value.wrapping_mul(rhs),
            MulOp::Divide => {
                if rhs == 0 {
                    return Err("division by zero".to_string());
                }
                value / rhs
            }
        };
    }
    Ok(value)
}

fn fold_int_factor(factor: &IntFactor) -> Result<i64, String> {
    match factor {
        IntFactor::Literal(n) => Ok(*n),
        IntFactor::Variable(id) => Err(format!(
            "variable \"{}\" not allowed in an initial value",
            id
        )),
        IntFactor::Negate(inner) => Ok(-fold_int_factor(inner)?),
        IntFactor::Bracket(exprn) => fold_int_expression(exprn),
    }
}

fn fold_bitset_expression(exprn: &BitsetExpression) -> Result<BTreeSet<u32>, String> {
    let mut set = fold_bitset_term(&exprn.first)?;
    for (op, term) in &exprn.rest {
        let rhs = fold_bitset_term(term)?;
        match op {
            BitsetOp::Union => set.extend(rhs),
            BitsetOp::Difference => {
                for pos in rhs {
                    set.remove(&pos);
                }
            }
        }
    }
    Ok(set)
}

fn fold_bitset_term(term: &BitsetTerm) -> Result<BTreeSet<u32>, String> {
    match term {
        BitsetTerm::Literal(positions) => {
            let mut set = BTreeSet::new();
            for exprn in positions {
                let pos = fold_int_expression(exprn)?;
                if pos < 0 {
                    return Err(format!("negative bit position {} in bitset", pos));
                }
                set.insert(pos as u32);
            }
            Ok(set)
        }
        BitsetTerm::Variable(id) => Err(format!(
            "variable \"{}\" not allowed in an initial value",
            id
        )),
        BitsetTerm::Bracket(exprn) => fold_bitset_expression(exprn),
    }
}
