//! Tree-walking interpreter. Runs synchronously on a blocking task: `sleep`
//! parks the thread, `read` blocks on the variable's write-back channel, and
//! every assignment publishes a fresh value into the shared store.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::logger::Logger;
use crate::parser::ast::*;
use crate::parser::{Program, Variables};
use crate::store::ObjectStore;
use crate::value::{self, Value};

/// Result of running a statement list: either fall through or unwind to the
/// nearest loop (or the program) because of `exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Exit,
}

pub struct Interpreter {
    variables: Variables,
    store: Arc<ObjectStore>,
    /// Receiving half of each ReadWrite variable's write-back channel.
    readers: HashMap<String, mpsc::Receiver<Value>>,
    logger: Logger,
    out: Box<dyn Write + Send>,
}

impl Interpreter {
    pub fn new(
        variables: Variables,
        store: Arc<ObjectStore>,
        readers: HashMap<String, mpsc::Receiver<Value>>,
        logger: Logger,
    ) -> Interpreter {
        Interpreter {
            variables,
            store,
            readers,
            logger,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Redirect `print` output, used by tests.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Interpreter {
        self.out = out;
        self
    }

    /// Run the program to completion. A top-level `exit` ends it normally.
    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.exec_list(&program.statements)?;
        Ok(())
    }

    fn exec_list(&mut self, stmts: &[Statement]) -> Result<Flow, RuntimeError> {
        for stmt in stmts {
            if self.exec_statement(stmt)? == Flow::Exit {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_statement(&mut self, stmt: &Statement) -> Result<Flow, RuntimeError> {
        match stmt {
            Statement::Assignment(assign) => {
                self.exec_assignment(assign)?;
                Ok(Flow::Normal)
            }
            Statement::If(stmt) => self.exec_if(stmt),
            Statement::Loop(stmt) => {
                self.exec_loop(stmt)?;
                Ok(Flow::Normal)
            }
            Statement::Print(stmt) => {
                let text = self.eval_string_expression(&stmt.exprn)?;
                let _ = writeln!(self.out, "{}", text);
                Ok(Flow::Normal)
            }
            Statement::Sleep(stmt) => {
                let amount = self.eval_int_expression(&stmt.exprn)?;
                if amount > 0 {
                    let duration = match stmt.units {
                        TimeUnit::Secs => Duration::from_secs(amount as u64),
                        TimeUnit::Msecs => Duration::from_millis(amount as u64),
                    };
                    std::thread::sleep(duration);
                }
                Ok(Flow::Normal)
            }
            Statement::Read(stmt) => {
                self.exec_read(stmt)?;
                Ok(Flow::Normal)
            }
            Statement::Exit => Ok(Flow::Exit),
        }
    }

    fn exec_if(&mut self, stmt: &IfStatement) -> Result<Flow, RuntimeError> {
        if self.eval_bool_expression(&stmt.condition)? {
            return self.exec_list(&stmt.then_stmts);
        }
        for elseif in &stmt.elseifs {
            if self.eval_bool_expression(&elseif.condition)? {
                return self.exec_list(&elseif.stmts);
            }
        }
        self.exec_list(&stmt.else_stmts)
    }

    fn exec_loop(&mut self, stmt: &LoopStatement) -> Result<(), RuntimeError> {
        match &stmt.kind {
            LoopKind::Forever => loop {
                if self.exec_list(&stmt.stmts)? == Flow::Exit {
                    break;
                }
            },
            LoopKind::Times(exprn) => {
                // the count is evaluated once; non-positive means zero runs
                let n = self.eval_int_expression(exprn)?;
                for _ in 0..n.max(0) {
                    if self.exec_list(&stmt.stmts)? == Flow::Exit {
                        break;
                    }
                }
            }
            LoopKind::While(condition) => {
                while self.eval_bool_expression(condition)? {
                    if self.exec_list(&stmt.stmts)? == Flow::Exit {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn exec_assignment(&mut self, assign: &AssignStatement) -> Result<(), RuntimeError> {
        let typ = self
            .variables
            .types
            .get(&assign.identifier)
            .ok_or_else(|| RuntimeError::UndefinedVariable(assign.identifier.clone()))?
            .clone();

        if let Some(field) = &assign.field {
            let Expression::Int(exprn) = &assign.exprn else {
                return Err(RuntimeError::NoSuchField {
                    identifier: assign.identifier.clone(),
                    field: field.clone(),
                });
            };
            let n = self.eval_int_expression(exprn)?;
            return self.store.blocking_update_bytes_field(
                &assign.identifier,
                &typ.oid,
                field,
                n,
            );
        }

        let value = match &assign.exprn {
            Expression::Int(exprn) => {
                let n = self.eval_int_expression(exprn)?;
                Value::retag_integer(n, typ.value_type)
            }
            Expression::Bool(exprn) => Value::Boolean(self.eval_bool_expression(exprn)?),
            Expression::Str(exprn) => Value::Str(self.eval_string_expression(exprn)?),
            Expression::Bitset(exprn) => Value::Bitset(self.eval_bitset_expression(exprn)?),
            Expression::Oid(exprn) => Value::Oid(self.eval_oid_expression(exprn)?),
            Expression::Addr(exprn) => Value::Ipv4Address(self.eval_addr_expression(exprn)?),
        };
        self.store
            .blocking_publish(&assign.identifier, &typ.oid, value);
        Ok(())
    }

    fn exec_read(&mut self, stmt: &ReadStatement) -> Result<(), RuntimeError> {
        let oid = self
            .variables
            .types
            .get(&stmt.identifier)
            .map(|t| t.oid.clone())
            .unwrap_or_default();
        let receiver = self
            .readers
            .get_mut(&stmt.identifier)
            .ok_or_else(|| RuntimeError::ChannelClosed(stmt.identifier.clone()))?;
        let value = receiver
            .blocking_recv()
            .ok_or_else(|| RuntimeError::ChannelClosed(stmt.identifier.clone()))?;
        self.logger.log(format!(
            "read delivered {} to \"{}\"",
            value, stmt.identifier
        ));
        self.store
            .blocking_publish(&stmt.identifier, &oid, value);
        Ok(())
    }

    // ---- expression evaluation ----

    fn lookup(&self, id: &str) -> Result<Arc<Value>, RuntimeError> {
        self.store
            .blocking_get_by_id(id)
            .ok_or_else(|| RuntimeError::UndefinedVariable(id.to_string()))
    }

    fn eval_int_expression(&self, exprn: &IntExpression) -> Result<i64, RuntimeError> {
        let mut value = self.eval_int_term(&exprn.first)?;
        for (op, term) in &exprn.rest {
            let rhs = self.eval_int_term(term)?;
            value = match op {
                AddOp::Add => value.wrapping_add(rhs),
                AddOp::Subtract => value.wrapping_sub(rhs),
            };
        }
        Ok(value)
    }

    fn eval_int_term(&self, term: &IntTerm) -> Result<i64, RuntimeError> {
        let mut value = self.eval_int_factor(&term.first)?;
        for (op, factor) in &term.rest {
            let rhs = self.eval_int_factor(factor)?;
            value = match op {
                MulOp::Multiply => value.wrapping_mul(rhs),
                MulOp::Divide => {
                    if rhs == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    value.wrapping_div(rhs)
                }
            };
        }
        Ok(value)
    }

    fn eval_int_factor(&self, factor: &IntFactor) -> Result<i64, RuntimeError> {
        match factor {
            IntFactor::Literal(n) => Ok(*n),
            IntFactor::Variable(id) => Ok(match &*self.lookup(id)? {
                Value::Integer(n)
                | Value::Counter(n)
                | Value::TimeTicks(n)
                | Value::Gauge(n) => *n,
                _ => 0,
            }),
            IntFactor::Negate(inner) => Ok(self.eval_int_factor(inner)?.wrapping_neg()),
            IntFactor::Bracket(exprn) => self.eval_int_expression(exprn),
        }
    }

    fn eval_bool_expression(&self, exprn: &BoolExpression) -> Result<bool, RuntimeError> {
        // '|' stops at the first true operand
        for term in &exprn.or_terms {
            if self.eval_bool_term(term)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eval_bool_term(&self, term: &BoolTerm) -> Result<bool, RuntimeError> {
        // '&' stops at the first false operand
        for factor in &term.and_factors {
            if !self.eval_bool_factor(factor)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_bool_factor(&self, factor: &BoolFactor) -> Result<bool, RuntimeError> {
        match factor {
            BoolFactor::Literal(b) => Ok(*b),
            BoolFactor::Variable(id) => Ok(matches!(&*self.lookup(id)?, Value::Boolean(true))),
            BoolFactor::Not(inner) => Ok(!self.eval_bool_factor(inner)?),
            BoolFactor::Bracket(exprn) => self.eval_bool_expression(exprn),
            BoolFactor::Comparison(cmp) => {
                let lhs = self.eval_int_expression(&cmp.lhs)?;
                let rhs = self.eval_int_expression(&cmp.rhs)?;
                Ok(match cmp.op {
                    CompareOp::LessThan => lhs < rhs,
                    CompareOp::LessEquals => lhs <= rhs,
                    CompareOp::GreaterThan => lhs > rhs,
                    CompareOp::GreaterEquals => lhs >= rhs,
                    CompareOp::Equals => lhs == rhs,
                })
            }
            BoolFactor::Contains(contains) => {
                let position = self.eval_int_expression(&contains.position)?;
                if position < 0 {
                    return Ok(false);
                }
                Ok(match &*self.lookup(&contains.identifier)? {
                    Value::Bitset(set) => set.contains(&(position as u32)),
                    _ => false,
                })
            }
        }
    }

    fn eval_string_expression(&self, exprn: &StringExpression) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for term in &exprn.terms {
            out.push_str(&self.eval_string_term(term)?);
        }
        Ok(out)
    }

    fn eval_string_term(&self, term: &StringTerm) -> Result<String, RuntimeError> {
        match term {
            StringTerm::Literal(text) => Ok(text.clone()),
            StringTerm::Variable(id) => Ok(match &*self.lookup(id)? {
                Value::Str(s) => s.clone(),
                _ => String::new(),
            }),
            StringTerm::Bracket(exprn) => self.eval_string_expression(exprn),
            StringTerm::StrInt(exprn) => Ok(self.eval_int_expression(exprn)?.to_string()),
            StringTerm::StrBool(exprn) => Ok(self.eval_bool_expression(exprn)?.to_string()),
            StringTerm::StrOid(exprn) => self.eval_oid_expression(exprn),
            StringTerm::StrIpaddress(exprn) => {
                Ok(value::format_quad(&self.eval_addr_expression(exprn)?))
            }
            StringTerm::StrBitset(exprn) => {
                Ok(value::format_bitset(&self.eval_bitset_expression(exprn)?))
            }
        }
    }

    fn eval_bitset_expression(
        &self,
        exprn: &BitsetExpression,
    ) -> Result<BTreeSet<u32>, RuntimeError> {
        // strictly left to right: ((a + b) + c) - d
        let mut set = self.eval_bitset_term(&exprn.first)?;
        for (op, term) in &exprn.rest {
            let rhs = self.eval_bitset_term(term)?;
            match op {
                BitsetOp::Union => set.extend(rhs),
                BitsetOp::Difference => {
                    for position in rhs {
                        set.remove(&position);
                    }
                }
            }
        }
        Ok(set)
    }

    fn eval_bitset_term(&self, term: &BitsetTerm) -> Result<BTreeSet<u32>, RuntimeError> {
        match term {
            BitsetTerm::Literal(positions) => {
                let mut set = BTreeSet::new();
                for exprn in positions {
                    let position = self.eval_int_expression(exprn)?;
                    if position < 0 {
                        return Err(RuntimeError::NegativeBitPosition(position));
                    }
                    set.insert(position as u32);
                }
                Ok(set)
            }
            BitsetTerm::Variable(id) => Ok(match &*self.lookup(id)? {
                Value::Bitset(set) => set.clone(),
                _ => BTreeSet::new(),
            }),
            BitsetTerm::Bracket(exprn) => self.eval_bitset_expression(exprn),
        }
    }

    /// Join the terms with dots. The first term decides absoluteness: a
    /// leading dot is kept, otherwise the parser prefix is applied; later
    /// terms are suffixes.
    fn eval_oid_expression(&self, exprn: &OidExpression) -> Result<String, RuntimeError> {
        let joined = self.join_oid_terms(exprn)?;
        if joined.starts_with('.') {
            Ok(joined)
        } else {
            Ok(format!("{}.{}", self.variables.prefix, joined))
        }
    }

    fn join_oid_terms(&self, exprn: &OidExpression) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for (i, term) in exprn.terms.iter().enumerate() {
            let part = match term {
                OidTerm::Literal(text) => text.clone(),
                OidTerm::Variable(id) => match &*self.lookup(id)? {
                    Value::Oid(oid) => oid.clone(),
                    _ => String::new(),
                },
                OidTerm::Bracket(inner) => self.join_oid_terms(inner)?,
            };
            if i == 0 {
                out = part;
            } else {
                out.push('.');
                out.push_str(part.trim_start_matches('.'));
            }
        }
        Ok(out)
    }

    fn eval_addr_expression(&self, exprn: &AddrExpression) -> Result<[u8; 4], RuntimeError> {
        match exprn {
            AddrExpression::Literal(quad) => Ok(*quad),
            AddrExpression::Variable(id) => Ok(match &*self.lookup(id)? {
                Value::Ipv4Address(quad) => *quad,
                _ => [0, 0, 0, 0],
            }),
        }
    }
}
