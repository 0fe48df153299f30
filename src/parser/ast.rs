//! Syntax tree for the simulator script. Each value domain keeps its own
//! expression category; binary chains are ordered operator lists evaluated
//! left to right.

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assignment(AssignStatement),
    If(IfStatement),
    Loop(LoopStatement),
    Print(PrintStatement),
    Sleep(SleepStatement),
    Read(ReadStatement),
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignStatement {
    pub identifier: String,
    /// Set for a bytes-field target, e.g. `pkt['version'] = 3`.
    pub field: Option<String>,
    pub exprn: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    pub condition: BoolExpression,
    pub then_stmts: Vec<Statement>,
    pub elseifs: Vec<ElseIf>,
    pub else_stmts: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    pub condition: BoolExpression,
    pub stmts: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopKind {
    Forever,
    Times(IntExpression),
    While(BoolExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatement {
    pub kind: LoopKind,
    pub stmts: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintStatement {
    pub exprn: StringExpression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SleepStatement {
    pub exprn: IntExpression,
    pub units: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Secs,
    Msecs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadStatement {
    pub identifier: String,
}

/// Assignment right-hand side, in the category chosen from the declared type
/// of the target.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Int(IntExpression),
    Bool(BoolExpression),
    Str(StringExpression),
    Bitset(BitsetExpression),
    Oid(OidExpression),
    Addr(AddrExpression),
}

// ---- integers ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOp {
    Add,
    Subtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulOp {
    Multiply,
    Divide,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntExpression {
    pub first: IntTerm,
    pub rest: Vec<(AddOp, IntTerm)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntTerm {
    pub first: IntFactor,
    pub rest: Vec<(MulOp, IntFactor)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntFactor {
    Literal(i64),
    Variable(String),
    Negate(Box<IntFactor>),
    Bracket(Box<IntExpression>),
}

impl IntExpression {
    /// A bare constant, used where synthesized expressions are convenient.
    pub fn literal(n: i64) -> IntExpression {
        IntExpression {
            first: IntTerm {
                first: IntFactor::Literal(n),
                rest: Vec::new(),
            },
            rest: Vec::new(),
        }
    }
}

// ---- booleans ----

#[derive(Debug, Clone, PartialEq)]
pub struct BoolExpression {
    pub or_terms: Vec<BoolTerm>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoolTerm {
    pub and_factors: Vec<BoolFactor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoolFactor {
    Literal(bool),
    Variable(String),
    Not(Box<BoolFactor>),
    Bracket(Box<BoolExpression>),
    Comparison(IntComparison),
    Contains(BitsetContains),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
    Equals,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntComparison {
    pub op: CompareOp,
    pub lhs: IntExpression,
    pub rhs: IntExpression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitsetContains {
    pub identifier: String,
    pub position: IntExpression,
}

// ---- strings ----

#[derive(Debug, Clone, PartialEq)]
pub struct StringExpression {
    pub terms: Vec<StringTerm>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringTerm {
    Literal(String),
    Variable(String),
    Bracket(Box<StringExpression>),
    /// strInt / strCounter / strTimeticks / strGuage all format an integer
    /// expression the same way.
    StrInt(IntExpression),
    StrBool(BoolExpression),
    StrOid(OidExpression),
    StrIpaddress(AddrExpression),
    StrBitset(BitsetExpression),
}

// ---- bitsets ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitsetOp {
    Union,
    Difference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitsetExpression {
    pub first: BitsetTerm,
    pub rest: Vec<(BitsetOp, BitsetTerm)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BitsetTerm {
    /// Bit positions as integer expressions, resolved at run time.
    Literal(Vec<IntExpression>),
    Variable(String),
    Bracket(Box<BitsetExpression>),
}

// ---- OIDs and addresses ----

#[derive(Debug, Clone, PartialEq)]
pub struct OidExpression {
    pub terms: Vec<OidTerm>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OidTerm {
    Literal(String),
    Variable(String),
    Bracket(Box<OidExpression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddrExpression {
    Literal([u8; 4]),
    Variable(String),
}
