//! Script lexer. A dedicated scanner thread produces tokens into a
//! rendezvous channel; the parser pulls them with one token of lookahead.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use lazy_static::lazy_static;

/// One token, with the line it starts on and its character offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub kind: ItemKind,
    pub text: String,
    pub line: usize,
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    // literals and names
    IntLiteral,
    OidLiteral,
    StringLiteral,
    AliasLiteral,
    Identifier,
    // symbols
    Equals,
    NotEquals,
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
    Plus,
    Minus,
    Star,
    Slash,
    And,
    Or,
    Not,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Colon,
    Comma,
    // structure
    NewLine,
    Eof,
    Error,
    // keywords
    Var,
    EndVar,
    Run,
    EndRun,
    If,
    Else,
    ElseIf,
    EndIf,
    Loop,
    EndLoop,
    LoopTimes,
    Print,
    StrInt,
    StrBool,
    StrCounter,
    StrTimeticks,
    StrIpaddress,
    StrOid,
    StrBitset,
    StrGauge,
    TypeBoolean,
    TypeString,
    TypeInteger,
    TypeCounter,
    TypeTimeticks,
    TypeIpaddress,
    TypeBitset,
    TypeOid,
    TypeGauge,
    TypeBytes,
    True,
    False,
    Exit,
    Sleep,
    Secs,
    Msecs,
    Rw,
    Read,
    Contains,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ItemKind::IntLiteral => "int literal",
            ItemKind::OidLiteral => "OID",
            ItemKind::StringLiteral => "string literal",
            ItemKind::AliasLiteral => "alias",
            ItemKind::Identifier => "identifier",
            ItemKind::Equals => "=",
            ItemKind::NotEquals => "#",
            ItemKind::LessThan => "<",
            ItemKind::LessEquals => "<=",
            ItemKind::GreaterThan => ">",
            ItemKind::GreaterEquals => ">=",
            ItemKind::Plus => "+",
            ItemKind::Minus => "-",
            ItemKind::Star => "*",
            ItemKind::Slash => "/",
            ItemKind::And => "&",
            ItemKind::Or => "|",
            ItemKind::Not => "~",
            ItemKind::LeftParen => "(",
            ItemKind::RightParen => ")",
            ItemKind::LeftBracket => "[",
            ItemKind::RightBracket => "]",
            ItemKind::Colon => ":",
            ItemKind::Comma => ",",
            ItemKind::NewLine => "new line",
            ItemKind::Eof => "EOF",
            ItemKind::Error => "error",
            ItemKind::Var => "var",
            ItemKind::EndVar => "endvar",
            ItemKind::Run => "run",
            ItemKind::EndRun => "endrun",
            ItemKind::If => "if",
            ItemKind::Else => "else",
            ItemKind::ElseIf => "elseif",
            ItemKind::EndIf => "endif",
            ItemKind::Loop => "loop",
            ItemKind::EndLoop => "endloop",
            ItemKind::LoopTimes => "times",
            ItemKind::Print => "print",
            ItemKind::StrInt => "strInt",
            ItemKind::StrBool => "strBool",
            ItemKind::StrCounter => "strCounter",
            ItemKind::StrTimeticks => "strTimeticks",
            ItemKind::StrIpaddress => "strIpaddress",
            ItemKind::StrOid => "strOid",
            ItemKind::StrBitset => "strBitset",
            ItemKind::StrGauge => "strGuage",
            ItemKind::TypeBoolean => "boolean",
            ItemKind::TypeString => "string",
            ItemKind::TypeInteger => "integer",
            ItemKind::TypeCounter => "counter",
            ItemKind::TypeTimeticks => "timeticks",
            ItemKind::TypeIpaddress => "ipaddress",
            ItemKind::TypeBitset => "bitset",
            ItemKind::TypeOid => "oid",
            ItemKind::TypeGauge => "guage",
            ItemKind::TypeBytes => "bytes",
            ItemKind::True => "true",
            ItemKind::False => "false",
            ItemKind::Exit => "exit",
            ItemKind::Sleep => "sleep",
            ItemKind::Secs => "secs",
            ItemKind::Msecs => "msecs",
            ItemKind::Rw => "rw",
            ItemKind::Read => "read",
            ItemKind::Contains => "contains",
        };
        write!(f, "{}", name)
    }
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, ItemKind> = {
        let mut map = HashMap::new();
        map.insert("var", ItemKind::Var);
        map.insert("endvar", ItemKind::EndVar);
        map.insert("run", ItemKind::Run);
        map.insert("endrun", ItemKind::EndRun);
        map.insert("if", ItemKind::If);
        map.insert("else", ItemKind::Else);
        map.insert("elseif", ItemKind::ElseIf);
        map.insert("endif", ItemKind::EndIf);
        map.insert("loop", ItemKind::Loop);
        map.insert("endloop", ItemKind::EndLoop);
        map.insert("times", ItemKind::LoopTimes);
        map.insert("print", ItemKind::Print);
        map.insert("strInt", ItemKind::StrInt);
        map.insert("strBool", ItemKind::StrBool);
        map.insert("strCounter", ItemKind::StrCounter);
        map.insert("strTimeticks", ItemKind::StrTimeticks);
        map.insert("strIpaddress", ItemKind::StrIpaddress);
        map.insert("strOid", ItemKind::StrOid);
        map.insert("strBitset", ItemKind::StrBitset);
        map.insert("strGuage", ItemKind::StrGauge);
        map.insert("boolean", ItemKind::TypeBoolean);
        map.insert("string", ItemKind::TypeString);
        map.insert("integer", ItemKind::TypeInteger);
        // mimic C, java, go
        map.insert("int", ItemKind::TypeInteger);
        map.insert("counter", ItemKind::TypeCounter);
        map.insert("timeticks", ItemKind::TypeTimeticks);
        map.insert("ipaddress", ItemKind::TypeIpaddress);
        map.insert("bitset", ItemKind::TypeBitset);
        map.insert("oid", ItemKind::TypeOid);
        map.insert("guage", ItemKind::TypeGauge);
        map.insert("bytes", ItemKind::TypeBytes);
        map.insert("true", ItemKind::True);
        map.insert("false", ItemKind::False);
        map.insert("exit", ItemKind::Exit);
        map.insert("sleep", ItemKind::Sleep);
        map.insert("secs", ItemKind::Secs);
        map.insert("msecs", ItemKind::Msecs);
        map.insert("rw", ItemKind::Rw);
        map.insert("read", ItemKind::Read);
        map.insert("contains", ItemKind::Contains);
        map
    };
}

/// A newline after one of these tokens is a continuation, not a statement
/// terminator.
fn continues_line(kind: ItemKind) -> bool {
    matches!(
        kind,
        ItemKind::Plus
            | ItemKind::Minus
            | ItemKind::Star
            | ItemKind::Slash
            | ItemKind::And
            | ItemKind::Or
            | ItemKind::Equals
            | ItemKind::NotEquals
            | ItemKind::LessThan
            | ItemKind::LessEquals
            | ItemKind::GreaterThan
            | ItemKind::GreaterEquals
            | ItemKind::Comma
    )
}

fn is_ident_char(c: char) -> bool {
    c == '_' || c == '-' || c.is_alphanumeric()
}

/// Handle to a running scanner thread.
pub struct Lexer {
    rx: Receiver<Item>,
}

impl Lexer {
    /// Start scanning `input` on its own thread. The scanner exits at end of
    /// input, after an error token, or when this handle is dropped.
    pub fn spawn(input: String) -> Lexer {
        let (tx, rx) = sync_channel(0);
        thread::spawn(move || Scanner::new(input, tx).run());
        Lexer { rx }
    }

    /// Next token. After the scanner has finished, keeps returning Eof.
    pub fn next_item(&self) -> Item {
        self.rx.recv().unwrap_or(Item {
            kind: ItemKind::Eof,
            text: String::new(),
            line: 0,
            pos: 0,
        })
    }
}

struct Scanner {
    chars: Vec<char>,
    start: usize,
    pos: usize,
    line: usize,
    prev: Option<ItemKind>,
    tx: SyncSender<Item>,
}

enum Trial {
    Match,
    Failed,
}

impl Scanner {
    fn new(input: String, tx: SyncSender<Item>) -> Scanner {
        Scanner {
            chars: input.chars().collect(),
            start: 0,
            pos: 0,
            line: 1,
            prev: None,
            tx,
        }
    }

    fn run(mut self) {
        loop {
            if !self.skip_whitespace() {
                break;
            }
            let trial = self
                .comment()
                .or_else(|| self.symbol())
                .or_else(|| self.quoted(ItemKind::StringLiteral, '"', "string"))
                .or_else(|| self.quoted(ItemKind::AliasLiteral, '\'', "alias"))
                .or_else(|| self.oid_literal())
                .or_else(|| self.numeric_literal())
                .or_else(|| self.word());
            match trial {
                Some(Trial::Match) => continue,
                Some(Trial::Failed) | None => break,
            }
        }
        self.emit(ItemKind::Eof);
    }

    // ---- character primitives ----

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn backup(&mut self) {
        self.pos -= 1;
        if self.chars[self.pos] == '\n' {
            self.line -= 1;
        }
    }

    /// Rewind to the start of the pending token.
    fn reset(&mut self) {
        let newlines = self.chars[self.start..self.pos]
            .iter()
            .filter(|c| **c == '\n')
            .count();
        self.line -= newlines;
        self.pos = self.start;
    }

    fn ignore(&mut self) {
        self.start = self.pos;
    }

    fn accept(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn accept_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        let mut n = 0;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.next();
            n += 1;
        }
        n
    }

    fn pending(&self) -> String {
        self.chars[self.start..self.pos].iter().collect()
    }

    // ---- emission ----

    fn emit(&mut self, kind: ItemKind) -> bool {
        let text = self.pending();
        self.send(kind, text)
    }

    fn send(&mut self, kind: ItemKind, text: String) -> bool {
        let item = Item {
            kind,
            text,
            line: self.line,
            pos: self.start,
        };
        self.prev = Some(kind);
        self.start = self.pos;
        // A failed send means the parser hung up; stop scanning.
        self.tx.send(item).is_ok()
    }

    fn error(&mut self, message: String) {
        let _ = self.send(ItemKind::Error, message);
    }

    // ---- token trials ----

    /// Eat whitespace, emitting NewLine where a statement can end. Returns
    /// false at end of input.
    fn skip_whitespace(&mut self) -> bool {
        loop {
            match self.next() {
                None => return false,
                Some('\n') => {
                    let suppress = match self.prev {
                        None | Some(ItemKind::NewLine) => true,
                        Some(kind) => continues_line(kind),
                    };
                    if !suppress {
                        self.start = self.pos - 1;
                        if !self.send(ItemKind::NewLine, "\n".to_string()) {
                            return false;
                        }
                    }
                }
                Some(c) if c == ' ' || c == '\t' || c == '\r' => {}
                Some(_) => {
                    self.backup();
                    self.ignore();
                    return true;
                }
            }
        }
    }

    fn comment(&mut self) -> Option<Trial> {
        if self.peek() != Some('/') {
            return None;
        }
        self.next();
        if self.peek() != Some('/') {
            self.backup();
            return None;
        }
        // Discard to end of line; the newline itself stays for the
        // terminator logic.
        self.accept_while(|c| c != '\n');
        self.ignore();
        Some(Trial::Match)
    }

    fn symbol(&mut self) -> Option<Trial> {
        let first = self.peek()?;
        let kind = match first {
            '<' | '>' | '=' => {
                self.next();
                let two = self.accept('=');
                match (first, two) {
                    ('<', true) => ItemKind::LessEquals,
                    ('<', false) => ItemKind::LessThan,
                    ('>', true) => ItemKind::GreaterEquals,
                    ('>', false) => ItemKind::GreaterThan,
                    // '=' and '==' both mean equals
                    (_, _) => ItemKind::Equals,
                }
            }
            '+' => ItemKind::Plus,
            '-' => ItemKind::Minus,
            '~' => ItemKind::Not,
            '#' => ItemKind::NotEquals,
            '*' => ItemKind::Star,
            '/' => ItemKind::Slash,
            '&' => ItemKind::And,
            '|' => ItemKind::Or,
            ':' => ItemKind::Colon,
            '(' => ItemKind::LeftParen,
            ')' => ItemKind::RightParen,
            '[' => ItemKind::LeftBracket,
            ']' => ItemKind::RightBracket,
            ',' => ItemKind::Comma,
            _ => return None,
        };
        if !matches!(first, '<' | '>' | '=') {
            self.next();
        }
        if self.emit(kind) { Some(Trial::Match) } else { Some(Trial::Failed) }
    }

    fn quoted(&mut self, kind: ItemKind, quote: char, what: &str) -> Option<Trial> {
        if self.peek() != Some(quote) {
            return None;
        }
        self.next();
        self.ignore();
        self.accept_while(|c| c != quote);
        if self.peek().is_none() {
            self.error(format!("could not find {} terminator", what));
            return Some(Trial::Failed);
        }
        let ok = self.emit(kind);
        // closing quote
        self.next();
        self.ignore();
        if ok { Some(Trial::Match) } else { Some(Trial::Failed) }
    }

    /// Dotted digit sequence with at least one dot, optional leading dot.
    fn oid_literal(&mut self) -> Option<Trial> {
        let leading_dot = self.accept('.');
        if self.accept_while(|c| c.is_ascii_digit()) == 0 {
            self.reset();
            return None;
        }
        let mut dots = 0;
        loop {
            if !self.accept('.') {
                break;
            }
            if self.accept_while(|c| c.is_ascii_digit()) == 0 {
                self.reset();
                return None;
            }
            dots += 1;
        }
        if !leading_dot && dots == 0 {
            // a plain number, not an OID
            self.reset();
            return None;
        }
        if self.emit(ItemKind::OidLiteral) { Some(Trial::Match) } else { Some(Trial::Failed) }
    }

    fn numeric_literal(&mut self) -> Option<Trial> {
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
        let hex = self.accept('0') && (self.accept('x') || self.accept('X'));
        if hex {
            self.accept_while(|c| c.is_ascii_hexdigit());
        } else {
            self.accept_while(|c| c.is_ascii_digit());
        }
        if self.peek().is_some_and(is_ident_char) {
            self.next();
            let bad = self.pending();
            self.error(format!("bad number syntax: \"{}\"", bad));
            return Some(Trial::Failed);
        }
        if self.emit(ItemKind::IntLiteral) { Some(Trial::Match) } else { Some(Trial::Failed) }
    }

    /// Keywords and identifiers share one trial: read the maximal
    /// identifier-shaped word, then check the keyword table.
    fn word(&mut self) -> Option<Trial> {
        if !self.peek().is_some_and(|c| c.is_alphabetic()) {
            let c = self.peek().map(String::from).unwrap_or_default();
            self.error(format!("invalid token: '{}'", c));
            return Some(Trial::Failed);
        }
        self.accept_while(is_ident_char);
        let word = self.pending();
        let kind = KEYWORDS
            .get(word.as_str())
            .copied()
            .unwrap_or(ItemKind::Identifier);
        if self.emit(kind) { Some(Trial::Match) } else { Some(Trial::Failed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(ItemKind, String)> {
        let lexer = Lexer::spawn(input.to_string());
        let mut out = Vec::new();
        loop {
            let item = lexer.next_item();
            let done = matches!(item.kind, ItemKind::Eof | ItemKind::Error);
            out.push((item.kind, item.text));
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn test_basic_program_tokens() {
        let toks = kinds("var\n   x: integer\nendvar\nrun\n   x = 3\nendrun");
        let expected = vec![
            (ItemKind::Var, "var"),
            (ItemKind::NewLine, "\n"),
            (ItemKind::Identifier, "x"),
            (ItemKind::Colon, ":"),
            (ItemKind::TypeInteger, "integer"),
            (ItemKind::NewLine, "\n"),
            (ItemKind::EndVar, "endvar"),
            (ItemKind::NewLine, "\n"),
            (ItemKind::Run, "run"),
            (ItemKind::NewLine, "\n"),
            (ItemKind::Identifier, "x"),
            (ItemKind::Equals, "="),
            (ItemKind::IntLiteral, "3"),
            (ItemKind::NewLine, "\n"),
            (ItemKind::EndRun, "endrun"),
            (ItemKind::Eof, ""),
        ];
        let expected: Vec<(ItemKind, String)> = expected
            .into_iter()
            .map(|(k, t)| (k, t.to_string()))
            .collect();
        assert_eq!(toks, expected);
    }

    #[test]
    fn test_alias_map_tokens() {
        let toks = kinds("var\nmodel 1.3.6.1.6.7.7 integer [1 = 'start', 2 = 'finish']\nendvar");
        let want = vec![
            ItemKind::Var,
            ItemKind::NewLine,
            ItemKind::Identifier,
            ItemKind::OidLiteral,
            ItemKind::TypeInteger,
            ItemKind::LeftBracket,
            ItemKind::IntLiteral,
            ItemKind::Equals,
            ItemKind::AliasLiteral,
            ItemKind::Comma,
            ItemKind::IntLiteral,
            ItemKind::Equals,
            ItemKind::AliasLiteral,
            ItemKind::RightBracket,
            ItemKind::NewLine,
            ItemKind::EndVar,
            ItemKind::Eof,
        ];
        let got: Vec<ItemKind> = toks.iter().map(|(k, _)| *k).collect();
        assert_eq!(got, want);
        assert_eq!(toks[3].1, "1.3.6.1.6.7.7");
        assert_eq!(toks[8].1, "start");
    }

    #[test]
    fn test_line_continuation_after_operator() {
        // The newline after '+' must not terminate the statement.
        let toks = kinds("x = 3 +\n   4\n");
        let got: Vec<ItemKind> = toks.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            got,
            vec![
                ItemKind::Identifier,
                ItemKind::Equals,
                ItemKind::IntLiteral,
                ItemKind::Plus,
                ItemKind::IntLiteral,
                ItemKind::NewLine,
                ItemKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_lines_collapse() {
        let toks = kinds("x = 1\n\n\ny = 2\n");
        let newlines = toks
            .iter()
            .filter(|(k, _)| *k == ItemKind::NewLine)
            .count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn test_leading_newlines_suppressed() {
        let toks = kinds("\n\nrun\n");
        assert_eq!(toks[0].0, ItemKind::Run);
    }

    #[test]
    fn test_comment_discarded_keeps_terminator() {
        let toks = kinds("x = 1 // trailing note\ny = 2\n");
        let got: Vec<ItemKind> = toks.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            got,
            vec![
                ItemKind::Identifier,
                ItemKind::Equals,
                ItemKind::IntLiteral,
                ItemKind::NewLine,
                ItemKind::Identifier,
                ItemKind::Equals,
                ItemKind::IntLiteral,
                ItemKind::NewLine,
                ItemKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_and_alias_literals() {
        let toks = kinds("print(\"hi there\")\n");
        assert_eq!(toks[2], (ItemKind::StringLiteral, "hi there".to_string()));

        let toks = kinds("unterminated = \"oops");
        assert_eq!(toks.last().unwrap().0, ItemKind::Error);
        assert!(toks.last().unwrap().1.contains("string terminator"));
    }

    #[test]
    fn test_oid_versus_number() {
        let toks = kinds("a = 10\n");
        assert_eq!(toks[2].0, ItemKind::IntLiteral);
        let toks = kinds("o = .1.3.6.1.2\n");
        assert_eq!(toks[2], (ItemKind::OidLiteral, ".1.3.6.1.2".to_string()));
        let toks = kinds("o = 1.3\n");
        assert_eq!(toks[2].0, ItemKind::OidLiteral);
    }

    #[test]
    fn test_hex_literal_and_bad_number() {
        let toks = kinds("x = 0x1F\n");
        assert_eq!(toks[2], (ItemKind::IntLiteral, "0x1F".to_string()));

        let toks = kinds("x = 1z\n");
        assert_eq!(toks.last().unwrap().0, ItemKind::Error);
    }

    #[test]
    fn test_two_char_symbols() {
        let toks = kinds("if a <= b\n");
        assert_eq!(toks[2].0, ItemKind::LessEquals);
        let toks = kinds("if a == b\n");
        assert_eq!(toks[2].0, ItemKind::Equals);
        let toks = kinds("if a >= b\n");
        assert_eq!(toks[2].0, ItemKind::GreaterEquals);
    }

    #[test]
    fn test_invalid_token() {
        let toks = kinds("x = @\n");
        assert_eq!(toks.last().unwrap().0, ItemKind::Error);
        assert!(toks.last().unwrap().1.contains("invalid token"));
    }

    #[test]
    fn test_item_line_and_pos() {
        let lexer = Lexer::spawn("var\n  x: integer\nendvar".to_string());
        let var = lexer.next_item();
        assert_eq!((var.kind, var.line, var.pos), (ItemKind::Var, 1, 0));
        let newline = lexer.next_item();
        assert_eq!(newline.kind, ItemKind::NewLine);
        let x = lexer.next_item();
        assert_eq!((x.kind, x.line, x.pos), (ItemKind::Identifier, 2, 6));
    }

    #[test]
    fn test_hyphenated_identifier() {
        let toks = kinds("this-boy = \"hi\"\n");
        assert_eq!(toks[0], (ItemKind::Identifier, "this-boy".to_string()));
    }
}
