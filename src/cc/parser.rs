use std::collections::HashSet;

use crate::cc::ast::*;
use crate::cc::lexer::{tokenize, Kw, Pos, SyntaxError, Tok, Token};

type PResult<T> = Result<T, SyntaxError>;

/// Binary operator levels, loosest first.
const LEVELS: &[&[(&str, BinOp)]] = &[
    &[("||", BinOp::Or)],
    &[("&&", BinOp::And)],
    &[("|", BinOp::BitOr)],
    &[("^", BinOp::BitXor)],
    &[("&", BinOp::BitAnd)],
    &[("==", BinOp::Eq), ("!=", BinOp::Ne)],
    &[("<", BinOp::Lt), (">", BinOp::Gt), ("<=", BinOp::Le), (">=", BinOp::Ge)],
    &[("<<", BinOp::Shl), (">>", BinOp::Shr)],
    &[("+", BinOp::Add), ("-", BinOp::Sub)],
    &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)],
];

/// Nesting bound on statements and expressions, counted at statement, assignment and unary entry.
const MAX_DEPTH: usize = 128;

const ASSIGN_OPS: &[(&str, Option<BinOp>)] = &[
    ("=", None),
    ("+=", Some(BinOp::Add)),
    ("-=", Some(BinOp::Sub)),
    ("*=", Some(BinOp::Mul)),
    ("/=", Some(BinOp::Div)),
    ("%=", Some(BinOp::Mod)),
];

struct Parser {
    toks: Vec<Token>,
    i: usize,
    classes: HashSet<String>,
    depth: usize,
}

/// Parse a cas++ translation unit.
pub fn parse(src: &str) -> PResult<Unit> {
    let toks = tokenize(src)?;
    let mut p = Parser { toks, i: 0, classes: HashSet::new(), depth: 0 };
    p.unit()
}

impl Parser {
    fn tok(&self) -> &Tok {
        self.tok_at(0)
    }

    fn tok_at(&self, n: usize) -> &Tok {
        let last = self.toks.len() - 1;
        &self.toks[(self.i + n).min(last)].tok
    }

    fn pos(&self) -> Pos {
        self.toks[self.i.min(self.toks.len() - 1)].pos
    }

    fn advance(&mut self) -> Token {
        let t = self.toks[self.i.min(self.toks.len() - 1)].clone();
        if self.i < self.toks.len() - 1 {
            self.i += 1;
        }
        t
    }

    fn err<T>(&self, expected: &str) -> PResult<T> {
        let pos = self.pos();
        Err(match self.tok() {
            Tok::Eof => SyntaxError::UnexpectedEof { pos, expected: expected.to_string() },
            found => SyntaxError::Unexpected { pos, expected: expected.to_string(), found: found.to_string() },
        })
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(SyntaxError::TooDeep { pos: self.pos(), limit: MAX_DEPTH });
        }
        self.depth += 1;
        let r = f(self);
        self.depth -= 1;
        r
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.tok(), Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Pos> {
        let pos = self.pos();
        if self.eat_punct(p) {
            Ok(pos)
        } else {
            self.err(&format!("`{p}`"))
        }
    }

    fn is_kw(&self, k: Kw) -> bool {
        *self.tok() == Tok::Kw(k)
    }

    fn expect_ident(&mut self, what: &str) -> PResult<(String, Pos)> {
        let pos = self.pos();
        match self.tok().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok((name, pos))
            }
            _ => self.err(what),
        }
    }

    fn is_type_start(&self) -> bool {
        match self.tok() {
            Tok::Kw(Kw::Int | Kw::Float | Kw::Bool | Kw::Char | Kw::Void) => true,
            Tok::Ident(name) => self.classes.contains(name) && matches!(self.tok_at(1), Tok::Ident(_)),
            _ => false,
        }
    }

    fn ty(&mut self) -> PResult<Type> {
        let t = match self.tok() {
            Tok::Kw(Kw::Int) => Type::Int,
            Tok::Kw(Kw::Float) => Type::Float,
            Tok::Kw(Kw::Bool) => Type::Bool,
            Tok::Kw(Kw::Char) => Type::Char,
            Tok::Kw(Kw::Void) => Type::Void,
            Tok::Ident(name) if self.classes.contains(name) => Type::Class(name.clone()),
            _ => return self.err("a type"),
        };
        self.advance();
        Ok(t)
    }

    fn unit(&mut self) -> PResult<Unit> {
        let mut unit = Unit::default();
        while *self.tok() != Tok::Eof {
            if self.is_kw(Kw::Class) || self.is_kw(Kw::Struct) {
                unit.items.push(TopItem::Class(self.class_decl()?));
            } else if self.is_kw(Kw::Const) {
                for d in self.declarations()? {
                    unit.items.push(TopItem::Const(d));
                }
            } else if self.is_type_start() {
                unit.items.push(TopItem::Func(self.function()?));
            } else {
                return self.err("a class, const or function declaration");
            }
        }
        Ok(unit)
    }

    fn class_decl(&mut self) -> PResult<ClassDecl> {
        let pos = self.pos();
        self.advance();
        let (name, _) = self.expect_ident("a class name")?;
        self.classes.insert(name.clone());
        self.expect_punct("{")?;
        let mut fields = Vec::new();
        while !self.eat_punct("}") {
            let ty = self.ty()?;
            loop {
                let (fname, fpos) = self.expect_ident("a field name")?;
                fields.push(Field { ty: ty.clone(), name: fname, pos: fpos });
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(";")?;
        }
        self.eat_punct(";");
        Ok(ClassDecl { name, fields, pos })
    }

    fn function(&mut self) -> PResult<Func> {
        let pos = self.pos();
        let ret = self.ty()?;
        let (name, _) = self.expect_ident("a function name")?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if self.is_kw(Kw::Void) && matches!(self.tok_at(1), Tok::Punct(")")) {
            self.advance();
        }
        if !self.is_punct(")") {
            loop {
                let ppos = self.pos();
                let ty = self.ty()?;
                let (pname, _) = self.expect_ident("a parameter name")?;
                params.push(Param { ty, name: pname, pos: ppos });
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        let body = self.block()?;
        Ok(Func { name, ret, params, body, pos })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if *self.tok() == Tok::Eof {
                return self.err("`}`");
            }
            stmts.extend(self.statement()?);
        }
        Ok(stmts)
    }

    /// Statement in a position that needs exactly one (loop and branch bodies).
    fn single(&mut self) -> PResult<Stmt> {
        let mut v = self.statement()?;
        Ok(if v.len() == 1 { v.remove(0) } else { Stmt::Block(v) })
    }

    fn declarations(&mut self) -> PResult<Vec<Decl>> {
        let is_const = self.is_kw(Kw::Const);
        if is_const {
            self.advance();
        }
        let ty = self.ty()?;
        let mut decls = Vec::new();
        loop {
            let (name, pos) = self.expect_ident("a variable name")?;
            let array = if self.eat_punct("[") {
                if self.eat_punct("]") {
                    Some(None)
                } else {
                    let n = self.expr()?;
                    self.expect_punct("]")?;
                    Some(Some(n))
                }
            } else {
                None
            };
            let init = if self.eat_punct("=") {
                if self.eat_punct("{") {
                    let mut list = Vec::new();
                    while !self.is_punct("}") {
                        list.push(self.assignment()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct("}")?;
                    Some(Init::List(list))
                } else {
                    Some(Init::Expr(self.assignment()?))
                }
            } else {
                None
            };
            decls.push(Decl { ty: ty.clone(), name, is_const, array, init, pos });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(";")?;
        Ok(decls)
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> PResult<Vec<Stmt>> {
        let pos = self.pos();
        if self.is_punct("{") {
            return Ok(vec![Stmt::Block(self.block()?)]);
        }
        if self.eat_punct(";") {
            return Ok(vec![]);
        }
        if self.is_kw(Kw::Const) || self.is_type_start() {
            return Ok(self.declarations()?.into_iter().map(Stmt::Decl).collect());
        }
        let stmt = match self.tok().clone() {
            Tok::Kw(Kw::If) => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                let then = Box::new(self.single()?);
                let els = if self.is_kw(Kw::Else) {
                    self.advance();
                    Some(Box::new(self.single()?))
                } else {
                    None
                };
                Stmt::If { cond, then, els }
            }
            Tok::Kw(Kw::While) => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                Stmt::While { cond, body: Box::new(self.single()?) }
            }
            Tok::Kw(Kw::Do) => {
                self.advance();
                let body = Box::new(self.single()?);
                if !self.is_kw(Kw::While) {
                    return self.err("`while`");
                }
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expr()?;
                self.expect_punct(")")?;
                self.expect_punct(";")?;
                Stmt::DoWhile { body, cond }
            }
            Tok::Kw(Kw::For) => {
                self.advance();
                self.expect_punct("(")?;
                let init = if self.eat_punct(";") {
                    None
                } else if self.is_kw(Kw::Const) || self.is_type_start() {
                    let mut ds = self.declarations()?;
                    if ds.len() != 1 {
                        return Err(SyntaxError::Unexpected {
                            pos,
                            expected: "a single declaration in `for`".into(),
                            found: format!("{} declarations", ds.len()),
                        });
                    }
                    Some(Box::new(Stmt::Decl(ds.remove(0))))
                } else {
                    let e = self.expr()?;
                    self.expect_punct(";")?;
                    Some(Box::new(Stmt::Expr(e)))
                };
                let cond = if self.is_punct(";") { None } else { Some(self.expr()?) };
                self.expect_punct(";")?;
                let step = if self.is_punct(")") { None } else { Some(self.expr()?) };
                self.expect_punct(")")?;
                Stmt::For { init, cond, step, body: Box::new(self.single()?) }
            }
            Tok::Kw(Kw::Break) => {
                self.advance();
                self.expect_punct(";")?;
                Stmt::Break(pos)
            }
            Tok::Kw(Kw::Continue) => {
                self.advance();
                self.expect_punct(";")?;
                Stmt::Continue(pos)
            }
            Tok::Kw(Kw::Return) => {
                self.advance();
                let value = if self.is_punct(";") { None } else { Some(self.expr()?) };
                self.expect_punct(";")?;
                Stmt::Return(value, pos)
            }
            Tok::Ident(name) if name == "asm" && matches!(self.tok_at(1), Tok::Punct("(")) => {
                self.advance();
                self.advance();
                let text = match self.tok().clone() {
                    Tok::Str(s) => s,
                    _ => return self.err("a string literal"),
                };
                self.advance();
                self.expect_punct(")")?;
                self.expect_punct(";")?;
                Stmt::Asm(text, pos)
            }
            _ => {
                let e = self.expr()?;
                self.expect_punct(";")?;
                Stmt::Expr(e)
            }
        };
        Ok(vec![stmt])
    }

    pub fn expr(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.nested(Self::assignment_inner)
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        let lhs = self.binary(0)?;
        let op = ASSIGN_OPS.iter().find(|(p, _)| self.is_punct(p)).map(|(_, op)| *op);
        match op {
            Some(op) => {
                let pos = self.advance().pos;
                let rhs = self.assignment()?;
                Ok(Expr { kind: ExprKind::Assign(op, Box::new(lhs), Box::new(rhs)), pos })
            }
            None => Ok(lhs),
        }
    }

    fn binary(&mut self, level: usize) -> PResult<Expr> {
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        loop {
            let Some(op) = LEVELS[level].iter().find(|(p, _)| self.is_punct(p)).map(|(_, op)| *op) else {
                return Ok(lhs);
            };
            let pos = self.advance().pos;
            let rhs = self.binary(level + 1)?;
            lhs = Expr { kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), pos };
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let op = match self.tok() {
            Tok::Punct("-") => Some(UnOp::Neg),
            Tok::Punct("+") => Some(UnOp::Plus),
            Tok::Punct("!") => Some(UnOp::Not),
            Tok::Punct("~") => Some(UnOp::BitNot),
            Tok::Punct(p @ ("++" | "--")) => {
                let inc = *p == "++";
                self.advance();
                let target = Box::new(self.unary()?);
                return Ok(Expr { kind: ExprKind::IncDec { target, inc, prefix: true }, pos });
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let e = self.unary()?;
                Ok(Expr { kind: ExprKind::Unary(op, Box::new(e)), pos })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut e = self.primary()?;
        loop {
            let pos = self.pos();
            if self.eat_punct("[") {
                let idx = self.expr()?;
                self.expect_punct("]")?;
                e = Expr { kind: ExprKind::Index(Box::new(e), Box::new(idx)), pos };
            } else if self.eat_punct(".") {
                let (field, _) = self.expect_ident("a field name")?;
                e = Expr { kind: ExprKind::Field(Box::new(e), field), pos };
            } else if self.is_punct("++") || self.is_punct("--") {
                let inc = self.is_punct("++");
                self.advance();
                e = Expr { kind: ExprKind::IncDec { target: Box::new(e), inc, prefix: false }, pos };
            } else {
                return Ok(e);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let kind = match self.tok().clone() {
            Tok::Int(v) => ExprKind::Int(v),
            Tok::Float(v) => ExprKind::Float(v),
            Tok::Str(s) => ExprKind::Str(s),
            Tok::Char(c) => ExprKind::Char(c),
            Tok::Kw(Kw::True) => ExprKind::Bool(true),
            Tok::Kw(Kw::False) => ExprKind::Bool(false),
            Tok::Ident(name) => {
                self.advance();
                if self.eat_punct("(") {
                    let mut args = Vec::new();
                    if !self.is_punct(")") {
                        loop {
                            args.push(self.assignment()?);
                            if !self.eat_punct(",") {
                                break;
                            }
                        }
                    }
                    self.expect_punct(")")?;
                    return Ok(Expr { kind: ExprKind::Call(name, args), pos });
                }
                return Ok(Expr { kind: ExprKind::Ident(name), pos });
            }
            Tok::Punct("(") => {
                self.advance();
                let e = self.expr()?;
                self.expect_punct(")")?;
                return Ok(e);
            }
            _ => return self.err("an expression"),
        };
        self.advance();
        Ok(Expr { kind, pos })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_body(src: &str) -> Vec<Stmt> {
        let unit = parse(&format!("int main() {{ {src} }}")).unwrap();
        match unit.items.into_iter().next() {
            Some(TopItem::Func(f)) => f.body,
            other => panic!("expected a function, got {other:?}"),
        }
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let body = main_body("return 1 + 2 * 3;");
        let Stmt::Return(Some(e), _) = &body[0] else { panic!("{body:?}") };
        let ExprKind::Binary(BinOp::Add, _, rhs) = &e.kind else { panic!("{e:?}") };
        assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn assignment_is_right_associative() {
        let body = main_body("a = b = 3;");
        let Stmt::Expr(e) = &body[0] else { panic!() };
        let ExprKind::Assign(None, _, rhs) = &e.kind else { panic!() };
        assert!(matches!(rhs.kind, ExprKind::Assign(None, _, _)));
    }

    #[test]
    fn class_instances_and_fields() {
        let unit = parse("class P { int x, y; }; int main() { P p; p.x = 3; return p.x; }").unwrap();
        assert!(matches!(&unit.items[0], TopItem::Class(c) if c.fields.len() == 2));
        let TopItem::Func(f) = &unit.items[1] else { panic!() };
        assert!(matches!(&f.body[0], Stmt::Decl(d) if d.ty == Type::Class("P".into())));
    }

    #[test]
    fn asm_statement_and_multi_decl() {
        let body = main_body("int a = 1, b[4]; asm(\"INC R4\");");
        assert_eq!(body.len(), 3);
        assert!(matches!(&body[2], Stmt::Asm(s, _) if s == "INC R4"));
    }

    #[test]
    fn errors_carry_position() {
        let err = parse("int main() {\n  return 1\n}").unwrap_err();
        assert!(matches!(err, SyntaxError::Unexpected { pos: Pos { line: 3, col: 1 }, .. }));
        assert!(matches!(parse("int main() {"), Err(SyntaxError::UnexpectedEof { .. })));
    }

    #[test]
    fn nesting_is_bounded() {
        let parens = format!("int main() {{ return {}1{}; }}", "(".repeat(5000), ")".repeat(5000));
        assert!(matches!(parse(&parens), Err(SyntaxError::TooDeep { limit: MAX_DEPTH, .. })));

        let nots = format!("int main() {{ return {}1; }}", "!".repeat(5000));
        assert!(matches!(parse(&nots), Err(SyntaxError::TooDeep { .. })));

        let blocks = format!("int main() {}{}", "{".repeat(5000), "}".repeat(5000));
        assert!(matches!(parse(&blocks), Err(SyntaxError::TooDeep { .. })));

        let chain = format!("int main() {{ int a; {}1; }}", "a = ".repeat(5000));
        assert!(matches!(parse(&chain), Err(SyntaxError::TooDeep { .. })));
    }

    #[test]
    fn ordinary_nesting_still_parses() {
        let body = main_body(&format!("return {}1{};", "(".repeat(40), ")".repeat(40)));
        assert!(matches!(&body[0], Stmt::Return(Some(_), _)));
        let body = main_body(&format!("{}{}", "{".repeat(40), "}".repeat(40)));
        assert_eq!(body.len(), 1);
    }
}
