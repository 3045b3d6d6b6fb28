//! Dynamic Parameter Expressions
//!
//! A small closed expression language for per-event parameter overrides:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | NAME | NAME '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Functions: `clip(x, lo, hi)`, `min(a, b)`, `max(a, b)`, `exp(x)`.
//!
//! Names parse as parameter references. [`Expr::with_covariates`] rebinds the
//! names that are declared per-event covariates. Evaluation goes through a
//! [`Scope`]; a name the scope cannot supply is reported, never defaulted.

use std::fmt;

use crate::error::{CmrError, Result};

// ============================================================================
// AST
// ============================================================================

/// Arithmetic operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
	/// `+`
	Add,
	/// `-`
	Sub,
	/// `*`
	Mul,
	/// `/`
	Div,
}

/// Built-in helper function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
	/// `clip(x, lo, hi)`
	Clip,
	/// `min(a, b)`
	Min,
	/// `max(a, b)`
	Max,
	/// `exp(x)`
	Exp,
}

impl Function {
	fn lookup(name: &str) -> Option<Self> {
		match name {
			"clip" => Some(Self::Clip),
			"min" => Some(Self::Min),
			"max" => Some(Self::Max),
			"exp" => Some(Self::Exp),
			_ => None,
		}
	}

	const fn arity(self) -> usize {
		match self {
			Self::Clip => 3,
			Self::Min | Self::Max => 2,
			Self::Exp => 1,
		}
	}

	const fn name(self) -> &'static str {
		match self {
			Self::Clip => "clip",
			Self::Min => "min",
			Self::Max => "max",
			Self::Exp => "exp",
		}
	}
}

/// Expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
	/// Numeric literal
	Number(f64),
	/// Reference to a model or auxiliary parameter
	Param(String),
	/// Reference to a per-event covariate
	Covariate(String),
	/// Unary minus
	Neg(Box<Expr>),
	/// Binary arithmetic
	Binary {
		/// Operator
		op: BinaryOp,
		/// Left operand
		lhs: Box<Expr>,
		/// Right operand
		rhs: Box<Expr>,
	},
	/// Helper function call
	Call {
		/// Function
		function: Function,
		/// Arguments, arity already checked
		args: Vec<Expr>,
	},
}

/// Values an expression can read.
pub trait Scope {
	/// Value of a parameter, if defined.
	fn param(&self, name: &str) -> Option<f64>;
	/// Value of a covariate for the current event, if supplied.
	fn covariate(&self, name: &str) -> Option<f64>;
}

/// Why evaluation failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalError {
	/// A name the scope could not supply
	Unresolved(String),
	/// A hand-built call with the wrong number of arguments
	Arity {
		/// Function name
		function: &'static str,
		/// Arguments the function takes
		expected: usize,
		/// Arguments supplied
		found: usize,
	},
}

impl Expr {
	/// Parse expression text.
	///
	/// # Errors
	///
	/// Returns [`CmrError::ExpressionSyntax`] with the byte offset of the
	/// first problem.
	pub fn parse(source: &str) -> Result<Self> {
		let tokens = tokenize(source)?;
		let mut parser = Parser {
			tokens,
			cursor: 0,
			end: source.len(),
		};
		let expr = parser.expression()?;
		match parser.peek() {
			None => Ok(expr),
			Some(spanned) => Err(syntax(spanned.offset, "unexpected trailing input")),
		}
	}

	/// Rebind every parameter reference named in `covariates` as a covariate reference.
	#[must_use]
	pub fn with_covariates<S: AsRef<str>>(self, covariates: &[S]) -> Self {
		match self {
			Self::Param(name) if covariates.iter().any(|c| c.as_ref() == name) => {
				Self::Covariate(name)
			}
			Self::Neg(inner) => Self::Neg(Box::new(inner.with_covariates(covariates))),
			Self::Binary { op, lhs, rhs } => Self::Binary {
				op,
				lhs: Box::new(lhs.with_covariates(covariates)),
				rhs: Box::new(rhs.with_covariates(covariates)),
			},
			Self::Call { function, args } => Self::Call {
				function,
				args: args
					.into_iter()
					.map(|a| a.with_covariates(covariates))
					.collect(),
			},
			other => other,
		}
	}

	/// Parameter names this expression reads.
	#[must_use]
	pub fn param_refs(&self) -> Vec<&str> {
		let mut out = Vec::new();
		self.walk(&mut |e| {
			if let Self::Param(name) = e {
				out.push(name.as_str());
			}
		});
		out
	}

	/// Covariate names this expression reads.
	#[must_use]
	pub fn covariate_refs(&self) -> Vec<&str> {
		let mut out = Vec::new();
		self.walk(&mut |e| {
			if let Self::Covariate(name) = e {
				out.push(name.as_str());
			}
		});
		out
	}

	fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
		visit(self);
		match self {
			Self::Neg(inner) => inner.walk(visit),
			Self::Binary { lhs, rhs, .. } => {
				lhs.walk(visit);
				rhs.walk(visit);
			}
			Self::Call { args, .. } => {
				for arg in args {
					arg.walk(visit);
				}
			}
			Self::Number(_) | Self::Param(_) | Self::Covariate(_) => {}
		}
	}

	/// Evaluate against a scope.
	///
	/// # Errors
	///
	/// Returns the first name the scope cannot supply, or the first call
	/// whose argument count does not match its function.
	pub fn eval(&self, scope: &dyn Scope) -> std::result::Result<f64, EvalError> {
		Ok(match self {
			Self::Number(v) => *v,
			Self::Param(name) => scope
				.param(name)
				.ok_or_else(|| EvalError::Unresolved(name.clone()))?,
			Self::Covariate(name) => scope
				.covariate(name)
				.ok_or_else(|| EvalError::Unresolved(name.clone()))?,
			Self::Neg(inner) => -inner.eval(scope)?,
			Self::Binary { op, lhs, rhs } => {
				let a = lhs.eval(scope)?;
				let b = rhs.eval(scope)?;
				match op {
					BinaryOp::Add => a + b,
					BinaryOp::Sub => a - b,
					BinaryOp::Mul => a * b,
					BinaryOp::Div => a / b,
				}
			}
			Self::Call { function, args } => {
				let values = args
					.iter()
					.map(|a| a.eval(scope))
					.collect::<std::result::Result<Vec<f64>, EvalError>>()?;
				match (function, values.as_slice()) {
					// Lower bound first, so the upper bound wins when they cross
					(Function::Clip, &[x, lo, hi]) => x.max(lo).min(hi),
					(Function::Min, &[a, b]) => a.min(b),
					(Function::Max, &[a, b]) => a.max(b),
					(Function::Exp, &[x]) => x.exp(),
					_ => {
						return Err(EvalError::Arity {
							function: function.name(),
							expected: function.arity(),
							found: values.len(),
						});
					}
				}
			}
		})
	}
}

impl fmt::Display for Expr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Number(v) => write!(f, "{v}"),
			Self::Param(name) | Self::Covariate(name) => f.write_str(name),
			Self::Neg(inner) => write!(f, "-({inner})"),
			Self::Binary { op, lhs, rhs } => {
				let symbol = match op {
					BinaryOp::Add => '+',
					BinaryOp::Sub => '-',
					BinaryOp::Mul => '*',
					BinaryOp::Div => '/',
				};
				write!(f, "({lhs} {symbol} {rhs})")
			}
			Self::Call { function, args } => {
				write!(f, "{}(", function.name())?;
				for (i, arg) in args.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{arg}")?;
				}
				f.write_str(")")
			}
		}
	}
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Token {
	Number(f64),
	Name(String),
	Plus,
	Minus,
	Star,
	Slash,
	LeftParen,
	RightParen,
	Comma,
}

#[derive(Clone, Debug)]
struct Spanned {
	token: Token,
	offset: usize,
}

fn syntax(offset: usize, reason: &str) -> CmrError {
	CmrError::ExpressionSyntax {
		offset,
		reason: reason.to_string(),
	}
}

fn tokenize(source: &str) -> Result<Vec<Spanned>> {
	let bytes = source.as_bytes();
	let mut tokens = Vec::new();
	let mut i = 0;

	while i < bytes.len() {
		let c = bytes[i];
		let offset = i;
		let single = match c {
			b' ' | b'\t' | b'\n' | b'\r' => {
				i += 1;
				continue;
			}
			b'+' => Some(Token::Plus),
			b'-' => Some(Token::Minus),
			b'*' => Some(Token::Star),
			b'/' => Some(Token::Slash),
			b'(' => Some(Token::LeftParen),
			b')' => Some(Token::RightParen),
			b',' => Some(Token::Comma),
			_ => None,
		};
		if let Some(token) = single {
			tokens.push(Spanned { token, offset });
			i += 1;
			continue;
		}

		if c.is_ascii_digit() || c == b'.' {
			while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
				i += 1;
			}
			// Exponent: e, E, optionally signed
			if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
				let mut j = i + 1;
				if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
					j += 1;
				}
				if j < bytes.len() && bytes[j].is_ascii_digit() {
					while j < bytes.len() && bytes[j].is_ascii_digit() {
						j += 1;
					}
					i = j;
				}
			}
			let text = &source[offset..i];
			let value = text
				.parse::<f64>()
				.map_err(|_| syntax(offset, "invalid number"))?;
			tokens.push(Spanned {
				token: Token::Number(value),
				offset,
			});
			continue;
		}

		if c.is_ascii_alphabetic() || c == b'_' {
			while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
				i += 1;
			}
			tokens.push(Spanned {
				token: Token::Name(source[offset..i].to_string()),
				offset,
			});
			continue;
		}

		return Err(syntax(offset, "unexpected character"));
	}

	Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
	tokens: Vec<Spanned>,
	cursor: usize,
	end: usize,
}

impl Parser {
	fn peek(&self) -> Option<&Spanned> {
		self.tokens.get(self.cursor)
	}

	fn offset(&self) -> usize {
		self.peek().map_or(self.end, |s| s.offset)
	}

	fn check(&self, token: &Token) -> bool {
		self.peek().is_some_and(|s| &s.token == token)
	}

	fn advance(&mut self) -> Option<Spanned> {
		let next = self.tokens.get(self.cursor).cloned();
		if next.is_some() {
			self.cursor += 1;
		}
		next
	}

	fn expect(&mut self, token: &Token, reason: &str) -> Result<()> {
		if self.check(token) {
			self.cursor += 1;
			Ok(())
		} else {
			Err(syntax(self.offset(), reason))
		}
	}

	fn expression(&mut self) -> Result<Expr> {
		let mut lhs = self.term()?;
		loop {
			let op = if self.check(&Token::Plus) {
				BinaryOp::Add
			} else if self.check(&Token::Minus) {
				BinaryOp::Sub
			} else {
				return Ok(lhs);
			};
			self.cursor += 1;
			let rhs = self.term()?;
			lhs = Expr::Binary {
				op,
				lhs: Box::new(lhs),
				rhs: Box::new(rhs),
			};
		}
	}

	fn term(&mut self) -> Result<Expr> {
		let mut lhs = self.unary()?;
		loop {
			let op = if self.check(&Token::Star) {
				BinaryOp::Mul
			} else if self.check(&Token::Slash) {
				BinaryOp::Div
			} else {
				return Ok(lhs);
			};
			self.cursor += 1;
			let rhs = self.unary()?;
			lhs = Expr::Binary {
				op,
				lhs: Box::new(lhs),
				rhs: Box::new(rhs),
			};
		}
	}

	fn unary(&mut self) -> Result<Expr> {
		if self.check(&Token::Minus) {
			self.cursor += 1;
			return Ok(Expr::Neg(Box::new(self.unary()?)));
		}
		self.primary()
	}

	fn primary(&mut self) -> Result<Expr> {
		let offset = self.offset();
		let Some(spanned) = self.advance() else {
			return Err(syntax(offset, "unexpected end of expression"));
		};

		match spanned.token {
			Token::Number(v) => Ok(Expr::Number(v)),
			Token::LeftParen => {
				let inner = self.expression()?;
				self.expect(&Token::RightParen, "expected `)`")?;
				Ok(inner)
			}
			Token::Name(name) => {
				if !self.check(&Token::LeftParen) {
					return Ok(Expr::Param(name));
				}
				let function =
					Function::lookup(&name).ok_or_else(|| syntax(offset, "unknown function"))?;
				self.cursor += 1;
				let mut args = vec![self.expression()?];
				while self.check(&Token::Comma) {
					self.cursor += 1;
					args.push(self.expression()?);
				}
				self.expect(&Token::RightParen, "expected `)` after arguments")?;
				if args.len() != function.arity() {
					return Err(syntax(offset, "wrong number of arguments"));
				}
				Ok(Expr::Call { function, args })
			}
			_ => Err(syntax(offset, "expected a number, name or `(`")),
		}
	}
}
