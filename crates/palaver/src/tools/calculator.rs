//! `calculator`: evaluate arithmetic expressions.
//!
//! A small recursive-descent evaluator over `f64`. Only digits, decimal
//! points, whitespace, parentheses, and the operators `+ - * / %` are
//! accepted; anything else is rejected before parsing.

use crate::ToolDef;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::spec::ToolSpec;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Typed arguments for `calculator`.
#[derive(Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// Arithmetic expression to evaluate (e.g. '2 + 2', '(10 - 4) * 3.5', '17 % 5').
    pub expression: String,
}

/// Evaluates arithmetic expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Calculator;

impl Tool for Calculator {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("calculator", "Evaluate an arithmetic expression")
            .when_to_use("When an answer depends on exact arithmetic")
            .when_not_to_use("For symbolic math, units, or functions like sqrt; only + - * / % and parentheses are supported")
            .parameters_for::<CalculatorArgs>()
            .example(r#"{"expression": "2 + 2"}"#, "4")
            .output_format("A JSON number")
            .to_tool_def()
    }

    fn execute(&self, arguments: &Map<String, Value>) -> ToolFuture<'_> {
        let args = parse_tool_args::<CalculatorArgs>(arguments);
        Box::pin(async move {
            let args = args?;
            let value = evaluate(&args.expression)?;
            Ok(number_payload(value))
        })
    }
}

/// Render integral results as JSON integers, everything else as floats.
fn number_payload(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    Open,
    Close,
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    if let Some(bad) = expression
        .chars()
        .find(|c| !(c.is_ascii_digit() || c.is_whitespace() || "+-*/%().".contains(*c)))
    {
        return Err(format!(
            "invalid character '{bad}' in expression; only numbers, + - * / %, and parentheses are allowed"
        ));
    }

    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if let Some(tok) = parser.peek() {
        return Err(format!("unexpected {} at end of expression", describe(tok)));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Num(n));
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            op => {
                chars.next();
                tokens.push(Token::Op(op));
            }
        }
    }
    Ok(tokens)
}

fn describe(tok: Token) -> String {
    match tok {
        Token::Num(n) => format!("number {n}"),
        Token::Op(c) => format!("operator '{c}'"),
        Token::Open => "'('".to_string(),
        Token::Close => "')'".to_string(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                '*' => acc * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                '/' => acc / rhs,
                _ => acc % rhs,
            };
        }
        Ok(acc)
    }

    // unary := ('+' | '-') unary | primary
    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    // primary := number | '(' expr ')'
    fn primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(tok) => Err(format!("unexpected {}", describe(tok))),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
