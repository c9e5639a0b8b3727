//! Parsed map documents as uploaded by the host.
//!
//! Map files are authored against a 1920x1080 reference screen, so any
//! coordinate may be written either as a plain number or as a small
//! arithmetic expression over `WIDTH`/`HEIGHT` (for example `"HEIGHT - 180"`).

use crate::{REFERENCE_HEIGHT, REFERENCE_WIDTH};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A coordinate that is either literal or an expression over the reference resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coord {
    Number(f32),
    Expr(String),
}

impl Coord {
    /// Resolves the coordinate to pixels. Unparseable expressions resolve to zero.
    pub fn resolve(&self) -> f32 {
        match self {
            Coord::Number(value) => *value,
            Coord::Expr(expr) => match evaluate_expression(expr) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Could not resolve coordinate {:?}: {}", expr, e);
                    0.0
                }
            },
        }
    }
}

impl Default for Coord {
    fn default() -> Self {
        Coord::Number(0.0)
    }
}

impl From<f32> for Coord {
    fn from(value: f32) -> Self {
        Coord::Number(value)
    }
}

impl From<&str> for Coord {
    fn from(value: &str) -> Self {
        Coord::Expr(value.to_string())
    }
}

/// Nesting limit for parenthesised sub-expressions.
pub const MAX_EXPR_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("trailing input after expression")]
    TrailingInput,
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Symbol(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedChar(c))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Symbol(chars[start..i].iter().collect()));
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            return Err(ExprError::TooDeep(MAX_EXPR_DEPTH));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut value = self.term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.advance();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64, ExprError> {
        let mut value = self.factor()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.advance();
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.advance();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, ExprError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Symbol(name)) => symbol_value(&name),
            Some(Token::Minus) => {
                self.descend()?;
                let value = -self.factor()?;
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::Plus) => {
                self.descend()?;
                let value = self.factor()?;
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    Some(_) => Err(ExprError::TrailingInput),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(Token::RParen) => Err(ExprError::UnexpectedChar(')')),
            Some(Token::Star) => Err(ExprError::UnexpectedChar('*')),
            Some(Token::Slash) => Err(ExprError::UnexpectedChar('/')),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn symbol_value(name: &str) -> Result<f64, ExprError> {
    match name {
        "WIDTH" | "SCREEN_WIDTH" => Ok(REFERENCE_WIDTH as f64),
        "HEIGHT" | "SCREEN_HEIGHT" => Ok(REFERENCE_HEIGHT as f64),
        other => Err(ExprError::UnknownSymbol(other.to_string())),
    }
}

/// Evaluates a coordinate expression against the reference resolution.
pub fn evaluate_expression(input: &str) -> Result<f32, ExprError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::TrailingInput);
    }
    Ok(value as f32)
}

/// One static platform rectangle as written in the map file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub x: Coord,
    pub y: Coord,
    pub width: Coord,
    pub height: Coord,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: Coord,
    pub y: Coord,
}

fn default_variant() -> String {
    "blue".to_string()
}

/// Enemy spawn entry. A `type` of `"boss"` spawns a boss instead of a regular enemy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_variant")]
    pub variant: String,
    #[serde(default)]
    pub x: Coord,
    #[serde(default)]
    pub y: Coord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_power: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patrol_range: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggro_range: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_height_min: Option<Coord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight_height_max: Option<Coord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump_strength: Option<f32>,
}

impl EnemyDescriptor {
    pub fn new(kind: &str, variant: &str, x: f32, y: f32) -> Self {
        Self {
            kind: kind.to_string(),
            variant: variant.to_string(),
            x: Coord::Number(x),
            y: Coord::Number(y),
            health: None,
            attack_power: None,
            speed: None,
            patrol_range: None,
            aggro_range: None,
            flight_height_min: None,
            flight_height_max: None,
            jump_strength: None,
        }
    }

    pub fn is_boss(&self) -> bool {
        self.kind == "boss"
    }
}

/// A full level as uploaded through `map_data`.
///
/// Fields the server does not simulate (portals, backgrounds, music) are kept
/// in `extra` so the document can be echoed back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_name: Option<String>,
    #[serde(default)]
    pub platforms: Vec<PlatformDescriptor>,
    #[serde(default)]
    pub enemies: Vec<EnemyDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_point: Option<SpawnPoint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MapDocument {
    /// Prefix used for deterministic enemy ids.
    pub fn id_prefix(&self) -> &str {
        self.level_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("unknown")
    }

    /// Human readable name reported in `map_ready`.
    pub fn title(&self) -> &str {
        self.name
            .as_deref()
            .or(self.level_name.as_deref())
            .unwrap_or("unknown")
    }

    /// Whether `target` (a portal destination) names this map.
    pub fn answers_to(&self, target: &str) -> bool {
        self.name.as_deref() == Some(target) || self.level_name.as_deref() == Some(target)
    }
}
