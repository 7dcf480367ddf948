//! Formula parser
//!
//! A recursive descent parser for worksheet formulas with proper operator
//! precedence. Parsing is a pure function of the formula text.

use crate::ast::{BinaryOperator, Expr, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use crate::functions::{lookup_scalar, AggregateFunction};
use ahash::AHashMap;
use fabcalc_core::SummaryField;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Deepest parenthesis, argument or prefix-operator nesting accepted
pub const MAX_NESTING: usize = 64;

/// Deepest expression tree accepted
pub const MAX_DEPTH: usize = 256;

/// Parse a formula string into an AST
///
/// A leading `=` is optional. Error positions are byte offsets into `formula`.
///
/// # Example
/// ```rust
/// use fabcalc_formula::parse_formula;
///
/// let ast = parse_formula("qty * unit_cost").unwrap();
/// let ast = parse_formula("=ROUND(SUM(weight) / 2, 1)").unwrap();
/// let ast = parse_formula("IF(qty > 5, qty * 0.9, qty)").unwrap();
/// let ast = parse_formula("'Material Costs'.SUM(total_cost)").unwrap();
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<Expr> {
    let trimmed = formula.trim_start();
    let mut offset = formula.len() - trimmed.len();

    let body = match trimmed.strip_prefix('=') {
        Some(rest) => {
            offset += 1;
            rest
        }
        None => trimmed,
    };

    if body.trim().is_empty() {
        return Err(FormulaError::parse(offset, "Formula is empty"));
    }

    let mut parser = FormulaParser::new(body, offset)?;
    let expr = parser.parse_expression()?;

    // Make sure we consumed all input
    if !matches!(parser.current_token(), Token::Eof) {
        return Err(FormulaError::parse(
            parser.token_position(),
            format!(
                "Unexpected {} after expression",
                parser.current_token().describe()
            ),
        ));
    }

    Ok(expr)
}

/// Parsed formulas keyed by formula text
///
/// Trees are shared, so evaluating the same formula over many rows parses it
/// once.
#[derive(Debug, Default)]
pub struct FormulaCache {
    entries: AHashMap<String, Arc<Expr>>,
}

impl FormulaCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the parsed tree for a formula, parsing it on first use
    ///
    /// Parse failures are not cached.
    pub fn get_or_parse(&mut self, formula: &str) -> FormulaResult<Arc<Expr>> {
        let key = formula.trim();
        if let Some(expr) = self.entries.get(key) {
            return Ok(Arc::clone(expr));
        }

        let expr = Arc::new(parse_formula(key)?);
        self.entries.insert(key.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Number of cached formulas
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached tree
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Number(Decimal),

    // Names
    Identifier(String), // Column key or keyword
    Function(String),   // Identifier directly followed by '('
    QuotedName(String), // 'Worksheet Name'

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Comma,
    Dot,

    // Delimiters
    LeftParen,
    RightParen,

    // End of input
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Identifier(s) => format!("'{}'", s),
            Token::Function(s) => format!("function {}", s),
            Token::QuotedName(s) => format!("worksheet name '{}'", s),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Percent => "'%'".into(),
            Token::Equal => "'='".into(),
            Token::NotEqual => "'<>'".into(),
            Token::LessThan => "'<'".into(),
            Token::LessEqual => "'<='".into(),
            Token::GreaterThan => "'>'".into(),
            Token::GreaterEqual => "'>='".into(),
            Token::Comma => "','".into(),
            Token::Dot => "'.'".into(),
            Token::LeftParen => "'('".into(),
            Token::RightParen => "')'".into(),
            Token::Eof => "end of formula".into(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        match self {
            Token::Identifier(s) | Token::Function(s) => s.eq_ignore_ascii_case(keyword),
            _ => false,
        }
    }
}

/// Formula parser
struct FormulaParser<'a> {
    input: &'a str,
    /// Offset of `input` within the caller's formula text
    offset: usize,
    pos: usize,
    token_start: usize,
    current_token: Token,
    /// Current recursion depth of `parse_expression` and prefix operators
    nesting: usize,
}

impl<'a> FormulaParser<'a> {
    fn new(input: &'a str, offset: usize) -> FormulaResult<Self> {
        let mut parser = Self {
            input,
            offset,
            pos: 0,
            token_start: 0,
            current_token: Token::Eof,
            nesting: 0,
        };
        parser.advance_token()?;
        Ok(parser)
    }

    // === Token scanning ===

    fn advance_token(&mut self) -> FormulaResult<()> {
        self.skip_whitespace();
        self.token_start = self.pos;
        self.current_token = self.scan_token()?;
        Ok(())
    }

    fn scan_token(&mut self) -> FormulaResult<Token> {
        let c = match self.peek_char() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };

        // Single-character tokens
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '=' => Some(Token::Equal),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        // Two-character operators
        if c == '<' {
            self.advance();
            if self.peek_char() == Some('=') {
                self.advance();
                return Ok(Token::LessEqual);
            } else if self.peek_char() == Some('>') {
                self.advance();
                return Ok(Token::NotEqual);
            }
            return Ok(Token::LessThan);
        }

        if c == '>' {
            self.advance();
            if self.peek_char() == Some('=') {
                self.advance();
                return Ok(Token::GreaterEqual);
            }
            return Ok(Token::GreaterThan);
        }

        // Number
        if c.is_ascii_digit()
            || (c == '.' && self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()))
        {
            return self.scan_number();
        }

        if c == '.' {
            self.advance();
            return Ok(Token::Dot);
        }

        if c == '\'' {
            return self.scan_quoted_name();
        }

        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.scan_identifier());
        }

        Err(FormulaError::parse(
            self.absolute(self.pos),
            format!("Unexpected character '{}'", c),
        ))
    }

    fn scan_number(&mut self) -> FormulaResult<Token> {
        let start = self.pos;

        // Integer part
        self.skip_digits();

        // Decimal part
        if self.peek_char() == Some('.') {
            self.advance();
            self.skip_digits();
        }

        // Exponent part, only when digits follow
        let mut scientific = false;
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let digit_at = match self.peek_char_at(1) {
                Some('+') | Some('-') => 2,
                _ => 1,
            };
            if self.peek_char_at(digit_at).map_or(false, |c| c.is_ascii_digit()) {
                scientific = true;
                for _ in 0..digit_at {
                    self.advance();
                }
                self.skip_digits();
            }
        }

        let text = &self.input[start..self.pos];
        let normalized = if text.starts_with('.') {
            format!("0{}", text)
        } else {
            text.to_string()
        };
        let parsed = if scientific {
            Decimal::from_scientific(&normalized)
        } else {
            Decimal::from_str(&normalized)
        };

        parsed.map(Token::Number).map_err(|_| {
            FormulaError::parse(self.absolute(start), format!("Invalid number '{}'", text))
        })
    }

    fn scan_identifier(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek_char()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }

        let text = self.input[start..self.pos].to_string();

        // A name followed by '(' is a function call
        if self.input[self.pos..].trim_start().starts_with('(') {
            Token::Function(text)
        } else {
            Token::Identifier(text)
        }
    }

    fn scan_quoted_name(&mut self) -> FormulaResult<Token> {
        let start = self.pos;
        self.advance(); // Skip opening quote

        let mut s = String::new();
        loop {
            match self.peek_char() {
                Some('\'') => {
                    // '' is an escaped quote
                    if self.peek_char_at(1) == Some('\'') {
                        s.push('\'');
                        self.advance();
                        self.advance();
                    } else {
                        self.advance();
                        break;
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
                None => {
                    return Err(FormulaError::parse(
                        self.absolute(start),
                        "Unterminated worksheet name",
                    ))
                }
            }
        }

        let name = s.trim();
        if name.is_empty() {
            return Err(FormulaError::parse(
                self.absolute(start),
                "Empty worksheet name",
            ));
        }
        Ok(Token::QuotedName(name.to_string()))
    }

    // === Helper methods ===

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_digits(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn absolute(&self, pos: usize) -> usize {
        self.offset + pos
    }

    fn token_position(&self) -> usize {
        self.absolute(self.token_start)
    }

    fn current_token(&self) -> &Token {
        &self.current_token
    }

    fn consume(&mut self) -> FormulaResult<Token> {
        let token = std::mem::replace(&mut self.current_token, Token::Eof);
        self.advance_token()?;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> FormulaResult<()> {
        if self.current_token() == expected {
            self.consume()?;
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", expected.describe())))
        }
    }

    fn unexpected(&self, context: &str) -> FormulaError {
        FormulaError::parse(
            self.token_position(),
            format!("Unexpected {}, {}", self.current_token().describe(), context),
        )
    }

    // === Expression parsing with precedence ===
    // Precedence (lowest to highest):
    // 1. OR
    // 2. AND
    // 3. NOT
    // 4. Comparison: =, <>, <, <=, >, >=
    // 5. Addition/Subtraction: +, -
    // 6. Multiplication/Division/Modulo: *, /, %
    // 7. Unary: -, +
    // 8. Primary: literals, references, function calls, parentheses

    fn parse_expression(&mut self) -> FormulaResult<Expr> {
        self.nested(Self::parse_or)
    }

    /// Run a nested parse, refusing to recurse past `MAX_NESTING`
    fn nested<T>(&mut self, parse: fn(&mut Self) -> FormulaResult<T>) -> FormulaResult<T> {
        if self.nesting >= MAX_NESTING {
            return Err(FormulaError::parse(
                self.token_position(),
                format!("Formula is nested more than {} levels deep", MAX_NESTING),
            ));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    /// Refuse trees too deep to evaluate
    fn bounded(&self, expr: Expr) -> FormulaResult<Expr> {
        if expr.depth() > MAX_DEPTH {
            return Err(FormulaError::parse(
                self.token_position(),
                format!("Formula has more than {} operations in a chain", MAX_DEPTH),
            ));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_and()?;

        while self.current_token().is_keyword("OR") {
            self.consume()?;
            let right = self.parse_and()?;
            left = self.bounded(Expr::binary(BinaryOperator::Or, left, right))?;
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_not()?;

        while self.current_token().is_keyword("AND") {
            self.consume()?;
            let right = self.parse_not()?;
            left = self.bounded(Expr::binary(BinaryOperator::And, left, right))?;
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> FormulaResult<Expr> {
        // NOT(x) is scanned as a function and handled in parse_primary
        if matches!(self.current_token(), Token::Identifier(s) if s.eq_ignore_ascii_case("NOT")) {
            self.consume()?;
            let operand = self.nested(Self::parse_not)?;
            return self.bounded(Expr::unary(UnaryOperator::Not, operand));
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current_token() {
                Token::Equal => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.consume()?;
            let right = self.parse_additive()?;
            left = self.bounded(Expr::binary(op, left, right))?;
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.consume()?;
            let right = self.parse_multiplicative()?;
            left = self.bounded(Expr::binary(op, left, right))?;
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                Token::Percent => BinaryOperator::Modulo,
                _ => break,
            };

            self.consume()?;
            let right = self.parse_unary()?;
            left = self.bounded(Expr::binary(op, left, right))?;
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<Expr> {
        // Prefix unary minus
        if matches!(self.current_token(), Token::Minus) {
            self.consume()?;
            let operand = self.nested(Self::parse_unary)?;
            return self.bounded(Expr::unary(UnaryOperator::Negate, operand));
        }

        // Prefix plus (no-op)
        if matches!(self.current_token(), Token::Plus) {
            self.consume()?;
            return self.nested(Self::parse_unary);
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> FormulaResult<Expr> {
        let position = self.token_position();

        match self.current_token().clone() {
            Token::Number(n) => {
                self.consume()?;
                Ok(Expr::Number(n))
            }

            Token::LeftParen => {
                self.consume()?;
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }

            Token::Identifier(name) => {
                if name.eq_ignore_ascii_case("TRUE") || name.eq_ignore_ascii_case("FALSE") {
                    self.consume()?;
                    return Ok(Expr::Boolean(name.eq_ignore_ascii_case("TRUE")));
                }
                if ["AND", "OR", "NOT"]
                    .iter()
                    .any(|k| name.eq_ignore_ascii_case(k))
                {
                    return Err(self.unexpected("expected an operand"));
                }

                self.consume()?;
                if matches!(self.current_token(), Token::Dot) {
                    self.parse_worksheet_reference(name)
                } else {
                    Ok(Expr::ColumnRef(name))
                }
            }

            Token::QuotedName(name) => {
                self.consume()?;
                if !matches!(self.current_token(), Token::Dot) {
                    return Err(self.unexpected("expected '.' after worksheet name"));
                }
                self.parse_worksheet_reference(name)
            }

            Token::Function(name) => {
                self.consume()?;
                let args = self.parse_arguments()?;
                let expr = self.resolve_function(&name, args, position)?;
                self.bounded(expr)
            }

            _ => Err(self.unexpected("expected an operand")),
        }
    }

    fn parse_arguments(&mut self) -> FormulaResult<Vec<Expr>> {
        self.expect(&Token::LeftParen)?;

        let mut args = Vec::new();

        // Parse arguments
        if !matches!(self.current_token(), Token::RightParen) {
            args.push(self.parse_expression()?);

            while matches!(self.current_token(), Token::Comma) {
                self.consume()?;
                args.push(self.parse_expression()?);
            }
        }

        self.expect(&Token::RightParen)?;
        Ok(args)
    }

    fn resolve_function(&self, name: &str, args: Vec<Expr>, position: usize) -> FormulaResult<Expr> {
        let upper = name.to_ascii_uppercase();

        // MIN/MAX over several values are scalar; with one argument they
        // aggregate a column
        if let Some(func) = AggregateFunction::from_name(&upper) {
            let scalar_form = matches!(func, AggregateFunction::Min | AggregateFunction::Max)
                && args.len() != 1;
            if !scalar_form {
                let column = aggregate_column(&upper, args, position)?;
                return Ok(Expr::Aggregate { func, column });
            }
        }

        let def = lookup_scalar(&upper).ok_or_else(|| {
            FormulaError::parse(position, format!("Unknown function: {}", upper))
        })?;

        if !def.accepts(args.len()) {
            return Err(FormulaError::parse(
                position,
                format!(
                    "{} expects {} argument(s), got {}",
                    def.name,
                    def.arity(),
                    args.len()
                ),
            ));
        }

        Ok(Expr::Function {
            func: def.function,
            args,
        })
    }

    /// After `Name` or `'Quoted Name'`, parse `.AGG(column)` or `.Property`
    fn parse_worksheet_reference(&mut self, worksheet: String) -> FormulaResult<Expr> {
        self.expect(&Token::Dot)?;
        let position = self.token_position();

        match self.current_token().clone() {
            Token::Function(name) => {
                self.consume()?;
                let args = self.parse_arguments()?;
                let upper = name.to_ascii_uppercase();
                let func = AggregateFunction::from_name(&upper).ok_or_else(|| {
                    FormulaError::parse(
                        position,
                        format!("Unknown worksheet function: {}", upper),
                    )
                })?;
                let column = aggregate_column(&upper, args, position)?;
                Ok(Expr::CrossSheetAggregate {
                    worksheet,
                    func,
                    column,
                })
            }

            Token::Identifier(name) => {
                let field = SummaryField::from_name(&name).ok_or_else(|| {
                    FormulaError::parse(
                        position,
                        format!("Unknown worksheet property: {}", name),
                    )
                })?;
                self.consume()?;
                Ok(Expr::CrossSheetProperty { worksheet, field })
            }

            _ => Err(self.unexpected("expected an aggregate or property after '.'")),
        }
    }
}

/// Aggregates take exactly one bare column key
fn aggregate_column(name: &str, args: Vec<Expr>, position: usize) -> FormulaResult<String> {
    if args.len() != 1 {
        return Err(FormulaError::parse(
            position,
            format!("{} expects 1 argument, got {}", name, args.len()),
        ));
    }

    match args.into_iter().next() {
        Some(Expr::ColumnRef(column)) => Ok(column),
        _ => Err(FormulaError::parse(
            position,
            format!("{} expects a column key", name),
        )),
    }
}
