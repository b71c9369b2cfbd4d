//! 版本约束表达式
//!
//! 把约束字符串解析为语法树 [`ConstraintExpr`]，再对 [`Version`] 求值。
//! 解析只做一次，求值不会重复切分字符串。
//!
//! # 语法
//!
//! ```text
//! disjunction := conjunction ( "||" conjunction )*
//! conjunction := term ( [","] term )*
//! term        := "*" | VERSION "-" VERSION | OP VERSION | "~" VERSION | "^" VERSION | VERSION
//! OP          := ">" | ">=" | "<" | "<=" | "="
//! ```
//!
//! 空字符串与 `*` 表示任意版本。短版本（`1`、`1.2`）在比较前以 0 补齐。
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::module::constraint::satisfies;
//! use chips_modules::module::version::Version;
//!
//! let version = Version::parse("1.2.4").unwrap();
//! assert!(satisfies(&version, "^1.2.3"));
//! assert!(satisfies(&version, "~1.2.3"));
//! assert!(!satisfies(&version, ">=2.0 || <1.0"));
//! ```

use std::fmt;
use std::str::FromStr;

use super::version::{PartialVersion, Version};
use crate::utils::{CoreError, Result};

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `=`
    Exact,
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `<`
    Less,
    /// `<=`
    LessEq,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Exact => "=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
        };
        f.write_str(s)
    }
}

/// 基本比较：`op version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    /// 运算符
    pub op: Op,
    /// 比较对象（已补齐）
    pub version: Version,
}

impl Comparator {
    /// 创建比较项
    pub fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    /// 判断版本是否满足此比较
    pub fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Exact => version == &self.version,
            Op::Greater => version > &self.version,
            Op::GreaterEq => version >= &self.version,
            Op::Less => version < &self.version,
            Op::LessEq => version <= &self.version,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}

/// 约束语法树
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintExpr {
    /// 任意版本
    Wildcard,
    /// 基本比较
    Comparison(Comparator),
    /// 闭区间 `lower - upper`
    Range {
        /// 下界（含）
        lower: Version,
        /// 上界（含）
        upper: Version,
    },
    /// 所有子项同时满足
    Conjunction(Vec<ConstraintExpr>),
    /// 任一子项满足
    Disjunction(Vec<ConstraintExpr>),
}

impl ConstraintExpr {
    /// 对版本求值
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            ConstraintExpr::Wildcard => true,
            ConstraintExpr::Comparison(cmp) => cmp.matches(version),
            ConstraintExpr::Range { lower, upper } => version >= lower && version <= upper,
            ConstraintExpr::Conjunction(terms) => terms.iter().all(|t| t.matches(version)),
            ConstraintExpr::Disjunction(alternatives) => {
                alternatives.iter().any(|a| a.matches(version))
            }
        }
    }
}

impl fmt::Display for ConstraintExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintExpr::Wildcard => f.write_str("*"),
            ConstraintExpr::Comparison(cmp) => write!(f, "{}", cmp),
            ConstraintExpr::Range { lower, upper } => write!(f, "{} - {}", lower, upper),
            ConstraintExpr::Conjunction(terms) => {
                let parts: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
                f.write_str(&parts.join(" "))
            }
            ConstraintExpr::Disjunction(alternatives) => {
                let parts: Vec<String> = alternatives.iter().map(|a| a.to_string()).collect();
                f.write_str(&parts.join(" || "))
            }
        }
    }
}

/// 解析后的版本约束
///
/// 保留原始文本，错误信息中引用的是用户写下的约束而不是展开后的形式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    source: String,
    expr: ConstraintExpr,
}

impl VersionConstraint {
    /// 解析约束字符串
    ///
    /// # 错误
    ///
    /// 语法错误或操作数不是合法版本时返回 `CoreError::InvalidConstraint`。
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = Lexer::new(text).tokenize()?;
        let expr = Parser::new(text, tokens).parse()?;
        Ok(Self {
            source: text.trim().to_string(),
            expr,
        })
    }

    /// 判断版本是否满足约束
    pub fn matches(&self, version: &Version) -> bool {
        self.expr.matches(version)
    }

    /// 原始约束文本
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 语法树
    pub fn expr(&self) -> &ConstraintExpr {
        &self.expr
    }

    /// 是否为任意版本
    pub fn is_wildcard(&self) -> bool {
        self.expr == ConstraintExpr::Wildcard
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for VersionConstraint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        VersionConstraint::parse(s)
    }
}

/// 判断版本是否满足约束字符串
///
/// 约束只是建议性的谓词：约束本身无法解析时返回 `false`，不返回错误。
pub fn satisfies(version: &Version, constraint: &str) -> bool {
    match VersionConstraint::parse(constraint) {
        Ok(parsed) => parsed.matches(version),
        Err(e) => {
            tracing::debug!(constraint = %constraint, error = %e, "约束无法解析，视为不满足");
            false
        }
    }
}

// ============================================================================
// 词法分析
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// `||`
    Or,
    /// 区间连字符（两侧有空白）
    Hyphen,
    /// `*`
    Star,
    /// `~`
    Tilde,
    /// `^`
    Caret,
    /// 比较运算符
    Op(Op),
    /// 版本字面量
    Literal(String),
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(&(start, c)) = self.chars.peek() {
            match c {
                c if c.is_whitespace() || c == ',' => {
                    self.chars.next();
                }
                '|' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some((_, '|')) => tokens.push(Token::Or),
                        _ => return Err(invalid(self.source, "'|' 必须成对出现")),
                    }
                }
                '*' => {
                    self.chars.next();
                    tokens.push(Token::Star);
                }
                '~' => {
                    self.chars.next();
                    tokens.push(Token::Tilde);
                }
                '^' => {
                    self.chars.next();
                    tokens.push(Token::Caret);
                }
                '>' | '<' | '=' => {
                    self.chars.next();
                    let or_equal = matches!(self.chars.peek(), Some(&(_, '=')));
                    if or_equal && c != '=' {
                        self.chars.next();
                    }
                    let op = match (c, or_equal) {
                        ('>', true) => Op::GreaterEq,
                        ('>', false) => Op::Greater,
                        ('<', true) => Op::LessEq,
                        ('<', false) => Op::Less,
                        _ => Op::Exact,
                    };
                    tokens.push(Token::Op(op));
                }
                '-' => {
                    // 字面量内部的连字符（预发布标签）在 literal 分支中消费，
                    // 走到这里的只能是独立的区间连字符
                    self.chars.next();
                    tokens.push(Token::Hyphen);
                }
                c if is_literal_char(c) => {
                    let end = self.consume_literal(start);
                    tokens.push(Token::Literal(self.source[start..end].to_string()));
                }
                other => {
                    return Err(invalid(self.source, &format!("无法识别的字符 '{}'", other)));
                }
            }
        }

        Ok(tokens)
    }

    fn consume_literal(&mut self, start: usize) -> usize {
        let mut end = start;
        while let Some(&(idx, c)) = self.chars.peek() {
            if is_literal_char(c) || c == '-' {
                end = idx + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        end
    }
}

fn is_literal_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '+'
}

// ============================================================================
// 语法分析（递归下降）
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<ConstraintExpr> {
        if self.tokens.is_empty() {
            return Ok(ConstraintExpr::Wildcard);
        }
        let expr = self.parse_disjunction()?;
        if self.pos < self.tokens.len() {
            return Err(invalid(self.source, "约束末尾存在多余内容"));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_disjunction(&mut self) -> Result<ConstraintExpr> {
        let mut alternatives = vec![self.parse_conjunction()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            alternatives.push(self.parse_conjunction()?);
        }
        Ok(if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            ConstraintExpr::Disjunction(alternatives)
        })
    }

    fn parse_conjunction(&mut self) -> Result<ConstraintExpr> {
        let mut terms = Vec::new();
        while let Some(token) = self.peek() {
            if *token == Token::Or {
                break;
            }
            terms.push(self.parse_term()?);
        }
        match terms.len() {
            0 => Err(invalid(self.source, "'||' 两侧必须有约束")),
            1 => Ok(terms.remove(0)),
            _ => Ok(ConstraintExpr::Conjunction(terms)),
        }
    }

    fn parse_term(&mut self) -> Result<ConstraintExpr> {
        match self.next() {
            Some(Token::Star) => Ok(ConstraintExpr::Wildcard),
            Some(Token::Op(op)) => {
                let operand = self.expect_operand()?;
                Ok(ConstraintExpr::Comparison(Comparator::new(op, operand.into_version())))
            }
            Some(Token::Tilde) => {
                let operand = self.expect_operand()?;
                Ok(tilde(operand))
            }
            Some(Token::Caret) => {
                let operand = self.expect_operand()?;
                Ok(caret(operand))
            }
            Some(Token::Literal(text)) => {
                let lower = self.operand(&text)?;
                if matches!(self.peek(), Some(Token::Hyphen)) {
                    self.next();
                    let upper = self.expect_operand()?;
                    return Ok(ConstraintExpr::Range {
                        lower: lower.into_version(),
                        upper: upper.into_version(),
                    });
                }
                Ok(ConstraintExpr::Comparison(Comparator::new(
                    Op::Exact,
                    lower.into_version(),
                )))
            }
            Some(Token::Hyphen) => Err(invalid(self.source, "区间 '-' 缺少下界")),
            Some(Token::Or) | None => Err(invalid(self.source, "缺少约束项")),
        }
    }

    fn expect_operand(&mut self) -> Result<PartialVersion> {
        match self.next() {
            Some(Token::Literal(text)) => self.operand(&text),
            _ => Err(invalid(self.source, "运算符后缺少版本号")),
        }
    }

    fn operand(&self, text: &str) -> Result<PartialVersion> {
        PartialVersion::parse(text).map_err(|e| invalid(self.source, &e.to_string()))
    }
}

/// `~1.2.3` → `>=1.2.3 <1.3.0`；`~1.2` 与 `~1` → `>=1.x.0 <2.0.0`
fn tilde(operand: PartialVersion) -> ConstraintExpr {
    let upper = if operand.patch.is_some() {
        operand
            .minor
            .unwrap_or(0)
            .checked_add(1)
            .map(|minor| Version::new(operand.major, minor, 0))
    } else {
        operand.major.checked_add(1).map(|major| Version::new(major, 0, 0))
    };
    bounded(operand.into_version(), upper)
}

/// `^1.2.3` → `<2.0.0`；`^0.2.3` → `<0.3.0`；`^0.0.3` → `<0.0.4`
fn caret(operand: PartialVersion) -> ConstraintExpr {
    let upper = match (operand.major, operand.minor, operand.patch) {
        (m, _, _) if m > 0 => m.checked_add(1).map(|m| Version::new(m, 0, 0)),
        (_, Some(n), _) if n > 0 => n.checked_add(1).map(|n| Version::new(0, n, 0)),
        (_, _, Some(p)) => p.checked_add(1).map(|p| Version::new(0, 0, p)),
        (_, Some(_), None) => Some(Version::new(0, 1, 0)),
        (_, None, _) => Some(Version::new(1, 0, 0)),
    };
    bounded(operand.into_version(), upper)
}

/// 上界溢出 `u64` 时不设上界
fn bounded(lower: Version, upper: Option<Version>) -> ConstraintExpr {
    let lower = ConstraintExpr::Comparison(Comparator::new(Op::GreaterEq, lower));
    match upper {
        Some(upper) => ConstraintExpr::Conjunction(vec![
            lower,
            ConstraintExpr::Comparison(Comparator::new(Op::Less, upper)),
        ]),
        None => lower,
    }
}

fn invalid(constraint: &str, reason: &str) -> CoreError {
    CoreError::InvalidConstraint {
        constraint: constraint.to_string(),
        reason: reason.to_string(),
    }
}
