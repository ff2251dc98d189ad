//! The `#expr` floating point expression evaluation engine.

// The operator set and precedence follow ExprParser.php in the MediaWiki
// ParserFunctions extension.

use std::{
    borrow::Cow,
    f64::consts::{E, PI},
};

/// An expression evaluation error.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// Someone tried to do too much arithmetic at once.
    #[error("stack exhausted at {0}")]
    StackExhausted(usize),
    /// Encountered an unknown token.
    #[error("unknown token '{0}'")]
    UnknownToken(Cow<'static, str>),
    /// Encountered a number where it shouldn’t’ve been.
    #[error("unexpected number {0}")]
    UnexpectedNumber(f64),
    /// Encountered an operator where it shouldn’t’ve been.
    #[error("unexpected operator '{0}'")]
    UnexpectedOperator(Cow<'static, str>),
    /// Encountered a close bracket where it shouldn’t’ve been.
    #[error("unexpected closing bracket")]
    UnexpectedCloseBracket,
    /// Never encountered a close bracket where it should’ve been.
    #[error("unclosed bracket")]
    MissingCloseBracket,
    /// A required operand was missing.
    #[error("missing operand for '{0}'")]
    MissingOperand(Cow<'static, str>),
    /// Someone tried to do that thing you’re not supposed to do with numbers.
    #[error("division by zero in operator '{0}'")]
    DivisionByZero(Cow<'static, str>),
    /// The operand was outside of the function’s domain.
    #[error("invalid argument to operator '{0}'")]
    InvalidArgument(Cow<'static, str>),
}

impl Error {
    /// The token to blame in a user-visible `Expression error near …`
    /// message.
    pub fn near(&self) -> Cow<'static, str> {
        match self {
            Error::StackExhausted(_) | Error::UnexpectedCloseBracket => Cow::Borrowed(")"),
            Error::UnknownToken(tok) => tok.clone(),
            Error::UnexpectedNumber(n) => Cow::Owned(format_number(*n)),
            Error::UnexpectedOperator(op)
            | Error::MissingOperand(op)
            | Error::DivisionByZero(op)
            | Error::InvalidArgument(op) => op.clone(),
            Error::MissingCloseBracket => Cow::Borrowed("&lt;end&gt;"),
        }
    }
}

/// Formats an evaluation result the way MediaWiki prints expression values:
/// integral values print without a decimal part.
pub fn format_number(value: f64) -> String {
    if value == f64::INFINITY {
        "INF".to_string()
    } else if value == f64::NEG_INFINITY {
        "-INF".to_string()
    } else if value.is_nan() {
        "NAN".to_string()
    } else {
        // Rust’s shortest-representation Display already omits a trailing
        // `.0` for integral values.
        format!("{value}")
    }
}

/// Maximum allowed number of in-flight operators or operands.
const MAX_STACK_SIZE: usize = 100;

/// Evaluates a mathematical expression.
///
/// Returns `Ok(None)` for an expression with no operands at all (MediaWiki
/// renders this as an empty string). The algorithm is Dijkstra’s shunting
/// yard, evaluating operations as their right operands complete.
pub fn evaluate(expr: &str) -> Result<Option<f64>, Error> {
    let mut operands: Vec<f64> = Vec::new();
    let mut operators: Vec<Token> = Vec::new();

    let expr = expr
        .replace("&minus;", "-")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace('−', "-");

    let mut iter = expr.char_indices().peekable();
    let mut expecting = Kind::Operand;

    while let Some((pos, char)) = iter.next() {
        if operands.len() >= MAX_STACK_SIZE || operators.len() >= MAX_STACK_SIZE {
            return Err(Error::StackExhausted(pos));
        }

        let op;
        if char.is_ascii_whitespace() {
            continue;
        } else if char.is_ascii_digit() || char == '.' {
            let mut end = pos;
            let mut seps = usize::from(char == '.');
            while let Some((pos, char)) =
                iter.next_if(|(_, char)| char.is_ascii_digit() || *char == '.')
            {
                // "1.2.3.4.5" parses as 1.2, so everything beyond the second
                // separator is consumed but ignored
                if char == '.' {
                    seps += 1;
                }
                if seps < 2 {
                    end = pos;
                }
            }

            let text = &expr[pos..=end];
            // A lone "." is a valid zero
            let number = if text.chars().all(|c| c == '.') {
                0.0
            } else {
                text.parse::<f64>()
                    .map_err(|_| Error::UnknownToken(text.to_string().into()))?
            };

            if expecting != Kind::Operand {
                return Err(Error::UnexpectedNumber(number));
            }

            operands.push(number);
            expecting = Kind::Operator;
            continue;
        } else if char.is_ascii_alphabetic() {
            let mut end = pos;
            while let Some((pos, _)) = iter.next_if(|(_, char)| char.is_alphabetic()) {
                end = pos;
            }

            let word = &expr[pos..=end];
            let Some(word_op) = word_token(&word.to_ascii_lowercase()) else {
                return Err(Error::UnknownToken(word.to_string().into()));
            };
            op = word_op;

            match op {
                // "e" doubles as Euler’s number when an operand is expected
                Token::Exponent => {
                    if expecting == Kind::Operand {
                        operands.push(E);
                        expecting = Kind::Operator;
                        continue;
                    }
                }
                Token::Pi => {
                    if expecting != Kind::Operand {
                        return Err(Error::UnexpectedNumber(PI));
                    }
                    operands.push(PI);
                    expecting = Kind::Operator;
                    continue;
                }
                op if op.is_unary() => {
                    if expecting != Kind::Operand {
                        return Err(Error::UnexpectedOperator(word.to_string().into()));
                    }
                    operators.push(op);
                    continue;
                }
                _ => {
                    // Binary operator, fall through
                }
            }
        } else if char == '+' {
            if expecting == Kind::Operand {
                operators.push(Token::Positive);
                continue;
            }
            op = Token::Plus;
        } else if char == '-' {
            if expecting == Kind::Operand {
                operators.push(Token::Negative);
                continue;
            }
            op = Token::Minus;
        } else if char == '*' {
            op = Token::Times;
        } else if char == '/' {
            op = Token::Divide;
        } else if char == '^' {
            op = Token::Pow;
        } else if char == '(' {
            if expecting == Kind::Operator {
                return Err(Error::UnexpectedOperator("(".into()));
            }
            operators.push(Token::Open);
            continue;
        } else if char == ')' {
            loop {
                match operators.pop() {
                    Some(Token::Open) => break,
                    Some(op) => apply(op, &mut operands)?,
                    None => return Err(Error::UnexpectedCloseBracket),
                }
            }
            expecting = Kind::Operator;
            continue;
        } else if char == '=' {
            op = Token::Equal;
        } else if char == '<' {
            if iter.next_if(|(_, char)| *char == '=').is_some() {
                op = Token::LessEq;
            } else if iter.next_if(|(_, char)| *char == '>').is_some() {
                op = Token::NotEq;
            } else {
                op = Token::Less;
            }
        } else if char == '>' {
            if iter.next_if(|(_, char)| *char == '=').is_some() {
                op = Token::GreaterEq;
            } else {
                op = Token::Greater;
            }
        } else if char == '!' && iter.next_if(|(_, char)| *char == '=').is_some() {
            op = Token::NotEq;
        } else {
            return Err(Error::UnknownToken(char.to_string().into()));
        }

        if expecting == Kind::Operand {
            return Err(Error::UnexpectedOperator(op.name().into()));
        }

        while let Some(&last) = operators.last()
            && op.precedence() <= last.precedence()
        {
            apply(last, &mut operands)?;
            operators.pop();
        }
        operators.push(op);
        expecting = Kind::Operand;
    }

    while let Some(op) = operators.pop() {
        if op == Token::Open {
            return Err(Error::MissingCloseBracket);
        }
        apply(op, &mut operands)?;
    }

    debug_assert!(operands.len() < 2, "'{expr}' left extra operands");
    Ok(operands.pop())
}

/// Operator tokens, named after their input spelling.
// Clippy: the names repeat the input tokens.
#[allow(clippy::missing_docs_in_private_items)]
#[derive(Clone, Copy, Eq, PartialEq)]
enum Token {
    Negative,
    Positive,
    Plus,
    Minus,
    Times,
    Divide,
    Mod,
    FMod,
    Open,
    And,
    Or,
    Not,
    Equal,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    NotEq,
    Round,
    Exponent,
    Sin,
    Cos,
    Tan,
    ASin,
    ACos,
    ATan,
    Exp,
    Ln,
    Abs,
    Floor,
    Trunc,
    Ceil,
    Pow,
    Pi,
    Sqrt,
}

impl Token {
    /// Returns true for unary prefix operators.
    const fn is_unary(self) -> bool {
        matches!(
            self,
            Token::Not
                | Token::Sin
                | Token::Cos
                | Token::Tan
                | Token::ASin
                | Token::ACos
                | Token::ATan
                | Token::Exp
                | Token::Ln
                | Token::Abs
                | Token::Floor
                | Token::Trunc
                | Token::Ceil
                | Token::Sqrt
        )
    }

    /// Returns the precedence of the token.
    const fn precedence(self) -> i32 {
        match self {
            Token::Negative | Token::Positive | Token::Exponent => 10,
            op if op.is_unary() => 9,
            Token::Pow => 8,
            Token::Times | Token::Divide | Token::Mod | Token::FMod => 7,
            Token::Plus | Token::Minus => 6,
            Token::Round => 5,
            Token::Equal
            | Token::Less
            | Token::Greater
            | Token::LessEq
            | Token::GreaterEq
            | Token::NotEq => 4,
            Token::And => 3,
            Token::Or => 2,
            Token::Pi => 0,
            _ => -1,
        }
    }

    /// Returns the input spelling of the token.
    const fn name(self) -> &'static str {
        match self {
            Token::Not => "not",
            Token::Times => "*",
            Token::Divide => "/",
            Token::Mod => "mod",
            Token::FMod => "fmod",
            Token::Positive | Token::Plus => "+",
            Token::Negative | Token::Minus => "-",
            Token::Round => "round",
            Token::Equal => "=",
            Token::Less => "<",
            Token::Greater => ">",
            Token::LessEq => "<=",
            Token::GreaterEq => ">=",
            Token::NotEq => "<>",
            Token::And => "and",
            Token::Or => "or",
            Token::Exponent => "e",
            Token::Sin => "sin",
            Token::Cos => "cos",
            Token::Tan => "tan",
            Token::ASin => "asin",
            Token::ACos => "acos",
            Token::ATan => "atan",
            Token::Ln => "ln",
            Token::Exp => "exp",
            Token::Abs => "abs",
            Token::Floor => "floor",
            Token::Trunc => "trunc",
            Token::Ceil => "ceil",
            Token::Pow => "^",
            Token::Pi => "pi",
            Token::Sqrt => "sqrt",
            Token::Open => "(",
        }
    }
}

/// Returns the token corresponding to a keyword, or `None` if the word is
/// not part of the expression language.
fn word_token(input: &str) -> Option<Token> {
    Some(match input {
        "mod" => Token::Mod,
        "fmod" => Token::FMod,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "round" => Token::Round,
        "div" => Token::Divide,
        "e" => Token::Exponent,
        "sin" => Token::Sin,
        "cos" => Token::Cos,
        "tan" => Token::Tan,
        "asin" => Token::ASin,
        "acos" => Token::ACos,
        "atan" => Token::ATan,
        "exp" => Token::Exp,
        "ln" => Token::Ln,
        "abs" => Token::Abs,
        "trunc" => Token::Trunc,
        "floor" => Token::Floor,
        "ceil" => Token::Ceil,
        "pi" => Token::Pi,
        "sqrt" => Token::Sqrt,
        _ => return None,
    })
}

/// A subexpression kind.
#[derive(PartialEq, Eq)]
enum Kind {
    /// An operand.
    Operand,
    /// An operator.
    Operator,
}

/// Pops the operands for `op` off the stack, applies the operation, and
/// pushes the result.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::float_cmp)]
fn apply(op: Token, stack: &mut Vec<f64>) -> Result<(), Error> {
    let missing = || Error::MissingOperand(op.name().into());

    let mut unary = |f: &dyn Fn(f64) -> Result<f64, Error>| {
        let arg = stack.pop().ok_or_else(missing)?;
        stack.push(f(arg)?);
        Ok(())
    };

    match op {
        Token::Negative => return unary(&|x| Ok(-x)),
        Token::Positive => {
            if stack.is_empty() {
                return Err(missing());
            }
            return Ok(());
        }
        Token::Not => return unary(&|x| Ok(f64::from(x == 0.0))),
        Token::Sin => return unary(&|x| Ok(x.sin())),
        Token::Cos => return unary(&|x| Ok(x.cos())),
        Token::Tan => return unary(&|x| Ok(x.tan())),
        Token::ASin => {
            return unary(&|x| {
                if (-1.0..=1.0).contains(&x) {
                    Ok(x.asin())
                } else {
                    Err(Error::InvalidArgument("asin".into()))
                }
            });
        }
        Token::ACos => {
            return unary(&|x| {
                if (-1.0..=1.0).contains(&x) {
                    Ok(x.acos())
                } else {
                    Err(Error::InvalidArgument("acos".into()))
                }
            });
        }
        Token::ATan => return unary(&|x| Ok(x.atan())),
        Token::Exp => return unary(&|x| Ok(x.exp())),
        Token::Ln => {
            return unary(&|x| {
                if x > 0.0 { Ok(x.ln()) } else { Err(Error::InvalidArgument("ln".into())) }
            });
        }
        Token::Abs => return unary(&|x| Ok(x.abs())),
        Token::Floor => return unary(&|x| Ok(x.floor())),
        Token::Trunc => return unary(&|x| Ok(x.trunc())),
        Token::Ceil => return unary(&|x| Ok(x.ceil())),
        Token::Sqrt => {
            return unary(&|x| {
                if x < 0.0 {
                    Err(Error::InvalidArgument("sqrt".into()))
                } else {
                    Ok(x.sqrt())
                }
            });
        }
        _ => {}
    }

    let right = stack.pop().ok_or_else(missing)?;
    let left = stack.pop().ok_or_else(missing)?;
    let result = match op {
        Token::Times => left * right,
        Token::Divide => {
            if right == 0.0 {
                return Err(Error::DivisionByZero("/".into()));
            }
            left / right
        }
        Token::Mod => {
            if right == 0.0 {
                return Err(Error::DivisionByZero("mod".into()));
            }
            ((left as i64) % (right as i64)) as f64
        }
        Token::FMod => {
            if right == 0.0 {
                return Err(Error::DivisionByZero("fmod".into()));
            }
            left.rem_euclid(right)
        }
        Token::Plus => left + right,
        Token::Minus => left - right,
        Token::And => f64::from(left != 0.0 && right != 0.0),
        Token::Or => f64::from(left != 0.0 || right != 0.0),
        Token::Equal => f64::from(left == right),
        Token::NotEq => f64::from(left != right),
        Token::Less => f64::from(left < right),
        Token::Greater => f64::from(left > right),
        Token::LessEq => f64::from(left <= right),
        Token::GreaterEq => f64::from(left >= right),
        Token::Round => {
            // Rounding to an absurd number of digits would overflow to
            // infinity, in which case the value passes through unchanged
            if let Some(y) = 10_i32.checked_pow(right as u32) {
                let y = f64::from(y);
                (left * y).round() / y
            } else {
                left
            }
        }
        Token::Exponent => left * 10.0_f64.powf(right),
        Token::Pow => left.powf(right),
        _ => unreachable!(),
    };
    stack.push(result);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        assert_eq!(evaluate("1 + 1"), Ok(Some(2.0)));
        assert_eq!(evaluate("2 + 3 * 4"), Ok(Some(14.0)));
        assert_eq!(evaluate("(2+3)*4"), Ok(Some(20.0)));
        assert_eq!(evaluate("-1 + 1"), Ok(Some(0.0)));
        assert_eq!(evaluate("+1 + 1"), Ok(Some(2.0)));
        assert_eq!(evaluate("3 / 1.5"), Ok(Some(2.0)));
        assert_eq!(evaluate("3 mod 2"), Ok(Some(1.0)));
        assert_eq!(evaluate("7 div 2"), Ok(Some(3.5)));
        assert_eq!(evaluate("2^10"), Ok(Some(1024.0)));
        assert_eq!(evaluate("1e4"), Ok(Some(10000.0)));
        assert_eq!(evaluate("1e-2"), Ok(Some(0.01)));
        assert_eq!(evaluate("2 3e2"), Err(Error::UnexpectedNumber(300.0)));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(evaluate("1 or 0"), Ok(Some(1.0)));
        assert_eq!(evaluate("not (1 and 0)"), Ok(Some(1.0)));
        assert_eq!(evaluate("4 < 5"), Ok(Some(1.0)));
        assert_eq!(evaluate("1 != 2"), Ok(Some(1.0)));
        assert_eq!(evaluate("1 <> 2"), Ok(Some(1.0)));
        assert_eq!(evaluate("-4 * -4 = 4 * 4"), Ok(Some(1.0)));
        assert_eq!(evaluate("1+1=2"), Ok(Some(1.0)));
    }

    #[test]
    fn functions_and_constants() {
        assert_eq!(evaluate("abs(-2)"), Ok(Some(2.0)));
        assert_eq!(evaluate("ln(exp(1))"), Ok(Some(1.0)));
        assert_eq!(evaluate("trunc(4.5)"), Ok(Some(4.0)));
        assert_eq!(evaluate("trunc(-4.5)"), Ok(Some(-4.0)));
        assert_eq!(evaluate("ceil 4.2"), Ok(Some(5.0)));
        assert_eq!(evaluate("floor -4.5"), Ok(Some(-5.0)));
        assert_eq!(evaluate("4.5 round 0"), Ok(Some(5.0)));
        assert_eq!(evaluate("sqrt(4)"), Ok(Some(2.0)));
        assert_eq!(evaluate("sin(0)"), Ok(Some(0.0)));
        assert_eq!(evaluate("acos(1)"), Ok(Some(0.0)));
        assert_eq!(evaluate("pi + 1"), Ok(Some(1.0 + PI)));
        assert_eq!(evaluate("e > 2"), Ok(Some(1.0)));
    }

    #[test]
    fn oddities() {
        assert_eq!(evaluate(""), Ok(None));
        assert_eq!(evaluate(" "), Ok(None));
        assert_eq!(evaluate("."), Ok(Some(0.0)));
        assert_eq!(evaluate("1.2.3.4.5"), Ok(Some(1.2)));
        assert_eq!(evaluate("1.9.2 > 1.10.9"), Ok(Some(1.0)));
        assert_eq!(evaluate("10 round 100"), Ok(Some(10.0)));
        assert_eq!(evaluate("1 &lt; 2"), Ok(Some(1.0)));
    }

    #[test]
    fn errors() {
        assert_eq!(evaluate("1/0"), Err(Error::DivisionByZero("/".into())));
        assert_eq!(evaluate("1 mod 0"), Err(Error::DivisionByZero("mod".into())));
        assert_eq!(evaluate("foo"), Err(Error::UnknownToken("foo".into())));
        assert_eq!(evaluate("1 2"), Err(Error::UnexpectedNumber(2.0)));
        assert_eq!(evaluate("(1"), Err(Error::MissingCloseBracket));
        assert_eq!(evaluate("1 + 1)"), Err(Error::UnexpectedCloseBracket));
        assert_eq!(evaluate("1*"), Err(Error::MissingOperand("*".into())));
        assert_eq!(evaluate("ln(-1)"), Err(Error::InvalidArgument("ln".into())));
        assert_eq!(evaluate("sqrt(-1)"), Err(Error::InvalidArgument("sqrt".into())));
        assert_eq!(evaluate("asin(3)"), Err(Error::InvalidArgument("asin".into())));
        assert_eq!(evaluate("1 sin"), Err(Error::UnexpectedOperator("sin".into())));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_number(14.0), "14");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(f64::INFINITY), "INF");
    }
}
