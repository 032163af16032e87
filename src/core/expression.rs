use super::error::{OptimizeError, Result};

/// Evaluation stack depth; deeper expressions are rejected at compile time.
const STACK_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Sqrt,
    Exp,
    Ln,
    Log10,
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sqrt" => Some(Self::Sqrt),
            "exp" => Some(Self::Exp),
            "ln" | "log" => Some(Self::Ln),
            "log10" => Some(Self::Log10),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Sqrt => x.sqrt(),
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Log10 => x.log10(),
            Self::Abs => x.abs(),
        }
    }
}

/// Compact bytecode instruction
#[derive(Debug, Clone, Copy)]
enum OpCode {
    LoadConst(u16),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Function),
}

/// Arithmetic expression compiled to a small stack program.
///
/// Used for annotation hyperparameters such as `bias=1/(2*pi)`, which are
/// evaluated once when the template is parsed.
#[derive(Clone, Debug)]
pub struct CompiledExpression {
    instructions: Vec<OpCode>,
    constants: Vec<f64>, // Constant pool
}

impl CompiledExpression {
    pub fn new(expr: &str) -> Result<Self> {
        Compiler::new().compile(expr).map_err(|e| {
            OptimizeError::Expression(format!("failed to compile '{}': {}", expr, e))
        })
    }

    /// Internal evaluation - returns static error strings
    #[inline]
    pub fn evaluate(&self) -> std::result::Result<f64, &'static str> {
        let mut stack = [0.0f64; STACK_SIZE];
        let mut sp = 0usize; // Stack pointer

        for &inst in &self.instructions {
            match inst {
                OpCode::LoadConst(idx) => {
                    stack[sp] = self.constants[idx as usize];
                    sp += 1;
                }
                OpCode::Add => {
                    sp -= 1;
                    stack[sp - 1] += stack[sp];
                }
                OpCode::Sub => {
                    sp -= 1;
                    stack[sp - 1] -= stack[sp];
                }
                OpCode::Mul => {
                    sp -= 1;
                    stack[sp - 1] *= stack[sp];
                }
                OpCode::Div => {
                    sp -= 1;
                    let divisor = stack[sp];
                    if divisor == 0.0 {
                        return Err("Division by zero");
                    }
                    stack[sp - 1] /= divisor;
                }
                OpCode::Pow => {
                    sp -= 1;
                    stack[sp - 1] = stack[sp - 1].powf(stack[sp]);
                }
                OpCode::Neg => {
                    stack[sp - 1] = -stack[sp - 1];
                }
                OpCode::Call(function) => {
                    stack[sp - 1] = function.apply(stack[sp - 1]);
                }
            }
        }

        if sp != 1 {
            return Err("Invalid expression");
        }

        Ok(stack[0])
    }
}

/// Compile and evaluate a hyperparameter expression.
pub fn evaluate_constant(expr: &str) -> Result<f64> {
    let compiled = CompiledExpression::new(expr)?;
    let value = compiled.evaluate().map_err(|e| {
        OptimizeError::Expression(format!("failed to evaluate '{}': {}", expr, e))
    })?;
    if !value.is_finite() {
        return Err(OptimizeError::Expression(format!(
            "'{}' does not evaluate to a finite number",
            expr
        )));
    }
    Ok(value)
}

struct Compiler {
    instructions: Vec<OpCode>,
    constants: Vec<f64>,
    depth: usize,
    max_depth: usize,
}

impl Compiler {
    fn new() -> Self {
        Self {
            instructions: Vec::with_capacity(32),
            constants: Vec::with_capacity(8),
            depth: 0,
            max_depth: 0,
        }
    }

    fn compile(mut self, expr: &str) -> std::result::Result<CompiledExpression, String> {
        let cleaned: String = expr
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .replace("**", "^");

        if cleaned.is_empty() {
            return Err("Expression cannot be empty".into());
        }

        self.parse_expr(&cleaned)
            .map_err(|e| format!("Parse error: {}", e))?;

        if self.max_depth > STACK_SIZE {
            return Err(format!(
                "Expression needs a stack of {} (limit {})",
                self.max_depth, STACK_SIZE
            ));
        }

        Ok(CompiledExpression {
            instructions: self.instructions,
            constants: self.constants,
        })
    }

    fn emit(&mut self, op: OpCode) {
        match op {
            OpCode::LoadConst(_) => {
                self.depth += 1;
                self.max_depth = self.max_depth.max(self.depth);
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                self.depth -= 1;
            }
            OpCode::Neg | OpCode::Call(_) => {}
        }
        self.instructions.push(op);
    }

    fn add_const(&mut self, val: f64) -> u16 {
        // Reuse existing constants
        if let Some(idx) = self.constants.iter().position(|&v| v == val) {
            return idx as u16;
        }
        let idx = self.constants.len();
        self.constants.push(val);
        idx as u16
    }

    fn parse_expr(&mut self, s: &str) -> std::result::Result<(), String> {
        self.parse_additive(s)
    }

    fn parse_additive(&mut self, s: &str) -> std::result::Result<(), String> {
        if let Some(pos) = find_binary_op(s, &['+', '-']) {
            self.parse_additive(&s[..pos])?;
            self.parse_multiplicative(&s[pos + 1..])?;
            self.emit(if s.as_bytes()[pos] == b'+' {
                OpCode::Add
            } else {
                OpCode::Sub
            });
        } else {
            self.parse_multiplicative(s)?;
        }
        Ok(())
    }

    fn parse_multiplicative(&mut self, s: &str) -> std::result::Result<(), String> {
        if let Some(pos) = find_binary_op(s, &['*', '/']) {
            self.parse_multiplicative(&s[..pos])?;
            self.parse_unary(&s[pos + 1..])?;
            self.emit(if s.as_bytes()[pos] == b'*' {
                OpCode::Mul
            } else {
                OpCode::Div
            });
        } else {
            self.parse_unary(s)?;
        }
        Ok(())
    }

    fn parse_unary(&mut self, s: &str) -> std::result::Result<(), String> {
        if let Some(rest) = s.strip_prefix('-') {
            self.parse_unary(rest)?;
            self.emit(OpCode::Neg);
            Ok(())
        } else if let Some(rest) = s.strip_prefix('+') {
            self.parse_unary(rest)
        } else {
            self.parse_power(s)
        }
    }

    // Right-associative, binds tighter than unary minus: -2^2 == -4
    fn parse_power(&mut self, s: &str) -> std::result::Result<(), String> {
        if let Some(pos) = find_first_op(s, '^') {
            self.parse_atom(&s[..pos])?;
            self.parse_unary(&s[pos + 1..])?;
            self.emit(OpCode::Pow);
        } else {
            self.parse_atom(s)?;
        }
        Ok(())
    }

    fn parse_atom(&mut self, s: &str) -> std::result::Result<(), String> {
        if s.is_empty() {
            return Err("Empty sub-expression".into());
        }

        // Handle parentheses
        if s.starts_with('(') {
            if !s.ends_with(')') {
                return Err(format!("Unmatched parentheses in '{}'", s));
            }

            let inner = &s[1..s.len() - 1];
            if !is_balanced(inner) {
                return Err(format!("Unbalanced parentheses in '{}'", s));
            }

            return self.parse_expr(inner);
        }

        // Function call
        if let Some(open) = s.find('(') {
            if !s.ends_with(')') {
                return Err(format!("Unmatched parentheses in '{}'", s));
            }
            let name = &s[..open];
            let inner = &s[open + 1..s.len() - 1];
            if !is_balanced(inner) {
                return Err(format!("Unbalanced parentheses in '{}'", s));
            }
            let function = Function::from_name(name)
                .ok_or_else(|| format!("Unknown function '{}'", name))?;
            self.parse_expr(inner)?;
            self.emit(OpCode::Call(function));
            return Ok(());
        }

        // Check for invalid characters before parsing
        if !s
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '+' || c == '-')
        {
            return Err(format!("Invalid characters in '{}'", s));
        }

        // Try number
        if let Ok(num) = s.parse::<f64>() {
            if !num.is_finite() {
                return Err(format!("Number '{}' is not finite", s));
            }
            let idx = self.add_const(num);
            self.emit(OpCode::LoadConst(idx));
            return Ok(());
        }

        if s == "pi" {
            let idx = self.add_const(std::f64::consts::PI);
            self.emit(OpCode::LoadConst(idx));
            return Ok(());
        }

        Err(format!("Unknown identifier '{}'", s))
    }
}

/// Rightmost top-level binary operator among `ops`, skipping unary signs and
/// the sign of a scientific-notation exponent.
fn find_binary_op(s: &str, ops: &[char]) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0;

    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' => depth -= 1,
            c if depth == 0 && ops.contains(&(c as char)) => {
                if (c == b'+' || c == b'-') && (is_unary(bytes, i) || is_exponent_sign(bytes, i)) {
                    continue;
                }
                return Some(i);
            }
            _ => {}
        }
    }
    None
}

fn find_first_op(s: &str, op: char) -> Option<usize> {
    let mut depth = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if depth == 0 && c == op => return Some(i),
            _ => {}
        }
    }
    None
}

#[inline]
fn is_unary(bytes: &[u8], i: usize) -> bool {
    i == 0 || matches!(bytes[i - 1], b'+' | b'-' | b'*' | b'/' | b'^' | b'(')
}

/// `1e-3`: the sign follows an `e` that closes a numeric literal.
fn is_exponent_sign(bytes: &[u8], i: usize) -> bool {
    if i < 2 || !matches!(bytes[i - 1], b'e' | b'E') {
        return false;
    }
    let mut start = i - 1;
    while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
        start -= 1;
    }
    if start == i - 1 {
        return false;
    }
    start == 0 || !(bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_')
}

#[inline]
fn is_balanced(s: &str) -> bool {
    let mut depth = 0;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
