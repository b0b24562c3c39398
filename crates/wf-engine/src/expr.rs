use std::collections::HashMap;

/// A sandboxed, side-effect-free boolean condition over process variables.
/// Supports a single comparison of a variable name against a literal;
/// unresolved names evaluate to `undefined` and make the predicate false.
#[derive(Debug, Clone)]
pub struct Expr {
	variable: String,
	op: CompareOp,
	literal: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot parse expression `{0}`")]
pub struct ExprParseError(pub String);

impl Expr {
	/// Parses `"<variable> <op> <literal>"`, where `<op>` is one of
	/// `==`, `!=`, `<=`, `>=`, `<`, `>` and `<literal>` is a JSON scalar
	/// (number, boolean, or quoted string).
	pub fn parse(source: &str) -> Result<Expr, ExprParseError> {
		const OPERATORS: &[(&str, CompareOp)] = &[
			("<=", CompareOp::Le),
			(">=", CompareOp::Ge),
			("==", CompareOp::Eq),
			("!=", CompareOp::Ne),
			("<", CompareOp::Lt),
			(">", CompareOp::Gt),
		];
		let trimmed = source.trim();
		for (token, op) in OPERATORS {
			if let Some(index) = trimmed.find(token) {
				let variable = trimmed[..index].trim().to_string();
				let literal_source = trimmed[index + token.len()..].trim();
				let literal = parse_literal(literal_source)
					.ok_or_else(|| ExprParseError(source.to_string()))?;
				if variable.is_empty() {
					return Err(ExprParseError(source.to_string()));
				}
				return Ok(Expr { variable, op: *op, literal });
			}
		}
		Err(ExprParseError(source.to_string()))
	}

	/// Evaluates against `variables`; a missing variable name evaluates the
	/// whole predicate to `false` rather than erroring.
	pub fn eval(&self, variables: &HashMap<String, serde_json::Value>) -> bool {
		let Some(value) = variables.get(&self.variable) else {
			return false;
		};
		compare(value, &self.op, &self.literal)
	}
}

fn parse_literal(source: &str) -> Option<serde_json::Value> {
	if let Ok(n) = source.parse::<f64>() {
		return serde_json::Number::from_f64(n).map(serde_json::Value::Number);
	}
	match source {
		"true" => return Some(serde_json::Value::Bool(true)),
		"false" => return Some(serde_json::Value::Bool(false)),
		_ => {},
	}
	if source.len() >= 2 && source.starts_with('"') && source.ends_with('"') {
		return Some(serde_json::Value::String(source[1..source.len() - 1].to_string()));
	}
	None
}

fn compare(value: &serde_json::Value, op: &CompareOp, literal: &serde_json::Value) -> bool {
	match (value.as_f64(), literal.as_f64()) {
		(Some(a), Some(b)) => match op {
			CompareOp::Eq => a == b,
			CompareOp::Ne => a != b,
			CompareOp::Lt => a < b,
			CompareOp::Le => a <= b,
			CompareOp::Gt => a > b,
			CompareOp::Ge => a >= b,
		},
		_ => match op {
			CompareOp::Eq => value == literal,
			CompareOp::Ne => value != literal,
			_ => false,
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn vars(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
		pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
	}

	#[test]
	fn numeric_comparison() {
		let expr = Expr::parse("amount <= 1000").unwrap();
		assert!(expr.eval(&vars(&[("amount", serde_json::json!(500))])));
		assert!(!expr.eval(&vars(&[("amount", serde_json::json!(5000))])));
	}

	#[test]
	fn unresolved_variable_is_false() {
		let expr = Expr::parse("amount <= 1000").unwrap();
		assert!(!expr.eval(&vars(&[])));
	}

	#[test]
	fn string_equality() {
		let expr = Expr::parse(r#"status == "approved""#).unwrap();
		assert!(expr.eval(&vars(&[("status", serde_json::json!("approved"))])));
	}
}
