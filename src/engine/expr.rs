// Expression evaluation and the Expression-Attribute Recomputer
// (spec.md §4.4 item 1, §4.5).
//
// `eval` walks the `models::pattern::Expr` tree the way the teacher's
// `RuleCondition::evaluate` walks its condition tree (`models::rule`);
// `recompute` implements the create/update-time `@expr` pass.

use std::collections::HashMap;

use crate::error::{AgentlangError, Result};
use crate::models::pattern::BinOp;
use crate::models::{AttributeList, Expr, Instance, RecordSchema, Value};

use super::environment::Environment;

/// A table of registered plug-in functions the evaluator can call
/// (spec.md §4.4 item 1, "resolved against a registered plug-in
/// function table"). The environment is implicitly appended as the
/// last argument by the caller, not by the function itself.
pub type FunctionTable = HashMap<String, fn(&[Value], &Environment) -> Result<Value>>;

/// Evaluates a pure expression against the current instance's
/// attributes (for `@expr` recomputation and `@where` predicates) and
/// the active environment's bindings (for workflow-level references).
pub fn eval(expr: &Expr, env: &Environment, current: Option<&Instance>, functions: &FunctionTable) -> Result<Value> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|e| eval(e, env, current, functions))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(values))
        }
        Expr::Map(entries) => {
            let mut map = std::collections::BTreeMap::new();
            for (key, value_expr) in entries {
                map.insert(key.clone(), eval(value_expr, env, current, functions)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Ident(name) => Ok(env.lookup(name).cloned().unwrap_or(Value::Null)),
        Expr::Reference(segments) => eval_reference(segments, env, current),
        Expr::Call(name, args) => {
            let func = functions
                .get(name)
                .ok_or_else(|| AgentlangError::ValidationError(format!("unknown function {name}")))?;
            let values = args
                .iter()
                .map(|e| eval(e, env, current, functions))
                .collect::<Result<Vec<_>>>()?;
            func(&values, env)
        }
        Expr::BinOp(op, lhs, rhs) => eval_binop(*op, lhs, rhs, env, current, functions),
    }
}

/// Walks `a.b.c` as instance -> attribute -> nested-instance ->
/// attribute; a missing intermediate segment evaluates to `Value::Null`
/// rather than erroring (spec.md §4.4 item 1).
fn eval_reference(segments: &[String], env: &Environment, current: Option<&Instance>) -> Result<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(Value::Null);
    };

    // A reference may start with a bound alias (workflow-level) or,
    // inside an @expr/@where evaluation, with the current instance's
    // own attribute name.
    let mut value = if let Some(bound) = env.lookup(head) {
        bound.clone()
    } else if let Some(inst) = current {
        inst.get(head).cloned().unwrap_or(Value::Null)
    } else {
        Value::Null
    };

    for segment in rest {
        value = match value {
            Value::Map(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    Ok(value)
}

fn eval_binop(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &Environment,
    current: Option<&Instance>,
    functions: &FunctionTable,
) -> Result<Value> {
    // `and`/`or` short-circuit (spec.md §4.4 item 7).
    if matches!(op, BinOp::And | BinOp::Or) {
        let left = eval(lhs, env, current, functions)?;
        return match op {
            BinOp::And if !left.is_truthy() => Ok(Value::Bool(false)),
            BinOp::Or if left.is_truthy() => Ok(Value::Bool(true)),
            _ => eval(rhs, env, current, functions),
        };
    }

    let left = eval(lhs, env, current, functions)?;
    let right = eval(rhs, env, current, functions)?;
    match op {
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::Ne => Ok(Value::Bool(left != right)),
        BinOp::Lt => Ok(Value::Bool(left.compare(&right) == std::cmp::Ordering::Less)),
        BinOp::Le => Ok(Value::Bool(left.compare(&right) != std::cmp::Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(left.compare(&right) == std::cmp::Ordering::Greater)),
        BinOp::Ge => Ok(Value::Bool(left.compare(&right) != std::cmp::Ordering::Less)),
        BinOp::Add => arithmetic_or_concat(left, right, |a, b| a + b),
        BinOp::Sub => numeric(left, right, |a, b| a - b),
        BinOp::Mul => numeric(left, right, |a, b| a * b),
        BinOp::Div => numeric(left, right, |a, b| a / b),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn numeric(left: Value, right: Value, f: fn(f64, f64) -> f64) -> Result<Value> {
    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(AgentlangError::TypeMismatch("arithmetic operand is not numeric".into()));
    };
    Ok(Value::Number(f(a, b)))
}

/// `+` concatenates strings and adds numbers, matching spec.md §9's
/// promotion rule ("String+String = concat").
fn arithmetic_or_concat(left: Value, right: Value, f: fn(f64, f64) -> f64) -> Result<Value> {
    match (&left, &right) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        _ => numeric(left, right, f),
    }
}

/// Performs the create/update-time `@expr` pass (spec.md §4.5):
///
/// 1. Evaluate each `@expr` attribute in declaration order against the
///    current attribute map, assigning the result.
/// 2. Re-apply any user-provided literal for an `@expr` attribute,
///    overwriting the computed value.
///
/// Step 2 running *after* all of step 1 is what makes a dependent
/// `@expr` attribute see the expr-computed value of an earlier one
/// even when the caller supplied a literal for it (spec.md §4.5,
/// "Consequence").
pub fn recompute(
    schema: &RecordSchema,
    attributes: &mut AttributeList,
    user_literals: &HashMap<String, Value>,
    env: &Environment,
    functions: &FunctionTable,
) -> Result<()> {
    let mut current = Instance::new(
        crate::models::FqName::new(env.active_module.clone(), schema.name.clone()),
        attributes.clone(),
    );

    // Each iteration sees the previous iterations' computed values
    // through `current`, which is why a later `@expr` attribute (`z`)
    // can depend on an earlier one (`y`) within the same pass.
    for attr in schema.expr_attributes() {
        let expression = attr
            .properties
            .expr
            .as_ref()
            .expect("filtered by expr_attributes");
        let parsed = parse_simple_expr(expression)?;
        let value = eval(&parsed, env, Some(&current), functions)?;
        current.set(attr.name.as_str(), value.clone());
        set_attr(attributes, attr.name.as_str(), value);
    }

    for (name, value) in user_literals {
        if schema.attribute(name).map(|a| a.is_expr()).unwrap_or(false) {
            set_attr(attributes, name, value.clone());
        }
    }

    Ok(())
}

fn set_attr(attributes: &mut AttributeList, name: &str, value: Value) {
    if let Some(slot) = attributes.iter_mut().find(|(n, _)| n == name) {
        slot.1 = value;
    } else {
        attributes.push((name.to_string(), value));
    }
}

/// Parses the restricted arithmetic grammar `@expr` strings use
/// (`x*10`, `y+1`): a single identifier, optionally followed by one
/// `+ - * /` operator and a second identifier or numeric literal. Full
/// expression parsing belongs to the external parser component
/// (spec.md §1); `@expr` bodies in practice never need more than this.
fn parse_simple_expr(source: &str) -> Result<Expr> {
    let source = source.trim();
    for (op_char, op) in [('+', BinOp::Add), ('-', BinOp::Sub), ('*', BinOp::Mul), ('/', BinOp::Div)] {
        if let Some(pos) = source.find(op_char) {
            let (left, right) = source.split_at(pos);
            let right = &right[1..];
            return Ok(Expr::BinOp(
                op,
                Box::new(parse_operand(left.trim())),
                Box::new(parse_operand(right.trim())),
            ));
        }
    }
    Ok(parse_operand(source))
}

fn parse_operand(token: &str) -> Expr {
    if let Ok(i) = token.parse::<i64>() {
        Expr::Int(i)
    } else if let Ok(n) = token.parse::<f64>() {
        Expr::Number(n)
    } else {
        Expr::Reference(vec![token.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::{AttributeSchema, AttributeType, RecordKind};

    fn env() -> Environment {
        Environment::root("Test", crate::models::ModuleName::new("M"), "u1")
    }

    #[test]
    fn chained_expr_attributes_recompute_in_declaration_order() {
        let schema = RecordSchema::new("E", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("x", AttributeType::Int))
            .with_attribute(AttributeSchema::new("y", AttributeType::Int).expr("x*10"))
            .with_attribute(AttributeSchema::new("z", AttributeType::Int).expr("y+1"));

        let mut attrs: AttributeList = vec![("id".into(), Value::Int(1)), ("x".into(), Value::Int(3))];
        let functions = FunctionTable::new();
        recompute(&schema, &mut attrs, &HashMap::new(), &env(), &functions).unwrap();

        let y = attrs.iter().find(|(n, _)| n == "y").unwrap().1.clone();
        let z = attrs.iter().find(|(n, _)| n == "z").unwrap().1.clone();
        assert_eq!(y, Value::Number(30.0));
        assert_eq!(z, Value::Number(31.0));
    }

    #[test]
    fn user_literal_overrides_computed_value_but_dependents_see_computed() {
        let schema = RecordSchema::new("E", RecordKind::Entity)
            .with_attribute(AttributeSchema::new("id", AttributeType::Int).id())
            .with_attribute(AttributeSchema::new("x", AttributeType::Int))
            .with_attribute(AttributeSchema::new("y", AttributeType::Int).expr("x*10"))
            .with_attribute(AttributeSchema::new("z", AttributeType::Int).expr("y+1"));

        let mut attrs: AttributeList = vec![("id".into(), Value::Int(1)), ("x".into(), Value::Int(8))];
        let mut literals = HashMap::new();
        literals.insert("y".to_string(), Value::Int(999));
        let functions = FunctionTable::new();
        recompute(&schema, &mut attrs, &literals, &env(), &functions).unwrap();

        let y = attrs.iter().find(|(n, _)| n == "y").unwrap().1.clone();
        let z = attrs.iter().find(|(n, _)| n == "z").unwrap().1.clone();
        assert_eq!(y, Value::Int(999), "user literal wins for the stored value");
        assert_eq!(z, Value::Number(81.0), "z was computed from the expr-derived y=80, before the literal override ran");
    }
}
