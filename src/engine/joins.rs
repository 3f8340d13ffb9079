// The join/aggregation query planner (spec.md §4.4 item 4).
//
// Compiles a statement's `@join`/`@into`/`@where`/`@groupBy`/`@orderBy`/
// `@distinct`/`@limit` hints into rows, the way the teacher's
// `RulesEngine::available_activities` scans and filters a flat
// collection against declared conditions — generalized here from a
// single boolean predicate to a full relational pipeline: join, then
// filter, then project/aggregate, then dedupe, sort, and cap.
//
// `InMemoryResolver::query_by_join` always delegates here; a resolver
// capable of compiling its own join (e.g. to SQL) never calls this
// module at all.

use std::collections::HashMap;

use crate::error::{AgentlangError, Result};
use crate::models::module::ModuleRegistry;
use crate::models::pattern::{AttributeSlot, Hints, IntoProjection, JoinKind, SortDirection};
use crate::models::{FqName, Instance, ModuleName, Value};

use super::environment::Environment;
use super::expr::{self, FunctionTable};
use super::resolver::AuthInfo;
use super::resolver_registry::ResolverRegistry;

/// One joined row: the root instance plus zero-or-one matched instance
/// per join clause (`None` only ever appears for `left`/`full` joins
/// with no match — spec.md §4.4 item 4's outer-join null handling).
type Row = HashMap<String, Option<Instance>>;

fn resolve_entity(registry: &ModuleRegistry, active_module: &ModuleName, name: &str) -> Result<FqName> {
    registry.resolve_record(active_module, name).map(|(fq, _)| fq)
}

async fn fetch_all(
    resolvers: &ResolverRegistry,
    auth: &AuthInfo,
    fq: &FqName,
) -> Result<Vec<Instance>> {
    let resolver = resolvers
        .resolver_for(fq)
        .ok_or_else(|| AgentlangError::JoinPlanningError(format!("no resolver bound for {fq}")))?;
    resolver.query_instances(auth, &Instance::query_all(fq.clone())).await
}

/// The value of `name` as seen by the row. `Entity.attr` addresses a
/// specific joined entity's attribute directly; a bare `attr` scans
/// every instance in the row for the first match.
fn row_get(row: &Row, name: &str) -> Value {
    if let Some((entity, attr)) = name.split_once('.') {
        return row
            .get(entity)
            .and_then(|inst| inst.as_ref())
            .and_then(|inst| inst.get(attr))
            .cloned()
            .unwrap_or(Value::Null);
    }
    row.values()
        .flatten()
        .find_map(|inst| inst.get(name).cloned())
        .unwrap_or(Value::Null)
}

fn row_to_json(row: &Row) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (entity, instance) in row {
        let value = instance
            .as_ref()
            .map(Instance::to_plain_data)
            .unwrap_or(serde_json::Value::Null);
        map.insert(entity.clone(), value);
    }
    serde_json::Value::Object(map)
}

/// Runs the full pipeline over an already-matched set of root rows
/// (the evaluator has already applied the root CRUD map's own query
/// attributes before calling in here).
pub async fn execute(
    registry: &ModuleRegistry,
    resolvers: &ResolverRegistry,
    active_module: &ModuleName,
    root_entity_name: &str,
    root_rows: Vec<Instance>,
    hints: &Hints,
    auth: &AuthInfo,
    env: &Environment,
    functions: &FunctionTable,
) -> Result<Vec<serde_json::Value>> {
    let mut rows: Vec<Row> = root_rows
        .into_iter()
        .map(|inst| {
            let mut row = HashMap::new();
            row.insert(root_entity_name.to_string(), Some(inst));
            row
        })
        .collect();

    for join in &hints.joins {
        let fq = resolve_entity(registry, active_module, &join.entity)?;
        let candidates = fetch_all(resolvers, auth, &fq).await?;
        let entity_keys: Vec<String> = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_else(|| vec![root_entity_name.to_string()]);
        let mut matched_candidates = vec![false; candidates.len()];
        let mut next_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let lhs = row_get(&row, &join.on_attribute);
            let mut matched_any = false;
            for (idx, candidate) in candidates.iter().enumerate() {
                let rhs = expr::eval(&join.on_reference, env, Some(candidate), functions)?;
                if lhs != Value::Null && lhs == rhs {
                    matched_any = true;
                    matched_candidates[idx] = true;
                    let mut joined_row = row.clone();
                    joined_row.insert(join.entity.clone(), Some(candidate.clone()));
                    next_rows.push(joined_row);
                }
            }
            if !matched_any {
                match join.kind {
                    JoinKind::Left | JoinKind::Full => {
                        let mut joined_row = row.clone();
                        joined_row.insert(join.entity.clone(), None);
                        next_rows.push(joined_row);
                    }
                    JoinKind::Inner | JoinKind::Right => {}
                }
            }
        }
        // Right/full joins also surface candidates no left row matched,
        // with every left-side column null (spec.md §4.4 item 4).
        if matches!(join.kind, JoinKind::Right | JoinKind::Full) {
            for (idx, candidate) in candidates.iter().enumerate() {
                if matched_candidates[idx] {
                    continue;
                }
                let mut joined_row: Row = entity_keys.iter().map(|k| (k.clone(), None)).collect();
                joined_row.insert(join.entity.clone(), Some(candidate.clone()));
                next_rows.push(joined_row);
            }
        }
        rows = next_rows;
    }

    rows.retain(|row| where_matches(&hints.where_clauses, row, env, functions).unwrap_or(false));

    let mut projected = if hints.into.is_empty() {
        rows.iter().map(row_to_json).collect::<Vec<_>>()
    } else if hints.group_by.is_empty() {
        rows.iter()
            .map(|row| project(&hints.into, std::slice::from_ref(row), env, functions))
            .collect::<Result<Vec<_>>>()?
    } else {
        group_and_aggregate(&hints.group_by, &hints.into, &rows, env, functions)?
    };

    if hints.distinct {
        dedupe(&mut projected);
    }
    if !hints.order_by.is_empty() {
        sort_rows(&mut projected, &hints.order_by, hints.sort_direction.unwrap_or(SortDirection::Asc));
    }
    if let Some(limit) = hints.limit {
        projected.truncate(limit as usize);
    }
    Ok(projected)
}

fn where_matches(clauses: &[AttributeSlot], row: &Row, env: &Environment, functions: &FunctionTable) -> Result<bool> {
    for slot in clauses {
        let expected = expr::eval(&slot.value, env, None, functions)?;
        let actual = row_get(row, &slot.name);
        let op = slot.query_op.unwrap_or(crate::models::QueryOp::Eq);
        let matched = match op {
            crate::models::QueryOp::Eq => actual == expected,
            crate::models::QueryOp::Ne => actual != expected,
            crate::models::QueryOp::Lt => actual.compare(&expected) == std::cmp::Ordering::Less,
            crate::models::QueryOp::Le => actual.compare(&expected) != std::cmp::Ordering::Greater,
            crate::models::QueryOp::Gt => actual.compare(&expected) == std::cmp::Ordering::Greater,
            crate::models::QueryOp::Ge => actual.compare(&expected) != std::cmp::Ordering::Less,
            _ => false,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn project(into: &[IntoProjection], group: &[Row], env: &Environment, functions: &FunctionTable) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for column in into {
        let (alias, value) = match column {
            IntoProjection::Alias { alias, reference } => {
                let v = eval_over_first(reference, group, env, functions)?;
                (alias, v)
            }
            IntoProjection::Sum { alias, reference } => (alias, Value::Number(aggregate(group, reference, env, functions, 0.0, |acc, x| acc + x)?)),
            IntoProjection::Count { alias, reference } => {
                let count = group
                    .iter()
                    .filter(|row| !matches!(eval_per_row(reference, row, env, functions), Ok(Value::Null)))
                    .count();
                (alias, Value::Int(count as i64))
            }
            IntoProjection::Avg { alias, reference } => {
                let sum = aggregate(group, reference, env, functions, 0.0, |acc, x| acc + x)?;
                let avg = if group.is_empty() { 0.0 } else { sum / group.len() as f64 };
                (alias, Value::Number(avg))
            }
            IntoProjection::Min { alias, reference } => (alias, Value::Number(aggregate(group, reference, env, functions, f64::INFINITY, f64::min)?)),
            IntoProjection::Max { alias, reference } => (alias, Value::Number(aggregate(group, reference, env, functions, f64::NEG_INFINITY, f64::max)?)),
        };
        map.insert(alias.clone(), serde_json::to_value(&value).unwrap_or(serde_json::Value::Null));
    }
    Ok(serde_json::Value::Object(map))
}

fn eval_per_row(reference: &crate::models::pattern::Expr, row: &Row, env: &Environment, functions: &FunctionTable) -> Result<Value> {
    match reference {
        crate::models::pattern::Expr::Reference(segments) if segments.len() >= 2 => {
            let entity = &segments[0];
            let attr = segments[1..].join(".");
            let inst = row.get(entity).and_then(|o| o.as_ref());
            Ok(inst.and_then(|i| i.get(&attr)).cloned().unwrap_or(Value::Null))
        }
        _ => {
            let any_instance = row.values().flatten().next();
            expr::eval(reference, env, any_instance, functions)
        }
    }
}

fn eval_over_first(reference: &crate::models::pattern::Expr, group: &[Row], env: &Environment, functions: &FunctionTable) -> Result<Value> {
    match group.first() {
        Some(row) => eval_per_row(reference, row, env, functions),
        None => Ok(Value::Null),
    }
}

fn aggregate(
    group: &[Row],
    reference: &crate::models::pattern::Expr,
    env: &Environment,
    functions: &FunctionTable,
    init: f64,
    fold: fn(f64, f64) -> f64,
) -> Result<f64> {
    let mut acc = init;
    for row in group {
        if let Some(n) = eval_per_row(reference, row, env, functions)?.as_number() {
            acc = fold(acc, n);
        }
    }
    Ok(acc)
}

/// Groups rows by the tuple of `@groupBy` attribute values, then
/// projects each group through `@into` (spec.md §4.4 item 4).
fn group_and_aggregate(
    group_by: &[String],
    into: &[IntoProjection],
    rows: &[Row],
    env: &Environment,
    functions: &FunctionTable,
) -> Result<Vec<serde_json::Value>> {
    let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    for row in rows {
        let key: Vec<Value> = group_by.iter().map(|attr| row_get(row, attr)).collect();
        if let Some((_, members)) = groups.iter_mut().find(|(k, _)| k == &key) {
            members.push(row.clone());
        } else {
            groups.push((key, vec![row.clone()]));
        }
    }
    groups
        .iter()
        .map(|(_, members)| project(into, members, env, functions))
        .collect()
}

fn dedupe(rows: &mut Vec<serde_json::Value>) {
    let mut seen = Vec::new();
    rows.retain(|row| {
        if seen.contains(row) {
            false
        } else {
            seen.push(row.clone());
            true
        }
    });
}

/// Ties are broken by leaving relative order unchanged (a stable sort
/// on an already id-ascending source preserves id order — spec.md §4.4
/// item 4's `@orderBy` tie-break).
fn sort_rows(rows: &mut [serde_json::Value], order_by: &[String], direction: SortDirection) {
    rows.sort_by(|a, b| {
        for key in order_by {
            let av = a.get(key).cloned().unwrap_or(serde_json::Value::Null);
            let bv = b.get(key).cloned().unwrap_or(serde_json::Value::Null);
            let ordering = compare_json(&av, &bv);
            if ordering != std::cmp::Ordering::Equal {
                return if direction == SortDirection::Desc { ordering.reverse() } else { ordering };
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn compare_json(a: &serde_json::Value, b: &serde_json::Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
