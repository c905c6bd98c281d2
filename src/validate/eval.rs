//! Tree-walking interpreter for validation expressions.
//!
//! Evaluation happens against an immutable snapshot of the response; the
//! only inputs are the binding values below and the literals in the
//! expression itself.

use http::StatusCode;
use serde_json::Value as Json;

use crate::error::Error;
use crate::model::ResponseData;

use super::expr::{self, BinaryOp, Expr, Func, ResponseField};

/// Runtime values the interpreter works with.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Json(Json),
}

/// Parses, statically validates, and interprets an expression against a
/// response. The result must be a boolean.
pub fn evaluate(input: &str, response: &ResponseData) -> Result<bool, Error> {
    let ast = expr::parse(input)?;
    match eval(&ast, response)? {
        Value::Bool(result) => Ok(result),
        other => Err(Error::Expression(format!(
            "expression evaluated to {} instead of a boolean",
            type_name(&other)
        ))),
    }
}

fn eval(expr: &Expr, response: &ResponseData) -> Result<Value, Error> {
    match expr {
        Expr::Int(value) => Ok(Value::Int(*value)),
        Expr::Str(value) => Ok(Value::Str(value.clone())),
        Expr::Bool(value) => Ok(Value::Bool(*value)),
        Expr::Nil => Ok(Value::Null),
        Expr::Field(field) => Ok(field_value(*field, response)),
        Expr::JsonBody => serde_json::from_str::<Json>(&response.body)
            .map(Value::Json)
            .map_err(|err| Error::Expression(format!("response body is not JSON: {err}"))),
        Expr::Call { func, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, response))
                .collect::<Result<Vec<_>, _>>()?;
            call(*func, args)
        }
        Expr::Not(operand) => match eval(operand, response)? {
            Value::Bool(value) => Ok(Value::Bool(!value)),
            other => Err(Error::Expression(format!(
                "'!' needs a boolean, got {}",
                type_name(&other)
            ))),
        },
        Expr::Binary { op, lhs, rhs } => {
            // Short-circuit the logical operators before touching the rhs.
            match op {
                BinaryOp::And | BinaryOp::Or => {
                    let lhs = expect_bool(eval(lhs, response)?, "&&/||")?;
                    if (*op == BinaryOp::And && !lhs) || (*op == BinaryOp::Or && lhs) {
                        return Ok(Value::Bool(lhs));
                    }
                    let rhs = expect_bool(eval(rhs, response)?, "&&/||")?;
                    Ok(Value::Bool(rhs))
                }
                _ => {
                    let lhs = eval(lhs, response)?;
                    let rhs = eval(rhs, response)?;
                    binary(*op, lhs, rhs)
                }
            }
        }
    }
}

fn field_value(field: ResponseField, response: &ResponseData) -> Value {
    match field {
        ResponseField::StatusCode => Value::Int(i64::from(response.status_code)),
        ResponseField::Text | ResponseField::Content => Value::Str(response.body.clone()),
        ResponseField::Headers => {
            let map = response
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), Json::String(value.clone())))
                .collect();
            Value::Json(Json::Object(map))
        }
        ResponseField::Cookies => {
            let map = response
                .cookies
                .iter()
                .map(|cookie| (cookie.name.clone(), Json::String(cookie.value.clone())))
                .collect();
            Value::Json(Json::Object(map))
        }
        ResponseField::Url => Value::Str(response.url.clone()),
        ResponseField::Elapsed => Value::Float(response.duration.as_secs_f64()),
        ResponseField::Encoding => Value::Str(response.detected_encoding.clone()),
        ResponseField::Reason => Value::Str(
            StatusCode::from_u16(response.status_code)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("")
                .to_string(),
        ),
    }
}

fn call(func: Func, mut args: Vec<Value>) -> Result<Value, Error> {
    let arity = |expected: usize| -> Result<(), Error> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(Error::Expression(format!(
                "{func:?} takes {expected} argument(s), got {}",
                args.len()
            )))
        }
    };

    match func {
        Func::Len => {
            arity(1)?;
            match &args[0] {
                Value::Str(value) => Ok(Value::Int(value.chars().count() as i64)),
                Value::Json(Json::Array(items)) => Ok(Value::Int(items.len() as i64)),
                Value::Json(Json::Object(map)) => Ok(Value::Int(map.len() as i64)),
                Value::Json(Json::String(value)) => Ok(Value::Int(value.chars().count() as i64)),
                other => Err(Error::Expression(format!(
                    "len() cannot measure {}",
                    type_name(other)
                ))),
            }
        }
        Func::Str => {
            arity(1)?;
            Ok(Value::Str(render(&args[0])))
        }
        Func::Int => {
            arity(1)?;
            match &args[0] {
                Value::Int(value) => Ok(Value::Int(*value)),
                Value::Float(value) => Ok(Value::Int(*value as i64)),
                Value::Bool(value) => Ok(Value::Int(i64::from(*value))),
                Value::Str(value) => value.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    Error::Expression(format!("int() cannot parse '{value}'"))
                }),
                other => Err(Error::Expression(format!(
                    "int() cannot convert {}",
                    type_name(other)
                ))),
            }
        }
        Func::Float => {
            arity(1)?;
            match &args[0] {
                Value::Int(value) => Ok(Value::Float(*value as f64)),
                Value::Float(value) => Ok(Value::Float(*value)),
                Value::Str(value) => value.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    Error::Expression(format!("float() cannot parse '{value}'"))
                }),
                other => Err(Error::Expression(format!(
                    "float() cannot convert {}",
                    type_name(other)
                ))),
            }
        }
        Func::Bool => {
            arity(1)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        Func::Lower | Func::Upper | Func::Strip => {
            arity(1)?;
            let Value::Str(value) = &args[0] else {
                return Err(Error::Expression(format!(
                    "{func:?} needs a string, got {}",
                    type_name(&args[0])
                )));
            };
            Ok(Value::Str(match func {
                Func::Lower => value.to_lowercase(),
                Func::Upper => value.to_uppercase(),
                _ => value.trim().to_string(),
            }))
        }
        Func::Json => {
            arity(1)?;
            match args.remove(0) {
                Value::Json(value) => Ok(Value::Json(value)),
                Value::Str(text) => serde_json::from_str::<Json>(&text)
                    .map(Value::Json)
                    .map_err(|err| Error::Expression(format!("json() parse failed: {err}"))),
                other => Err(Error::Expression(format!(
                    "json() cannot parse {}",
                    type_name(&other)
                ))),
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, Error> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::In => contains(&lhs, &rhs).map(Value::Bool),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Json(Json::String(a)), Value::Str(b)) | (Value::Str(b), Value::Json(Json::String(a))) => {
            a == b
        }
        (Value::Null, Value::Json(Json::Null)) | (Value::Json(Json::Null), Value::Null) => true,
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, Error> {
    use std::cmp::Ordering;
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Int(a), Value::Float(b)) => (*a as f64)
            .partial_cmp(b)
            .ok_or_else(|| Error::Expression("comparison with NaN".to_string())),
        (Value::Float(a), Value::Int(b)) => a
            .partial_cmp(&(*b as f64))
            .ok_or_else(|| Error::Expression("comparison with NaN".to_string())),
        (Value::Float(a), Value::Float(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| Error::Expression("comparison with NaN".to_string())),
        _ => Err(Error::Expression(format!(
            "cannot order {} against {}",
            type_name(lhs),
            type_name(rhs)
        ))),
    }
}

/// `in` is substring for strings, key membership for objects, and element
/// membership for arrays.
fn contains(needle: &Value, haystack: &Value) -> Result<bool, Error> {
    match (needle, haystack) {
        (Value::Str(needle), Value::Str(haystack)) => Ok(haystack.contains(needle)),
        (Value::Str(needle), Value::Json(Json::Object(map))) => Ok(map.contains_key(needle)),
        (needle, Value::Json(Json::Array(items))) => {
            let needle = value_to_json(needle);
            Ok(items.iter().any(|item| *item == needle))
        }
        (Value::Str(needle), Value::Json(Json::String(haystack))) => Ok(haystack.contains(needle)),
        _ => Err(Error::Expression(format!(
            "'in' cannot search {} within {}",
            type_name(needle),
            type_name(haystack)
        ))),
    }
}

fn expect_bool(value: Value, op: &str) -> Result<bool, Error> {
    match value {
        Value::Bool(value) => Ok(value),
        other => Err(Error::Expression(format!(
            "'{op}' needs booleans, got {}",
            type_name(&other)
        ))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Int(value) => *value != 0,
        Value::Float(value) => *value != 0.0,
        Value::Str(value) => !value.is_empty(),
        Value::Json(Json::Null) => false,
        Value::Json(Json::Bool(value)) => *value,
        Value::Json(Json::Array(items)) => !items.is_empty(),
        Value::Json(Json::Object(map)) => !map.is_empty(),
        Value::Json(Json::String(value)) => !value.is_empty(),
        Value::Json(Json::Number(_)) => true,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_string(),
        Value::Bool(value) => value.to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Str(value) => value.clone(),
        Value::Json(value) => value.to_string(),
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(value) => Json::Bool(*value),
        Value::Int(value) => Json::from(*value),
        Value::Float(value) => serde_json::Number::from_f64(*value)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Str(value) => Json::String(value.clone()),
        Value::Json(value) => value.clone(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) => "string",
        Value::Json(_) => "json",
    }
}
