//! The schema-type registry used for typed comparisons (§2.2 "Schema-type
//! registry", §4.11).

use crate::xpath::value::XPathValue;
use crate::xpath::Error;

/// One of the schema types the registry knows how to coerce between
/// (§4.11). The XPath built-ins (`Number`/`String`/`Boolean`/`Date`/
/// `Time`/`DateTime`/`NodeSet`) share the table with the `xs:` types
/// named in the spec; coercion to `NodeSet` is never legal (a node-set is
/// never a coercion *target*), so it has no `SchemaType` variant — it's
/// the caller's job to not ask for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Integer,
    Decimal,
    Double,
    Boolean,
    String,
    Date,
    Time,
    DateTime,
    DayTimeDuration,
    YearMonthDuration,
    AnyUri,
    QName,
}

impl SchemaType {
    /// Parse an `xs:name` or bare built-in keyword.
    pub fn parse(name: &str) -> Option<Self> {
        let local = name.rsplit(':').next().unwrap_or(name);
        Some(match local {
            "integer" => SchemaType::Integer,
            "decimal" => SchemaType::Decimal,
            "double" | "float" => SchemaType::Double,
            "boolean" => SchemaType::Boolean,
            "string" => SchemaType::String,
            "date" => SchemaType::Date,
            "time" => SchemaType::Time,
            "dateTime" => SchemaType::DateTime,
            "dayTimeDuration" => SchemaType::DayTimeDuration,
            "yearMonthDuration" => SchemaType::YearMonthDuration,
            "anyURI" => SchemaType::AnyUri,
            "QName" => SchemaType::QName,
            _ => return None,
        })
    }
}

/// A lookup table from [`SchemaType`] to its coercion behavior (§4.11).
///
/// There is nothing per-instance to configure — every type's coercion
/// rule is fixed — so this is a stateless unit struct rather than a
/// table built at runtime; it exists as a named type so call sites read
/// `SchemaRegistry::coerce_value(...)` instead of a bare free function,
/// matching the source's "registry" framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Whether `value` can be coerced to `target` without error.
    pub fn can_coerce_to(&self, value: &XPathValue, target: SchemaType) -> bool {
        self.coerce_value(value, target).is_ok()
    }

    /// Coerce `value` to `target`, per §4.11 ("Used by typed comparisons
    /// ... and by constructor coercion").
    pub fn coerce_value(&self, value: &XPathValue, target: SchemaType) -> Result<XPathValue, Error> {
        match target {
            SchemaType::Integer | SchemaType::Decimal | SchemaType::Double => {
                Ok(XPathValue::Number(value.to_number()))
            }
            SchemaType::Boolean => Ok(XPathValue::Boolean(value.effective_boolean_value())),
            SchemaType::String | SchemaType::AnyUri | SchemaType::QName => {
                Ok(XPathValue::String(value.to_xpath_string()))
            }
            SchemaType::Date => {
                let s = value.to_xpath_string();
                chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(XPathValue::Date)
                    .map_err(|_| Error::failed(format!("cannot coerce '{s}' to xs:date")))
            }
            SchemaType::Time => {
                let s = value.to_xpath_string();
                chrono::NaiveTime::parse_from_str(s.trim(), "%H:%M:%S")
                    .map(XPathValue::Time)
                    .map_err(|_| Error::failed(format!("cannot coerce '{s}' to xs:time")))
            }
            SchemaType::DateTime => {
                let s = value.to_xpath_string();
                parse_datetime(s.trim())
                    .map(XPathValue::DateTime)
                    .ok_or_else(|| Error::failed(format!("cannot coerce '{s}' to xs:dateTime")))
            }
            SchemaType::DayTimeDuration | SchemaType::YearMonthDuration => {
                // Durations aren't modeled as a distinct XPathValue
                // variant (§3.2 lists no Duration case); represented as
                // their numeric total (seconds / months) so comparisons
                // still work.
                Ok(XPathValue::Number(value.to_number()))
            }
        }
    }
}

/// Parse an `xs:dateTime` lexical value, accepting both a `T` separator
/// and a bare space (the original's date/time helpers are lenient here).
fn parse_datetime(s: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Compare two values for a typed (`eq`/`ne`/`lt`/`le`/`gt`/`ge`)
/// comparison (§4.12 "promote_value_comparison_operand").
///
/// Both operands are promoted to a common scalar type — number if either
/// side is numeric, else string — and compared; node-set operands use
/// their first string value, matching the general-comparison existential
/// semantics collapsed down to a single pair once both sides have been
/// reduced to singletons by the caller.
pub fn compare_xpath_values(lhs: &XPathValue, rhs: &XPathValue, op: CompareOp) -> bool {
    use std::cmp::Ordering;
    let ordering = match (lhs, rhs) {
        (XPathValue::Boolean(_), _) | (_, XPathValue::Boolean(_)) => {
            let l = lhs.effective_boolean_value();
            let r = rhs.effective_boolean_value();
            l.cmp(&r)
        }
        (XPathValue::Date(a), XPathValue::Date(b)) => a.cmp(b),
        (XPathValue::Time(a), XPathValue::Time(b)) => a.cmp(b),
        (XPathValue::DateTime(a), XPathValue::DateTime(b)) => a.cmp(b),
        (XPathValue::String(_), XPathValue::String(_)) => {
            lhs.to_xpath_string().cmp(&rhs.to_xpath_string())
        }
        _ => {
            let l = lhs.to_number();
            let r = rhs.to_number();
            match l.partial_cmp(&r) {
                Some(o) => o,
                None => return matches!(op, CompareOp::Ne),
            }
        }
    };
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// Which typed comparison is being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}
