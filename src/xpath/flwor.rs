//! The FLWOR tuple-stream pipeline (§3.2 "tuple stream", §4.13).
//!
//! Each clause maps one `Vec<tuple>` to another, where a tuple is just the
//! variable bindings accumulated so far (`HashMap<String, XPathValue>`).
//! `For` fans a tuple out into one per bound item, `Let` and `Count` add a
//! binding to every tuple in place, `Where` filters, `GroupBy` partitions
//! and merges, `OrderBy` sorts. `return` is evaluated once per final tuple
//! and the per-tuple results are concatenated the way a `for` loop's body
//! results are (§4.13 step 7).

use std::collections::HashMap;
use std::collections::HashSet;

use crate::xpath::ast::{Binding, Expr, FlworClause, FlworExpr, GroupKey, OrderSpec};
use crate::xpath::eval::EvalContext;
use crate::xpath::host::XmlHost;
use crate::xpath::value::XPathValue;
use crate::xpath::Error;

type Tuple = HashMap<String, XPathValue>;

pub fn run<H: XmlHost>(ctx: &mut EvalContext<H>, f: &FlworExpr) -> Result<XPathValue, Error> {
    let mut tuples: Vec<Tuple> = vec![HashMap::new()];
    for clause in &f.clauses {
        tuples = match clause {
            FlworClause::For(b) => apply_for(ctx, tuples, b)?,
            FlworClause::Let(b) => apply_let(ctx, tuples, b)?,
            FlworClause::Where(e) => apply_where(ctx, tuples, e)?,
            FlworClause::GroupBy(keys) => apply_group_by(ctx, tuples, keys)?,
            FlworClause::OrderBy { stable, specs } => apply_order_by(ctx, tuples, *stable, specs)?,
            FlworClause::Count(name) => apply_count(tuples, name),
        };
    }
    let mut results = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        results.push(eval_in_tuple(ctx, &tuple, &f.return_expr)?);
    }
    Ok(XPathValue::concat(results))
}

fn eval_in_tuple<H: XmlHost>(ctx: &mut EvalContext<H>, tuple: &Tuple, expr: &Expr) -> Result<XPathValue, Error> {
    let mut guard = ctx.push_scope(tuple.clone());
    guard.eval_expr(expr)
}

fn apply_for<H: XmlHost>(ctx: &mut EvalContext<H>, tuples: Vec<Tuple>, binding: &Binding) -> Result<Vec<Tuple>, Error> {
    let mut out = Vec::new();
    for tuple in tuples {
        let source = eval_in_tuple(ctx, &tuple, &binding.expr)?;
        for item in source.into_items() {
            let mut next = tuple.clone();
            next.insert(binding.var.clone(), item);
            out.push(next);
        }
    }
    Ok(out)
}

fn apply_let<H: XmlHost>(ctx: &mut EvalContext<H>, tuples: Vec<Tuple>, binding: &Binding) -> Result<Vec<Tuple>, Error> {
    let mut out = Vec::with_capacity(tuples.len());
    for mut tuple in tuples {
        let value = eval_in_tuple(ctx, &tuple, &binding.expr)?;
        tuple.insert(binding.var.clone(), value);
        out.push(tuple);
    }
    Ok(out)
}

fn apply_where<H: XmlHost>(ctx: &mut EvalContext<H>, tuples: Vec<Tuple>, expr: &Expr) -> Result<Vec<Tuple>, Error> {
    let mut out = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        if eval_in_tuple(ctx, &tuple, expr)?.effective_boolean_value() {
            out.push(tuple);
        }
    }
    Ok(out)
}

/// Partition tuples by their key expressions' string form, preserving
/// first-seen group order. Within a group, variables named by a
/// [`GroupKey::binds`] keep their (shared) singleton value; every other
/// bound variable becomes the sequence of its values across the group's
/// members, in member order (§4.13 "GroupBy clause").
fn apply_group_by<H: XmlHost>(ctx: &mut EvalContext<H>, tuples: Vec<Tuple>, keys: &[GroupKey]) -> Result<Vec<Tuple>, Error> {
    let key_vars: HashSet<&str> = keys.iter().filter_map(|k| k.binds.as_deref()).collect();

    let mut members: Vec<(Vec<String>, Tuple)> = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        let mut key_strs = Vec::with_capacity(keys.len());
        for k in keys {
            key_strs.push(eval_in_tuple(ctx, &tuple, &k.expr)?.to_xpath_string());
        }
        members.push((key_strs, tuple));
    }

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<Tuple>> = HashMap::new();
    for (key_strs, tuple) in members {
        groups.entry(key_strs.clone()).or_insert_with(Vec::new).push(tuple);
        if !order.contains(&key_strs) {
            order.push(key_strs);
        }
    }

    let mut result = Vec::with_capacity(order.len());
    for key_strs in order {
        let group = groups.remove(&key_strs).expect("grouped above");
        let var_names: HashSet<String> = group.iter().flat_map(|t| t.keys().cloned()).collect();
        let mut merged = HashMap::new();
        for name in var_names {
            if key_vars.contains(name.as_str()) {
                if let Some(v) = group[0].get(&name) {
                    merged.insert(name, v.clone());
                }
            } else {
                let items: Vec<XPathValue> = group.iter().filter_map(|t| t.get(&name).cloned()).collect();
                merged.insert(name, XPathValue::concat(items));
            }
        }
        result.push(merged);
    }
    Ok(result)
}

/// The canonical Unicode code-point collation: the only `collation` URI
/// this crate honors (§4.13: "Unsupported collation URIs report a hard
/// error rather than silently falling back").
const CODEPOINT_COLLATION: &str = "http://www.w3.org/2005/xpath-functions/collation/codepoint";

fn apply_order_by<H: XmlHost>(
    ctx: &mut EvalContext<H>,
    tuples: Vec<Tuple>,
    stable: bool,
    specs: &[OrderSpec],
) -> Result<Vec<Tuple>, Error> {
    // Parsed only to preserve the source's distinction between `order by`
    // and `stable order by`; §4.13 requires the sort to be deterministic
    // (original-index tiebreak) either way, and `Vec::sort_by` is already
    // a stable sort, so both spellings behave identically here.
    let _ = stable;
    for spec in specs {
        if let Some(uri) = &spec.collation {
            if uri != CODEPOINT_COLLATION {
                return Err(Error::failed(format!("unsupported collation '{uri}'")));
            }
        }
    }
    let mut keyed: Vec<(Vec<Option<XPathValue>>, Tuple)> = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        let mut keys = Vec::with_capacity(specs.len());
        for spec in specs {
            let value = eval_in_tuple(ctx, &tuple, &spec.expr)?;
            keys.push(value.into_items().into_iter().next());
        }
        keyed.push((keys, tuple));
    }
    keyed.sort_by(|a, b| {
        for (i, spec) in specs.iter().enumerate() {
            let ord = compare_order_keys(&a.0[i], &b.0[i], spec);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(keyed.into_iter().map(|(_, t)| t).collect())
}

/// Compare one `order by` key pair, honoring `empty greatest`/`empty
/// least` and `descending` (§4.13 "OrderBy clause"). Numeric keys compare
/// numerically, everything else falls back to ordinal string comparison.
/// Collation validity is checked once per clause in [`apply_order_by`]
/// before any pair reaches this function.
fn compare_order_keys(a: &Option<XPathValue>, b: &Option<XPathValue>, spec: &OrderSpec) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let base = match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => {
            if spec.empty_greatest {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Some(_), None) => {
            if spec.empty_greatest {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (Some(x), Some(y)) => {
            let xs = x.to_xpath_string();
            let ys = y.to_xpath_string();
            match (xs.trim().parse::<f64>(), ys.trim().parse::<f64>()) {
                (Ok(xn), Ok(yn)) => xn.partial_cmp(&yn).unwrap_or(Ordering::Equal),
                _ => xs.cmp(&ys),
            }
        }
    };
    if spec.descending {
        base.reverse()
    } else {
        base
    }
}

fn apply_count(tuples: Vec<Tuple>, name: &str) -> Vec<Tuple> {
    tuples
        .into_iter()
        .enumerate()
        .map(|(i, mut t)| {
            t.insert(name.to_string(), XPathValue::Number((i + 1) as f64));
            t
        })
        .collect()
}
