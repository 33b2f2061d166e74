//! End-to-end tests for the XPath 2.0 / XQuery evaluator (§4.8-§4.15).

use arcquery::xpath::{compile, evaluate, query, CallbackAction, EvaluatorConfig, InMemoryHost, Tag};

/// Builds:
/// ```xml
/// <catalog>
///   <item id="a1"><name>Widget</name><price>10</price></item>
///   <item id="a2"><name>Gadget</name><price>20</price></item>
/// </catalog>
/// ```
fn catalog_host() -> InMemoryHost {
    let mut host = InMemoryHost::new(1);
    host.insert(Tag {
        id: 1,
        parent_id: None,
        namespace_id: None,
        attributes: vec![("catalog".to_string(), String::new())],
        children: vec![2, 3],
    });
    host.insert(Tag {
        id: 2,
        parent_id: Some(1),
        namespace_id: None,
        attributes: vec![("item".to_string(), String::new()), ("id".to_string(), "a1".to_string())],
        children: vec![21, 22],
    });
    host.insert(Tag {
        id: 21,
        parent_id: Some(2),
        namespace_id: None,
        attributes: vec![("name".to_string(), String::new())],
        children: vec![211],
    });
    host.insert(Tag {
        id: 211,
        parent_id: Some(21),
        namespace_id: None,
        attributes: vec![("#text".to_string(), "Widget".to_string())],
        children: vec![],
    });
    host.insert(Tag {
        id: 22,
        parent_id: Some(2),
        namespace_id: None,
        attributes: vec![("price".to_string(), String::new())],
        children: vec![221],
    });
    host.insert(Tag {
        id: 221,
        parent_id: Some(22),
        namespace_id: None,
        attributes: vec![("#text".to_string(), "10".to_string())],
        children: vec![],
    });
    host.insert(Tag {
        id: 3,
        parent_id: Some(1),
        namespace_id: None,
        attributes: vec![("item".to_string(), String::new()), ("id".to_string(), "a2".to_string())],
        children: vec![31, 32],
    });
    host.insert(Tag {
        id: 31,
        parent_id: Some(3),
        namespace_id: None,
        attributes: vec![("name".to_string(), String::new())],
        children: vec![311],
    });
    host.insert(Tag {
        id: 311,
        parent_id: Some(31),
        namespace_id: None,
        attributes: vec![("#text".to_string(), "Gadget".to_string())],
        children: vec![],
    });
    host.insert(Tag {
        id: 32,
        parent_id: Some(3),
        namespace_id: None,
        attributes: vec![("price".to_string(), String::new())],
        children: vec![321],
    });
    host.insert(Tag {
        id: 321,
        parent_id: Some(32),
        namespace_id: None,
        attributes: vec![("#text".to_string(), "20".to_string())],
        children: vec![],
    });
    host
}

fn run(host: &mut InMemoryHost, query: &str) -> arcquery::xpath::XPathValue {
    let compiled = compile(query).unwrap();
    evaluate(host, &compiled, EvaluatorConfig::default()).unwrap()
}

#[test]
fn count_counts_every_item() {
    let mut host = catalog_host();
    let value = run(&mut host, "count(//item)");
    assert_eq!(value.to_number(), 2.0);
}

#[test]
fn attribute_predicate_selects_one_item() {
    let mut host = catalog_host();
    let value = run(&mut host, "//item[@id='a2']/name/text()");
    assert_eq!(value.to_xpath_string(), "Gadget");
}

#[test]
fn position_predicate_is_per_context_node() {
    // Each <item> has exactly one <name> child, so name[1] must select it
    // for every item, not just the first item overall (eval_step's
    // per-context-node predicate semantics).
    let mut host = catalog_host();
    let value = run(&mut host, "//item/name[1]/text()");
    let items: Vec<String> = value.into_items().iter().map(|v| v.to_xpath_string()).collect();
    assert_eq!(items, vec!["Widget", "Gadget"]);
}

#[test]
fn numeric_predicate_filters_by_price() {
    let mut host = catalog_host();
    let value = run(&mut host, "//item[price > 15]/@id");
    assert_eq!(value.to_xpath_string(), "a2");
}

#[test]
fn boolean_effective_value_of_empty_sequence_is_false() {
    let mut host = catalog_host();
    let value = run(&mut host, "boolean(//item[@id='nope'])");
    assert_eq!(value.effective_boolean_value(), false);
}

#[test]
fn union_dedups_overlapping_node_sets() {
    let mut host = catalog_host();
    let value = run(&mut host, "count(//item[@id='a1'] | //item)");
    assert_eq!(value.to_number(), 2.0);
}

#[test]
fn flwor_for_let_where_orders_by_price_descending() {
    let mut host = catalog_host();
    let value = run(
        &mut host,
        "for $i in //item let $p := number($i/price) where $p > 0 order by $p descending return $i/@id",
    );
    let ids: Vec<String> = value.into_items().iter().map(|v| v.to_xpath_string()).collect();
    assert_eq!(ids, vec!["a2", "a1"]);
}

#[test]
fn flwor_group_by_merges_non_key_bindings() {
    let mut host = catalog_host();
    // Group every item under one synthetic bucket and count members.
    let value = run(
        &mut host,
        "for $i in //item let $bucket := 'all' group by $bucket return count($i)",
    );
    assert_eq!(value.to_number(), 2.0);
}

#[test]
fn order_by_rejects_unsupported_collation() {
    let mut host = catalog_host();
    let compiled = compile(
        "for $i in //item order by $i/@id collation 'http://example.com/bogus' return $i",
    )
    .unwrap();
    let result = evaluate(&mut host, &compiled, EvaluatorConfig::default());
    assert!(result.is_err());
}

#[test]
fn computed_element_constructor_builds_a_node() {
    let mut host = catalog_host();
    let value = run(&mut host, "element summary { count(//item) }");
    assert_eq!(value.to_xpath_string(), "2");
}

#[test]
fn string_functions_cover_core_cases() {
    let mut host = catalog_host();
    assert_eq!(run(&mut host, "upper-case('abc')").to_xpath_string(), "ABC");
    assert_eq!(run(&mut host, "concat('a', 'b', 'c')").to_xpath_string(), "abc");
    assert_eq!(run(&mut host, "substring('hello world', 1, 5)").to_xpath_string(), "hello");
    assert_eq!(run(&mut host, "matches('foo123', '^[a-z]+[0-9]+$')").effective_boolean_value(), true);
    assert_eq!(run(&mut host, "ends-with('foo.txt', '.txt')").effective_boolean_value(), true);
}

#[test]
fn numeric_sequence_functions_cover_min_max_avg_round() {
    let mut host = catalog_host();
    assert_eq!(run(&mut host, "max((1, 5, 3))").to_number(), 5.0);
    assert_eq!(run(&mut host, "min((1, 5, 3))").to_number(), 1.0);
    assert_eq!(run(&mut host, "avg((1, 2, 3))").to_number(), 2.0);
    assert_eq!(run(&mut host, "round-half-to-even(0.5)").to_number(), 0.0);
    assert_eq!(run(&mut host, "round-half-to-even(1.5)").to_number(), 2.0);
}

#[test]
fn exactly_one_rejects_multi_item_sequences() {
    let mut host = catalog_host();
    let compiled = compile("exactly-one(//item)").unwrap();
    assert!(evaluate(&mut host, &compiled, EvaluatorConfig::default()).is_err());
}

#[test]
fn deep_equal_compares_sequences_pairwise() {
    let mut host = catalog_host();
    assert_eq!(run(&mut host, "deep-equal((1, 2, 3), (1, 2, 3))").effective_boolean_value(), true);
    assert_eq!(run(&mut host, "deep-equal((1, 2), (1, 2, 3))").effective_boolean_value(), false);
}

#[test]
fn query_without_callback_stops_at_first_match_and_sets_cursor() {
    let mut host = catalog_host();
    let compiled = compile("//item").unwrap();
    query(&mut host, &compiled, EvaluatorConfig::default(), None).unwrap();
}

#[test]
fn root_returns_the_document_root_regardless_of_context() {
    let mut host = catalog_host();
    let value = run(&mut host, "name(root(//item[@id='a2']/name))");
    assert_eq!(value.to_xpath_string(), "catalog");
}

#[test]
fn data_atomizes_node_sets_to_their_string_value() {
    let mut host = catalog_host();
    let value = run(&mut host, "data(//item[@id='a1']/name)");
    assert_eq!(value.to_xpath_string(), "Widget");
}

#[test]
fn idref_finds_nodes_whose_attribute_references_the_id() {
    let mut host = InMemoryHost::new(1);
    host.insert(Tag {
        id: 1,
        parent_id: None,
        namespace_id: None,
        attributes: vec![("root".to_string(), String::new())],
        children: vec![2, 3],
    });
    host.insert(Tag {
        id: 2,
        parent_id: Some(1),
        namespace_id: None,
        attributes: vec![("item".to_string(), String::new()), ("id".to_string(), "a1".to_string())],
        children: vec![],
    });
    host.insert(Tag {
        id: 3,
        parent_id: Some(1),
        namespace_id: None,
        attributes: vec![("ref".to_string(), String::new()), ("target".to_string(), "a1".to_string())],
        children: vec![],
    });
    let value = run(&mut host, "name(idref('a1'))");
    assert_eq!(value.to_xpath_string(), "ref");
}

#[test]
fn nilled_reports_the_xsi_nil_attribute() {
    let mut host = InMemoryHost::new(1);
    host.insert(Tag {
        id: 1,
        parent_id: None,
        namespace_id: None,
        attributes: vec![("root".to_string(), String::new())],
        children: vec![2],
    });
    host.insert(Tag {
        id: 2,
        parent_id: Some(1),
        namespace_id: None,
        attributes: vec![("item".to_string(), String::new()), ("xsi:nil".to_string(), "true".to_string())],
        children: vec![],
    });
    assert_eq!(run(&mut host, "nilled(//item)").effective_boolean_value(), true);
}

#[test]
fn base_uri_and_document_uri_are_empty_without_a_host_hook() {
    let mut host = catalog_host();
    assert_eq!(run(&mut host, "boolean(base-uri())").effective_boolean_value(), false);
    assert_eq!(run(&mut host, "boolean(document-uri())").effective_boolean_value(), false);
    assert_eq!(run(&mut host, "boolean(static-base-uri())").effective_boolean_value(), false);
}

#[test]
fn doc_available_and_unparsed_text_available_are_false_without_host_support() {
    let mut host = catalog_host();
    assert_eq!(run(&mut host, "doc-available('anything')").effective_boolean_value(), false);
    assert_eq!(
        run(&mut host, "unparsed-text-available('anything')").effective_boolean_value(),
        false
    );
}

#[test]
fn lang_matches_the_nearest_xml_lang_ancestor() {
    let mut host = InMemoryHost::new(1);
    host.insert(Tag {
        id: 1,
        parent_id: None,
        namespace_id: None,
        attributes: vec![("root".to_string(), String::new()), ("xml:lang".to_string(), "en-US".to_string())],
        children: vec![2],
    });
    host.insert(Tag {
        id: 2,
        parent_id: Some(1),
        namespace_id: None,
        attributes: vec![("item".to_string(), String::new())],
        children: vec![],
    });
    assert_eq!(run(&mut host, "lang('en', //item)").effective_boolean_value(), true);
    assert_eq!(run(&mut host, "lang('fr', //item)").effective_boolean_value(), false);
}

#[test]
fn date_time_accessors_extract_components() {
    let mut host = catalog_host();
    assert_eq!(run(&mut host, "year-from-dateTime('2024-03-05T13:45:30')").to_number(), 2024.0);
    assert_eq!(run(&mut host, "month-from-dateTime('2024-03-05T13:45:30')").to_number(), 3.0);
    assert_eq!(run(&mut host, "hours-from-dateTime('2024-03-05T13:45:30')").to_number(), 13.0);
    assert_eq!(run(&mut host, "year-from-date('2024-03-05')").to_number(), 2024.0);
    assert_eq!(run(&mut host, "seconds-from-time('13:45:30')").to_number(), 30.0);
}

#[test]
fn format_integer_supports_digit_alphabetic_and_roman_presentations() {
    let mut host = catalog_host();
    assert_eq!(run(&mut host, "format-integer(7, '01')").to_xpath_string(), "07");
    assert_eq!(run(&mut host, "format-integer(28, 'A')").to_xpath_string(), "AB");
    assert_eq!(run(&mut host, "format-integer(14, 'I')").to_xpath_string(), "XIV");
}

#[test]
fn format_date_renders_a_bracketed_picture() {
    let mut host = catalog_host();
    let value = run(&mut host, "format-date('2024-03-05', '[Y0001]-[M01]-[D01]')");
    assert_eq!(value.to_xpath_string(), "2024-03-05");
}

#[test]
fn analyze_string_splits_matches_from_non_matches() {
    let mut host = catalog_host();
    let value = run(&mut host, "count(analyze-string('foo123bar', '[0-9]+')//fn:match)");
    assert_eq!(value.to_number(), 1.0);
}

#[test]
fn qname_round_trips_through_clark_notation() {
    let mut host = catalog_host();
    let uri = run(&mut host, "namespace-uri-from-QName(QName('http://example.com/ns', 'p:widget'))");
    assert_eq!(uri.to_xpath_string(), "http://example.com/ns");
    let local = run(&mut host, "local-name-from-QName(QName('http://example.com/ns', 'p:widget'))");
    assert_eq!(local.to_xpath_string(), "widget");
}

#[test]
fn query_with_callback_visits_every_match_until_terminate() {
    let mut host = catalog_host();
    let compiled = compile("//item/@id").unwrap();
    let mut seen = Vec::new();
    query(
        &mut host,
        &compiled,
        EvaluatorConfig::default(),
        Some(Box::new(|tag, attr: Option<&str>| {
            seen.push((tag, attr.map(|s| s.to_string())));
            CallbackAction::Continue
        })),
    )
    .unwrap();
    assert_eq!(seen, vec![(2, Some("id".to_string())), (3, Some("id".to_string()))]);
}
