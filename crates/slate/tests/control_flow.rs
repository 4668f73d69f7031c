//! Tests for IF, SWITCH, FOREACH, WHILE, LAST and NEXT, including the
//! `loop.*` accessors and the assignment/loop interplay.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use slate::{CompileError, Error, ErrorKind, IgnoreWarnings, Node, Renderer, Tag, Value, Vars};

fn render(tree: &Node, vars: Vars) -> String {
    Renderer::new()
        .with_warnings(Arc::new(IgnoreWarnings))
        .render_tree(tree, vars)
        .unwrap()
}

fn render_err(tree: &Node, vars: Vars) -> Error {
    Renderer::new()
        .with_warnings(Arc::new(IgnoreWarnings))
        .render_tree(tree, vars)
        .unwrap_err()
}

fn one_var(name: &str, value: Value) -> Vars {
    let mut vars = Vars::new();
    vars.insert(name.to_owned(), value);
    vars
}

fn letters(items: &[&str]) -> Value {
    items.iter().map(|s| Value::from(*s)).collect()
}

fn text(s: &str) -> Node {
    Node::raw_text(s)
}

fn show(name: &str) -> Node {
    Node::expression(Node::ident(name))
}

fn is(name: &str, value: &str) -> Node {
    Node::binary(Tag::Equals, Node::ident(name), Node::string(value))
}

// === IF ===

#[test]
fn if_without_else_skips_body() {
    let tree = Node::template(vec![
        text("o"),
        Node::if_else(Node::bool(false), Node::template(vec![text("x")]), None),
        text("oo"),
    ]);
    assert_eq!(render(&tree, Vars::new()), "ooo");
}

/// ELSIF arrives as an IF nested in the else branch.
#[test]
fn elsif_chain_picks_first_true_branch() {
    let chain = Node::if_else(
        is("x", "a"),
        Node::template(vec![text("A")]),
        Some(Node::if_else(
            is("x", "b"),
            Node::template(vec![text("B")]),
            Some(Node::template(vec![text("other")])),
        )),
    );
    let tree = Node::template(vec![chain]);
    assert_eq!(render(&tree, one_var("x", Value::from("a"))), "A");
    assert_eq!(render(&tree, one_var("x", Value::from("b"))), "B");
    assert_eq!(render(&tree, one_var("x", Value::from("c"))), "other");
}

// === SWITCH ===

fn switch_on_x(with_default: bool) -> Node {
    let mut cases = vec![
        Node::case(Some(Node::string("a")), Node::template(vec![text("A")])),
        Node::case(Some(Node::string("b")), Node::template(vec![text("B")])),
        Node::case(Some(Node::string("b")), Node::template(vec![text("second b")])),
    ];
    if with_default {
        cases.push(Node::case(None, Node::template(vec![text("D")])));
    }
    Node::template(vec![Node::switch(Node::ident("x"), cases), text(".")])
}

#[test]
fn switch_runs_only_first_matching_case() {
    assert_eq!(render(&switch_on_x(true), one_var("x", Value::from("b"))), "B.");
}

#[test]
fn switch_falls_back_to_default() {
    assert_eq!(render(&switch_on_x(true), one_var("x", Value::from("z"))), "D.");
}

#[test]
fn switch_without_match_renders_nothing() {
    assert_eq!(render(&switch_on_x(false), one_var("x", Value::from("z"))), ".");
}

#[test]
fn switch_matches_numbers_numerically() {
    let tree = Node::template(vec![Node::switch(
        Node::int(2),
        vec![
            Node::case(Some(Node::int(1)), Node::template(vec![text("one")])),
            Node::case(Some(Node::double(2.0)), Node::template(vec![text("two")])),
        ],
    )]);
    assert_eq!(render(&tree, Vars::new()), "two");
}

// === FOREACH ===

#[test]
fn foreach_over_array() {
    let tree = Node::template(vec![Node::foreach(
        "i",
        Node::ident("list"),
        Node::template(vec![show("i"), text(",")]),
    )]);
    assert_eq!(render(&tree, one_var("list", letters(&["a", "b", "c"]))), "a,b,c,");
}

#[test]
fn foreach_over_empty_array_skips_body() {
    let tree = Node::template(vec![
        Node::foreach("i", Node::array(vec![]), Node::template(vec![show("i")])),
        text("done"),
    ]);
    assert_eq!(render(&tree, Vars::new()), "done");
}

#[test]
fn foreach_over_range() {
    let tree = Node::template(vec![Node::foreach(
        "n",
        Node::binary(Tag::Range, Node::int(1), Node::int(5)),
        Node::template(vec![show("n"), text(",")]),
    )]);
    assert_eq!(render(&tree, Vars::new()), "1,2,3,4,5,");
}

#[test]
fn range_bounds_must_be_integers() {
    let tree = Node::template(vec![Node::foreach(
        "n",
        Node::binary(Tag::Range, Node::string("a"), Node::int(5)),
        Node::template(vec![]),
    )]);
    let Error::Render(err) = render_err(&tree, Vars::new()) else {
        panic!("expected a render error");
    };
    assert_eq!(err.kind(), ErrorKind::Type);
    assert_eq!(
        err.message(),
        "Left side of range construction operator should be Integer, got string"
    );
}

#[test]
fn foreach_over_map_walks_keys_in_insertion_order() {
    let tree = Node::template(vec![Node::foreach(
        "k",
        Node::map(vec![
            (Node::ident("zeta"), Node::int(1)),
            (Node::ident("alpha"), Node::int(2)),
        ]),
        Node::template(vec![show("k"), text(" ")]),
    )]);
    assert_eq!(render(&tree, Vars::new()), "zeta alpha ");
}

#[test]
fn foreach_over_null_is_fatal() {
    let tree = Node::template(vec![Node::foreach("i", Node::ident("missing"), Node::template(vec![]))]);
    let Error::Render(err) = render_err(&tree, Vars::new()) else {
        panic!("expected a render error");
    };
    assert_eq!(err.message(), "cannot iterate over null");
}

#[test]
fn foreach_over_scalar_is_fatal() {
    let tree = Node::template(vec![Node::foreach("i", Node::int(3), Node::template(vec![]))]);
    let Error::Render(err) = render_err(&tree, Vars::new()) else {
        panic!("expected a render error");
    };
    assert_eq!(err.message(), "integer is not iterable");
}

/// The loop variable shadows a global of the same name only inside the loop.
#[test]
fn loop_variable_shadows_global() {
    let tree = Node::template(vec![
        Node::foreach("i", Node::array(vec![Node::int(1)]), Node::template(vec![show("i")])),
        show("i"),
    ]);
    assert_eq!(render(&tree, one_var("i", Value::from("global"))), "1global");
}

// === LAST and NEXT ===

#[test]
fn last_leaves_the_loop() {
    let tree = Node::template(vec![
        Node::foreach(
            "i",
            Node::ident("list"),
            Node::template(vec![
                Node::if_else(is("i", "c"), Node::template(vec![Node::new(Tag::Last)]), None),
                show("i"),
            ]),
        ),
        text("!"),
    ]);
    assert_eq!(render(&tree, one_var("list", letters(&["a", "b", "c", "d"]))), "ab!");
}

#[test]
fn next_skips_to_the_following_item() {
    let tree = Node::template(vec![Node::foreach(
        "i",
        Node::ident("list"),
        Node::template(vec![
            Node::if_else(is("i", "b"), Node::template(vec![Node::new(Tag::Next)]), None),
            show("i"),
        ]),
    )]);
    assert_eq!(render(&tree, one_var("list", letters(&["a", "b", "c", "d"]))), "acd");
}

/// LAST in an inner loop leaves only that loop.
#[test]
fn last_targets_innermost_loop() {
    let inner = Node::foreach(
        "j",
        Node::binary(Tag::Range, Node::int(1), Node::int(3)),
        Node::template(vec![
            Node::if_else(
                Node::binary(Tag::Equals, Node::ident("j"), Node::int(2)),
                Node::template(vec![Node::new(Tag::Last)]),
                None,
            ),
            show("j"),
        ]),
    );
    let tree = Node::template(vec![Node::foreach(
        "i",
        Node::ident("list"),
        Node::template(vec![show("i"), inner, text(";")]),
    )]);
    assert_eq!(render(&tree, one_var("list", letters(&["x", "y"]))), "x1;y1;");
}

#[test]
fn last_outside_loop_does_not_compile() {
    let tree = Node::template(vec![Node::new(Tag::Last)]);
    assert!(matches!(
        render_err(&tree, Vars::new()),
        Error::Compile(CompileError::Unsupported { tag: Tag::Last, .. })
    ));
}

// === WHILE ===

fn increment(name: &str) -> Node {
    Node::expression(Node::set(
        name,
        Node::binary(Tag::Add, Node::ident(name), Node::int(1)),
    ))
}

#[test]
fn while_runs_until_condition_fails() {
    let tree = Node::template(vec![
        Node::expression(Node::set("i", Node::int(0))),
        Node::while_loop(
            Node::binary(Tag::Lt, Node::ident("i"), Node::int(3)),
            Node::template(vec![show("i"), increment("i")]),
        ),
        text("|"),
        show("i"),
    ]);
    assert_eq!(render(&tree, Vars::new()), "012|3");
}

#[test]
fn while_with_last_and_next() {
    // prints odd numbers, stops after 7
    let tree = Node::template(vec![
        Node::expression(Node::set("i", Node::int(0))),
        Node::while_loop(
            Node::bool(true),
            Node::template(vec![
                increment("i"),
                Node::if_else(
                    Node::binary(
                        Tag::Equals,
                        Node::binary(Tag::Modulo, Node::ident("i"), Node::int(2)),
                        Node::int(0),
                    ),
                    Node::template(vec![Node::new(Tag::Next)]),
                    None,
                ),
                show("i"),
                Node::if_else(
                    Node::binary(Tag::Ge, Node::ident("i"), Node::int(7)),
                    Node::template(vec![Node::new(Tag::Last)]),
                    None,
                ),
            ]),
        ),
    ]);
    assert_eq!(render(&tree, Vars::new()), "1357");
}

#[test]
fn while_false_never_runs() {
    let tree = Node::template(vec![Node::while_loop(Node::null(), Node::template(vec![text("x")]))]);
    assert_eq!(render(&tree, Vars::new()), "");
}

// === loop.count / loop.index / loop.has_next ===

#[test]
fn loop_accessors_track_position() {
    let tree = Node::template(vec![Node::foreach(
        "i",
        Node::ident("list"),
        Node::template(vec![
            Node::expression(Node::new(Tag::LoopCount)),
            text(":"),
            Node::expression(Node::new(Tag::LoopIndex)),
            text(":"),
            Node::expression(Node::new(Tag::LoopHasNext)),
            text(";"),
        ]),
    )]);
    assert_eq!(
        render(&tree, one_var("list", letters(&["a", "b", "c"]))),
        "1:0:true;2:1:true;3:2:false;"
    );
}

/// After an inner loop finishes, `loop.count` refers to the outer loop again.
#[test]
fn loop_accessors_follow_nesting() {
    let tree = Node::template(vec![Node::foreach(
        "outer",
        Node::ident("list"),
        Node::template(vec![
            show("outer"),
            Node::foreach(
                "inner",
                Node::binary(Tag::Range, Node::int(1), Node::int(2)),
                Node::template(vec![Node::expression(Node::new(Tag::LoopCount))]),
            ),
            Node::expression(Node::new(Tag::LoopCount)),
        ]),
    )]);
    assert_eq!(render(&tree, one_var("list", letters(&["x", "y"]))), "x121y122");
}

#[test]
fn loop_count_outside_foreach_is_fatal() {
    let tree = Node::template(vec![Node::expression(Node::new(Tag::LoopCount))]);
    let Error::Render(err) = render_err(&tree, Vars::new()) else {
        panic!("expected a render error");
    };
    assert_eq!(err.message(), "loop.count used outside of FOREACH");
}

/// LAST must unwind the loop record so outer `loop.*` stays correct.
#[test]
fn last_pops_loop_record() {
    let tree = Node::template(vec![Node::foreach(
        "outer",
        Node::ident("list"),
        Node::template(vec![
            Node::foreach(
                "inner",
                Node::binary(Tag::Range, Node::int(1), Node::int(9)),
                Node::template(vec![Node::new(Tag::Last)]),
            ),
            Node::expression(Node::new(Tag::LoopIndex)),
        ]),
    )]);
    assert_eq!(render(&tree, one_var("list", letters(&["x", "y", "z"]))), "012");
}
