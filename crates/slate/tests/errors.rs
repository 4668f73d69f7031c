//! Tests for diagnostics: compile errors, render error locations and source
//! context, include cause chains, warning locations, and host object access.

use std::{any::Any, error::Error as _, sync::Arc};

use pretty_assertions::assert_eq;
use slate::{
    CollectWarnings, CompileError, Error, ErrorKind, HostObject, IgnoreWarnings, MemoryLoader, Node, Renderer, Source,
    Tag, TypeDescriptor, Value, Vars,
};

fn renderer() -> Renderer {
    Renderer::new().with_warnings(Arc::new(IgnoreWarnings))
}

/// `"a" + 1`, which is always a type error.
fn bad_sum() -> Node {
    Node::binary(Tag::Add, Node::string("a"), Node::int(1))
}

fn render_error(renderer: &Renderer, tree: &Node, source: Source) -> slate::RenderError {
    let program = renderer.compile(tree, source).unwrap();
    renderer.render(&program, &mut Vars::new()).unwrap_err()
}

// === Compile errors ===

#[test]
fn builtin_arity_is_checked_at_compile_time() {
    let tree = Node::template(vec![Node::expression(Node::call(
        Node::ident("lc"),
        vec![Node::string("a"), Node::string("b")],
    ))]);
    let Err(Error::Compile(err)) = renderer().render_tree(&tree, Vars::new()) else {
        panic!("expected a compile error");
    };
    assert!(matches!(
        &err,
        CompileError::Arity { function, found: 2, .. } if function == "lc"
    ));
    assert_eq!(err.line(), Some(1));
}

#[test]
fn value_in_statement_position_is_rejected() {
    let tree = Node::template(vec![Node::int(1).at(4)]);
    let err = renderer().compile(&tree, Source::Anonymous).unwrap_err();
    assert_eq!(
        err,
        CompileError::VoidContext {
            tag: Tag::Integer,
            line: 4
        }
    );
    assert_eq!(err.to_string(), "line 4: 'integer' in void context");
}

#[test]
fn compile_error_converts_into_facade_error() {
    let tree = Node::template(vec![Node::new(Tag::Next)]);
    let err = renderer().render_tree(&tree, Vars::new()).unwrap_err();
    assert!(matches!(err, Error::Compile(_)));
    assert!(err.source().is_some());
}

// === Render error location ===

#[test]
fn render_error_points_at_faulting_line() {
    let tree = Node::template(vec![
        Node::raw_text("a\nb\n"),
        Node::expression(bad_sum().at(3)).at(3),
        Node::raw_text("\nd"),
    ]);
    let err = render_error(&renderer(), &tree, Source::from_string("a\nb\n[% 'a' + 1 %]\nd"));
    assert_eq!(err.kind(), ErrorKind::Type);
    assert_eq!(err.line(), 3);
    assert_eq!(err.context().unwrap(), "  a\n  b\n* [% 'a' + 1 %]\n  d\n");
    assert_eq!(
        err.to_string(),
        "lhs for '+' must be Number, got string at -:3\n----\n  a\n  b\n* [% 'a' + 1 %]\n  d\n----\n"
    );
}

#[test]
fn anonymous_source_has_no_context() {
    let tree = Node::template(vec![Node::expression(bad_sum())]);
    let err = render_error(&renderer(), &tree, Source::Anonymous);
    assert!(err.context().is_none());
    assert_eq!(err.to_string(), "lhs for '+' must be Number, got string at -:1\n");
}

#[test]
fn render_error_keeps_its_program() {
    let tree = Node::template(vec![Node::expression(bad_sum())]);
    let err = render_error(&renderer(), &tree, Source::Anonymous);
    let faulting = &err.program().instructions()[err.pc()];
    assert_eq!(faulting.op, slate::Opcode::Add);
}

#[test]
fn output_before_error_is_discarded() {
    let tree = Node::template(vec![Node::raw_text("partial"), Node::expression(bad_sum())]);
    assert!(renderer().render_tree(&tree, Vars::new()).is_err());
}

// === Include cause chain ===

#[test]
fn errors_in_included_templates_carry_their_own_location() {
    let loader = MemoryLoader::new();
    loader.insert(
        "inner",
        Node::template(vec![Node::raw_text("one\n"), Node::expression(bad_sum().at(2)).at(2)]),
        Source::from_string("one\n[% 'a' + 1 %]"),
    );
    let renderer = renderer().with_loader(Arc::new(loader));
    let tree = Node::template(vec![
        Node::raw_text("x\n"),
        Node::include(Node::string("inner")).at(2),
    ]);
    let err = render_error(&renderer, &tree, Source::from_string("x\n[% INCLUDE inner %]"));

    assert_eq!(err.kind(), ErrorKind::Type);
    assert_eq!(err.line(), 2);
    let inner = err.cause().unwrap();
    assert_eq!(inner.line(), 2);
    assert_eq!(inner.context().unwrap(), "  one\n* [% 'a' + 1 %]\n");
    assert!(std::ptr::eq(err.root_cause(), inner));
    assert!(err.source().is_some());

    let shown = err.to_string();
    assert!(shown.contains("* [% INCLUDE inner %]\n"), "{shown}");
    assert!(shown.contains("  included from here; inner error:\n"), "{shown}");
    assert!(shown.ends_with("* [% 'a' + 1 %]\n----\n"), "{shown}");
}

#[test]
fn errors_in_wrapper_templates_chain_too() {
    let loader = MemoryLoader::new().with(
        "layout",
        Node::template(vec![Node::expression(Node::ident("content")), Node::expression(bad_sum())]),
    );
    let renderer = renderer().with_loader(Arc::new(loader));
    let tree = Node::template(vec![Node::wrapper(
        Node::string("layout"),
        Node::template(vec![Node::raw_text("body")]),
    )]);
    let Err(Error::Render(err)) = renderer.render_tree(&tree, Vars::new()) else {
        panic!("expected a render error");
    };
    assert!(err.cause().is_some());
    assert_eq!(err.root_cause().message(), "lhs for '+' must be Number, got string");
}

// === Warnings ===

#[test]
fn warnings_record_template_and_line() {
    let warnings = Arc::new(CollectWarnings::new());
    let renderer = Renderer::new().with_warnings(warnings.clone());
    let tree = Node::template(vec![
        Node::raw_text("line one\n"),
        Node::expression(Node::ident("missing")).at(2),
    ]);
    let out = renderer.render_tree(&tree, Vars::new()).unwrap();
    assert_eq!(out, "line one\n(null)");

    let collected = warnings.take();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].message, "Appending null");
    assert_eq!(collected[0].name, "-");
    assert_eq!(collected[0].line, 2);
    assert!(warnings.warnings().is_empty());
}

/// Warnings do not stop a render; the same construct keeps warning each time.
#[test]
fn warnings_repeat_per_occurrence() {
    let warnings = Arc::new(CollectWarnings::new());
    let renderer = Renderer::new().with_warnings(warnings.clone());
    let tree = Node::template(vec![Node::foreach(
        "i",
        Node::binary(Tag::Range, Node::int(1), Node::int(3)),
        Node::template(vec![Node::expression(Node::binary(
            Tag::Concat,
            Node::ident("i"),
            Node::ident("missing"),
        ))]),
    )]);
    assert_eq!(renderer.render_tree(&tree, Vars::new()).unwrap(), "123");
    assert_eq!(warnings.messages().len(), 3);
}

// === Host objects ===

#[derive(Debug)]
struct User {
    name: String,
    roles: Vec<String>,
}

impl HostObject for User {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::new("User")
            .field("name", |u: &Self| Value::from(u.name.as_str()))
            .field("role_count", |u: &Self| Value::Int(i64::try_from(u.roles.len()).unwrap_or_default()))
            .method("greet", |u: &Self, args: &[Value]| match args {
                [greeting] => Ok(Value::from(format!("{greeting}, {}", u.name))),
                _ => Err(format!("expected 1 argument, got {}", args.len())),
            })
            .iterable(|u: &Self| u.roles.iter().map(|r| Value::from(r.as_str())).collect())
    }

    fn to_text(&self) -> String {
        format!("user {}", self.name)
    }
}

#[derive(Debug)]
struct Opaque;

impl HostObject for Opaque {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn descriptor(&self) -> TypeDescriptor {
        TypeDescriptor::new("Opaque")
    }
}

fn user_vars() -> Vars {
    let mut vars = Vars::new();
    vars.insert(
        "user".to_owned(),
        Value::host(User {
            name: "<ann>".to_owned(),
            roles: vec!["admin".to_owned(), "dev".to_owned()],
        }),
    );
    vars
}

fn user_attr(name: &str) -> Node {
    Node::attribute(Node::ident("user"), Node::string(name))
}

fn user_method(name: &str, args: Vec<Node>) -> Node {
    Node::call(Node::attribute(Node::ident("user"), Node::ident(name)), args)
}

#[test]
fn host_fields_methods_and_iteration() {
    let tree = Node::template(vec![
        Node::expression(user_attr("name")),
        Node::raw_text("|"),
        Node::expression(user_attr("role_count")),
        Node::raw_text("|"),
        Node::expression(user_method("greet", vec![Node::string("hi")])),
        Node::raw_text("|"),
        Node::foreach(
            "role",
            Node::ident("user"),
            Node::template(vec![Node::expression(Node::ident("role")), Node::raw_text(";")]),
        ),
        Node::raw_text("|"),
        Node::expression(Node::ident("user")),
    ]);
    assert_eq!(
        renderer().render_tree(&tree, user_vars()).unwrap(),
        "&lt;ann&gt;|2|hi, &lt;ann&gt;|admin;dev;|user &lt;ann&gt;"
    );
}

#[test]
fn missing_host_field_is_fatal() {
    let tree = Node::template(vec![Node::expression(user_attr("age"))]);
    let Err(Error::Render(err)) = renderer().render_tree(&tree, user_vars()) else {
        panic!("expected a render error");
    };
    assert_eq!(err.kind(), ErrorKind::Host);
    assert_eq!(err.message(), "User has no field 'age'");
}

#[test]
fn host_method_errors_are_fatal() {
    let tree = Node::template(vec![Node::expression(user_method("greet", vec![]))]);
    let Err(Error::Render(err)) = renderer().render_tree(&tree, user_vars()) else {
        panic!("expected a render error");
    };
    assert_eq!(err.kind(), ErrorKind::Host);
    assert_eq!(err.message(), "User.greet: expected 1 argument, got 0");
}

#[test]
fn non_iterable_host_is_fatal() {
    let mut vars = Vars::new();
    vars.insert("thing".to_owned(), Value::host(Opaque));
    let tree = Node::template(vec![Node::foreach(
        "x",
        Node::ident("thing"),
        Node::template(vec![]),
    )]);
    let Err(Error::Render(err)) = renderer().render_tree(&tree, vars) else {
        panic!("expected a render error");
    };
    assert_eq!(err.message(), "Opaque is not iterable");
}

#[test]
fn host_descriptor_is_shared() {
    let a = slate::describe(&Opaque);
    let b = slate::describe(&Opaque);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.name(), "Opaque");
    let user = User {
        name: String::new(),
        roles: Vec::new(),
    };
    let desc = slate::describe(&user);
    assert!(desc.has_field("name"));
    assert!(desc.has_method("greet"));
    assert!(!desc.has_field("greet"));
}
