//! Tests for persisting compiled programs and inspecting them.
//!
//! A program written with `to_bytes` and read back with `from_bytes` must
//! render exactly like the original; corrupt or structurally invalid bytes
//! must be rejected before they reach the VM.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use slate::{IgnoreWarnings, LoadError, Node, Opcode, Program, ProgramBuilder, Renderer, Source, Tag, Value, Vars};

fn renderer() -> Renderer {
    Renderer::new().with_warnings(Arc::new(IgnoreWarnings))
}

/// A template touching loops, conditionals, functions and escaping.
fn sample_tree() -> Node {
    Node::template(vec![
        Node::raw_text("<ul>\n"),
        Node::foreach(
            "item",
            Node::ident("items"),
            Node::template(vec![
                Node::raw_text("<li>"),
                Node::expression(Node::call(Node::ident("uc"), vec![Node::ident("item")])),
                Node::if_else(
                    Node::new(Tag::LoopHasNext),
                    Node::template(vec![Node::raw_text(",")]),
                    None,
                ),
                Node::raw_text("</li>\n"),
            ])
            .at(2),
        )
        .at(2),
        Node::raw_text("</ul> "),
        Node::expression(Node::binary(Tag::Multiply, Node::double(1.5), Node::int(4))).at(4),
    ])
}

fn sample_vars() -> Vars {
    let mut vars = Vars::new();
    vars.insert(
        "items".to_owned(),
        ["a&b", "c"].into_iter().map(Value::from).collect(),
    );
    vars
}

#[test]
fn restored_program_renders_identically() {
    let renderer = renderer();
    let original = renderer
        .compile(&sample_tree(), Source::from_string("<ul>\n..."))
        .unwrap();
    let bytes = original.to_bytes().unwrap();
    let restored = Arc::new(Program::from_bytes(&bytes).unwrap());

    let expected = renderer.render(&original, &mut sample_vars()).unwrap();
    assert_eq!(expected, "<ul>\n<li>A&amp;B,</li>\n<li>C</li>\n</ul> 6.0");
    assert_eq!(renderer.render(&restored, &mut sample_vars()).unwrap(), expected);

    assert_eq!(restored.instructions(), original.instructions());
    assert_eq!(restored.pool(), original.pool());
    assert_eq!(restored.lines(), original.lines());
    assert_eq!(restored.source(), original.source());
    assert_eq!(restored.register_count(), original.register_count());
    assert_eq!(restored.loop_depth(), 1);
}

#[test]
fn output_hint_is_not_persisted() {
    let renderer = renderer();
    let program = renderer.compile(&sample_tree(), Source::Anonymous).unwrap();
    assert_eq!(program.output_hint(), 0);
    let out = renderer.render(&program, &mut sample_vars()).unwrap();
    assert_eq!(program.output_hint(), out.len());

    let restored = Program::from_bytes(&program.to_bytes().unwrap()).unwrap();
    assert_eq!(restored.output_hint(), 0);
}

#[test]
fn truncated_bytes_are_rejected() {
    let program = renderer().compile(&sample_tree(), Source::Anonymous).unwrap();
    let bytes = program.to_bytes().unwrap();
    let err = Program::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, LoadError::Decode { .. }), "{err:?}");
    assert!(err.to_string().starts_with("cannot decode program: "));
}

/// Well-formed bytes that describe an unsafe program fail validation.
#[test]
fn invalid_register_is_rejected() {
    let mut builder = ProgramBuilder::new();
    builder.emit(Opcode::Append, 5, 0);
    builder.emit(Opcode::Return, 0, 0);
    let bytes = builder.build(Source::Anonymous).to_bytes().unwrap();
    let Err(LoadError::Decode { message }) = Program::from_bytes(&bytes) else {
        panic!("expected a decode error");
    };
    assert!(message.contains("register 5 out of range"), "{message}");
}

#[test]
fn missing_return_is_rejected() {
    let mut builder = ProgramBuilder::new();
    let r = builder.reserve_register().unwrap();
    builder.emit(Opcode::LoadTrue, r, 0);
    let bytes = builder.build(Source::Anonymous).to_bytes().unwrap();
    let Err(LoadError::Decode { message }) = Program::from_bytes(&bytes) else {
        panic!("expected a decode error");
    };
    assert_eq!(message, "program does not end with RETURN");
}

#[test]
fn compiled_programs_validate() {
    let program = renderer().compile(&sample_tree(), Source::Anonymous).unwrap();
    assert_eq!(program.validate(), Ok(()));
    assert_eq!(program.instructions().last().map(|i| i.op), Some(Opcode::Return));
}

#[test]
fn disassembly_lists_instructions_and_pool() {
    let tree = Node::template(vec![Node::raw_text("hello"), Node::expression(Node::ident("name").at(2)).at(2)]);
    let program = renderer().compile(&tree, Source::Anonymous).unwrap();
    let listing = program.disassemble(Some(1));

    let lines: Vec<&str> = listing.lines().collect();
    assert!(lines[0].starts_with("    000000 APPEND_RAW"), "{listing}");
    assert!(lines[1].starts_with("  * 000001 LOAD_VAR"), "{listing}");
    assert!(lines[1].contains("line 2"), "{listing}");
    assert!(listing.contains("Pool:\n  0000 \"hello\"\n  0001 \"name\"\n"), "{listing}");
    assert_eq!(program.to_string(), program.disassemble(None));
}
