//! Tests for component extraction from accumulated model output.

use kiln::dispatch::StreamObserver;
use kiln::extract::{self, mount_call};
use kiln::session::Session;

#[test]
fn nothing_until_closing_fence() {
    for text in [
        "",
        "no code here",
        "```jsx\nconst Foo = () => <div/>;",
        "```jsx\nconst Foo = () => <div/>;\n``",
        "Here it is: ```",
    ] {
        assert_eq!(extract::extract(text), None, "input: {text:?}");
    }
}

#[test]
fn simple_arrow_component_gets_mount_call() {
    let found = extract::extract("```jsx\nconst Foo = () => <div/>;\n```").unwrap();
    assert!(found.source_code.contains("const Foo"));
    assert!(found.source_code.ends_with(&mount_call("Foo")));
    assert_eq!(found.component_name.as_deref(), Some("Foo"));
}

#[test]
fn extraction_is_idempotent() {
    let text = "Sure!\n```js\nimport React from 'react';\nfunction Clock() { return <p>now</p>; }\nexport default Clock;\n```\nEnjoy.";
    let first = extract::extract(text);
    let second = extract::extract(text);
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[test]
fn only_the_first_block_is_used() {
    let text = "```jsx\nconst First = () => <a/>;\n```\nand also\n```jsx\nconst Second = () => <b/>;\n```";
    let found = extract::extract(text).unwrap();
    assert_eq!(found.component_name.as_deref(), Some("First"));
    assert!(!found.source_code.contains("Second"));
}

#[test]
fn squashed_single_line_code_is_reflowed() {
    let text = "```jsx\nconst Box = () => { const a = 1; return <div><span>{a}</span></div>; };\n```";
    let found = extract::extract(text).unwrap();
    assert!(found.source_code.contains("const a = 1;\nreturn"));
    assert!(found.source_code.contains("<div>\n<span>"));
}

#[test]
fn manual_mounting_is_replaced_by_one_mount_call() {
    let text = "```jsx\nimport { createRoot } from 'react-dom/client';\nconst App = () => <main/>;\nconst root = createRoot(document.getElementById('root'));\nroot.render(<App />);\n```";
    let found = extract::extract(text).unwrap();
    assert!(!found.source_code.contains("createRoot"));
    assert!(!found.source_code.contains("import"));
    assert_eq!(found.source_code.matches("render(").count(), 1);
    assert!(found.source_code.ends_with("render(<App />);"));
}

#[test]
fn unnamed_code_is_returned_without_mount() {
    let found = extract::extract("```jsx\nrender(<div>hi</div>);\n```").unwrap();
    assert_eq!(found.component_name, None);
    assert_eq!(found.source_code, "render(<div>hi</div>);");
}

#[test]
fn empty_block_is_absent() {
    assert_eq!(extract::extract("```jsx\n// just a comment\n```"), None);
}

#[test]
fn growing_buffer_keeps_first_extraction() {
    let mut session = Session::new();
    session.on_increment("```jsx\nconst Early = () => <i/>;\n```");
    let first = session.component().cloned().unwrap();

    // Later text that would extract differently if re-run from scratch
    // on a different block still leaves the held component untouched.
    session.on_increment("\nExplanation follows. ```");
    session.on_increment("jsx\nconst Late = () => <b/>;\n```");
    assert_eq!(session.component(), Some(&first));
    assert_eq!(first.component_name.as_deref(), Some("Early"));
}

// ---------------------------------------------------------------------------
// Reflow and cleanup only touch layout
// ---------------------------------------------------------------------------

#[test]
fn string_and_template_contents_are_untouched() {
    let text = "```jsx\nconst Clock = () => {\n  const css = \"color: red; margin: 0\";\n  const brace = 'a}b';\n  return <p style={{}}>{`${m}:${s}`}</p>;\n};\n```";
    let found = extract::extract(text).unwrap();
    let code = &found.source_code;
    assert!(code.contains("\"color: red; margin: 0\""), "{code}");
    assert!(code.contains("'a}b'"), "{code}");
    assert!(code.contains("`${m}:${s}`"), "{code}");
    assert_eq!(found.component_name.as_deref(), Some("Clock"));
}

#[test]
fn url_in_string_is_untouched() {
    let text = "```jsx\nconst Link = () => <a href=\"https://example.com/a;b?x=1\">go</a>; const n = 1;\n```";
    let found = extract::extract(text).unwrap();
    assert!(
        found
            .source_code
            .contains("<a href=\"https://example.com/a;b?x=1\">go</a>;\nconst n = 1;"),
        "{}",
        found.source_code
    );
}

#[test]
fn arrow_returning_jsx_stays_on_one_line() {
    let found = extract::extract("```jsx\nconst Dot = () => <div/>;\n```").unwrap();
    assert!(found.source_code.starts_with("const Dot = () => <div/>;"));
    assert!(!found.source_code.contains("=>\n"));
}

#[test]
fn jsx_text_children_survive() {
    let text = "```jsx\nconst Btn = () => (\n  <button>\n    Reset\n  </button>\n);\n```";
    let found = extract::extract(text).unwrap();
    assert!(found.source_code.contains("\n    Reset\n"), "{}", found.source_code);
    assert!(found.source_code.ends_with("render(<Btn />);"));
}

#[test]
fn leftover_export_lines_are_dropped() {
    let text = "```jsx\nconst Tile = () => <b/>;\nTile;\nexport default Tile\n```";
    let found = extract::extract(text).unwrap();
    assert_eq!(found.source_code, "const Tile = () => <b/>;\n\nrender(<Tile />);");
}
