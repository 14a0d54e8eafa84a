//! Deterministic text rendering of components and the script guide.
//!
//! Each component renders as a header line followed by one ASCII table with
//! a block of rows per state. Values are pretty-printed JSON wrapped at a
//! fixed column width, so the same state snapshot always renders the same
//! text.

use serde_json::Value;
use std::sync::Arc;

use statehive_core::tool::{ATTEMPT_COMPLETION, EXECUTE_SCRIPT};

use crate::state::State;

const LABEL_WIDTH: usize = 12;

/// Render one component: header, description, state table.
pub fn render_component(
    name: &str,
    description: &str,
    states: &[Arc<State>],
    wrap_width: usize,
) -> String {
    let mut out = format!("### Component: {name}\n");
    if !description.is_empty() {
        out.push_str(description);
        out.push('\n');
    }
    if states.is_empty() {
        out.push_str("(no states)\n");
        return out;
    }

    let border = format!(
        "+{}+{}+\n",
        "-".repeat(LABEL_WIDTH + 2),
        "-".repeat(wrap_width + 2)
    );
    out.push_str(&border);
    for state in states {
        row(&mut out, "state", state.name(), wrap_width);
        row(&mut out, "permission", state.permission().as_str(), wrap_width);
        row(&mut out, "schema", &state.schema().to_string(), wrap_width);
        row(
            &mut out,
            "side effects",
            state.side_effects().unwrap_or("none"),
            wrap_width,
        );
        row(&mut out, "value", &pretty(&state.get()), wrap_width);
        out.push_str(&border);
    }
    out
}

/// One labelled row; continuation lines leave the label cell blank.
fn row(out: &mut String, label: &str, text: &str, width: usize) {
    for (i, line) in wrap(text, width).iter().enumerate() {
        let label = if i == 0 { label } else { "" };
        out.push_str(&format!(
            "| {label:<lw$} | {line:<width$} |\n",
            lw = LABEL_WIDTH
        ));
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Split every line of `text` into chunks of at most `width` characters.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }
        for chunk in chars.chunks(width) {
            lines.push(chunk.iter().collect());
        }
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Worked examples shown in the script guide. They assume a `count`
/// integer and a `todos` list of `{ title, done }` objects.
pub const SCRIPT_EXAMPLES: &[&str] = &[
    "count.value = count.value + 1",
    "todos.value.push({ title: \"write tests\", done: false })\n\
     return todos.value.filter(t => !t.done).length",
    "for (const todo of todos.value) {\n  \
       if (todo.title.includes(\"docs\")) { todo.done = true }\n\
     }",
];

/// The script-writing guide appended by `render_with_script_section`.
///
/// `bindings` are the write-permitted merged states as `(name, value)`,
/// `utilities` the merged utility functions as `(name, description)`.
pub fn render_script_guide(bindings: &[(String, Value)], utilities: &[(String, String)]) -> String {
    let mut out = String::from("## Script guide\n\n");
    out.push_str("Scripts run with these state bindings in scope:\n\n");
    if bindings.is_empty() {
        out.push_str("(no writable states)\n");
    }
    for (name, value) in bindings {
        out.push_str(&format!("{name} = {value}\n"));
    }

    out.push_str("\nUtilities: ");
    if utilities.is_empty() {
        out.push_str("none\n");
    } else {
        out.push('\n');
        for (name, description) in utilities {
            if description.is_empty() {
                out.push_str(&format!("- {name}()\n"));
            } else {
                out.push_str(&format!("- {name}(): {description}\n"));
            }
        }
    }

    out.push_str(&format!(
        "\nTools:\n\
         - {EXECUTE_SCRIPT}({{\"script\": string}}): run a script against the bindings above. \
         Read and assign a state through `<name>.value`. The result reports success, the \
         returned value, and any error.\n\
         - {ATTEMPT_COMPLETION}({{\"result\": string}}): finish the task and report the result.\n"
    ));

    out.push_str("\nExamples:\n");
    for example in SCRIPT_EXAMPLES {
        out.push_str(&format!("```\n{example}\n```\n"));
    }
    out.push_str(
        "A loop variable stands for its element, so `todo.done = true` inside \
         `for (const todo of todos.value)` updates `todos`.\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::state::Permission;
    use serde_json::json;

    #[test]
    fn wraps_long_lines() {
        assert_eq!(wrap("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap("", 3), vec![""]);
        assert_eq!(wrap("a\n\nb", 3), vec!["a", "", "b"]);
    }

    #[test]
    fn component_table_lists_every_field() {
        let state = Arc::new(
            State::new("count", Permission::ReadAndWrite, Schema::Integer, json!(5))
                .unwrap()
                .with_side_effects("updates the badge"),
        );
        let text = render_component("counter", "Counts things", &[state], 20);
        assert!(text.starts_with("### Component: counter\nCounts things\n"));
        assert!(text.contains("| state        | count                |"));
        assert!(text.contains("| permission   | READ_AND_WRITE       |"));
        assert!(text.contains("| side effects | updates the badge    |"));
        assert!(text.contains("| value        | 5                    |"));
    }

    #[test]
    fn long_values_wrap_at_width() {
        let state = Arc::new(
            State::new(
                "note",
                Permission::ReadOnly,
                Schema::String,
                json!("abcdefghijklmnopqrstuvwxyz"),
            )
            .unwrap(),
        );
        let text = render_component("notes", "", &[state], 16);
        assert!(text.contains("| value        | \"abcdefghijklmno |"));
        assert!(text.contains("|              | pqrstuvwxyz\"     |"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let state = Arc::new(
            State::new(
                "cfg",
                Permission::ReadOnly,
                Schema::Any,
                json!({"b": 1, "a": [1, 2]}),
            )
            .unwrap(),
        );
        let first = render_component("c", "", std::slice::from_ref(&state), 30);
        let second = render_component("c", "", &[state], 30);
        assert_eq!(first, second);
    }

    #[test]
    fn guide_lists_bindings_and_tools() {
        let guide = render_script_guide(
            &[("count".into(), json!(5))],
            &[("double".into(), "Doubles a number".into())],
        );
        assert!(guide.contains("count = 5\n"));
        assert!(guide.contains("- double(): Doubles a number"));
        assert!(guide.contains("execute_script"));
        assert!(guide.contains("attempt_completion"));
    }
}
