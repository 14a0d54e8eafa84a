//! The demo workspace: a counter and a todo list.

use serde_json::{Value, json};
use std::sync::{Arc, Mutex, PoisonError};

use statehive_config::AppConfig;
use statehive_core::Subscription;
use statehive_workspace::{
    ComponentRegistration, Permission, Schema, State, StatefulComponent, Utility, Workspace,
};

pub struct Demo {
    pub workspace: Workspace,
    changes: Arc<Mutex<Vec<String>>>,
    _subscriptions: Vec<Subscription>,
}

impl Demo {
    /// One line per state change since the demo was built.
    pub fn changes(&self) -> Vec<String> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn todo_schema() -> Schema {
    Schema::array(Schema::object([
        ("title", Schema::String),
        ("done", Schema::Boolean),
        (
            "priority",
            Schema::one_of([json!("low"), json!("normal"), json!("high")]).optional(),
        ),
    ]))
}

pub fn workspace(config: &AppConfig) -> anyhow::Result<Demo> {
    let count = Arc::new(
        State::new("count", Permission::ReadAndWrite, Schema::Integer, json!(0))?
            .with_side_effects("Shown on the status badge"),
    );
    let step = Arc::new(State::new(
        "step",
        Permission::ReadOnly,
        Schema::Integer,
        json!(1),
    )?);
    let todos = Arc::new(State::new(
        "todos",
        Permission::ReadAndWrite,
        todo_schema(),
        json!([
            {"title": "Write the release notes", "done": false, "priority": "high"},
            {"title": "Tag the release", "done": false}
        ]),
    )?);

    let counter = StatefulComponent::builder("counter")
        .description("A counter the model can set or increment by `step`.")
        .shared_state(count.clone())
        .shared_state(step)
        .build()?;

    let todo_list = StatefulComponent::builder("todos")
        .description("A todo list. Mark items done instead of removing them.")
        .shared_state(todos.clone())
        .utility(Utility::new(
            "pending",
            "Titles of the todos that are not done",
            pending_titles,
        ))
        .build()?;

    let workspace = Workspace::with_config("demo", "A counter and a todo list", config);
    workspace.register_component(ComponentRegistration::new("counter", Arc::new(counter)))?;
    workspace.register_component(
        ComponentRegistration::new("todos", Arc::new(todo_list)).with_priority(1),
    )?;

    let changes = Arc::new(Mutex::new(Vec::new()));
    let subscriptions = [count, todos]
        .iter()
        .map(|state| {
            let sink = changes.clone();
            state.subscribe(move |change| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(format!("{}: {} -> {}", change.name, change.previous, change.current));
            })
        })
        .collect();

    Ok(Demo {
        workspace,
        changes,
        _subscriptions: subscriptions,
    })
}

fn pending_titles(args: Vec<Value>) -> Result<Value, String> {
    let todos = args
        .first()
        .and_then(Value::as_array)
        .ok_or("pending() expects the todo list")?;
    Ok(todos
        .iter()
        .filter(|t| t["done"] != json!(true))
        .map(|t| t["title"].clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_renders_both_components_in_priority_order() {
        let demo = workspace(&AppConfig::default()).unwrap();
        let text = demo.workspace.render();
        let counter = text.find("### Component: counter").unwrap();
        let todos = text.find("### Component: todos").unwrap();
        assert!(counter < todos);
        assert!(text.contains("Components: 2"));
    }

    #[test]
    fn read_only_step_is_left_out_of_the_guide() {
        let demo = workspace(&AppConfig::default()).unwrap();
        let guide = demo.workspace.render_with_script_section();
        assert!(guide.contains("count = 0"));
        assert!(!guide.contains("step = 1"));
        assert!(guide.contains("- pending(): Titles of the todos that are not done"));
    }

    #[tokio::test]
    async fn scripts_mutate_demo_state_and_record_changes() {
        let demo = workspace(&AppConfig::default()).unwrap();
        let result = demo
            .workspace
            .execute_script(
                "todos.value[0].done = true\n\
                 count.value = pending(todos.value).length\n\
                 return pending(todos.value)",
            )
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.output, Some(json!(["Tag the release"])));
        assert_eq!(demo.changes().len(), 2);
        assert!(demo.changes()[1].starts_with("count: 0 -> 1"));
    }

    #[tokio::test]
    async fn invalid_priority_is_rejected() {
        let demo = workspace(&AppConfig::default()).unwrap();
        let result = demo
            .workspace
            .execute_script("todos.value[1].priority = 'urgent'")
            .await;
        assert!(!result.success);
        assert!(demo.changes().is_empty());
    }
}
