//! Workspace behaviour seen from the outside: registration, rendering and
//! script execution against merged states.

use serde_json::json;
use std::sync::{Arc, Mutex};

use statehive_workspace::render::SCRIPT_EXAMPLES;
use statehive_workspace::{
    Component, ComponentRegistration, Permission, Schema, State, StatefulComponent, Workspace,
};

fn counter_component() -> (Arc<State>, Arc<dyn Component>) {
    let count = Arc::new(
        State::new("count", Permission::ReadAndWrite, Schema::Integer, json!(0)).unwrap(),
    );
    let component = StatefulComponent::builder("counter")
        .description("A single counter")
        .shared_state(count.clone())
        .build()
        .unwrap();
    (count, Arc::new(component))
}

fn todo_schema() -> Schema {
    Schema::array(Schema::object([
        ("title", Schema::String),
        ("done", Schema::Boolean),
    ]))
}

#[tokio::test]
async fn assignment_is_visible_in_next_render() {
    let (count, counter) = counter_component();
    let ws = Workspace::new("demo", "Counter demo");
    ws.register_component(ComponentRegistration::new("counter", counter))
        .unwrap();

    assert!(ws.render().contains("| value        | 0"));
    let result = ws.execute_script("count.value = 5").await;
    assert!(result.success, "{result:?}");
    assert_eq!(count.get(), json!(5));
    assert!(ws.render().contains("| value        | 5"));
}

#[tokio::test]
async fn read_from_one_state_write_to_another() {
    let x = State::new("x", Permission::ReadAndWrite, Schema::Integer, json!(0)).unwrap();
    let y = State::new("y", Permission::ReadAndWrite, Schema::Integer, json!(41)).unwrap();
    let pair: Arc<dyn Component> = Arc::new(
        StatefulComponent::builder("pair")
            .state(x)
            .state(y)
            .build()
            .unwrap(),
    );
    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("pair", pair.clone()))
        .unwrap();

    let result = ws.execute_script("x.value = y.value + 1").await;
    assert!(result.success, "{result:?}");
    let states = pair.states();
    assert_eq!(states[0].get(), json!(42));
    assert_eq!(states[1].get(), json!(41));
}

#[tokio::test]
async fn read_only_states_are_rendered_but_not_bound() {
    let limits: Arc<dyn Component> = Arc::new(
        StatefulComponent::builder("limits")
            .state(State::new("quota", Permission::ReadOnly, Schema::Integer, json!(10)).unwrap())
            .build()
            .unwrap(),
    );
    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("limits", limits))
        .unwrap();

    assert!(ws.render().contains("READ_ONLY"));
    assert!(!ws.render_with_script_section().contains("quota = 10"));

    let result = ws.execute_script("return quota.value").await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("ReferenceError: quota is not defined"));
}

#[tokio::test]
async fn duplicate_state_names_later_registration_wins() {
    let first: Arc<dyn Component> = Arc::new(
        StatefulComponent::builder("first")
            .state(State::new("shared", Permission::ReadAndWrite, Schema::Integer, json!(1)).unwrap())
            .build()
            .unwrap(),
    );
    let second: Arc<dyn Component> = Arc::new(
        StatefulComponent::builder("second")
            .state(State::new("shared", Permission::ReadAndWrite, Schema::Integer, json!(2)).unwrap())
            .build()
            .unwrap(),
    );
    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("first", first.clone()))
        .unwrap();
    ws.register_component(ComponentRegistration::new("second", second.clone()).with_priority(-1))
        .unwrap();

    let warnings = ws.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("'second'"));

    let result = ws.execute_script("return shared.value").await;
    assert_eq!(result.output, Some(json!(2)));
}

#[tokio::test]
async fn script_writes_reach_subscribers() {
    let (count, counter) = counter_component();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = count.subscribe(move |change| {
        sink.lock()
            .unwrap()
            .push((change.previous.clone(), change.current.clone()));
    });

    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("counter", counter))
        .unwrap();
    ws.execute_script("count.value = 3").await;
    count.set(json!(4)).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(json!(0), json!(3)), (json!(3), json!(4))]
    );
}

#[tokio::test]
async fn nested_paths_write_back_through_the_state() {
    let todos = Arc::new(
        State::new(
            "todos",
            Permission::ReadAndWrite,
            todo_schema(),
            json!([{"title": "write docs", "done": false}]),
        )
        .unwrap(),
    );
    let component: Arc<dyn Component> = Arc::new(
        StatefulComponent::builder("todos")
            .shared_state(todos.clone())
            .build()
            .unwrap(),
    );
    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("todos", component))
        .unwrap();

    let result = ws
        .execute_script(
            "todos.value.push({ title: \"ship\", done: false })\n\
             todos.value[0].done = true\n\
             return todos.value.filter(t => !t.done).length",
        )
        .await;
    assert!(result.success, "{result:?}");
    assert_eq!(result.output, Some(json!(1)));
    assert_eq!(
        todos.get(),
        json!([{"title": "write docs", "done": true}, {"title": "ship", "done": false}])
    );

    let rejected = ws.execute_script("todos.value[0].done = 'yes'").await;
    assert!(!rejected.success);
    assert_eq!(todos.get()[0]["done"], json!(true));
}

#[tokio::test]
async fn denied_identifiers_fail_validation() {
    let (count, counter) = counter_component();
    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("counter", counter))
        .unwrap();

    let result = ws.execute_script("count.value = 1\nprocess.exit()").await;
    assert!(!result.success);
    assert_eq!(result.message, "Script validation failed");
    assert_eq!(count.get(), json!(0));
}

/// A workspace with the `count` and `todos` states the guide examples use.
fn guide_workspace() -> (Workspace, Arc<State>, Arc<State>) {
    let (count, counter) = counter_component();
    let todos = Arc::new(
        State::new(
            "todos",
            Permission::ReadAndWrite,
            todo_schema(),
            json!([{"title": "write docs", "done": false}]),
        )
        .unwrap(),
    );
    let list: Arc<dyn Component> = Arc::new(
        StatefulComponent::builder("todos")
            .shared_state(todos.clone())
            .build()
            .unwrap(),
    );
    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("counter", counter))
        .unwrap();
    ws.register_component(ComponentRegistration::new("todos", list))
        .unwrap();
    (ws, count, todos)
}

#[tokio::test]
async fn every_guide_example_changes_state() {
    for example in SCRIPT_EXAMPLES {
        let (ws, count, todos) = guide_workspace();
        assert!(ws.render_with_script_section().contains(example));
        let before = (count.get(), todos.get());

        let result = ws.execute_script(example).await;
        assert!(result.success, "{example}: {result:?}");
        assert_ne!((count.get(), todos.get()), before, "{example} changed nothing");
    }
}

#[tokio::test]
async fn loop_example_marks_the_matching_todo_done() {
    let (ws, _, todos) = guide_workspace();
    let result = ws.execute_script(SCRIPT_EXAMPLES[2]).await;
    assert!(result.success, "{result:?}");
    assert_eq!(todos.get(), json!([{"title": "write docs", "done": true}]));
}

#[tokio::test]
async fn deeply_nested_scripts_fail_validation() {
    let (ws, count, _) = guide_workspace();
    for depth in [300, 1_000, 4_000] {
        for (open, close) in [("(", ")"), ("[", "]")] {
            let script = format!(
                "count.value = 1\nreturn {}1{}",
                open.repeat(depth),
                close.repeat(depth)
            );
            let result = ws.execute_script(&script).await;
            assert!(!result.success);
            assert_eq!(result.message, "Script validation failed");
            assert!(result.error.unwrap().contains("nested more than 64 levels"));
        }
    }
    assert_eq!(count.get(), json!(0));
}

#[test]
fn completion_callback_survives_rebuilds() {
    let ws = Workspace::new("demo", "");
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    ws.on_completion(move |result| sink.lock().unwrap().push(result.to_string()));

    let (_, counter) = counter_component();
    ws.register_component(ComponentRegistration::new("counter", counter))
        .unwrap();
    ws.attempt_completion("done").unwrap();
    ws.unregister_component("counter");
    ws.attempt_completion("again").unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["done", "again"]);
}

#[test]
fn script_section_lists_writable_bindings() {
    let (_, counter) = counter_component();
    let ws = Workspace::new("demo", "");
    ws.register_component(ComponentRegistration::new("counter", counter))
        .unwrap();
    let text = ws.render_with_script_section();
    assert!(text.contains("## Script guide"));
    assert!(text.contains("count = 0\n"));
    assert!(text.contains("Utilities: none"));
}
