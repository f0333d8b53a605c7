use std::cell::RefCell;
use std::rc::Rc;

use scopeflow::{provide, CoreError, Scope};

#[tokio::test]
async fn child_scope_sees_parent_tags() {
    use scopeflow::{any, tag};

    let parent = Scope::new();
    let name_tag = tag::<String>(any(), "name");
    name_tag.write_to_store(parent.store(), "root".to_string());

    let child = parent.child();
    assert_eq!(child.find_tag(&name_tag).unwrap(), Some("root".to_string()));
}

#[tokio::test]
async fn child_tag_shadows_parent_tag() {
    use scopeflow::{any, tag};

    let parent = Scope::new();
    let name_tag = tag::<String>(any(), "name");
    name_tag.write_to_store(parent.store(), "root".to_string());

    let child = parent.child();
    name_tag.write_to_store(child.store(), "child".to_string());
    assert_eq!(child.find_tag(&name_tag).unwrap(), Some("child".to_string()));
    assert_eq!(parent.find_tag(&name_tag).unwrap(), Some("root".to_string()));
}

#[tokio::test]
async fn dispose_runs_cleanups_and_rejects_further_resolution() {
    let scope = Scope::new();
    let cleaned_up = Rc::new(RefCell::new(false));
    let executor = {
        let cleaned_up = cleaned_up.clone();
        provide(move |controller| {
            let cleaned_up = cleaned_up.clone();
            controller.cleanup(move || *cleaned_up.borrow_mut() = true);
            Ok(1i32)
        })
    };
    let accessor = scope.resolve(&executor).unwrap();
    accessor.get().await.unwrap();

    scope.dispose().unwrap();
    assert!(*cleaned_up.borrow());

    let result = scope.resolve(&executor);
    assert!(matches!(result, Err(CoreError::ScopeDisposed)));
}

#[tokio::test]
async fn disposing_a_parent_disposes_its_children_first() {
    let parent = Scope::new();
    let child = parent.child();
    let order = Rc::new(RefCell::new(Vec::new()));

    let child_executor = {
        let order = order.clone();
        provide(move |controller| {
            let order = order.clone();
            controller.cleanup(move || order.borrow_mut().push("child"));
            Ok(())
        })
    };
    let parent_executor = {
        let order = order.clone();
        provide(move |controller| {
            let order = order.clone();
            controller.cleanup(move || order.borrow_mut().push("parent"));
            Ok(())
        })
    };

    child.resolve(&child_executor).unwrap().get().await.unwrap();
    parent.resolve(&parent_executor).unwrap().get().await.unwrap();

    parent.dispose().unwrap();
    assert_eq!(*order.borrow(), vec!["child", "parent"]);
}

#[tokio::test]
async fn release_node_invalidates_reactive_subscribers() {
    let scope = Scope::new();
    let source = provide(|_| Ok(1i32)).named("source");
    let consumer = provide(|_| Ok("derived".to_string())).named("consumer");

    let source_accessor = scope.resolve(&source).unwrap();
    let consumer_accessor = scope.resolve(&consumer).unwrap();
    source_accessor.get().await.unwrap();
    consumer_accessor.get().await.unwrap();

    scope.link_reactive(&source_accessor, &consumer_accessor);
    assert!(matches!(
        consumer_accessor.lookup(),
        scopeflow::AccessorSnapshot::Resolved(_)
    ));

    source_accessor.release().unwrap();
    assert!(matches!(consumer_accessor.lookup(), scopeflow::AccessorSnapshot::Idle));
}

#[tokio::test]
async fn update_invalidates_reactive_subscribers() {
    let scope = Scope::new();
    let source = provide(|_| Ok(1i32)).named("source");
    let consumer = provide(|_| Ok("derived".to_string())).named("consumer");

    let source_accessor = scope.resolve(&source).unwrap();
    let consumer_accessor = scope.resolve(&consumer).unwrap();
    source_accessor.get().await.unwrap();
    consumer_accessor.get().await.unwrap();

    scope.link_reactive(&source_accessor, &consumer_accessor);
    source_accessor.update(|n| n + 1).unwrap();
    assert!(matches!(consumer_accessor.lookup(), scopeflow::AccessorSnapshot::Idle));
}

#[tokio::test]
async fn context_lifecycle_fires_create_then_closing_then_closed() {
    use scopeflow::{CloseMode, ContextLifecycleOperation, ExecutionContext, Extension, LifecyclePhase};

    struct Recorder(Rc<RefCell<Vec<LifecyclePhase>>>);

    impl Extension for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn on_context_lifecycle(&self, _scope: &Scope, op: &ContextLifecycleOperation) {
            self.0.borrow_mut().push(op.phase);
        }
    }

    let events = Rc::new(RefCell::new(Vec::new()));
    let scope = Scope::new();
    scope.use_extension(Recorder(events.clone()));

    let ctx = ExecutionContext::new_root(scope, "root-flow");
    ctx.close(CloseMode::Graceful).unwrap();

    assert_eq!(
        *events.borrow(),
        vec![LifecyclePhase::Create, LifecyclePhase::Closing, LifecyclePhase::Closed]
    );
}
