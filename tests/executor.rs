use std::cell::RefCell;
use std::rc::Rc;

use scopeflow::{derive, derive_async, preset, preset_with, provide, provide_async, AccessorSnapshot, Scope};

#[tokio::test]
async fn provide_resolves_to_its_value() {
    let scope = Scope::new();
    let greeting = provide(|_| Ok("hello".to_string()));
    let accessor = scope.resolve(&greeting).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), "hello");
}

#[tokio::test]
async fn derive_sees_its_dependency_value() {
    let scope = Scope::new();
    let base = provide(|_| Ok(2i32)).named("base");
    let doubled = derive(base.clone(), |base, _| Ok(*base * 2)).named("doubled");
    let accessor = scope.resolve(&doubled).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), 4);
}

#[tokio::test]
async fn derive_tuple_sees_all_dependency_values() {
    let scope = Scope::new();
    let a = provide(|_| Ok(1i32)).named("a");
    let b = provide(|_| Ok("b".to_string())).named("b");
    let combined = derive((a.clone(), b.clone()), |(a, b), _| Ok(format!("{a}-{b}"))).named("combined");
    let accessor = scope.resolve(&combined).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), "1-b");
}

#[tokio::test]
async fn provide_async_runs_to_completion() {
    let scope = Scope::new();
    let delayed = provide_async(|_| async { Ok::<_, scopeflow::CoreError>(7i32) });
    let accessor = scope.resolve(&delayed).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), 7);
}

#[tokio::test]
async fn derive_async_awaits_its_dependency_before_running() {
    let scope = Scope::new();
    let base = provide(|_| Ok(3i32)).named("base");
    let squared = derive_async(base.clone(), |base, _| async move { Ok::<_, scopeflow::CoreError>(*base * *base) });
    let accessor = scope.resolve(&squared).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), 9);
}

#[tokio::test]
async fn resolution_is_memoized_across_repeated_calls() {
    let scope = Scope::new();
    let calls = Rc::new(RefCell::new(0));
    let counter = {
        let calls = calls.clone();
        provide(move |_| {
            *calls.borrow_mut() += 1;
            Ok(*calls.borrow())
        })
    };
    let accessor = scope.resolve(&counter).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), 1);
    assert_eq!(*accessor.get().await.unwrap(), 1);
    assert_eq!(*calls.borrow(), 1);
}

#[tokio::test]
async fn force_resolve_reruns_the_factory() {
    let scope = Scope::new();
    let calls = Rc::new(RefCell::new(0));
    let counter = {
        let calls = calls.clone();
        provide(move |_| {
            *calls.borrow_mut() += 1;
            Ok(*calls.borrow())
        })
    };
    let accessor = scope.resolve(&counter).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), 1);
    assert_eq!(*accessor.resolve(true).await.unwrap(), 2);
}

#[tokio::test]
async fn preset_value_overrides_resolution() {
    let scope = Scope::new();
    let base = provide(|_| Ok(1i32)).named("base");
    scope.apply_preset(preset(&base, 99));
    let accessor = scope.resolve(&base).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), 99);
}

#[tokio::test]
async fn preset_with_executor_overrides_resolution() {
    let scope = Scope::new();
    let base = provide(|_| Ok(1i32)).named("base");
    let replacement = provide(|_| Ok(42i32)).named("replacement");
    scope.apply_preset(preset_with(&base, replacement));
    let accessor = scope.resolve(&base).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), 42);
}

#[tokio::test]
async fn controller_cleanup_runs_on_release() {
    let scope = Scope::new();
    let cleaned_up = Rc::new(RefCell::new(false));
    let executor = {
        let cleaned_up = cleaned_up.clone();
        provide(move |controller| {
            let cleaned_up = cleaned_up.clone();
            controller.cleanup(move || {
                *cleaned_up.borrow_mut() = true;
            });
            Ok(1i32)
        })
    };
    let accessor = scope.resolve(&executor).unwrap();
    accessor.get().await.unwrap();
    assert!(!*cleaned_up.borrow());
    accessor.release().unwrap();
    assert!(*cleaned_up.borrow());
}

#[tokio::test]
async fn labeled_dependencies_are_retrievable_by_label() {
    use scopeflow::Labeled;

    let scope = Scope::new();
    let name = provide(|_| Ok("ada".to_string())).named("name");
    let age = provide(|_| Ok(30i32)).named("age");
    let deps = Labeled::new().with("name", name).with("age", age);
    let bio = derive(deps, |values, _| {
        let name = values.get::<String>("name");
        let age = values.get::<i32>("age");
        Ok(format!("{name} is {age}"))
    });
    let accessor = scope.resolve(&bio).unwrap();
    assert_eq!(*accessor.get().await.unwrap(), "ada is 30");
}

#[tokio::test]
async fn lazy_modifier_view_does_not_force_resolution() {
    let scope = Scope::new();
    let calls = Rc::new(RefCell::new(0));
    let executor = {
        let calls = calls.clone();
        provide(move |_| {
            *calls.borrow_mut() += 1;
            Ok(1i32)
        })
    };
    let accessor = scope.resolve_lazy(&executor).unwrap();
    assert!(matches!(accessor.lookup(), AccessorSnapshot::Idle));
    assert_eq!(*calls.borrow(), 0);
}

#[tokio::test]
async fn static_modifier_view_forces_resolution() {
    let scope = Scope::new();
    let executor = provide(|_| Ok(9i32));
    let accessor = scope.resolve_static(&executor).await.unwrap();
    assert!(matches!(accessor.lookup(), AccessorSnapshot::Resolved(_)));
    assert_eq!(*accessor.get().await.unwrap(), 9);
}

#[tokio::test]
async fn reactive_modifier_view_links_consumer_to_source_invalidation() {
    let scope = Scope::new();
    let source = provide(|_| Ok(1i32)).named("source");
    let consumer = provide(|_| Ok("consumer".to_string())).named("consumer");
    let consumer_accessor = scope.resolve(&consumer).unwrap();
    consumer_accessor.get().await.unwrap();

    let value = scope.resolve_reactive(&source, &consumer_accessor).await.unwrap();
    assert_eq!(*value, 1);

    let source_accessor = scope.resolve(&source).unwrap();
    source_accessor.release().unwrap();

    assert!(matches!(consumer_accessor.lookup(), AccessorSnapshot::Idle));
}

#[tokio::test]
async fn run_resolves_an_ad_hoc_dependency_without_caching_an_executor() {
    let scope = Scope::new();
    let base = provide(|_| Ok(5i32)).named("base");
    let doubled = scope
        .run(base.clone(), |value| async move { Ok(*value * 2) })
        .await
        .unwrap();
    assert_eq!(doubled, 10);
}
