use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use scopeflow::{any, flow, CloseMode, CoreError, ExecutionContext, Scope};

#[tokio::test]
async fn flow_executes_and_validates_io() {
    let greet = flow("greet", any::<String>(), any::<String>(), |name, _ctx| async move {
        Ok(format!("hello, {name}"))
    });
    let scope = Scope::new();
    let result = greet.execute(&scope, "ada".to_string()).await.unwrap();
    assert_eq!(result, "hello, ada");
}

#[tokio::test]
async fn flow_rejects_input_failing_its_schema() {
    use scopeflow::custom;

    let only_nonempty = custom(|s: &String| {
        if s.is_empty() {
            vec![scopeflow::ValidationIssue {
                message: "must not be empty".to_string(),
                path: Vec::new(),
            }]
        } else {
            Vec::new()
        }
    });
    let echo = flow("echo", only_nonempty, any::<String>(), |s, _ctx| async move { Ok(s) });
    let scope = Scope::new();
    let result = echo.execute(&scope, String::new()).await;
    assert!(matches!(result, Err(CoreError::SchemaInvalid { .. })));
}

#[tokio::test]
async fn nested_flow_call_gets_a_child_context_at_deeper_depth() {
    let inner = flow("inner", any::<()>(), any::<u32>(), |_, ctx| async move { Ok(ctx.depth()) });
    let inner_for_outer = inner.clone();
    let outer = flow("outer", any::<()>(), any::<u32>(), move |_, ctx| {
        let inner = inner_for_outer.clone();
        async move { inner.call_nested(&ctx, ()).await }
    });

    let scope = Scope::new();
    let depth = outer.execute(&scope, ()).await.unwrap();
    assert_eq!(depth, 1);
}

#[tokio::test]
async fn context_exec_replays_a_cached_result_for_a_repeated_key() {
    let scope = Scope::new();
    let ctx = ExecutionContext::new_root(scope, "replay");
    let calls = Rc::new(RefCell::new(0));

    let run_once = || {
        let calls = calls.clone();
        ctx.exec("step", move || {
            let calls = calls.clone();
            async move {
                *calls.borrow_mut() += 1;
                Ok::<_, CoreError>(*calls.borrow())
            }
        })
    };

    assert_eq!(run_once().await.unwrap(), 1);
    assert_eq!(run_once().await.unwrap(), 1);
    assert_eq!(*calls.borrow(), 1);
}

#[tokio::test]
async fn context_parallel_runs_futures_and_preserves_order() {
    let scope = Scope::new();
    let ctx = ExecutionContext::new_root(scope, "fanout");
    let futures: Vec<_> = vec![3, 1, 2]
        .into_iter()
        .map(|n| {
            let fut: std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, CoreError>>>> =
                Box::pin(async move { Ok(n) });
            fut
        })
        .collect();
    let results = ctx.parallel(futures).await.unwrap();
    assert_eq!(results, vec![3, 1, 2]);
}

#[tokio::test]
async fn context_parallel_fails_fast_on_first_error() {
    let scope = Scope::new();
    let ctx = ExecutionContext::new_root(scope, "fanout");
    let ok: std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, CoreError>>>> =
        Box::pin(async { Ok(1) });
    let err: std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, CoreError>>>> =
        Box::pin(async { Err(CoreError::aborted("boom")) });
    let result = ctx.parallel(vec![ok, err]).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn context_parallel_settled_never_short_circuits() {
    let scope = Scope::new();
    let ctx = ExecutionContext::new_root(scope, "fanout");
    let ok: std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, CoreError>>>> =
        Box::pin(async { Ok(1) });
    let err: std::pin::Pin<Box<dyn std::future::Future<Output = Result<i32, CoreError>>>> =
        Box::pin(async { Err(CoreError::aborted("boom")) });
    let (results, stats) = ctx.parallel_settled(vec![ok, err]).await;
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert_eq!(stats.total, 2);
    assert_eq!(stats.fulfilled, 1);
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn cancelling_a_context_cascades_to_its_children() {
    let scope = Scope::new();
    let parent = ExecutionContext::new_root(scope, "parent");
    let child = parent.child("child", false).unwrap();

    parent.cancel("shutting down");
    assert!(parent.is_cancelled());
    assert!(child.is_cancelled());
}

#[tokio::test]
async fn exec_fails_once_its_context_is_cancelled() {
    let scope = Scope::new();
    let ctx = ExecutionContext::new_root(scope, "cancel-me");
    ctx.cancel("stop");

    let result = ctx
        .exec("step", || async { Ok::<_, CoreError>(1) })
        .await;
    assert!(matches!(result, Err(CoreError::Aborted { .. })));
}

#[tokio::test]
async fn closing_a_context_closes_its_children_and_rejects_further_exec() {
    let scope = Scope::new();
    let parent = ExecutionContext::new_root(scope, "parent");
    let child = parent.child("child", false).unwrap();

    parent.close(CloseMode::Graceful).unwrap();
    assert!(!parent.is_active());
    assert!(!child.is_active());

    let result = parent.exec("step", || async { Ok::<_, CoreError>(1) }).await;
    assert!(matches!(result, Err(CoreError::ContextClosed { .. })));
}

#[tokio::test]
async fn closing_with_abort_cancels_the_whole_subtree() {
    let scope = Scope::new();
    let parent = ExecutionContext::new_root(scope, "parent");
    let child = parent.child("child", false).unwrap();
    let grandchild = child.child("grandchild", false).unwrap();

    parent.close(CloseMode::Abort).unwrap();

    assert!(!parent.is_active());
    assert!(!child.is_active());
    assert!(!grandchild.is_active());
    assert!(parent.is_cancelled());
    assert!(child.is_cancelled());
    assert!(grandchild.is_cancelled());
}

#[tokio::test]
async fn closing_a_context_attempting_a_new_child_fails_context_closed() {
    let scope = Scope::new();
    let parent = ExecutionContext::new_root(scope, "parent");
    parent.close(CloseMode::Graceful).unwrap();

    let result = parent.child("too-late", false);
    assert!(matches!(result, Err(CoreError::ContextClosed { .. })));
}

#[tokio::test]
async fn flow_times_out_and_cancels_its_context() {
    let slow = flow("slow", any::<()>(), any::<()>(), |_, _ctx| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    });
    let scope = Scope::new();
    let result = slow
        .execute_with(&scope, (), Some(Duration::from_millis(10)))
        .await;
    assert!(matches!(result, Err(CoreError::Aborted { .. })));
}

#[tokio::test]
async fn call_nested_with_key_replays_result_for_a_repeated_key() {
    let calls = Rc::new(RefCell::new(0));
    let step = {
        let calls = calls.clone();
        flow("step", any::<()>(), any::<i32>(), move |_, _ctx| {
            let calls = calls.clone();
            async move {
                *calls.borrow_mut() += 1;
                Ok(*calls.borrow())
            }
        })
    };
    let scope = Scope::new();
    let parent = ExecutionContext::new_root(scope, "parent");

    let first = step
        .call_nested_with(&parent, (), Some("step-key"), None)
        .await
        .unwrap();
    let second = step
        .call_nested_with(&parent, (), Some("step-key"), None)
        .await
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 1);
    assert_eq!(*calls.borrow(), 1);
}
