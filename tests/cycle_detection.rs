use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use scopeflow::{derive, provide, CoreError, Dependencies, DependencyShapeDescriptor, Executor, Scope};

/// Resolves by re-resolving whatever executor is currently in its slot, on
/// the same scope. Lets a dependency be wired up after the executor it
/// points at already exists, which is how these tests tie self- and
/// mutual-reference cycles without an executor ever naming itself at its own
/// construction site.
struct DependsOn(Rc<RefCell<Option<Executor<i32>>>>);

impl Dependencies for DependsOn {
    type Output = Rc<i32>;

    fn shape(&self) -> DependencyShapeDescriptor {
        DependencyShapeDescriptor::None
    }

    fn resolve(&self, scope: Scope) -> Pin<Box<dyn Future<Output = Result<Self::Output, CoreError>>>> {
        let executor = self
            .0
            .borrow()
            .clone()
            .expect("dependency slot must be filled before it resolves");
        Box::pin(async move { scope.resolve(&executor)?.get().await })
    }
}

#[tokio::test]
async fn a_direct_self_dependency_is_caught_as_a_cycle() {
    let scope = Scope::new();
    let slot: Rc<RefCell<Option<Executor<i32>>>> = Rc::new(RefCell::new(None));

    let looping = derive(DependsOn(slot.clone()), |dep, _controller| Ok(*dep + 1)).named("looping");
    *slot.borrow_mut() = Some(looping.clone());

    let accessor = scope.resolve(&looping).unwrap();
    let result = accessor.get().await;
    assert!(matches!(result, Err(CoreError::DependencyResolution { .. })));
}

#[tokio::test]
async fn a_mutual_two_node_cycle_is_also_caught() {
    let scope = Scope::new();
    let x_slot: Rc<RefCell<Option<Executor<i32>>>> = Rc::new(RefCell::new(None));
    let y_slot: Rc<RefCell<Option<Executor<i32>>>> = Rc::new(RefCell::new(None));

    let x = derive(DependsOn(y_slot.clone()), |dep, _controller| Ok(*dep + 1)).named("x");
    let y = derive(DependsOn(x_slot.clone()), |dep, _controller| Ok(*dep + 1)).named("y");
    *x_slot.borrow_mut() = Some(x.clone());
    *y_slot.borrow_mut() = Some(y.clone());

    let accessor = scope.resolve(&x).unwrap();
    let result = accessor.get().await;
    assert!(matches!(result, Err(CoreError::DependencyResolution { .. })));
}

#[tokio::test]
async fn unrelated_concurrent_awaits_of_the_same_in_flight_value_are_not_a_cycle() {
    use futures::future::join;

    let scope = Scope::new();
    let shared = provide(|_controller| Ok(42i32)).named("shared");
    let accessor = scope.resolve(&shared).unwrap();

    let (first, second) = join(accessor.get(), accessor.get()).await;
    assert_eq!(*first.unwrap(), 42);
    assert_eq!(*second.unwrap(), 42);
}
