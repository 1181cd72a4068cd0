//! This module binds a correlation (trace) id to the dynamic extent of one unit
//! of work.
//!
//! Two bindings are supported:
//!
//! * `scope` / `scope_with` bind an id to an async future through tokio
//!   task-local storage. This is what the HTTP middleware uses for every
//!   request.
//! * `open` binds an id to the calling OS thread and returns a `ScopeGuard`;
//!   dropping the guard restores whatever id was bound before. When opened
//!   inside a tokio task the binding belongs to that task only, so a guard
//!   held across an `.await` is not seen by other tasks polled on the same
//!   thread in the meantime.
//!
//! Both forms nest. Neither is ever visible to a different task or thread.
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use tokio::task;
use uuid::Uuid;

tokio::task_local! {
    static TASK_TRACE_ID: Uuid;
}

/// One thread-bound binding, tagged with the task that opened it (`None`
/// outside any task).
#[derive(Clone, Copy)]
struct ThreadBinding {
    task: Option<task::Id>,
    trace_id: Uuid,
}

thread_local! {
    static THREAD_TRACE_IDS: RefCell<Vec<ThreadBinding>> = const { RefCell::new(Vec::new()) };
}

/// Runs `future` inside a fresh correlation scope.
pub async fn scope<F: Future>(future: F) -> F::Output {
    scope_with(Uuid::new_v4(), future).await
}

/// Runs `future` with `trace_id` bound as the current correlation id.
///
/// The binding ends when the future completes, is dropped, or panics, and the
/// enclosing id (if any) becomes current again.
pub async fn scope_with<F: Future>(trace_id: Uuid, future: F) -> F::Output {
    TASK_TRACE_ID.scope(trace_id, future).await
}

/// Opens a thread-bound correlation scope with a fresh id.
pub fn open() -> ScopeGuard {
    let binding = ThreadBinding {
        task: task::try_id(),
        trace_id: Uuid::new_v4(),
    };
    THREAD_TRACE_IDS.with(|stack| stack.borrow_mut().push(binding));

    ScopeGuard {
        binding,
        _not_send: PhantomData,
    }
}

/// Returns the innermost bound correlation id, if any.
///
/// A thread-bound scope opened inside a task scope is the innermost one, so the
/// thread stack is consulted first. Only bindings opened by the calling task
/// (or, outside any task, by plain thread code) are considered.
pub fn current() -> Option<Uuid> {
    let caller = task::try_id();
    let from_thread = THREAD_TRACE_IDS
        .try_with(|stack| {
            stack.try_borrow().ok().and_then(|s| {
                s.iter()
                    .rev()
                    .find(|b| b.task == caller)
                    .map(|b| b.trace_id)
            })
        })
        .ok()
        .flatten();

    from_thread.or_else(|| TASK_TRACE_ID.try_with(|id| *id).ok())
}

/// Returns the current correlation id, or the nil UUID outside any scope.
pub fn current_or_nil() -> Uuid {
    current().unwrap_or_else(Uuid::nil)
}

/// Handle for a thread-bound scope. Dropping it closes the scope.
///
/// The guard is `!Send`: a scope must be closed on the thread that
/// opened it.
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard {
    binding: ThreadBinding,
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    pub fn trace_id(&self) -> Uuid {
        self.binding.trace_id
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        // Removes our binding and any inner bindings of the same task whose
        // guards were leaked. Bindings of other tasks interleaved above ours
        // stay in place.
        let _ = THREAD_TRACE_IDS.try_with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                let own = self.binding;
                if let Some(pos) = stack
                    .iter()
                    .rposition(|b| b.task == own.task && b.trace_id == own.trace_id)
                {
                    let above = stack.split_off(pos);
                    stack.extend(above.into_iter().skip(1).filter(|b| b.task != own.task));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;
    use tokio::sync::Barrier as AsyncBarrier;
    use tokio::task::LocalSet;

    #[test]
    fn no_scope_yields_nil() {
        assert_eq!(current(), None);
        assert_eq!(current_or_nil(), Uuid::nil());
    }

    #[test]
    fn guard_binds_and_restores() {
        let guard = open();
        assert_eq!(current(), Some(guard.trace_id()));
        drop(guard);
        assert_eq!(current(), None);
    }

    #[test]
    fn nested_guards_restore_enclosing_id() {
        let outer = open();
        {
            let inner = open();
            assert_ne!(outer.trace_id(), inner.trace_id());
            assert_eq!(current(), Some(inner.trace_id()));
        }
        assert_eq!(current(), Some(outer.trace_id()));
        drop(outer);
        assert_eq!(current(), None);
    }

    #[test]
    fn leaked_inner_guard_does_not_survive_outer_close() {
        let outer = open();
        std::mem::forget(open());
        drop(outer);
        assert_eq!(current(), None);
    }

    #[test]
    fn guard_is_released_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = open();
            panic!("request failed");
        });
        assert!(result.is_err());
        assert_eq!(current(), None);
    }

    #[test]
    fn threads_never_see_each_others_ids() {
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let guard = open();
                    barrier.wait();
                    let seen = current();
                    barrier.wait();
                    (guard.trace_id(), seen)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (own, seen) in &results {
            assert_eq!(Some(*own), *seen);
        }
        assert_ne!(results[0].0, results[1].0);
    }

    #[tokio::test]
    async fn task_scope_binds_for_the_future_only() {
        let trace_id = Uuid::new_v4();
        let seen = scope_with(trace_id, async { current() }).await;
        assert_eq!(seen, Some(trace_id));
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn nested_task_scopes_restore_enclosing_id() {
        let outer = Uuid::new_v4();
        scope_with(outer, async move {
            let inner = scope(async { current_or_nil() }).await;
            assert_ne!(inner, outer);
            assert_eq!(current(), Some(outer));
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_tasks_see_only_their_own_id() {
        let barrier = Arc::new(AsyncBarrier::new(2));
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    let trace_id = Uuid::new_v4();
                    scope_with(trace_id, async move {
                        barrier.wait().await;
                        let seen = current();
                        tokio::task::yield_now().await;
                        barrier.wait().await;
                        (trace_id, seen, current())
                    })
                    .await
                })
            })
            .collect();

        for task in tasks {
            let (own, first, second) = task.await.unwrap();
            assert_eq!(first, Some(own));
            assert_eq!(second, Some(own));
        }
    }

    #[tokio::test]
    async fn guard_held_across_await_stays_with_its_task() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let holder = task::spawn_local(async {
                    let guard = open();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    (guard.trace_id(), current())
                });

                let scoped_id = Uuid::new_v4();
                let scoped = task::spawn_local(scope_with(scoped_id, async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current()
                }));
                let unscoped = task::spawn_local(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current()
                });

                assert_eq!(scoped.await.unwrap(), Some(scoped_id));
                assert_eq!(unscoped.await.unwrap(), None);
                let (own, seen) = holder.await.unwrap();
                assert_eq!(seen, Some(own));
            })
            .await;
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn interleaved_guards_of_two_tasks_close_independently() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let first = task::spawn_local(async {
                    let guard = open();
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    drop(guard);
                    current()
                });
                let second = task::spawn_local(async {
                    let guard = open();
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    (guard.trace_id(), current())
                });

                assert_eq!(first.await.unwrap(), None);
                let (own, seen) = second.await.unwrap();
                assert_eq!(seen, Some(own));
            })
            .await;
    }
}
