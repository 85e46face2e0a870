//! These tests ensure that dropped futures correctly update the shared state
use coalescer::{BatchLoader, BatchRules, KeySet, ValueSet, Window};
use cooked_waker::{IntoWaker, Wake, WakeRef};
use futures::executor;
use futures_timer::Delay;
use std::{
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Duration,
};

/// A Waker that does nothing. Used for when we're manually calling poll.
#[derive(Debug, Default, Copy, Clone, IntoWaker)]
struct NoOpWaker;

impl WakeRef for NoOpWaker {
    fn wake_by_ref(&self) {}
}

impl Wake for NoOpWaker {
    fn wake(self) {}
}

/// Testing async function: put a copy of each key in an Rc in the result.
/// This lets us count how many copies of a value are still alive.
async fn put_keys_in_rc<T: Copy>(keys: KeySet<T>) -> Result<ValueSet<Rc<T>>, ()> {
    Ok(keys.into_values(|key| Rc::new(*key)))
}

/// This test establishes a baseline behavior for our clone counters
#[test]
fn test_simple_drop_after_resolution() {
    let loader = BatchLoader::new(BatchRules::new(put_keys_in_rc::<i32>));

    let fut1 = loader.load(1);
    let fut2 = loader.load(1);
    let fut3 = loader.load(1);
    let fut4 = loader.load(1);
    loader.flush();

    let res1 = executor::block_on(fut1).unwrap();

    // At this point, the shared result and our local fut1 result should both
    // have an Rc
    assert_eq!(Rc::strong_count(&res1), 2);

    // Resolving fut2 simply clones the underlying Rc
    let res2 = executor::block_on(fut2).unwrap();
    assert_eq!(Rc::strong_count(&res2), 3);

    // Dropping this future shouldn't change anything
    drop(fut3);
    assert_eq!(Rc::strong_count(&res1), 3);

    // However, dropping our last remaining handle to the state should cause
    // the shared value to be dropped
    drop(fut4);
    assert_eq!(Rc::strong_count(&res1), 2);
}

#[test]
fn test_drop_during_delay() {
    // This loader asserts that precisely the keys 1 and 2 are present in
    // the key set
    let loader = BatchLoader::new(BatchRules {
        window: Window::Delay { millis: 10 },
        ..BatchRules::new(|keys: KeySet<i32>| async {
            assert_eq!(keys.len(), 2);

            let keys_vec: Vec<&i32> = keys.keys().collect();
            assert!(keys_vec.contains(&&1));
            assert!(keys_vec.contains(&&2));

            Ok::<_, ()>(keys.into_values(|key| *key))
        })
    });

    let waker = NoOpWaker;
    let waker = waker.into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = loader.load(1);
    let fut11 = loader.load(1);
    let fut2 = loader.load(2);
    let fut3 = loader.load(3);

    // This poll initiates the delay. We'll drop futures in this phase, then
    // confirm that the dropped keys weren't in the batched set.
    let poll = Pin::new(&mut fut1).poll(&mut ctx);
    assert_eq!(poll, Poll::Pending);

    drop(fut11);
    drop(fut3);

    let result: i32 = executor::block_on(fut1).unwrap();
    assert_eq!(result, 1);

    let result: i32 = executor::block_on(fut2).unwrap();
    assert_eq!(result, 2);
}

#[test]
fn test_drop_while_running() {
    let loader = BatchLoader::new(BatchRules::new(|keys: KeySet<i32>| async {
        Delay::new(Duration::from_millis(10)).await;
        Ok::<_, ()>(keys.into_values(|key| Rc::new(*key)))
    }));

    let waker = NoOpWaker;
    let waker = waker.into_waker();
    let mut ctx = Context::from_waker(&waker);

    let mut fut1 = loader.load(1);
    let fut11 = loader.load(1);
    loader.flush();

    // The batch function is now running, and waiting on its delay
    let poll = Pin::new(&mut fut1).poll(&mut ctx);
    assert!(poll.is_pending());

    // The value for fut11 is already promised, so it's discarded once the
    // batch completes
    drop(fut11);

    let res1 = executor::block_on(fut1).unwrap();
    assert_eq!(*res1, 1);
    assert_eq!(Rc::strong_count(&res1), 1);
}
