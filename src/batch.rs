use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use arc_swap::ArcSwapOption;
use futures::{ready, FutureExt};
use futures_timer::Delay;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    data::{KeySet, Token as KeyToken, ValueSet},
    error::LoadError,
    key,
    wakerset::{Token as WakerToken, WakerSet},
};

/// How the unique keys of a batch are divided into calls to the batch
/// function. Every call of a batch runs concurrently, and each one succeeds
/// or fails on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One call per unique key.
    #[default]
    PerKey,

    /// Calls of at most `max_keys` unique keys each.
    Chunked { max_keys: NonZeroUsize },

    /// A single call with every unique key.
    Whole,
}

impl Grouping {
    fn max_keys(self) -> Option<NonZeroUsize> {
        match self {
            Grouping::PerKey => Some(NonZeroUsize::MIN),
            Grouping::Chunked { max_keys } => Some(max_keys),
            Grouping::Whole => None,
        }
    }
}

/// When a batch stops accepting keys, other than by an explicit
/// [`flush`][BatchLoader::flush].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Only [`flush`][BatchLoader::flush] closes the batch. Futures polled
    /// before the flush simply wait.
    #[default]
    Manual,

    /// The batch closes after the driving future has yielded once. Loads
    /// issued by other futures polled in the same pass of the executor join
    /// the batch.
    Yield,

    /// The batch closes once this many milliseconds have passed since it was
    /// opened.
    Delay { millis: u64 },
}

/// A set of configuration rules for a loader. This defines the batch loading
/// function, as well as how keys are grouped and how long to wait for them.
#[derive(Debug, Clone, Default)]
pub struct BatchRules<Batcher> {
    pub batcher: Batcher,
    pub grouping: Grouping,
    pub window: Window,

    /// If set, a call to the batch function that takes longer than this fails
    /// with [`LoadError::DeadlineExceeded`].
    pub deadline: Option<Duration>,
}

impl<Batcher> BatchRules<Batcher> {
    /// Rules with a manual window, one call per unique key, and no deadline.
    pub fn new(batcher: Batcher) -> Self {
        Self {
            batcher,
            grouping: Grouping::default(),
            window: Window::default(),
            deadline: None,
        }
    }
}

#[derive(Debug)]
enum WindowTimer {
    Manual,
    Yield { yielded: bool },
    Delay(Delay),
}

impl WindowTimer {
    fn start(window: Window) -> Self {
        match window {
            Window::Manual => WindowTimer::Manual,
            Window::Yield => WindowTimer::Yield { yielded: false },
            Window::Delay { millis } => WindowTimer::Delay(Delay::new(Duration::from_millis(millis))),
        }
    }

    fn poll_elapsed(&mut self, ctx: &mut Context<'_>) -> Poll<()> {
        match self {
            WindowTimer::Manual => Poll::Pending,
            WindowTimer::Yield { yielded: true } => Poll::Ready(()),
            WindowTimer::Yield { yielded } => {
                *yielded = true;
                ctx.waker().wake_by_ref();
                Poll::Pending
            }
            WindowTimer::Delay(delay) => delay.poll_unpin(ctx),
        }
    }
}

struct AccumulatingState<Arg, Batcher> {
    keys: KeySet<Arg>,
    rules: Arc<BatchRules<Batcher>>,
    window: WindowTimer,
    wakers: WakerSet,
}

impl<Arg, Batcher> AccumulatingState<Arg, Batcher> {
    fn new(rules: Arc<BatchRules<Batcher>>) -> Self {
        Self {
            keys: KeySet::new(),
            window: WindowTimer::start(rules.window),
            rules,
            wakers: WakerSet::default(),
        }
    }
}

impl<Arg: Debug, Batcher> Debug for AccumulatingState<Arg, Batcher> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatingState")
            .field("keys", &self.keys)
            .field("batcher", &"<closure>")
            .field("window", &self.window)
            .field("wakers", &self.wakers)
            .finish()
    }
}

#[derive(Debug)]
enum GroupProgress<Value, Error, Fut> {
    Fetching {
        fut: Pin<Box<Fut>>,
        deadline: Option<Duration>,

        // Armed when the call is first polled, so time spent waiting for
        // someone to drive the batch isn't counted against it.
        timer: Option<Delay>,
    },
    Settled(Result<ValueSet<Value>, LoadError<Error>>),
}

/// One call to the batch function, covering some of the keys of a batch.
#[derive(Debug)]
struct GroupFetch<Value, Error, Fut> {
    // Kept so that a failure can be handed to every waiter of the group.
    tokens: Vec<(KeyToken, usize)>,
    progress: GroupProgress<Value, Error, Fut>,
}

impl<Value, Error, Fut> GroupFetch<Value, Error, Fut>
where
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
{
    fn start<Arg, Batcher>(rules: &BatchRules<Batcher>, keys: KeySet<Arg>) -> Self
    where
        Batcher: Fn(KeySet<Arg>) -> Fut,
    {
        let tokens = keys.tokens();
        let fut = Box::pin((rules.batcher)(keys));

        Self {
            tokens,
            progress: GroupProgress::Fetching {
                fut,
                deadline: rules.deadline,
                timer: None,
            },
        }
    }

    fn poll(&mut self, ctx: &mut Context<'_>) -> Poll<()> {
        let result = match &mut self.progress {
            GroupProgress::Settled(..) => return Poll::Ready(()),
            GroupProgress::Fetching { fut, deadline, timer } => {
                if let Some(limit) = *deadline {
                    timer.get_or_insert_with(|| Delay::new(limit));
                }

                match fut.as_mut().poll(ctx) {
                    Poll::Ready(result) => result.map_err(LoadError::Fetch),
                    Poll::Pending => {
                        let expired = match timer.as_mut() {
                            Some(delay) => delay.poll_unpin(ctx).is_ready(),
                            None => false,
                        };

                        match *deadline {
                            Some(limit) if expired => Err(LoadError::DeadlineExceeded(limit)),
                            _ => return Poll::Pending,
                        }
                    }
                }
            }
        };

        if result.is_err() {
            debug!(keys = self.tokens.len(), "batch call rejected");
        }

        self.progress = GroupProgress::Settled(result);
        Poll::Ready(())
    }
}

impl<Value, Error: Clone, Fut> GroupFetch<Value, Error, Fut> {
    fn settle_into(self, outcomes: &mut ValueSet<Result<Value, LoadError<Error>>>) {
        match self.progress {
            GroupProgress::Settled(Ok(values)) => values.drain_into(outcomes, Ok),
            GroupProgress::Settled(Err(err)) => {
                for (token, clones) in self.tokens {
                    outcomes.insert(token, clones, Err(err.clone()));
                }
            }
            // Only called once every group has settled
            GroupProgress::Fetching { .. } => {}
        }
    }
}

// Design notes:
//
// We only need one task to "drive" the batch's calls. However, there are two
// cases we need to handle:
// - If a future is dropped, we need to arrange for a different task to
//   continue driving this batch
// - When the batch completes, we need to wake ALL the tasks
#[derive(Debug)]
struct RunningState<Value, Error, Fut> {
    groups: Vec<GroupFetch<Value, Error, Fut>>,
    wakers: WakerSet,
    dropped_tokens: Vec<KeyToken>,
}

enum State<Arg, Value, Error, Fut, Batcher> {
    Accum(AccumulatingState<Arg, Batcher>),
    Running(RunningState<Value, Error, Fut>),
    Done(ValueSet<Result<Value, LoadError<Error>>>),
}

impl<Arg, Value, Error, Fut, Batcher> Debug for State<Arg, Value, Error, Fut, Batcher>
where
    Arg: Debug,
    Value: Debug,
    Error: Debug,
    Fut: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            State::Accum(state) => f.debug_tuple("Accum").field(state).finish(),
            State::Running(state) => f.debug_tuple("Running").field(state).finish(),
            State::Done(outcomes) => f.debug_tuple("Done").field(outcomes).finish(),
        }
    }
}

impl<Arg, Value, Error, Fut, Batcher> State<Arg, Value, Error, Fut, Batcher>
where
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
    Batcher: Fn(KeySet<Arg>) -> Fut,
{
    /// Close an accumulating batch and hand its keys to the batch function.
    /// Does nothing if the batch was already dispatched.
    fn dispatch(&mut self) {
        let (keys, wakers, rules) = match self {
            State::Accum(state) => (
                state.keys.take(),
                mem::take(&mut state.wakers),
                Arc::clone(&state.rules),
            ),
            _ => return,
        };

        let unique_keys = keys.len();
        let groups: Vec<_> = keys
            .split(rules.grouping.max_keys())
            .into_iter()
            .map(|group| GroupFetch::start(&rules, group))
            .collect();

        debug!(unique_keys, calls = groups.len(), "dispatching batch");

        *self = State::Running(RunningState {
            groups,
            wakers,
            dropped_tokens: Vec::new(),
        });
    }
}

// A panic inside the batch function poisons the mutex. The state itself is
// still coherent, and re-polling the panicked future panics again, so every
// waiter sees the failure.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A loader collects the keys requested by [`load`][BatchLoader::load] into a
/// batch, until the batch is closed by [`flush`][BatchLoader::flush] (or by
/// its [`Window`]). At that point the batch is detached from this loader and
/// handed to the batch function; the futures associated with the old batch
/// share ownership of it and drive it to completion, independent of the
/// loader. The next `load` starts a fresh batch.
///
/// Nothing is cached between batches: a key requested again after a flush
/// is fetched again. Create a new loader for each top-level operation, so
/// that unrelated operations never share a batch.
///
/// Dropping a loader flushes it.
pub struct BatchLoader<Arg, Value, Error, Fut, Batcher>
where
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
    Batcher: Fn(KeySet<Arg>) -> Fut,
{
    rules: Arc<BatchRules<Batcher>>,

    // The batch currently accepting keys. Loads swap in a new batch when
    // this one is gone or has been dispatched; flush swaps it out.
    #[allow(clippy::type_complexity)]
    current: ArcSwapOption<Mutex<State<Arg, Value, Error, Fut, Batcher>>>,
}

impl<Arg, Value, Error, Fut, Batcher> BatchLoader<Arg, Value, Error, Fut, Batcher>
where
    Arg: Serialize,
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
    Batcher: Fn(KeySet<Arg>) -> Fut,
{
    pub fn new(rules: BatchRules<Batcher>) -> Self {
        Self {
            rules: Arc::new(rules),
            current: ArcSwapOption::empty(),
        }
    }

    pub fn rules(&self) -> &BatchRules<Batcher> {
        &self.rules
    }

    /// Request the value for a single argument. The argument joins the batch
    /// that is currently accumulating, or opens a new one. Arguments that
    /// encode to the same [`LookupKey`][crate::LookupKey] as one already in
    /// the batch share its value.
    ///
    /// If the argument can't be encoded, the returned future fails
    /// immediately with [`LoadError::Encoding`], and the batch is untouched.
    pub fn load(&self, arg: Arg) -> LoadFuture<Arg, Value, Error, Fut, Batcher> {
        let key = match key::encode(&arg) {
            Ok(key) => key,
            Err(err) => {
                debug!(error = %err, "rejected lookup argument");
                return LoadFuture {
                    inner: LoadState::Failed(Some(err.into())),
                };
            }
        };

        loop {
            let current = self.current.load_full();

            // If there is an existing batch, and it's still accumulating, add
            // the key to it.
            if let Some(state_handle) = current.as_ref() {
                let mut guard = lock(state_handle);
                if let State::Accum(ref mut state) = *guard {
                    trace!(key = %key, "key joined batch");
                    let key_token = state.keys.add_key(key, arg);
                    drop(guard);

                    return LoadFuture {
                        inner: LoadState::Batched {
                            key_token: Some(key_token),
                            waker_token: None,
                            state: Arc::clone(state_handle),
                        },
                    };
                }
            }

            // Otherwise open a new batch. If another thread swapped in a
            // batch of its own in the meantime, the next pass joins that one.
            let state = Arc::new(Mutex::new(State::Accum(AccumulatingState::new(
                Arc::clone(&self.rules),
            ))));
            let _ = self.current.compare_and_swap(&current, Some(state));
        }
    }

    /// [`load`][BatchLoader::load] every argument of `args` into the same
    /// batch.
    pub fn load_many(
        &self,
        args: impl IntoIterator<Item = Arg>,
    ) -> Vec<LoadFuture<Arg, Value, Error, Fut, Batcher>> {
        args.into_iter().map(|arg| self.load(arg)).collect()
    }
}

impl<Arg, Value, Error, Fut, Batcher> BatchLoader<Arg, Value, Error, Fut, Batcher>
where
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
    Batcher: Fn(KeySet<Arg>) -> Fut,
{
    /// Close the current batch: no more keys will join it, and its calls
    /// to the batch function are created immediately. They are driven by
    /// polling any of the batch's futures. Does nothing if no batch is
    /// accumulating.
    pub fn flush(&self) {
        if let Some(state_handle) = self.current.swap(None) {
            let mut guard = lock(&state_handle);
            guard.dispatch();

            // A future may already be waiting on this batch; make sure
            // something polls it.
            if let State::Running(ref mut state) = *guard {
                state.wakers.wake_driver();
            }
        }
    }
}

impl<Arg, Value, Error, Fut, Batcher> Drop for BatchLoader<Arg, Value, Error, Fut, Batcher>
where
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
    Batcher: Fn(KeySet<Arg>) -> Fut,
{
    fn drop(&mut self) {
        self.flush();
    }
}

enum LoadState<Arg, Value, Error, Fut, Batcher> {
    Failed(Option<LoadError<Error>>),
    Batched {
        key_token: Option<KeyToken>,
        waker_token: Option<WakerToken>,
        #[allow(clippy::type_complexity)]
        state: Arc<Mutex<State<Arg, Value, Error, Fut, Batcher>>>,
    },
}

/// A request for a single value, which shares its batch with every other
/// future loaded into the same batch. When awaited, it waits along with
/// those futures until the batch is closed, then drives the batch function
/// (if it's the one currently doing so) and returns the value for its own
/// key.
pub struct LoadFuture<Arg, Value, Error, Fut, Batcher> {
    inner: LoadState<Arg, Value, Error, Fut, Batcher>,
}

// The batch function's future is pinned in its own box; nothing in a
// LoadFuture relies on its address.
impl<Arg, Value, Error, Fut, Batcher> Unpin for LoadFuture<Arg, Value, Error, Fut, Batcher> {}

impl<Arg, Value, Error, Fut, Batcher> Future for LoadFuture<Arg, Value, Error, Fut, Batcher>
where
    Value: Clone,
    Error: Clone,
    Fut: Future<Output = Result<ValueSet<Value>, Error>>,
    Batcher: Fn(KeySet<Arg>) -> Fut,
{
    type Output = Result<Value, LoadError<Error>>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let (key_token, waker_token, state) = match &mut self.get_mut().inner {
            LoadState::Failed(err) => {
                return Poll::Ready(Err(err.take().unwrap_or(LoadError::Unresolved)))
            }
            LoadState::Batched {
                key_token,
                waker_token,
                state,
            } => (key_token, waker_token, state),
        };

        // Note about this mutex: it's safe to use in an async context, because
        // the lock is released when poll returns.
        let mut guard = lock(state);

        loop {
            match *guard {
                State::Accum(ref mut state) => {
                    // This is now the driving future. If the window closes
                    // the batch, we're the one who dispatches it.
                    state.wakers.upsert(waker_token, ctx.waker());
                    ready!(state.window.poll_elapsed(ctx));

                    trace!("batch window elapsed");
                    guard.dispatch();
                }

                State::Running(ref mut state) => {
                    state.wakers.upsert(waker_token, ctx.waker());

                    // Poll every call that hasn't settled yet, so that they
                    // all make progress concurrently.
                    let mut settled = true;
                    for group in state.groups.iter_mut() {
                        if group.poll(ctx).is_pending() {
                            settled = false;
                        }
                    }

                    if !settled {
                        return Poll::Pending;
                    }

                    let mut outcomes = ValueSet::new();
                    for group in state.groups.drain(..) {
                        group.settle_into(&mut outcomes);
                    }

                    // Some futures may have lost interest while we were in the
                    // Running state. Remove those tokens from the results.
                    for token in state.dropped_tokens.drain(..) {
                        outcomes.discard(token);
                    }

                    // Now that we have a result, signal all the waiting
                    // futures to wake up so they can get their results.
                    let mut all_wakers = mem::take(&mut state.wakers);
                    if let Some(token) = waker_token.take() {
                        // We're about to grab our result, so we don't need to
                        // wake ourself
                        all_wakers.discard_waker(token);
                    }
                    all_wakers.wake_all();

                    *guard = State::Done(outcomes);
                }

                State::Done(ref mut outcomes) => {
                    let result = key_token
                        .take()
                        .and_then(|token| outcomes.take(token))
                        .unwrap_or(Err(LoadError::Unresolved));

                    return Poll::Ready(result);
                }
            }
        }
    }
}

impl<Arg, Value, Error, Fut, Batcher> Drop for LoadFuture<Arg, Value, Error, Fut, Batcher> {
    fn drop(&mut self) {
        // An important thing to remember when dropping a LoadFuture: the
        // shared batch is only ever being driven by a single future.
        // Therefore, we have to ensure that another task is awoken to "take
        // over", in case this one was the driver.
        let (key_token, waker_token, state) = match &mut self.inner {
            LoadState::Failed(..) => return,
            LoadState::Batched {
                key_token,
                waker_token,
                state,
            } => (key_token, waker_token, state),
        };

        let mut guard = lock(state);

        match *guard {
            State::Accum(ref mut state) => {
                // Deregister ourselves from the KeySet, so that the key isn't
                // fetched if nobody else wants it.
                if let Some(token) = key_token.take() {
                    state.keys.discard_token(token);
                }

                if let Some(token) = waker_token.take() {
                    state.wakers.discard_and_wake(token);
                }
            }
            State::Running(ref mut state) => {
                if let Some(token) = waker_token.take() {
                    state.wakers.discard_and_wake(token);
                }

                // The KeySet is frozen (owned by the executing calls). Add our
                // token to the list of dropped tokens so that it can be
                // discarded from the results when they're ready.
                if let Some(token) = key_token.take() {
                    state.dropped_tokens.push(token);
                }
            }
            State::Done(ref mut outcomes) => {
                if let Some(token) = key_token.take() {
                    outcomes.discard(token);
                }
            }
        }
    }
}
