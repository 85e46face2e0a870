use std::{collections::HashMap, default::Default, num::NonZeroUsize, task::Waker};

#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Token {
        Token(self.0)
    }
}

/// Data structure for managing a collection of wakers that are all interested
/// in a single shared batch. In particular, it is designed so that only a
/// single task needs to actually do the work of driving the batch to
/// completion, but other tasks can take its place if that one is dropped.
///
/// Wakers can be added to a wakerset; when added, a token associated with the
/// Waker is returned. This token should be associated with a waiting future
/// and can be used to:
/// - replace the waker on subsequent polls
/// - discard the waker from the wakerset.
/// These tokens cannot be cloned or otherwise duplicated; this helps to ensure
/// that their lifespan are correctly associated with a particular task.
///
/// The WakerSet maintains the notion of the "driving waker"; this is the
/// waker that most recently polled the batch. If the driving waker is
/// discarded from the set, another is selected and woken. In this way, we
/// create an ambiguous but nevertheless unbroken chain of wakers. So long as
/// futures take care to discard their stored tokens when dropped, the shared
/// batch will always have a "path forward".
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<Token, Waker>,
    driving_waker: Option<Token>,

    // Tokens are an ever-increasing integer. We assume that WakerSets are
    // relatively short-lived and that there's no chance of running out of
    // these.
    next_token: NonZeroUsize,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::with_capacity(1),
            next_token: NonZeroUsize::MIN,
            driving_waker: None,
        }
    }
}

impl WakerSet {
    /// Record that the future holding `slot` is polling the batch with
    /// `waker`. If the future has no token yet, a new one is created and
    /// stored in `slot`; otherwise its waker is replaced. Either way this
    /// waker becomes the driving waker.
    pub(crate) fn upsert(&mut self, slot: &mut Option<Token>, waker: &Waker) {
        match slot {
            Some(token) if self.wakers.contains_key(&*token) => {
                if let Some(existing) = self.wakers.get_mut(&*token) {
                    if !existing.will_wake(waker) {
                        existing.clone_from(waker);
                    }
                }
                self.driving_waker = Some(token.duplicate());
            }
            _ => *slot = Some(self.add_waker(waker.clone())),
        }
    }

    /// Add a new waker to this set, making it the driving waker. Return the
    /// token associated with this waker's entry in the set.
    #[must_use]
    fn add_waker(&mut self, waker: Waker) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);

        self.wakers.insert(token.duplicate(), waker);
        self.driving_waker = Some(token.duplicate());
        token
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker, the current driving waker is unset. This method should only be
    /// used when a future is completed; otherwise, discard_and_wake should
    /// be preferred to ensure that another wake takes this one's place if it
    /// was the driving waker.
    pub(crate) fn discard_waker(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker.as_ref() == Some(&token) {
            self.driving_waker = None;
        }
    }

    /// Discard a waker from this set. If that waker was the current driving
    /// waker (or there is currently no driving waker), an arbitrary waker is
    /// made the current driving waker and awoken.
    ///
    /// We create a new driving waker immediately because if a series of drops
    /// happen at the same time we need to ensure that at least one non-dropped
    /// waker is awoken.
    pub(crate) fn discard_and_wake(&mut self, token: Token) {
        self.wakers.remove(&token);
        if self.driving_waker.as_ref() == Some(&token) || self.driving_waker.is_none() {
            self.driving_waker = None;
            self.wake_driver();
        }
    }

    /// Wake the driving waker, so that it can make progress on the batch.
    /// If there isn't one, an arbitrary waker is promoted first. Used when
    /// the batch is flushed from outside of any poll.
    pub(crate) fn wake_driver(&mut self) {
        if self.driving_waker.is_none() {
            self.driving_waker = self.wakers.keys().next().map(Token::duplicate);
        }

        if let Some(waker) = self
            .driving_waker
            .as_ref()
            .and_then(|token| self.wakers.get(token))
        {
            waker.wake_by_ref();
        }
    }

    pub(crate) fn wake_all(self) {
        self.wakers
            .into_iter()
            .for_each(|(_token, waker)| waker.wake());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cooked_waker::{IntoWaker, Wake, WakeRef};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Debug, Clone, Default, IntoWaker)]
    struct CountingWaker {
        count: Arc<AtomicUsize>,
    }

    impl WakeRef for CountingWaker {
        fn wake_by_ref(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Wake for CountingWaker {}

    impl CountingWaker {
        fn wakes(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn discarding_a_waiter_keeps_the_driver() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();

        let mut set = WakerSet::default();
        let mut first_token = None;
        let mut second_token = None;

        set.upsert(&mut first_token, &first.clone().into_waker());
        set.upsert(&mut second_token, &second.clone().into_waker());

        // second is the driver; discarding first wakes nobody
        set.discard_and_wake(first_token.take().unwrap());
        assert_eq!(first.wakes(), 0);
        assert_eq!(second.wakes(), 0);

        set.wake_driver();
        assert_eq!(second.wakes(), 1);
    }

    #[test]
    fn discarding_the_driver_wakes_a_replacement() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();

        let mut set = WakerSet::default();
        let mut first_token = None;
        let mut second_token = None;

        set.upsert(&mut first_token, &first.clone().into_waker());
        set.upsert(&mut second_token, &second.clone().into_waker());

        set.discard_and_wake(second_token.take().unwrap());
        assert_eq!(first.wakes(), 1);
        assert_eq!(second.wakes(), 0);
    }
}
