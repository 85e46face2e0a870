//! Data structures for passing keys and values into and out of a batch.

use std::borrow::Borrow;
use std::collections::hash_map::{Entry, HashMap};
use std::hash::Hash;
use std::mem;
use std::num::NonZeroUsize;

use thiserror::Error;

use crate::key::LookupKey;

#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    pub(crate) fn duplicate(&self) -> Self {
        Token(self.0)
    }
}

/// Something with a stable identifier. This is used to match the values
/// returned by a batch function back to their keys (see
/// [`KeySet::values_from_iter`]), and to build an [`Index`][crate::Index].
pub trait KeyedEntry {
    type Key: ?Sized;

    fn get_key(&self) -> &Self::Key;
}

impl KeyedEntry for String {
    type Key = str;

    fn get_key(&self) -> &str {
        self
    }
}

// Joined rows are keyed by their base entity.
impl<Base: KeyedEntry, Side> KeyedEntry for (Base, Side) {
    type Key = Base::Key;

    fn get_key(&self) -> &Base::Key {
        self.0.get_key()
    }
}

/// What to do when [`KeySet::values_from_iter`] sees two values for the same
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// Keep the first value seen
    Ignore,
    /// Keep the last value seen
    Replace,
    /// Fail with [`IntoValuesError::DuplicateKey`]
    Error,
}

/// The values produced by a batch function didn't line up with its keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntoValuesError {
    #[error("expected {expected} values for {expected} unique keys, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("no value was provided for key {key}")]
    MissingKey { key: LookupKey },

    #[error("value at position {position} does not belong to any requested key")]
    UnknownKey { position: usize },

    #[error("value at position {position} duplicates an earlier value for the same key")]
    DuplicateKey { position: usize },
}

#[derive(Debug)]
struct KeyEntry<Arg> {
    key: LookupKey,
    arg: Arg,
    token: Token,

    // The number of futures waiting for this key. Drops the entry to 0
    // rather than removing it, because tokens are positions in `entries`.
    waiters: usize,
}

impl<Arg> KeyEntry<Arg> {
    fn is_live(&self) -> bool {
        self.waiters > 0
    }

    // A ValueSet counts the number of *clones* needed, which is one less than
    // the number of waiters.
    fn clones(&self) -> usize {
        self.waiters - 1
    }
}

/// A set of unique lookup arguments passed into a batch function. Use the
/// [`keys`][KeySet::keys] method to get the arguments, in the order in which
/// they were first requested, so that you can execute your request. Then,
/// use one of the `values` methods to transform your response data into a
/// [`ValueSet`], which is handed back to the batch loader.
///
/// Arguments are deduplicated by their canonical [`LookupKey`]; if several
/// futures requested the same key, only the first argument is kept.
#[derive(Debug)]
pub struct KeySet<Arg> {
    // Tokens are created from positions in this vec, so entries should never
    // be removed while the set is accumulating. KeySets are short lived, so
    // this shouldn't be a problem.
    entries: Vec<KeyEntry<Arg>>,
    index: HashMap<LookupKey, usize>,
}

impl<Arg> KeySet<Arg> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a key to this KeySet, and return the token associated with that
    /// key. This token can then be used to pull a value out of the ValueSet
    /// associated with the key.
    pub(crate) fn add_key(&mut self, key: LookupKey, arg: Arg) -> Token {
        if let Some(&position) = self.index.get(&key) {
            let entry = &mut self.entries[position];
            entry.waiters += 1;
            return entry.token.duplicate();
        }

        let position = self.entries.len();
        let token = Token(NonZeroUsize::new(position + 1).unwrap_or(NonZeroUsize::MIN));
        self.index.insert(key.clone(), position);
        self.entries.push(KeyEntry {
            key,
            arg,
            token: token.duplicate(),
            waiters: 1,
        });

        token
    }

    /// A future lost interest in its key before the batch was dispatched. If
    /// it was the last one, the key won't be sent to the batch function.
    pub(crate) fn discard_token(&mut self, token: Token) {
        if let Some(entry) = self.entries.get_mut(token.0.get() - 1) {
            entry.waiters = entry.waiters.saturating_sub(1);
        }
    }

    /// Take the keyset out of this particular &mut self instance, replacing it
    /// with an empty set. Helper method for when the state transitions out
    /// of Accumulating.
    pub(crate) fn take(&mut self) -> Self {
        mem::replace(self, Self::new())
    }

    /// Split this set into the key groups that will each get their own call
    /// to the batch function. `max_keys` of `None` means a single group.
    /// Keys nobody is waiting for any more are dropped here.
    pub(crate) fn split(self, max_keys: Option<NonZeroUsize>) -> Vec<Self> {
        let live = self.entries.into_iter().filter(KeyEntry::is_live);

        let mut groups: Vec<Self> = Vec::new();
        for entry in live {
            let needs_group = match (groups.last(), max_keys) {
                (None, _) => true,
                (Some(group), Some(max)) => group.entries.len() >= max.get(),
                (Some(_), None) => false,
            };

            if needs_group {
                groups.push(Self::new());
            }

            if let Some(group) = groups.last_mut() {
                group.index.insert(entry.key.clone(), group.entries.len());
                group.entries.push(entry);
            }
        }

        groups
    }

    /// The tokens of this set, paired with the number of clones each one
    /// needs. Used to distribute an error to every waiter of a group.
    pub(crate) fn tokens(&self) -> Vec<(Token, usize)> {
        self.live()
            .map(|entry| (entry.token.duplicate(), entry.clones()))
            .collect()
    }

    fn live(&self) -> impl Iterator<Item = &KeyEntry<Arg>> + Clone {
        self.entries.iter().filter(|entry| entry.is_live())
    }

    fn into_live(self) -> impl Iterator<Item = KeyEntry<Arg>> {
        self.entries.into_iter().filter(KeyEntry::is_live)
    }

    /// Check if there are any keys in this keyset
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of unique keys in this keyset.
    #[inline]
    pub fn len(&self) -> usize {
        self.live().count()
    }

    /// Get an iterator over all the arguments in this keyset. These are
    /// guaranteed to be:
    ///
    /// - Unique, by their canonical [`LookupKey`]
    /// - In the order in which they were first requested
    ///
    /// [`values_from_seq`][KeySet::values_from_seq] expects its values in
    /// this same order.
    pub fn keys(&self) -> impl Iterator<Item = &Arg> + Clone {
        self.live().map(|entry| &entry.arg)
    }

    /// Like [`keys`][KeySet::keys], but paired with each argument's canonical
    /// [`LookupKey`].
    pub fn iter(&self) -> impl Iterator<Item = (&LookupKey, &Arg)> + Clone {
        self.live().map(|entry| (&entry.key, &entry.arg))
    }

    /// After you've completed your request, use this method to pair each value
    /// in your result with its key. This is the only way to create a ValueSet,
    /// which is then returned from your batch function.
    pub fn into_values<Value>(self, mut get_value: impl FnMut(&Arg) -> Value) -> ValueSet<Value> {
        let values = self
            .into_live()
            .map(move |entry| {
                let value = get_value(&entry.arg);
                (entry.token, ValueSetEntry::new(value, entry.waiters))
            })
            .collect();

        ValueSet { values }
    }

    /// Fallible version of into_values. Same as into_values, but will return
    /// an error the first time `get_value` returns an error.
    pub fn try_into_values<Value, Error>(
        self,
        mut get_value: impl FnMut(&Arg) -> Result<Value, Error>,
    ) -> Result<ValueSet<Value>, Error> {
        let values: Result<HashMap<Token, ValueSetEntry<Value>>, Error> = self
            .into_live()
            .map(move |entry| {
                let value = get_value(&entry.arg)?;
                Ok((entry.token, ValueSetEntry::new(value, entry.waiters)))
            })
            .collect();

        values.map(move |values| ValueSet { values })
    }

    /// Pair values with keys by position: the first value belongs to the
    /// first key yielded by [`keys`][KeySet::keys], and so on. Fails if
    /// there are more or fewer values than keys.
    pub fn values_from_seq<Value>(
        self,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<ValueSet<Value>, IntoValuesError> {
        let values: Vec<Value> = values.into_iter().collect();
        let expected = self.len();

        if values.len() != expected {
            return Err(IntoValuesError::LengthMismatch {
                expected,
                actual: values.len(),
            });
        }

        let values = self
            .into_live()
            .zip(values)
            .map(|(entry, value)| (entry.token, ValueSetEntry::new(value, entry.waiters)))
            .collect();

        Ok(ValueSet { values })
    }

    /// Pair values with keys through a map keyed by canonical [`LookupKey`]
    /// (see [`iter`][KeySet::iter]). Extra entries in the map are ignored;
    /// a key missing from the map is an error.
    pub fn values_from_map<Value>(
        self,
        mut values: HashMap<LookupKey, Value>,
    ) -> Result<ValueSet<Value>, IntoValuesError> {
        self.into_live()
            .map(|entry| match values.remove(&entry.key) {
                Some(value) => Ok((entry.token, ValueSetEntry::new(value, entry.waiters))),
                None => Err(IntoValuesError::MissingKey { key: entry.key }),
            })
            .collect::<Result<_, _>>()
            .map(|values| ValueSet { values })
    }

    /// Pair entities with the arguments that requested them, by matching each
    /// entity's [`KeyedEntry`] identifier against the arguments. The entities
    /// can come back in any order. Every key must be matched exactly once
    /// (subject to `on_duplicate`), and no entity may be left over.
    pub fn values_from_iter<Value>(
        self,
        on_duplicate: OnDuplicate,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<ValueSet<Value>, IntoValuesError>
    where
        Value: KeyedEntry,
        Value::Key: Hash + Eq,
        Arg: Borrow<Value::Key>,
    {
        let live: Vec<KeyEntry<Arg>> = self.into_live().collect();
        let mut slots: Vec<Option<Value>> = live.iter().map(|_| None).collect();

        {
            let positions: HashMap<&Value::Key, usize> = live
                .iter()
                .enumerate()
                .map(|(position, entry)| (entry.arg.borrow(), position))
                .collect();

            for (position, value) in values.into_iter().enumerate() {
                let slot = match positions.get(value.get_key()) {
                    Some(&slot) => &mut slots[slot],
                    None => return Err(IntoValuesError::UnknownKey { position }),
                };

                match (slot.is_some(), on_duplicate) {
                    (false, _) | (true, OnDuplicate::Replace) => *slot = Some(value),
                    (true, OnDuplicate::Ignore) => {}
                    (true, OnDuplicate::Error) => {
                        return Err(IntoValuesError::DuplicateKey { position })
                    }
                }
            }
        }

        live.into_iter()
            .zip(slots)
            .map(|(entry, slot)| match slot {
                Some(value) => Ok((entry.token, ValueSetEntry::new(value, entry.waiters))),
                None => Err(IntoValuesError::MissingKey { key: entry.key }),
            })
            .collect::<Result<_, _>>()
            .map(|values| ValueSet { values })
    }
}

#[derive(Debug)]
struct ValueSetEntry<Value> {
    count: usize,
    value: Value,
}

impl<Value> ValueSetEntry<Value> {
    fn new(value: Value, waiters: usize) -> Self {
        Self {
            value,
            count: waiters.saturating_sub(1),
        }
    }
}

/// A value set is an opaque data structure that contains the result of a batch
/// operation. It is created with one of the `values` methods on [`KeySet`],
/// and is used by the loader to distribute the values to the correct waiting
/// futures.
///
/// There is no way to build one that skips those methods:
///
/// ```compile_fail
/// let values: coalescer::ValueSet<i32> = Default::default();
/// ```
///
/// ```compile_fail
/// let keys: coalescer::KeySet<i32> = Default::default();
/// ```
#[derive(Debug)]
pub struct ValueSet<Value> {
    values: HashMap<Token, ValueSetEntry<Value>>,
}

impl<Value> ValueSet<Value> {
    pub(crate) fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// The number of unique keys with a value in this set
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Store a value for `token`, to be handed out `clones + 1` times.
    pub(crate) fn insert(&mut self, token: Token, clones: usize, value: Value) {
        self.values.insert(
            token,
            ValueSetEntry {
                count: clones,
                value,
            },
        );
    }

    /// Move every value of this set into `target`, converting it on the way.
    pub(crate) fn drain_into<Other>(self, target: &mut ValueSet<Other>, convert: impl Fn(Value) -> Other) {
        for (token, entry) in self.values {
            target.insert(token, entry.count, convert(entry.value));
        }
    }

    /// Discard a token associated with this ValueSet without getting the
    /// value. No-op if the token isn't present.
    pub(crate) fn discard(&mut self, token: Token) {
        match self.values.entry(token) {
            Entry::Vacant(..) => {}
            Entry::Occupied(entry) if entry.get().count == 0 => {
                entry.remove();
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().count -= 1;
            }
        }
    }
}

impl<Value: Clone> ValueSet<Value> {
    /// Take a value associated with a token out of this ValueSet. If the
    /// count of this token is > 0, the value is cloned.
    ///
    /// This function takes a Token by move, to help ensure that that token
    /// cannot be reused to take the same value again by accident.
    pub(crate) fn take(&mut self, token: Token) -> Option<Value> {
        match self.values.entry(token) {
            Entry::Vacant(..) => None,
            Entry::Occupied(entry) if entry.get().count == 0 => Some(entry.remove().value),
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.count -= 1;
                Some(entry.value.clone())
            }
        }
    }
}
