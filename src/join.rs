//! Normalizing entity collections by identifier, and joining them back
//! together in the order of a base collection.

use std::borrow::Borrow;
use std::collections::hash_map::{self, HashMap};
use std::hash::Hash;

use crate::data::KeyedEntry;

/// A mapping from identifier to entity, built from a collection of
/// [`KeyedEntry`] values.
///
/// Building an index never fails: an empty collection gives an empty index,
/// and when two entities share an identifier the last one wins.
#[derive(Debug, Clone)]
pub struct Index<K, T> {
    entries: HashMap<K, T>,
}

impl<K, T> Default for Index<K, T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq, T> Index<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = T>) -> Self
    where
        T: KeyedEntry,
        T::Key: ToOwned<Owned = K>,
    {
        let entries = entries.into_iter();
        let mut index = HashMap::with_capacity(entries.size_hint().0);

        for entry in entries {
            index.insert(entry.get_key().to_owned(), entry);
        }

        Self { entries: index }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, K, T> {
        self.entries.iter()
    }
}

impl<K: Hash + Eq, T> IntoIterator for Index<K, T> {
    type Item = (K, T);
    type IntoIter = hash_map::IntoIter<K, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Normalize a collection into an [`Index`] keyed by each entity's
/// identifier.
pub fn index<T>(entities: impl IntoIterator<Item = T>) -> Index<<T::Key as ToOwned>::Owned, T>
where
    T: KeyedEntry,
    T::Key: ToOwned,
    <T::Key as ToOwned>::Owned: Hash + Eq,
{
    Index::from_entries(entities)
}

/// An order-preserving join of side indexes onto a base collection.
///
/// Each call to [`attach`][Join::attach] pairs every row with the entity
/// found under the row's identifier in another index, or `None` if there
/// isn't one. Rows are never dropped or reordered, so the result has exactly
/// the length and order of the base collection.
///
/// ```
/// use coalescer::{index, Join, KeyedEntry};
///
/// struct Price { id: String, amount: u32 }
///
/// impl KeyedEntry for Price {
///     type Key = str;
///     fn get_key(&self) -> &str { &self.id }
/// }
///
/// let prices = index(vec![Price { id: "2".into(), amount: 5 }]);
/// let ids = vec![String::from("1"), String::from("2")];
///
/// let amounts: Vec<Option<u32>> = Join::new(ids)
///     .attach(&prices)
///     .map(|(_id, price)| price.map(|price| price.amount));
///
/// assert_eq!(amounts, [None, Some(5)]);
/// ```
#[derive(Debug, Clone)]
pub struct Join<R> {
    rows: Vec<R>,
}

impl<R> Join<R> {
    pub fn new(base: impl IntoIterator<Item = R>) -> Self {
        Self {
            rows: base.into_iter().collect(),
        }
    }

    /// Pair every row with its entity from `side`, if `side` has one.
    pub fn attach<'i, K, S>(self, side: &'i Index<K, S>) -> Join<(R, Option<&'i S>)>
    where
        R: KeyedEntry,
        R::Key: Hash + Eq,
        K: Borrow<R::Key> + Hash + Eq,
    {
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                let found = side.get(row.get_key());
                (row, found)
            })
            .collect();

        Join { rows }
    }

    /// Attach `side` only if `enabled`; otherwise every row gets `None`, and
    /// the index is never consulted. Used when a side was never fetched.
    pub fn attach_if<'i, K, S>(self, enabled: bool, side: &'i Index<K, S>) -> Join<(R, Option<&'i S>)>
    where
        R: KeyedEntry,
        R::Key: Hash + Eq,
        K: Borrow<R::Key> + Hash + Eq,
    {
        if enabled {
            self.attach(side)
        } else {
            Join {
                rows: self.rows.into_iter().map(|row| (row, None)).collect(),
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }

    /// Turn every joined row into a composite record.
    pub fn map<C>(self, compose: impl FnMut(R) -> C) -> Vec<C> {
        self.rows.into_iter().map(compose).collect()
    }
}

/// Join a single side index onto `base`. See [`Join`].
pub fn join<'i, B, K, S>(base: impl IntoIterator<Item = B>, side: &'i Index<K, S>) -> Vec<(B, Option<&'i S>)>
where
    B: KeyedEntry,
    B::Key: Hash + Eq,
    K: Borrow<B::Key> + Hash + Eq,
{
    Join::new(base).attach(side).into_rows()
}
