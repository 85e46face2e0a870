//! Coalescer solves the "N+1 fetch" problem for a single logical operation.
//! When resolving one request fans out into many fine-grained lookups
//! against slow backing services (a list of items, each needing its own
//! price), coalescer collects those lookups, deduplicates them, makes one
//! backend call per batch group, and hands every caller the value for its
//! own key. On top of the loader it provides a selective fetch planner, so
//! sub-resources nobody asked for are never fetched, and an order-preserving
//! normalizer/joiner for stitching independently fetched collections back
//! together.
//!
//! ## Overview
//!
//! Suppose you had an API to fetch user data by username, which accepts
//! several usernames at once. A coalescer batch function takes a
//! [`KeySet<K>`], which contains all the unique arguments of a batch, and
//! returns a `Result<ValueSet<V>, E>`. A [`ValueSet`] contains all the
//! resulting values, matched with their original keys. The only way to get
//! one is through the methods of [`KeySet`], which check that every key got
//! exactly one value.
//!
//! ```
//! use coalescer::{IntoValuesError, KeySet, KeyedEntry, OnDuplicate, ValueSet};
//!
//! #[derive(Debug, Clone)]
//! struct UserData {
//!     username: String,
//!     name: String,
//! }
//!
//! impl KeyedEntry for UserData {
//!     type Key = str;
//!
//!     fn get_key(&self) -> &str {
//!         &self.username
//!     }
//! }
//!
//! # async fn get_users(usernames: Vec<String>) -> Vec<UserData> { vec![] }
//! async fn batch_get_users(usernames: KeySet<String>) ->
//!     Result<ValueSet<UserData>, IntoValuesError>
//! {
//!     // perform the API request
//!     let users = get_users(usernames.keys().cloned().collect()).await;
//!
//!     // This returns an error if `users` contains any unrecognized
//!     // usernames, or if any usernames are missing.
//!     usernames.values_from_iter(OnDuplicate::Ignore, users)
//! }
//! ```
//!
//! Once you have a batch function, create a [`BatchLoader`] for each
//! top-level operation. Every call to [`load`][BatchLoader::load] joins the
//! loader's current batch and returns a [`LoadFuture`] for that one key.
//! Arguments are compared by their canonical [`LookupKey`], so requesting
//! the same key twice only fetches it once. When the operation has issued
//! every load of its current phase, it calls [`flush`][BatchLoader::flush]
//! to close the batch, then awaits the futures.
//!
//! ```
//! use coalescer::{BatchLoader, BatchRules};
//! use futures::executor::block_on;
//! # use coalescer::{IntoValuesError, KeySet, KeyedEntry, OnDuplicate, ValueSet};
//! # #[derive(Debug, Clone)] struct UserData { username: String, name: String }
//! # impl KeyedEntry for UserData {
//! #     type Key = str;
//! #     fn get_key(&self) -> &str { &self.username }
//! # }
//! # async fn batch_get_users(usernames: KeySet<String>) ->
//! #     Result<ValueSet<UserData>, IntoValuesError>
//! # {
//! #     let users = usernames.keys().map(|username| UserData {
//! #         name: username.to_uppercase(),
//! #         username: username.clone(),
//! #     }).collect::<Vec<_>>();
//! #     usernames.values_from_iter(OnDuplicate::Ignore, users)
//! # }
//!
//! let loader = BatchLoader::new(BatchRules::new(batch_get_users));
//!
//! let alice = loader.load(String::from("alice"));
//! let bob = loader.load(String::from("bob"));
//! let alice_again = loader.load(String::from("alice"));
//! loader.flush();
//!
//! let (alice, bob, alice_again) = block_on(async { futures::join!(alice, bob, alice_again) });
//!
//! assert_eq!(alice.unwrap().name, "ALICE");
//! assert_eq!(bob.unwrap().name, "BOB");
//! assert_eq!(alice_again.unwrap().name, "ALICE");
//! ```
//!
//! [`BatchRules`] decide how the unique keys of a batch are split into calls
//! ([`Grouping`]: one call per key, calls of bounded size, or one call for
//! everything), whether the batch also closes on its own ([`Window`]), and
//! how long a call may take before its keys fail. The same knobs are
//! available as a deserializable [`LoaderSettings`].
//!
//! [`RequestedShape`] and [`is_requested`] gate optional sub-fetches on what
//! the caller actually asked for, and [`index`] and [`Join`] put the fetched
//! collections back together. The [`catalog`] module wires all of these
//! into a working search-then-enrich resolver.
//!
//! ## Design notes
//!
//! ### `KeySet` and `ValueSet`
//!
//! Traditional dataloader implementations use batching functions that take a
//! list of keys and return a same-length list of values paired with those
//! keys. The interface has no way to guarantee that the lists line up, and
//! doesn't account at all for duplicate keys.
//!
//! To solve both of these problems, coalescer uses the [`KeySet`] type for
//! incoming keys to a batch function, and the [`ValueSet`] type for outgoing
//! values. Every method that creates a [`ValueSet`] checks that it has
//! precisely the set of data matching the keys, and reports an
//! [`IntoValuesError`] if it doesn't.
//!
//! The [`KeySet`] deduplicates incoming keys, and only passes unique keys to
//! the batch function. The [`ValueSet`] internally stores how many requests
//! for a key have been made, and uses value cloning to give out values to
//! different futures (past the first) associated with the same key. In the
//! common case of no key duplicates, no clones will occur.
//!
//! ### Poll-driven design
//!
//! All of the asynchronous work in coalescer is driven through polling
//! [`LoadFuture`]. The batch function is not scheduled in any runtime or run
//! in the background; it is driven directly in the foreground by whichever
//! `LoadFuture` is currently polled.
//!
//! Because the batch only needs to be driven by a single task, the futures
//! of a batch track and notify only a single task to drive the shared batch
//! forward. The other futures are woken only when data is available (or
//! when the driving future is dropped). Every call of a batch is polled by
//! the driver, so calls for different key groups run concurrently.
//!
//! ### No caching
//!
//! A batch is forgotten as soon as it is dispatched. Loading a key again
//! after a flush fetches it again; there is no memoization beyond one batch.
//! Build fresh loaders for every top-level operation.

mod batch;
mod config;
mod data;
mod error;
mod join;
mod key;
mod shape;
mod wakerset;

pub mod catalog;


pub use batch::{BatchLoader, BatchRules, Grouping, LoadFuture, Window};
pub use config::LoaderSettings;
pub use data::{IntoValuesError, KeySet, KeyedEntry, OnDuplicate, ValueSet};
pub use error::LoadError;
pub use join::{index, join, Index, Join};
pub use key::{encode, EncodingError, LookupKey};
pub use shape::{is_requested, RequestedShape, ShapeParseError};
