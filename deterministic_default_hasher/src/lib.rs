use std::hash::{BuildHasher, DefaultHasher};

/// A [`BuildHasher`] that builds the standard library's default hasher with a deterministic seed.
///
/// Used anywhere iteration order over a hash-based collection must not depend on process
/// randomisation, e.g. when breaking ties deterministically by a secondary key is not already
/// guaranteed by the caller.
#[derive(Default)]
pub struct DeterministicDefaultHasher;

impl BuildHasher for DeterministicDefaultHasher {
    type Hasher = DefaultHasher;

    fn build_hasher(&self) -> Self::Hasher {
        DefaultHasher::new()
    }
}
