//! Concurrency combinators.
//!
//! - [`race_pair`] / [`race_triple`]: first settlement wins; losers are
//!   handed back as joinable fibers.
//! - [`race2`] / [`race3`]: winner-take-all; losers are canceled.

pub mod race;

pub use race::{Either, Race3, RacePair, RaceTriple, race2, race3, race_pair, race_triple};
