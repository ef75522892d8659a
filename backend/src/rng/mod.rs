//! Deterministic random number generation.
//!
//! All randomness in the engine is keyed: every draw is a pure function of
//! (global seed, location, draw index, simulant id, decision label, step).
//! There is no shared mutable generator, so results are independent of the
//! order in which simulants are processed.

pub mod keyed;

pub use keyed::{DrawKey, Xorshift64Star};
