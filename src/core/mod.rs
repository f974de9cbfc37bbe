use rand::distr::{Alphanumeric, SampleString};

pub(crate) mod blocking;

pub mod chunk;

pub mod item;

pub mod job;

pub mod listener;

pub mod parameters;

pub mod repository;

#[cfg(feature = "rdbc-sqlite")]
pub mod sqlite_repository;

pub mod step;

/// Generates a random name consisting of alphanumeric characters.
///
/// Used for steps and jobs built without an explicit name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
