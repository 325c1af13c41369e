use loader_cache::{Abandoned, Source};

mod coalescing;
mod threads;

/// The error type used by the fetchers in these tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestError {
    Failed(String),
    Abandoned,
}

impl From<Abandoned> for TestError {
    fn from(_: Abandoned) -> Self {
        Self::Abandoned
    }
}

pub type Answer = (Source, Result<String, TestError>);

pub fn local(value: &str) -> Answer {
    (Source::Local, Ok(value.to_owned()))
}

pub fn remote(value: &str) -> Answer {
    (Source::Remote, Ok(value.to_owned()))
}
