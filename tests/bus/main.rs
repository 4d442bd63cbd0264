//! Bus integration tests: dispatch, error pipelines and engines end to end.

mod support;
mod dispatch;
mod pipelines;
mod resolver;

#[cfg(feature = "broker")]
mod broker;
