//! Streaming engine tests.

mod runner_test;
mod team_test;
