//! CLI module tests.

mod oneshot_test;
