//! Per-key queue tests.

mod keyed_test;
