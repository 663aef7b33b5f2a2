//! Integration test modules.

mod fixtures;
mod pipeline_test;
mod storage_test;
