mod common;
mod history_tests;
mod retention_tests;
