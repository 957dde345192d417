mod announcement_tests;
mod common;
mod health_stats_tests;
mod run_tests;
mod source_tests;
