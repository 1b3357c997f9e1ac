pub mod common;
mod task_queue_tests;
