mod helpers;

mod concurrency_tests;
mod recovery_tests;
