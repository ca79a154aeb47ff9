mod helpers;

mod recovery_tests;
mod remove_tests;
