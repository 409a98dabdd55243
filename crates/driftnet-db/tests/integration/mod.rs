mod common;
mod dead_letter_tests;
mod document_tests;
mod fingerprint_tests;
mod frontier_tests;
mod service_tests;
