//! Decoder and process tests.

mod decoder_test;
mod events_test;
mod process_test;
