pub mod classifier;
pub mod encryption;
pub mod extract;
pub mod memory;
pub mod ocr;
pub mod queue;
pub mod rules;
pub mod storage;
pub mod store;
