//! NewsAcquire - historical newspaper acquisition and research system.
//!
//! Acquires newspaper page images from the Library of Congress Chronicling
//! America archive, stores them in a content-keyed repository, runs OCR and
//! article segmentation through a durable work queue, indexes the extracted
//! text for search, and promotes reviewed article segments into the main
//! historical-events database.

pub mod archive;
pub mod cli;
pub mod config;
pub mod connector;
pub mod context;
pub mod errors;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod search;
pub mod storage;
