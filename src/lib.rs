pub mod archive;
pub mod cache;
pub mod catalog;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod library;
pub mod output;
pub mod pipeline;
pub mod reader;
pub mod store;
