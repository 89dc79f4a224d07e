pub mod content_stream;
pub mod document;
pub mod filters;
pub mod graph;
pub mod image_xobject;
pub mod parser;
pub mod reader;
pub mod writer;
