pub mod accumulator;
pub mod collector;
pub mod feed;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod shutdown;
pub mod snapshot;
pub mod table;
pub mod trips;
