pub mod error;
pub mod grouping;
pub mod params;
pub mod table_reader;
pub mod types;
