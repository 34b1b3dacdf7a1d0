// SQLite holds documents, chunks and logs; LanceDB holds chunk vectors

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;
