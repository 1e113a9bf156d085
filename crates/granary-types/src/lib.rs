pub mod blob_id;
pub mod chunk_id;
