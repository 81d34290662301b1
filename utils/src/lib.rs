pub mod byte_size;
pub use byte_size::ByteSize;

mod unique_id;
pub use unique_id::UniqueId;
