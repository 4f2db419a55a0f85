pub(crate) mod load_store_buffer;
pub(crate) mod memory;
