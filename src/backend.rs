pub(crate) mod alu;
pub(crate) mod bus;
pub(crate) mod predictor;
pub(crate) mod register_file;
pub(crate) mod reorder_buffer;
pub(crate) mod reservation_station;
