pub mod cylinder_reader;
pub mod cylinder_writer;
