pub mod queue;
pub mod wave_writer;
