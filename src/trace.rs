pub mod access_list;
pub mod recording;
pub mod trace_reader;
pub mod trace_writer;
