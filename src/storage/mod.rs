pub mod buffer;
pub mod dbfile;
pub mod heap;
pub mod page;
pub mod tuple;
