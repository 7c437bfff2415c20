pub mod parameters;
pub mod streams;
pub mod tasks;
