pub mod document;
pub mod matrix;
pub mod queue;
pub mod tenant;
