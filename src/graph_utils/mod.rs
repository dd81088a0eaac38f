pub mod graph;
pub mod ids;
pub mod layout;
pub mod merge;
pub mod view;
pub mod visibility;
