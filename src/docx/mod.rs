pub mod apply;
pub mod document;
pub mod extract;
pub mod format;
pub mod package;
pub mod project;
pub mod xml;
