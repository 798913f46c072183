pub mod ast;
pub mod parser;
pub mod path;
pub mod compiler;
pub mod dates;
pub mod matcher;
