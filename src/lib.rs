pub mod sys;
pub mod region;
pub mod program;
pub mod listing;
pub mod machine;
pub mod interp;
pub mod repl;
