pub mod hasher;
pub mod pipeline;
pub mod scanner;
