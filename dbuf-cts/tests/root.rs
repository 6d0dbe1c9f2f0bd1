// All files containing tests
mod common;

mod embedded;
mod memory;
mod multiple;
mod push;
mod single;
mod support;
