// Utils module

mod byte_counter;
mod env;
mod query_string;
mod string_compare_secure;

pub use byte_counter::*;
pub use env::*;
pub use query_string::*;
pub use string_compare_secure::*;
