// AMF0 parser and serializer

mod value;

pub use value::*;
