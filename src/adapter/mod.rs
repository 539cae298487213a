// Stream adapters: the bridge between the core's codec-typed track
// callbacks and whatever internal media pipeline a caller wires in.

mod clock;
mod dts;
mod from_stream;
mod to_stream;

pub use clock::*;
pub use dts::*;
pub use from_stream::*;
pub use to_stream::*;
