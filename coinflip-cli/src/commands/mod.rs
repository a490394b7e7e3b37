pub mod serve;
pub mod simulate;
pub mod verify;

pub use serve::serve;
pub use simulate::simulate;
pub use verify::verify;
