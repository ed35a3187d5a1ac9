pub mod probe;

pub use probe::{LocalMediaProbe, detect_format};
