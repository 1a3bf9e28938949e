pub mod correlate;
pub mod report;
pub mod summary;

pub use correlate::*;
pub use report::*;
pub use summary::*;
