pub mod curation;
pub mod pipeline;
pub mod report;
pub mod setup;
pub mod util;

pub use curation::*;
pub use pipeline::*;
pub use report::*;
pub use setup::*;
pub use util::*;
