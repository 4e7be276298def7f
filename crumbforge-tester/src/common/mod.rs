pub mod file_cache;
pub mod scenario;
pub mod util;

pub use file_cache::FileCache;
pub use util::{parse_seeds, scenario_epoch, split_csv};
