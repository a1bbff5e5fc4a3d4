pub mod constants;
pub mod movepick;
pub mod position;
pub mod search;
pub mod types;
pub mod util;
