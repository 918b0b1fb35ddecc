pub mod helios;
pub mod mock;
pub mod util;
