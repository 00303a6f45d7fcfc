pub mod flood_fill;
pub mod rle;
pub mod composite;
pub mod sampling;

pub use flood_fill::*;
pub use rle::*;
pub use composite::*;
pub use sampling::*;
