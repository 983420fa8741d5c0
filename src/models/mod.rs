pub mod guid_array;
pub mod media_store;
pub mod property_bag;
pub mod property_info;
pub mod view_state;

pub use guid_array::*;
pub use media_store::*;
pub use property_bag::*;
pub use property_info::*;
pub use view_state::*;
