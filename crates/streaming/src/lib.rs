pub mod backoff;
pub mod link;
pub mod normalize;
pub mod protocol;
pub mod request;
pub mod spot;
pub mod store;

pub use backoff::*;
pub use link::*;
pub use normalize::{has_geometry, normalize, normalize_record};
pub use protocol::*;
pub use request::*;
pub use spot::*;
pub use store::*;
