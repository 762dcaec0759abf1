pub mod jellyfin;
pub mod traits;

pub use jellyfin::JellyfinApi;
pub use traits::{MediaRef, MediaUrls, SubtitleCatalog};
