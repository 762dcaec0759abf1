mod api;


pub use api::JellyfinApi;
