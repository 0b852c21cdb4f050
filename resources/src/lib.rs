pub mod backend;
pub mod cache;

pub use backend::{CacheBackend, RedisBackend};
pub use cache::{CookieRecord, ProxyList, ResourceCache};
