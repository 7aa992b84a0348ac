pub mod proxy;

pub use proxy::{Outbound, ProxyClientStream};
