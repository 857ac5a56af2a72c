pub mod config;
pub mod error;
pub mod forward_proxy;
pub mod logging;
pub mod redirect;
pub mod upstream;

pub use config::Config;
pub use error::ProxyError;
pub use forward_proxy::ForwardProxy;
