mod settings;

pub use settings::{Credentials, ProxySettings, Settings};
