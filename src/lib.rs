pub mod channel;
pub mod config;
pub mod convert;
pub mod registry;
pub mod schema;

pub use channel::{ChannelError, Reader, Writer};
pub use config::{ChannelConfig, ConfigError, Direction, Format, Job, Overrides};
pub use convert::{convert, run, ConvertError};
pub use registry::Registry;
pub use schema::{Schema, SchemaError, TypeTag};
