pub(crate) mod api_cmd;
pub mod builder;
pub mod node;
pub(crate) mod shutdown;
