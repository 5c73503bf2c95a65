pub(crate) mod crypto;
pub(crate) mod encoding;
pub(crate) mod hash;
pub(crate) mod time;
