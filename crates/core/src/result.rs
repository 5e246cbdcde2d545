//! Result type definition for redfishd core operations.

use crate::error::Error;

/// The standard Result type for core operations.
///
/// Use the `?` operator, `match`, or combinator methods to handle results.
///
/// # Examples
///
/// ```ignore
/// fn bind_address() -> Result<String> {
///     let config = Config::load("redfishd.toml")?;
///     Ok(config.server.bind_address)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
