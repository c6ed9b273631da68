/*!
 * Core Module
 * Error handling shared by every subsystem
 */

pub mod errors;

pub use errors::*;
