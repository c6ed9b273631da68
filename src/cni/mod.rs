/*!
 * CNI Protocol Surface
 * Invocation arguments, version negotiation, results and dispatch
 */

mod args;
mod dispatch;
mod result;
mod version;

pub use args::{CmdArgs, Command};
pub use dispatch::{plugin_main, Plugin};
pub use result::{AddResult, ErrorEnvelope, Interface};
pub use version::{
    check_supported, config_version, parse_version, version_at_least, VersionInfo,
    CURRENT_VERSION, IMPLICIT_VERSION, SUPPORTED_VERSIONS,
};
