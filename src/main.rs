/*!
 * mycni - Plugin Entry Point
 *
 * Invoked by the container runtime with the CNI_* environment and the
 * network configuration on stdin.
 */

use mycni::{init_tracing, plugin_main, CmdArgs, Plugin};
use std::io::Read;
use std::process::ExitCode;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let mut stdin = Vec::new();
    if let Err(e) = std::io::stdin().read_to_end(&mut stdin) {
        error!(error = %e, "failed to read network configuration from stdin");
    }

    let plugin = Plugin::new();
    let status = plugin_main(&plugin, CmdArgs::from_env(), &stdin, &mut std::io::stdout()).await;

    ExitCode::from(status as u8)
}
