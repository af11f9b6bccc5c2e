// Entry point -- runs a loopback server with scripted clients
//
//   qwsim +set sim_clients 4 +set sim_latency 150 +set sv_gravity 600
//
// Every cvar can be set from the command line. RUST_LOG=debug adds
// per-frame detail.

use anyhow::Result;

use qwsim_common::common::com_printf;
use qwsim_common::cvar::CvarContext;
use qwsim_sys::host::{demo_world, host_register_cvars, Host};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let mut cvars = CvarContext::new();
    host_register_cvars(&mut cvars);
    cvars.apply_command_line(&args);

    com_printf(&format!("serverinfo: {}\n", cvars.serverinfo()));

    let mut host = Host::new(demo_world()?, &cvars)?;
    com_printf(&format!(
        "running {} clients for {:.1}s at {:.0} fps, {:.0} ms round trip\n",
        host.clients.len(),
        host.config.seconds,
        host.config.fps,
        host.config.latency * 1000.0
    ));
    host.run()?;
    host.report();
    Ok(())
}
