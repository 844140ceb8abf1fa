use relay6::config::Config;
use relay6::server::Proxy;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let mut proxy = Proxy::start(cfg.bind_addr()?, cfg.target_port()?)?;

    let stop = proxy.stop_handle();
    signal_hook::flag::register(signal_hook::consts::SIGINT, stop.flag())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, stop.flag())?;

    proxy.run()
}
