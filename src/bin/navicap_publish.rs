//! navicap_publish - distribution side
//!
//! Serves the obstacle and config documents to one remote client over MQTT:
//! polls both documents, answers reads, merges config writes and pushes notifications.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use navicap::channel::DEMO_PERIOD;
use navicap::transport::{MqttTransport, MqttTransportOptions};
use navicap::{append_error_log, DistributionLoop, NavicapConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "NaviCap obstacle/config distribution over MQTT")]
struct Args {
    /// MQTT broker address (host:port, mqtt://, mqtts://).
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Allow non-loopback MQTT connections.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    /// Use TLS even without an mqtts:// scheme.
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "navicap-publish")]
    mqtt_client_id: String,

    /// Topic prefix for every NaviCap topic.
    #[arg(long, env = "MQTT_TOPIC_PREFIX", default_value = "navicap")]
    mqtt_topic_prefix: String,

    /// Publish rotating sample obstacles every 2 s.
    #[arg(long)]
    demo: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = NavicapConfig::load()?;

    let result = run(&args, &cfg);
    if let Err(e) = &result {
        log::error!("navicap_publish stopped: {:#}", e);
        if let Err(log_err) = append_error_log(&cfg.error_log_path, e) {
            log::warn!(
                "could not write {}: {}",
                cfg.error_log_path.display(),
                log_err
            );
        }
    }
    result
}

fn run(args: &Args, cfg: &NavicapConfig) -> Result<()> {
    let options = MqttTransportOptions {
        broker: args.mqtt_broker_addr.clone(),
        use_tls: args.mqtt_use_tls,
        allow_remote: args.allow_remote_mqtt,
        client_id: args.mqtt_client_id.clone(),
        prefix: args.mqtt_topic_prefix.clone(),
        username: args.mqtt_username.clone(),
        password: args.mqtt_password.clone(),
    };

    let (tx, rx) = mpsc::channel();
    let transport = MqttTransport::connect(&options, tx)?;
    let mut dist = DistributionLoop::open(cfg, transport)?;
    if args.demo {
        log::info!("demo mode: sample obstacles every {:?}", DEMO_PERIOD);
        dist.enable_demo(DEMO_PERIOD);
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("error setting Ctrl-C handler")?;

    log::info!("navicap_publish running (prefix {})", options.prefix);
    let outcome = dist.run(&rx, &running);

    if let Err(e) = dist.into_transport().disconnect() {
        log::warn!("MQTT disconnect failed: {}", e);
    }
    outcome
}
