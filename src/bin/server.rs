//! Composition root (spec §6 exit codes, §9's "one explicit entry point"
//! redesign flag). Loads config from the environment, wires every
//! subsystem through the same pattern as the library's own doctests,
//! spawns the background workers, and serves the control-plane API.

use std::sync::Arc;

use call_orchestrator::config::Config;
use call_orchestrator::control_plane::{self, AppState};
use call_orchestrator::delivery::{DeliveryAdapter, DeliveryEngine, SendGridEmailAdapter, TwilioSmsAdapter};
use call_orchestrator::digit_capture::DigitCaptureEngine;
use call_orchestrator::event_bus::EventBus;
use call_orchestrator::notification::{NotificationFanout, NotificationSink, Subscriber, WebhookSink};
use call_orchestrator::orchestrator::Orchestrator;
use call_orchestrator::persistence::Persistence;
use call_orchestrator::provider::connect::ConnectAdapter;
use call_orchestrator::provider::twilio::TwilioAdapter;
use call_orchestrator::provider::vonage::VonageAdapter;
use call_orchestrator::provider::{ProviderAdapter, ProviderRegistry};
use call_orchestrator::stream_pump::StreamPump;
use call_orchestrator::types::Priority;

use clap::Parser;
use tracing::{error, info};

/// Realtime voice-call orchestrator: telephony bridging, DTMF/OTP
/// capture, and multi-channel delivery behind an HMAC-signed API.
#[derive(Parser, Debug)]
#[command(name = "call-orchestrator", version)]
struct Cli {
    /// Address to bind the control-plane HTTP API to.
    #[arg(long, env = "CALL_ORCHESTRATOR_BIND", default_value = "0.0.0.0:8080")]
    bind: String,
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return 1;
        }
    };

    let persistence = match Persistence::connect(&config.database.url).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to connect to persistence store");
            return 2;
        }
    };
    if let Err(e) = persistence.run_migrations().await {
        error!(error = %e, "failed to run migrations");
        return 2;
    }

    let event_bus = Arc::new(EventBus::new().with_persistence(persistence.clone()));

    let providers = build_provider_registry(&config, event_bus.clone());
    let digit_capture = Arc::new(DigitCaptureEngine::new(
        config.digit_capture.inter_digit_timeout,
        config.digit_capture.overall_timeout,
    ));
    let stream_pump = Arc::new(StreamPump::new(event_bus.clone(), config.stream_pump.clone()));

    let orchestrator = Orchestrator::new(
        persistence.clone(),
        providers,
        event_bus.clone(),
        digit_capture,
        stream_pump,
        config.general.clone(),
        call_orchestrator::types::MachinePolicy::Hangup,
    );

    let delivery_adapters = build_delivery_adapters();
    let delivery = Arc::new(DeliveryEngine::new(persistence.clone(), delivery_adapters, config.delivery.clone()));

    let fanout = build_notification_fanout(persistence.clone());

    let delivery_worker = delivery.clone();
    tokio::spawn(async move { delivery_worker.run().await });
    tokio::spawn(async move { fanout.run().await });

    let state = AppState {
        orchestrator,
        persistence,
        event_bus,
        delivery,
        control_plane: config.control_plane.clone(),
    };
    let app = control_plane::router(state);

    let listener = match tokio::net::TcpListener::bind(&cli.bind).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, bind = %cli.bind, "failed to bind control-plane listener");
            return 2;
        }
    };
    info!(bind = %cli.bind, "control plane listening");

    let serve = axum::serve(listener, app);
    if let Err(e) = serve.with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "server exited with error");
        return 2;
    }

    info!("shutdown complete");
    0
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn build_provider_registry(config: &Config, event_bus: Arc<EventBus>) -> Arc<ProviderRegistry> {
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    let account_sid = std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_default();
    let auth_token = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
    let from_number = std::env::var("FROM_NUMBER").unwrap_or_default();
    adapters.push(Arc::new(TwilioAdapter::new(account_sid, auth_token, from_number.clone())));

    if let (Ok(instance_id), Ok(flow_id), Ok(api_key)) = (
        std::env::var("CONNECT_INSTANCE_ID"),
        std::env::var("CONNECT_CONTACT_FLOW_ID"),
        std::env::var("CONNECT_API_KEY"),
    ) {
        adapters.push(Arc::new(ConnectAdapter::new(instance_id, flow_id, api_key, from_number.clone())));
    }
    if let (Ok(application_id), Ok(jwt)) = (std::env::var("VONAGE_APPLICATION_ID"), std::env::var("VONAGE_JWT")) {
        adapters.push(Arc::new(VonageAdapter::new(application_id, jwt, from_number)));
    }

    Arc::new(ProviderRegistry::new(adapters, config.provider.clone()).with_event_bus(event_bus))
}

fn build_delivery_adapters() -> Vec<Arc<dyn DeliveryAdapter>> {
    let mut adapters: Vec<Arc<dyn DeliveryAdapter>> = Vec::new();
    let account_sid = std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_default();
    let auth_token = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
    adapters.push(Arc::new(TwilioSmsAdapter::new(account_sid, auth_token)));

    let sendgrid_key = std::env::var("SENDGRID_API_KEY").unwrap_or_default();
    adapters.push(Arc::new(SendGridEmailAdapter::new(sendgrid_key)));
    adapters
}

fn build_notification_fanout(persistence: Persistence) -> NotificationFanout {
    let sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(WebhookSink::new())];
    let subscribers = match std::env::var("NOTIFICATION_WEBHOOK_URL") {
        Ok(endpoint) => vec![Subscriber {
            id: "default".to_string(),
            channel: "webhook".to_string(),
            endpoint,
            priority_filter: Priority::Low,
        }],
        Err(_) => Vec::new(),
    };
    NotificationFanout::new(persistence, subscribers, sinks)
}
